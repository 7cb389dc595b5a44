//! Data models shared across the workspace

pub mod capability;
pub mod event;
pub mod identity;
pub mod snapshot;

pub use capability::{Capability, CapabilityValue, FilterLife};
pub use event::{DeviceEvent, HandleState};
pub use identity::{is_identity_key, DeviceIdentity, DEFAULT_COAP_PORT};
pub use snapshot::{NormalizedSnapshot, RawStatus};
