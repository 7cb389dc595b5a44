//! airctrl-conv - Status conversion for Philips air purifiers and humidifiers
//!
//! Translates each device's raw, model-specific status record into the
//! normalized capability model, and desired capability values back into
//! raw command patches.
//!
//! # Features
//!
//! - **Declarative profiles** - per-model capability descriptors, no
//!   per-model branching in the conversion path
//! - **Total decoding** - missing keys become `Unavailable`, unknown
//!   enumerations fall back to an explicit label, unknown keys are kept
//! - **Graceful resolution** - exact model, then family, then a generic
//!   power + fan speed profile
//! - **YAML profile files** - extend the built-in table without rebuilding
//!
//! # Quick Start
//!
//! ```rust
//! use airctrl_conv::{decode, encode, CapabilityRegistry};
//! use airctrl_core::{Capability, CapabilityValue, RawStatus};
//! use serde_json::json;
//!
//! let registry = CapabilityRegistry::new();
//! let profile = registry.resolve("AC2729/10").profile;
//!
//! let mut raw = RawStatus::new();
//! raw.insert("pwr".into(), json!("1"));
//! raw.insert("om".into(), json!("t"));
//!
//! let snapshot = decode(&raw, &profile);
//! assert_eq!(snapshot.get(Capability::FanSpeed), Some(&CapabilityValue::from("turbo")));
//!
//! let patch = encode(Capability::Power, &CapabilityValue::Bool(false), &profile).unwrap();
//! assert_eq!(patch.get("pwr"), Some(&json!("0")));
//! ```
//!
//! # YAML Profile Files
//!
//! ```yaml
//! profiles:
//!   - model_id: AC4236/10
//!     capabilities:
//!       - capability: power
//!         rule: switch
//!         key: pwr
//!         on: "1"
//!         off: "0"
//!         writable: true
//!       - capability: fan_speed
//!         rule: choice
//!         key: om
//!         options:
//!           - { raw: "1", label: speed 1 }
//!           - { raw: "t", label: turbo }
//!         writable: true
//! ```

pub mod builtin;
pub mod decode;
pub mod definition;
pub mod encode;
pub mod error;
pub mod profile;
pub mod registry;
pub mod types;

pub use decode::{decode, decode_value};
pub use definition::{CapabilityDescriptor, Rule};
pub use encode::{encode, encode_value, step_target};
pub use error::{ConvError, ConvResult, EncodeError};
pub use profile::ModelProfile;
pub use registry::{CapabilityRegistry, MatchKind, Resolution};
pub use types::{Domain, ValueRange};
