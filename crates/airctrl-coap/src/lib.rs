//! airctrl-coap - Encrypted CoAP transport codec for Philips air devices
//!
//! This crate owns the wire contract with the device firmware: CoAP message
//! framing, the payload cipher with its integrity digest, the request and
//! response shapes of the three device endpoints, and the datagram
//! transports used to carry them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       codec                               │
//! │  sync / status / control requests and responses          │
//! │                                                          │
//! │  ┌──────────────┐              ┌──────────────────────┐  │
//! │  │ message      │              │ crypto               │  │
//! │  │ (CoAP frame) │              │ (AES-CBC + SHA-256)  │  │
//! │  └──────────────┘              └──────────────────────┘  │
//! │                          │                               │
//! │                ┌─────────┴─────────┐                     │
//! │                │ TransportAdapter  │                     │
//! │                │ (UDP / simulated) │                     │
//! │                └───────────────────┘                     │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod crypto;
pub mod error;
pub mod message;
pub mod testing;
pub mod transport;

pub use codec::{ControlOutcome, StatusResponse, CONTROL_PATH, STATUS_PATH, SYNC_PATH};
pub use crypto::ClientKey;
pub use error::{FrameError, FrameResult, ResponseError};
pub use message::{CoapMessage, Code, MessageType};
pub use transport::{
    create_connector, Connector, SimulatedConfig, TransportAdapter, TransportConfig,
    TransportError, UdpConfig, UdpConnector,
};
