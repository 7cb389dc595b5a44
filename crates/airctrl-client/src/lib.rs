//! airctrl-client - Device client for Philips air purifiers and humidifiers
//!
//! This crate drives devices over the encrypted CoAP protocol:
//!
//! - [`SessionManager`] performs the key exchange and sends requests under
//!   the session key, reporting when the session must be re-established
//! - [`DeviceClient`] connects devices and exposes status polls, commands
//!   and snapshot subscriptions through a [`DeviceHandle`]
//! - the poll scheduler refreshes each device at a fixed interval and
//!   reconnects stale devices with exponential backoff
//!
//! # Example
//!
//! ```ignore
//! use airctrl_client::{ClientConfig, DeviceClient};
//! use airctrl_core::{Capability, CapabilityValue, DeviceIdentity};
//!
//! let client = DeviceClient::udp(ClientConfig::default());
//! let handle = client.connect(DeviceIdentity::new("192.168.1.40")).await?;
//!
//! let snapshot = handle.get_status().await?;
//! println!("power: {:?}", snapshot.is_on());
//!
//! handle.set_status(Capability::FanSpeed, CapabilityValue::from("turbo")).await?;
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod handle;
mod scheduler;
pub mod session;

pub use backoff::Backoff;
pub use client::DeviceClient;
pub use config::{BackoffConfig, ClientConfig};
pub use error::{ConnectError, HandshakeError, PollError, SessionError, SetError};
pub use handle::{Ack, DeviceHandle, SnapshotStream};
pub use session::{Request, Response, SessionManager, SessionState};
