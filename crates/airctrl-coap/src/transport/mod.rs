//! Datagram transports
//!
//! - UDP adapter for real devices
//! - Simulated adapter (see [`crate::testing`]) for tests and demos
//!
//! # Example
//!
//! ```ignore
//! use airctrl_coap::transport::{create_connector, TransportConfig};
//!
//! let connector = create_connector(&TransportConfig::default());
//! let transport = connector.open(&DeviceIdentity::new("192.168.1.20")).await?;
//! ```

mod adapter;
pub mod error;
pub mod udp;

pub use adapter::{Connector, TransportAdapter};
pub use error::TransportError;
pub use udp::{UdpConnector, UdpTransport};

use std::sync::Arc;

use airctrl_core::DEFAULT_COAP_PORT;
use serde::{Deserialize, Serialize};

use crate::testing::SimulatedDevice;

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// CoAP over UDP
    Udp(UdpConfig),
    /// In-memory simulated device
    Simulated(SimulatedConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Udp(UdpConfig::default())
    }
}

/// UDP configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdpConfig {
    /// Port used when the device identity does not name one
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_COAP_PORT
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Simulated device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// Model the simulated device reports
    #[serde(default = "default_simulated_model")]
    pub model_id: String,
    /// Simulated latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
}

fn default_simulated_model() -> String {
    "AC2729/10".to_string()
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            model_id: default_simulated_model(),
            latency_ms: 0,
        }
    }
}

/// Create a connector based on configuration
pub fn create_connector(config: &TransportConfig) -> Arc<dyn Connector> {
    match config {
        TransportConfig::Udp(cfg) => Arc::new(UdpConnector::new(cfg.clone())),
        TransportConfig::Simulated(cfg) => Arc::new(SimulatedDevice::from_config(cfg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_config_deserialize() {
        let config: TransportConfig = serde_json::from_str(r#"{"type": "udp"}"#).unwrap();
        assert_eq!(config, TransportConfig::Udp(UdpConfig { port: 5683 }));

        let config: TransportConfig =
            serde_json::from_str(r#"{"type": "simulated", "model_id": "AC0850/11"}"#).unwrap();
        assert_eq!(
            config,
            TransportConfig::Simulated(SimulatedConfig {
                model_id: "AC0850/11".to_string(),
                latency_ms: 0,
            })
        );
    }
}
