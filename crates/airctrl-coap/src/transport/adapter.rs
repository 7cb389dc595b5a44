//! Transport adapter traits

use std::sync::Arc;
use std::time::Duration;

use airctrl_core::DeviceIdentity;
use async_trait::async_trait;

use super::TransportError;

/// Datagram transport to a single device
///
/// Abstracts the underlying mechanism (UDP socket, in-memory simulator) and
/// carries opaque CoAP frames. Matching responses to requests is left to the
/// caller, since devices may push unsolicited observe notifications.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Send one datagram
    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next datagram from the device
    async fn receive(&self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Check if the transport is open
    async fn is_connected(&self) -> bool;

    /// Drop the current socket and open a fresh one
    async fn reconnect(&self) -> Result<(), TransportError>;

    /// Release the underlying socket; later calls fail with `Closed`
    async fn close(&self);

    /// Human-readable peer address
    fn peer(&self) -> String;
}

/// Opens transports for devices
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Arc<dyn TransportAdapter>, TransportError>;
}
