//! UDP transport

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use airctrl_core::DeviceIdentity;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tracing::debug;

use super::{Connector, TransportAdapter, TransportError, UdpConfig};

const MAX_DATAGRAM: usize = 8192;

/// A connected UDP socket to one device
pub struct UdpTransport {
    peer: SocketAddr,
    socket: RwLock<Option<Arc<UdpSocket>>>,
}

impl UdpTransport {
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let peer = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", host, e)))?
            .next()
            .ok_or_else(|| {
                TransportError::ConnectionFailed(format!("{}: no address", host))
            })?;

        let socket = Self::open_socket(peer).await?;
        debug!(%peer, "UDP transport opened");

        Ok(Self {
            peer,
            socket: RwLock::new(Some(Arc::new(socket))),
        })
    }

    async fn open_socket(peer: SocketAddr) -> Result<UdpSocket, TransportError> {
        let bind = if peer.is_ipv4() {
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
        } else {
            SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(socket)
    }

    fn socket(&self) -> Result<Arc<UdpSocket>, TransportError> {
        self.socket.read().clone().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl TransportAdapter for UdpTransport {
    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError> {
        let socket = self.socket()?;
        socket
            .send(datagram)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let socket = self.socket()?;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = tokio::time::timeout(timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| TransportError::Timeout(timeout.as_millis() as u64))?
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        buf.truncate(len);
        Ok(buf)
    }

    async fn is_connected(&self) -> bool {
        self.socket.read().is_some()
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let socket = Self::open_socket(self.peer).await?;
        *self.socket.write() = Some(Arc::new(socket));
        debug!(peer = %self.peer, "UDP transport reopened");
        Ok(())
    }

    async fn close(&self) {
        self.socket.write().take();
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

/// Opens [`UdpTransport`]s, using the identity's port or the configured default
#[derive(Debug, Clone, Default)]
pub struct UdpConnector {
    config: UdpConfig,
}

impl UdpConnector {
    pub fn new(config: UdpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for UdpConnector {
    async fn open(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Arc<dyn TransportAdapter>, TransportError> {
        let port = if identity.port == 0 {
            self.config.port
        } else {
            identity.port
        };
        let transport = UdpTransport::connect(&identity.host, port).await?;
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_round_trip_and_close() {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = device.local_addr().unwrap().port();

        let transport = UdpTransport::connect("127.0.0.1", port).await.unwrap();
        transport.send(b"ping").await.unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = device.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");
        device.send_to(b"pong", from).await.unwrap();

        let reply = transport.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply, b"pong".to_vec());

        transport.close().await;
        assert!(!transport.is_connected().await);
        assert_eq!(transport.send(b"x").await, Err(TransportError::Closed));

        transport.reconnect().await.unwrap();
        assert!(transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_udp_receive_times_out() {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = device.local_addr().unwrap().port();

        let transport = UdpTransport::connect("127.0.0.1", port).await.unwrap();
        let err = transport
            .receive(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
