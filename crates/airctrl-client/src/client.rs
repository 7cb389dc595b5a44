//! Device client facade

use std::sync::Arc;

use airctrl_coap::{create_connector, Connector, TransportConfig};
use airctrl_conv::CapabilityRegistry;
use airctrl_core::{Capability, CapabilityValue, DeviceIdentity, NormalizedSnapshot};
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::{ConnectError, PollError, SetError};
use crate::handle::{Ack, DeviceHandle, SnapshotStream};
use crate::session::SessionManager;

/// Connects to devices and drives them through their handles
///
/// The registry is shared read-only by every handle; each handle owns its
/// own session and poll task, so devices never block each other.
#[derive(Clone)]
pub struct DeviceClient {
    registry: Arc<CapabilityRegistry>,
    connector: Arc<dyn Connector>,
    config: ClientConfig,
}

impl DeviceClient {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        connector: Arc<dyn Connector>,
        config: ClientConfig,
    ) -> Self {
        Self {
            registry,
            connector,
            config,
        }
    }

    /// Client for real devices over UDP with the built-in profiles
    pub fn udp(config: ClientConfig) -> Self {
        Self::new(
            Arc::new(CapabilityRegistry::new()),
            create_connector(&TransportConfig::default()),
            config,
        )
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open a transport, establish a session and poll the device once
    ///
    /// The first poll discovers the model id (when the identity has none) and
    /// resolves the profile. An unknown model falls back to a generic profile
    /// unless `allow_unknown_models` is off.
    pub async fn connect(&self, identity: DeviceIdentity) -> Result<DeviceHandle, ConnectError> {
        info!(host = %identity.host, port = identity.port, "Connecting to device");

        let transport = self.connector.open(&identity).await?;
        let session = SessionManager::new(transport, &self.config);
        if let Err(e) = session.establish().await {
            session.close().await;
            return Err(e.into());
        }

        let handle = DeviceHandle::new(
            identity,
            session,
            Arc::clone(&self.registry),
            self.config.clone(),
        );

        if let Err(e) = handle.get_status().await {
            handle.disconnect().await;
            return Err(ConnectError::InitialStatus(e.to_string()));
        }

        if let Some(unknown) = handle.unknown_model() {
            if !self.config.allow_unknown_models {
                warn!(host = %handle.identity().host, error = %unknown, "Refusing unknown model");
                handle.disconnect().await;
                return Err(unknown.into());
            }
        }

        let identity = handle.identity();
        info!(
            host = %identity.host,
            model = %identity.model_id,
            profile = %handle.profile().model_id,
            "Device connected"
        );

        if self.config.auto_poll {
            handle.ensure_polling();
        }
        Ok(handle)
    }

    pub async fn get_status(&self, handle: &DeviceHandle) -> Result<NormalizedSnapshot, PollError> {
        handle.get_status().await
    }

    pub async fn set_status(
        &self,
        handle: &DeviceHandle,
        capability: Capability,
        value: CapabilityValue,
    ) -> Result<Ack, SetError> {
        handle.set_status(capability, value).await
    }

    pub async fn reset_filter(
        &self,
        handle: &DeviceHandle,
        capability: Capability,
    ) -> Result<Ack, SetError> {
        handle.reset_filter(capability).await
    }

    pub fn subscribe(&self, handle: &DeviceHandle) -> SnapshotStream {
        handle.subscribe()
    }

    pub async fn reconnect(&self, handle: &DeviceHandle) -> Result<NormalizedSnapshot, PollError> {
        handle.reconnect().await
    }

    pub async fn disconnect(&self, handle: &DeviceHandle) {
        handle.disconnect().await
    }
}
