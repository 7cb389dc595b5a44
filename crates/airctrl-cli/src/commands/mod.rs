//! Command implementations

mod filter;
mod profiles;
mod set;
mod status;
mod watch;

pub use filter::reset_filter;
pub use profiles::profiles;
pub use set::set;
pub use status::status;
pub use watch::watch;

use airctrl_client::{DeviceClient, DeviceHandle};
use airctrl_core::DeviceIdentity;
use anyhow::{Context, Result};

/// Connect to a device, naming the host in any failure
async fn connect(client: &DeviceClient, host: &str, port: Option<u16>) -> Result<DeviceHandle> {
    let mut identity = DeviceIdentity::new(host);
    if let Some(port) = port {
        identity = identity.with_port(port);
    }
    client
        .connect(identity)
        .await
        .with_context(|| format!("Failed to connect to {}", host))
}
