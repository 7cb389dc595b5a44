//! Set command - push one capability value

use airctrl_client::DeviceClient;
use airctrl_core::{Capability, CapabilityValue};
use anyhow::{anyhow, Result};

use crate::output::{OutputContext, OutputFormat};

/// Set a capability on a device
pub async fn set(
    client: &DeviceClient,
    host: &str,
    port: Option<u16>,
    capability: &str,
    value: &str,
    ctx: &OutputContext,
) -> Result<()> {
    let capability: Capability = capability.parse().map_err(|e: String| anyhow!(e))?;
    let value = CapabilityValue::parse_loose(value);

    let handle = super::connect(client, host, port).await?;
    let result = handle.set_status(capability, value).await;
    handle.disconnect().await;
    let ack = result?;

    if ctx.format == OutputFormat::Json {
        ctx.print_json(&ack);
    } else {
        ctx.success(&format!(
            "{} set to {} ({} attempt{})",
            ack.capability,
            ack.value,
            ack.attempts,
            if ack.attempts == 1 { "" } else { "s" }
        ));
    }
    Ok(())
}
