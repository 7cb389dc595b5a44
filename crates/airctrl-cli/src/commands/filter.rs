//! Reset-filter command

use airctrl_client::DeviceClient;
use airctrl_core::Capability;
use anyhow::{bail, Result};

use crate::output::{OutputContext, OutputFormat};

/// Parse a filter name: "pre", "hepa", "carbon", "wick" or the full name
pub(crate) fn parse_filter(name: &str) -> Result<Capability> {
    let capability = name
        .parse::<Capability>()
        .or_else(|_| format!("{}_filter", name).parse::<Capability>());
    match capability {
        Ok(c) if c.is_filter() => Ok(c),
        _ => bail!(
            "Unknown filter '{}' (expected pre, hepa, carbon or wick)",
            name
        ),
    }
}

/// Reset a filter's life counter
pub async fn reset_filter(
    client: &DeviceClient,
    host: &str,
    port: Option<u16>,
    filter: &str,
    ctx: &OutputContext,
) -> Result<()> {
    let capability = parse_filter(filter)?;

    let handle = super::connect(client, host, port).await?;
    let result = handle.reset_filter(capability).await;
    handle.disconnect().await;
    let ack = result?;

    if ctx.format == OutputFormat::Json {
        ctx.print_json(&ack);
    } else {
        ctx.success(&format!("{} reset", ack.capability));
    }
    Ok(())
}
