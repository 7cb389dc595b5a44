//! Status command - one poll, decoded

use airctrl_client::{DeviceClient, DeviceHandle};
use airctrl_core::{DeviceIdentity, NormalizedSnapshot};
use anyhow::Result;
use serde::Serialize;

use crate::output::{CapabilityRow, OutputContext, OutputFormat};

#[derive(Serialize)]
struct StatusReport<'a> {
    identity: &'a DeviceIdentity,
    profile: &'a str,
    snapshot: &'a NormalizedSnapshot,
}

/// Print the decoded status of a device
pub async fn status(
    client: &DeviceClient,
    host: &str,
    port: Option<u16>,
    raw: bool,
    ctx: &OutputContext,
) -> Result<()> {
    let handle = super::connect(client, host, port).await?;
    // connect has polled once already
    let result = match handle.last_snapshot() {
        Some(snapshot) => Ok(snapshot),
        None => handle.get_status().await,
    };
    if let Ok(snapshot) = &result {
        print_status(&handle, snapshot, raw, ctx);
    }
    handle.disconnect().await;
    result?;
    Ok(())
}

fn print_status(
    handle: &DeviceHandle,
    snapshot: &NormalizedSnapshot,
    raw: bool,
    ctx: &OutputContext,
) {
    let identity = handle.identity();
    let profile = handle.profile();

    if raw {
        ctx.print_json(&handle.last_raw());
        return;
    }

    if ctx.format == OutputFormat::Json {
        ctx.print_json(&StatusReport {
            identity: &identity,
            profile: &profile.model_id,
            snapshot,
        });
        return;
    }

    if ctx.format == OutputFormat::Table {
        let mut pairs = vec![
            ("Host", identity.address()),
            ("Model", identity.model_id.clone()),
            ("Profile", profile.model_id.clone()),
            ("State", handle.state().to_string()),
        ];
        if let Some(name) = &identity.name {
            pairs.insert(1, ("Name", name.clone()));
        }
        if let Some(version) = &identity.sw_version {
            pairs.push(("Firmware", version.clone()));
        }
        ctx.print_kv(&pairs);
        println!();
    }

    let rows: Vec<CapabilityRow> = snapshot
        .values
        .iter()
        .map(|(capability, value)| CapabilityRow {
            capability: capability.to_string(),
            value: value.to_string(),
            unit: profile
                .descriptor(*capability)
                .and_then(|d| d.unit.clone())
                .unwrap_or_default(),
        })
        .collect();
    ctx.print(&rows);

    if let Some(unknown) = handle.unknown_model() {
        ctx.warn(&format!("{} (showing generic capabilities)", unknown));
    }
    if !snapshot.unmapped.is_empty() && !ctx.quiet {
        let keys: Vec<&str> = snapshot.unmapped.keys().map(String::as_str).collect();
        ctx.info(&format!("Unmapped keys: {}", keys.join(", ")));
    }
}
