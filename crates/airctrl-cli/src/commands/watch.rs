//! Watch command - follow a device until Ctrl+C

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use airctrl_client::DeviceClient;
use airctrl_core::{DeviceEvent, NormalizedSnapshot};
use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use tokio::sync::broadcast::error::RecvError;

use crate::output::{ChangeRow, OutputContext, OutputFormat};

/// Print status changes and handle events as they arrive
pub async fn watch(
    client: &DeviceClient,
    host: &str,
    port: Option<u16>,
    ctx: &OutputContext,
) -> Result<()> {
    let handle = super::connect(client, host, port).await?;
    let mut events = handle.events();
    let mut previous = handle.last_snapshot().unwrap_or_default();

    ctx.info(&format!(
        "Watching {} ({}), polling every {}s",
        host,
        handle.identity().model_id,
        handle.config().poll_interval_ms / 1000
    ));
    ctx.info("Press Ctrl+C to stop");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    match ctx.format {
        OutputFormat::Table => {
            print_changes(&NormalizedSnapshot::default(), &previous, Utc::now(), ctx)
        }
        OutputFormat::Csv => println!("timestamp,capability,old,new"),
        OutputFormat::Json => {}
    }

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if ctx.format == OutputFormat::Json {
                            println!("{}", serde_json::to_string(&event)?);
                        }
                        if let DeviceEvent::Snapshot { snapshot, timestamp, .. } = &event {
                            if ctx.format != OutputFormat::Json {
                                print_changes(&previous, snapshot, *timestamp, ctx);
                            }
                            previous = snapshot.clone();
                        } else if ctx.format != OutputFormat::Json {
                            print_event(&event, ctx);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        ctx.warn(&format!("Missed {} event(s)", missed));
                    }
                    Err(RecvError::Closed) => {
                        ctx.info("Device handle closed");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {}
        }
    }

    ctx.info("\nDisconnecting...");
    handle.disconnect().await;
    Ok(())
}

/// Capabilities whose value differs between two snapshots
fn changes(
    old: &NormalizedSnapshot,
    new: &NormalizedSnapshot,
    at: DateTime<Utc>,
) -> Vec<ChangeRow> {
    let timestamp = at.with_timezone(&Local).format("%H:%M:%S").to_string();
    new.values
        .iter()
        .filter(|(capability, value)| old.get(**capability) != Some(*value))
        .map(|(capability, value)| ChangeRow {
            timestamp: timestamp.clone(),
            capability: capability.to_string(),
            old: old.get(*capability).map(|v| v.to_string()).unwrap_or_default(),
            new: value.to_string(),
        })
        .collect()
}

fn print_changes(
    old: &NormalizedSnapshot,
    new: &NormalizedSnapshot,
    at: DateTime<Utc>,
    ctx: &OutputContext,
) {
    let rows = changes(old, new, at);
    if rows.is_empty() {
        return;
    }
    match ctx.format {
        OutputFormat::Csv => {
            for row in rows {
                println!("{},{},{},{}", row.timestamp, row.capability, row.old, row.new);
            }
        }
        _ => ctx.print(&rows),
    }
}

fn print_event(event: &DeviceEvent, ctx: &OutputContext) {
    match event {
        DeviceEvent::StateChanged { from, to } => {
            let msg = format!("State: {} -> {}", from, to);
            if to.is_available() {
                ctx.success(&msg);
            } else {
                ctx.warn(&msg);
            }
        }
        DeviceEvent::PollFailed {
            message,
            consecutive_failures,
        } => ctx.warn(&format!(
            "Poll failed ({} in a row): {}",
            consecutive_failures, message
        )),
        DeviceEvent::CommandFailed {
            capability,
            value,
            message,
        } => ctx.error(&format!(
            "Command {}={} failed: {}",
            capability, value, message
        )),
        DeviceEvent::UnknownModel { model_id } => {
            ctx.warn(&format!("Unknown model {}, using generic profile", model_id))
        }
        DeviceEvent::UnmappedKeys { keys } => {
            ctx.info(&format!("Unmapped keys: {}", keys.join(", ")))
        }
        DeviceEvent::ModelChanged { previous, current } => {
            ctx.warn(&format!("Model changed: {} -> {}", previous, current))
        }
        DeviceEvent::Snapshot { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airctrl_core::{Capability, CapabilityValue};

    #[test]
    fn test_changes_only_lists_differences() {
        let mut old = NormalizedSnapshot::new("AC2729/10");
        old.values.insert(Capability::Power, CapabilityValue::Bool(true));
        old.values.insert(Capability::Pm25, CapabilityValue::Integer(12));

        let mut new = old.clone();
        new.values.insert(Capability::Pm25, CapabilityValue::Integer(15));
        new.values.insert(Capability::Humidity, CapabilityValue::Integer(40));

        let rows = changes(&old, &new, Utc::now());
        let changed: Vec<(&str, &str, &str)> = rows
            .iter()
            .map(|r| (r.capability.as_str(), r.old.as_str(), r.new.as_str()))
            .collect();
        assert_eq!(changed, vec![("humidity", "", "40"), ("pm25", "12", "15")]);
    }
}
