//! Device client scenarios against the in-memory simulated device

use std::sync::Arc;

use airctrl_client::{
    BackoffConfig, ClientConfig, ConnectError, DeviceClient, DeviceHandle, HandshakeError,
    PollError, SetError,
};
use airctrl_coap::testing::{combo_status, numeric_status, SimulatedDevice};
use airctrl_coap::SimulatedConfig;
use airctrl_conv::{CapabilityRegistry, MatchKind};
use airctrl_core::{
    Capability, CapabilityValue, DeviceEvent, DeviceIdentity, FilterLife, HandleState, ModelError,
    RawStatus,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;

fn test_config() -> ClientConfig {
    ClientConfig {
        request_timeout_ms: 500,
        handshake_timeout_ms: 500,
        poll_interval_ms: 1000,
        auto_poll: false,
        backoff: BackoffConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 8000,
            jitter: false,
        },
        ..Default::default()
    }
}

fn client_for(device: &SimulatedDevice, config: ClientConfig) -> DeviceClient {
    DeviceClient::new(
        Arc::new(CapabilityRegistry::new()),
        Arc::new(device.clone()),
        config,
    )
}

async fn connect(device: &SimulatedDevice, config: ClientConfig) -> DeviceHandle {
    client_for(device, config)
        .connect(DeviceIdentity::new("simulated"))
        .await
        .unwrap()
}

fn patch(entries: &[(&str, Value)]) -> RawStatus {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn text(value: &str) -> CapabilityValue {
    CapabilityValue::from(value)
}

/// Drain events received so far
fn drain(events: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// --- Connect ---

#[tokio::test]
async fn test_connect_discovers_model_and_decodes() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;

    let identity = handle.identity();
    assert_eq!(identity.model_id, "AC2729/10");
    assert_eq!(identity.name.as_deref(), Some("Living Room"));
    assert_eq!(handle.profile().model_id, "AC2729/10");
    assert_eq!(handle.match_kind(), MatchKind::Exact);
    assert_eq!(handle.unknown_model(), None);
    assert_eq!(handle.state(), HandleState::Connected);
    assert_eq!(handle.max_age(), 60);

    let snapshot = handle.last_snapshot().unwrap();
    assert_eq!(snapshot.is_on(), Some(true));
    assert_eq!(snapshot.get(Capability::Mode), Some(&text("auto")));
    assert_eq!(snapshot.get(Capability::FanSpeed), Some(&text("speed 1")));
    assert_eq!(
        snapshot.get(Capability::TargetHumidity),
        Some(&CapabilityValue::Integer(50))
    );
    assert_eq!(
        snapshot.get(Capability::PreFilter),
        Some(&CapabilityValue::Filter(FilterLife {
            remaining_hours: 287,
            total_hours: Some(360),
        }))
    );
    // Identity keys are consumed, not reported as unmapped
    assert!(!snapshot.unmapped.contains_key("modelid"));
    assert!(!snapshot.unmapped.contains_key("name"));
    assert_eq!(snapshot.capabilities().count(), handle.capabilities().len());
}

#[tokio::test]
async fn test_get_status_is_idempotent() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;

    let first = handle.get_status().await.unwrap();
    let second = handle.get_status().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(device.status_requests(), 3);
}

#[tokio::test]
async fn test_rejected_handshake_fails_connect() {
    let device = SimulatedDevice::default();
    device.reject_handshakes(true);

    let err = client_for(&device, test_config())
        .connect(DeviceIdentity::new("simulated"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectError::Handshake(HandshakeError::Rejected(_))
    ));
}

#[tokio::test]
async fn test_plaintext_firmware_is_protocol_mismatch() {
    let device = SimulatedDevice::default();
    device.set_plaintext(true);

    let err = client_for(&device, test_config())
        .connect(DeviceIdentity::new("simulated"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConnectError::Handshake(HandshakeError::ProtocolMismatch(_))
    ));
}

// --- Unknown and changed models ---

#[tokio::test]
async fn test_unknown_model_gets_generic_profile() {
    let device = SimulatedDevice::new(combo_status("XX9999/10"));
    let handle = connect(&device, test_config()).await;

    assert_eq!(handle.match_kind(), MatchKind::Generic);
    assert_eq!(
        handle.unknown_model(),
        Some(ModelError::UnknownModel("XX9999/10".to_string()))
    );
    assert_eq!(
        handle.capabilities(),
        vec![Capability::Power, Capability::FanSpeed]
    );

    let snapshot = handle.last_snapshot().unwrap();
    assert_eq!(snapshot.is_on(), Some(true));
    assert!(snapshot.unmapped.contains_key("rhset"));

    let err = handle
        .set_status(Capability::TargetHumidity, CapabilityValue::Integer(60))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SetError::Model(ModelError::UnsupportedCapability {
            capability: Capability::TargetHumidity,
            ..
        })
    ));
    assert!(device.commands().is_empty());

    // Power and speed still work
    handle
        .set_status(Capability::FanSpeed, text("turbo"))
        .await
        .unwrap();
    assert_eq!(device.commands(), vec![patch(&[("om", json!("t"))])]);
}

#[tokio::test]
async fn test_unknown_numeric_model_uses_numeric_generic() {
    let device = SimulatedDevice::new(numeric_status("AC9999/10"));
    let handle = connect(&device, test_config()).await;

    assert_eq!(handle.profile().model_id, "generic-numeric");
    handle
        .set_status(Capability::Power, CapabilityValue::Bool(false))
        .await
        .unwrap();
    assert_eq!(device.status().get("D03102"), Some(&json!(0)));
}

#[tokio::test]
async fn test_unknown_model_refused_when_disallowed() {
    let device = SimulatedDevice::new(combo_status("XX9999/10"));
    let config = ClientConfig {
        allow_unknown_models: false,
        ..test_config()
    };

    let err = client_for(&device, config)
        .connect(DeviceIdentity::new("simulated"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ConnectError::Model(ModelError::UnknownModel("XX9999/10".to_string()))
    );
}

#[tokio::test]
async fn test_model_change_re_resolves_profile() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;
    let mut events = handle.events();

    device.set_raw("modelid", json!("AC3829/10"));
    handle.get_status().await.unwrap();

    assert_eq!(handle.profile().model_id, "AC3829/10");
    assert_eq!(handle.identity().model_id, "AC3829/10");
    assert!(drain(&mut events).contains(&DeviceEvent::ModelChanged {
        previous: "AC2729/10".to_string(),
        current: "AC3829/10".to_string(),
    }));
}

#[tokio::test]
async fn test_unmapped_keys_reported_once_per_key_set() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;
    let mut events = handle.events();

    device.set_raw("D99-99", json!(7));
    handle.get_status().await.unwrap();
    handle.get_status().await.unwrap();

    let notices: Vec<Vec<String>> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            DeviceEvent::UnmappedKeys { keys } => Some(keys),
            _ => None,
        })
        .collect();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains(&"D99-99".to_string()));
    assert_eq!(
        handle.last_snapshot().unwrap().unmapped.get("D99-99"),
        Some(&json!(7))
    );
}

#[tokio::test]
async fn test_snapshot_event_carries_max_age() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;
    let mut events = handle.events();

    device.set_max_age(15);
    handle.get_status().await.unwrap();

    assert_eq!(handle.max_age(), 15);
    let max_ages: Vec<u32> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            DeviceEvent::Snapshot { max_age_secs, .. } => Some(max_age_secs),
            _ => None,
        })
        .collect();
    assert_eq!(max_ages, vec![15]);
}

// --- Session recovery ---

#[tokio::test]
async fn test_integrity_mismatch_triggers_new_handshake() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;
    assert_eq!(device.handshakes(), 1);

    device.corrupt_next_status(1);
    let snapshot = handle.get_status().await.unwrap();

    assert_eq!(device.handshakes(), 2);
    assert_eq!(snapshot.is_on(), Some(true));
    assert!(handle.get_status().await.is_ok());
    assert_eq!(device.handshakes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_poll_fails_when_device_stays_silent() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;

    device.set_silent(true);
    // First timeout is below the threshold and is reported as is
    assert!(matches!(
        handle.get_status().await.unwrap_err(),
        PollError::Unreachable(_)
    ));
    // Second timeout expires the session; the re-handshake also times out
    // and the poll still reports the device unreachable
    match handle.get_status().await.unwrap_err() {
        PollError::Unreachable(message) => {
            assert!(message.starts_with("re-establishing session failed"), "{}", message)
        }
        other => panic!("expected Unreachable, got {:?}", other),
    }

    device.set_silent(false);
    assert!(handle.get_status().await.is_ok());
}

// --- Commands ---

#[tokio::test]
async fn test_commands_applied_in_submission_order() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;

    let (first, second) = tokio::join!(
        handle.set_status(Capability::Mode, text("allergen")),
        handle.set_status(Capability::Mode, text("sleep")),
    );
    first.unwrap();
    second.unwrap();
    handle
        .set_status(Capability::Power, CapabilityValue::Bool(false))
        .await
        .unwrap();

    assert_eq!(
        device.commands(),
        vec![
            patch(&[("mode", json!("A"))]),
            patch(&[("mode", json!("S"))]),
            patch(&[("pwr", json!("0"))]),
        ]
    );
    assert_eq!(device.status().get("mode"), Some(&json!("S")));
}

#[tokio::test]
async fn test_applied_command_updates_snapshot() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;

    let ack = handle
        .set_status(Capability::FanSpeed, text("turbo"))
        .await
        .unwrap();
    assert_eq!(ack.attempts, 1);
    assert_eq!(
        handle.last_snapshot().unwrap().get(Capability::FanSpeed),
        Some(&text("turbo"))
    );
}

#[tokio::test]
async fn test_model_errors_are_not_retried() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;

    let err = handle
        .set_status(Capability::Mode, text("warp"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SetError::Model(ModelError::OutOfDomain {
            capability: Capability::Mode,
            ..
        })
    ));

    let err = handle
        .set_status(Capability::Pm25, CapabilityValue::Integer(3))
        .await
        .unwrap_err();
    assert_eq!(err, SetError::Model(ModelError::ReadOnly(Capability::Pm25)));

    assert!(device.commands().is_empty());
    assert_eq!(device.handshakes(), 1);
}

#[tokio::test]
async fn test_expired_session_command_is_resent() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;

    device.expire_session();
    let ack = handle
        .set_status(Capability::Power, CapabilityValue::Bool(false))
        .await
        .unwrap();

    assert_eq!(ack.attempts, 1);
    assert_eq!(device.handshakes(), 2);
    assert_eq!(device.commands(), vec![patch(&[("pwr", json!("0"))])]);
}

#[tokio::test(start_paused = true)]
async fn test_command_retries_exhausted() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;
    let mut events = handle.events();

    device.set_silent(true);
    let err = handle
        .set_status(Capability::FanSpeed, text("turbo"))
        .await
        .unwrap_err();

    match err {
        SetError::Unreachable {
            capability,
            value,
            attempts,
            ..
        } => {
            assert_eq!(capability, Capability::FanSpeed);
            assert_eq!(value, text("turbo"));
            assert_eq!(attempts, 4);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(device.commands().is_empty());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, DeviceEvent::CommandFailed { capability: Capability::FanSpeed, .. })));

    // The device comes back: the next command goes through
    device.set_silent(false);
    handle
        .set_status(Capability::FanSpeed, text("turbo"))
        .await
        .unwrap();
    assert_eq!(device.commands().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_command_retried_after_dropped_response() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;

    device.drop_next_responses(1);
    let ack = handle
        .set_status(Capability::ChildLock, CapabilityValue::Bool(true))
        .await
        .unwrap();
    assert_eq!(ack.attempts, 2);
    assert_eq!(device.status().get("cl"), Some(&json!(true)));
}

#[tokio::test]
async fn test_target_humidity_nudges_and_snaps() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;

    // 50 + 1 is a nudge up by one step
    let ack = handle
        .set_status(Capability::TargetHumidity, CapabilityValue::Integer(51))
        .await
        .unwrap();
    assert_eq!(ack.value, CapabilityValue::Integer(60));
    assert_eq!(device.status().get("rhset"), Some(&json!(60)));

    // 60 - 1 is a nudge down
    handle
        .set_status(Capability::TargetHumidity, CapabilityValue::Integer(59))
        .await
        .unwrap();
    assert_eq!(device.status().get("rhset"), Some(&json!(50)));

    // Absolute requests are snapped
    let ack = handle
        .set_status(Capability::TargetHumidity, CapabilityValue::Integer(44))
        .await
        .unwrap();
    assert_eq!(ack.value, CapabilityValue::Integer(40));

    let err = handle
        .set_status(Capability::TargetHumidity, CapabilityValue::Integer(90))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SetError::Model(ModelError::OutOfDomain { .. })
    ));
}

#[tokio::test]
async fn test_humidification_switch_writes_power_and_function() {
    let mut status = combo_status("AC2729/10");
    status.insert("pwr".to_string(), json!("0"));
    status.insert("func".to_string(), json!("P"));
    let device = SimulatedDevice::new(status);
    let handle = connect(&device, test_config()).await;

    handle
        .set_status(Capability::Humidification, CapabilityValue::Bool(true))
        .await
        .unwrap();
    handle
        .set_status(Capability::Humidification, CapabilityValue::Bool(false))
        .await
        .unwrap();

    assert_eq!(
        device.commands(),
        vec![
            patch(&[("func", json!("PH")), ("pwr", json!("1"))]),
            patch(&[("func", json!("P"))]),
        ]
    );
}

#[tokio::test]
async fn test_numeric_profile_commands() {
    let device = SimulatedDevice::from_config(&SimulatedConfig {
        model_id: "AC3737/10".to_string(),
        ..Default::default()
    });
    let handle = connect(&device, test_config()).await;
    assert_eq!(handle.profile().model_id, "AC3737/10");

    let snapshot = handle.last_snapshot().unwrap();
    assert_eq!(snapshot.get(Capability::PreferredIndex), Some(&text("pm2.5")));
    assert_eq!(
        snapshot.get(Capability::Humidity),
        Some(&CapabilityValue::Integer(44))
    );

    handle
        .set_status(Capability::PreferredIndex, text("gas"))
        .await
        .unwrap();
    handle
        .set_status(Capability::Timer, CapabilityValue::Integer(4))
        .await
        .unwrap();

    assert_eq!(
        device.commands(),
        vec![
            patch(&[("D0312A", json!(1)), ("D0312B", json!(1))]),
            patch(&[("D03110", json!(4))]),
        ]
    );
    assert_eq!(
        handle.last_snapshot().unwrap().get(Capability::PreferredIndex),
        Some(&text("gas"))
    );
}

#[tokio::test]
async fn test_reset_filter_writes_total_lifetime() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;

    let ack = handle.reset_filter(Capability::PreFilter).await.unwrap();
    assert_eq!(
        ack.value,
        CapabilityValue::Filter(FilterLife {
            remaining_hours: 360,
            total_hours: Some(360),
        })
    );
    assert_eq!(device.status().get("fltsts0"), Some(&json!(360)));

    let err = handle.reset_filter(Capability::Power).await.unwrap_err();
    assert!(matches!(
        err,
        SetError::Model(ModelError::UnsupportedCapability { .. })
    ));
}

#[tokio::test]
async fn test_reset_filter_unsupported_by_model() {
    let device = SimulatedDevice::new(combo_status("AC1214/10"));
    let handle = connect(&device, test_config()).await;

    let err = handle.reset_filter(Capability::WickFilter).await.unwrap_err();
    assert!(matches!(
        err,
        SetError::Model(ModelError::UnsupportedCapability {
            capability: Capability::WickFilter,
            ..
        })
    ));
}

// --- Scheduler ---

#[tokio::test(start_paused = true)]
async fn test_subscribe_streams_polled_snapshots() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;

    let mut stream = handle.subscribe();
    let first = stream.next().await.unwrap();
    assert_eq!(first.get(Capability::Pm25), Some(&CapabilityValue::Integer(4)));

    device.set_raw("pm25", json!(12));
    let next = stream.next().await.unwrap();
    assert_eq!(next.get(Capability::Pm25), Some(&CapabilityValue::Integer(12)));

    // Detaching a subscriber does not stop polling
    drop(stream);
    let polled = device.status_requests();
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    assert!(device.status_requests() >= polled + 2);
    assert_eq!(handle.state(), HandleState::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_stale_device_reconnects() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let config = ClientConfig {
        auto_poll: true,
        stale_after_failures: 2,
        ..test_config()
    };
    let handle = connect(&device, config).await;
    let mut states = handle.state_changes();
    let mut events = handle.events();

    device.set_silent(true);
    states
        .wait_for(|s| *s == HandleState::Reconnecting)
        .await
        .unwrap();

    let failures: Vec<u32> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            DeviceEvent::PollFailed {
                consecutive_failures,
                ..
            } => Some(consecutive_failures),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec![1, 2]);

    let handshakes = device.handshakes();
    device.set_silent(false);
    states
        .wait_for(|s| *s == HandleState::Polling)
        .await
        .unwrap();
    assert!(device.handshakes() > handshakes);
    assert!(handle.get_status().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_attempts_follow_capped_exponential_backoff() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let config = ClientConfig {
        auto_poll: true,
        backoff: BackoffConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 4000,
            jitter: false,
        },
        ..test_config()
    };
    let handshake_timeout = config.handshake_timeout_ms;
    let handle = connect(&device, config).await;
    let mut states = handle.state_changes();

    device.set_silent(true);
    states
        .wait_for(|s| *s == HandleState::Reconnecting)
        .await
        .unwrap();

    // Enough sync attempts to see the delay reach its ceiling
    let before = device.sync_attempts().len();
    tokio::time::timeout(std::time::Duration::from_secs(120), async {
        while device.sync_attempts().len() < before + 7 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    })
    .await
    .unwrap();

    // Gap between attempts minus the time spent waiting on the handshake,
    // to the nearest 100 ms
    let attempts = device.sync_attempts();
    let delays: Vec<u64> = attempts
        .windows(2)
        .map(|pair| {
            let gap = pair[1].duration_since(pair[0]).as_millis() as u64;
            (gap.saturating_sub(handshake_timeout) + 50) / 100 * 100
        })
        .collect();

    let schedule = [1000, 2000, 4000, 4000, 4000];
    assert!(
        delays.windows(schedule.len()).any(|w| w == schedule),
        "delays {:?} do not contain {:?}",
        delays,
        schedule
    );
    assert!(delays.iter().all(|d| *d <= 4000), "delays {:?}", delays);
    assert_eq!(handle.state(), HandleState::Reconnecting);

    handle.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_ceiling_and_manual_resume() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let config = ClientConfig {
        auto_poll: true,
        stale_after_failures: 1,
        max_reconnect_attempts: Some(3),
        ..test_config()
    };
    let handle = connect(&device, config).await;
    let mut states = handle.state_changes();

    device.set_silent(true);
    states
        .wait_for(|s| *s == HandleState::PermanentlyUnreachable)
        .await
        .unwrap();
    assert!(!handle.state().is_available());

    // No automatic attempts after giving up
    let handshakes = device.handshakes();
    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
    assert_eq!(device.handshakes(), handshakes);

    device.set_silent(false);
    handle.reconnect().await.unwrap();
    assert_eq!(handle.state(), HandleState::Polling);

    // Polling resumed
    let polled = device.status_requests();
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    assert!(device.status_requests() > polled);
}

// --- Disconnect ---

#[tokio::test]
async fn test_disconnect_is_terminal() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;

    handle.disconnect().await;
    handle.disconnect().await;

    assert_eq!(handle.state(), HandleState::Disconnected);
    assert_eq!(handle.get_status().await.unwrap_err(), PollError::Disconnected);
    assert_eq!(
        handle
            .set_status(Capability::Power, CapabilityValue::Bool(false))
            .await
            .unwrap_err(),
        SetError::Disconnected
    );
    assert!(device.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_in_flight_command() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let handle = connect(&device, test_config()).await;

    device.set_silent(true);
    let in_flight = {
        let handle = handle.clone();
        tokio::spawn(async move {
            handle
                .set_status(Capability::Power, CapabilityValue::Bool(false))
                .await
        })
    };
    tokio::task::yield_now().await;

    handle.disconnect().await;
    assert_eq!(in_flight.await.unwrap().unwrap_err(), SetError::Disconnected);
    assert_eq!(handle.state(), HandleState::Disconnected);
}
