//! Handle states and outbound device events

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Capability, CapabilityValue, NormalizedSnapshot};

/// Lifecycle state of a connected device handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    /// Session established, polling not started yet
    Connected,
    /// Polls are succeeding
    Polling,
    /// Consecutive polls failed; a reconnect is due
    Stale,
    /// Re-establishing the session with backoff
    Reconnecting,
    /// Reconnect ceiling reached; resumable by a manual reconnect
    PermanentlyUnreachable,
    /// Torn down by the caller
    Disconnected,
}

impl HandleState {
    /// Whether the presentation layer should show the device as available
    pub fn is_available(&self) -> bool {
        matches!(self, HandleState::Connected | HandleState::Polling)
    }
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandleState::Connected => "connected",
            HandleState::Polling => "polling",
            HandleState::Stale => "stale",
            HandleState::Reconnecting => "reconnecting",
            HandleState::PermanentlyUnreachable => "permanently_unreachable",
            HandleState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Event emitted by a device handle for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// A poll produced a snapshot
    Snapshot {
        snapshot: NormalizedSnapshot,
        /// Device-advertised freshness interval (CoAP Max-Age)
        max_age_secs: u32,
        timestamp: DateTime<Utc>,
    },
    StateChanged {
        from: HandleState,
        to: HandleState,
    },
    PollFailed {
        message: String,
        consecutive_failures: u32,
    },
    /// A command could not be applied after all retries
    CommandFailed {
        capability: Capability,
        value: CapabilityValue,
        message: String,
    },
    /// The model id has no registered profile; a generic one is in use
    UnknownModel { model_id: String },
    /// Raw keys the profile does not describe (reported once per key set)
    UnmappedKeys { keys: Vec<String> },
    /// The device reported a different model after reconnecting
    ModelChanged { previous: String, current: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let event = DeviceEvent::StateChanged {
            from: HandleState::Polling,
            to: HandleState::Stale,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "state_changed", "from": "polling", "to": "stale"})
        );
    }

    #[test]
    fn test_availability() {
        assert!(HandleState::Polling.is_available());
        assert!(!HandleState::Stale.is_available());
        assert!(!HandleState::PermanentlyUnreachable.is_available());
    }
}
