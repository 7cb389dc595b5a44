//! Client configuration
//!
//! All durations are in milliseconds so the structs map one-to-one onto
//! YAML/TOML configuration files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Policy knobs of the device client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for one status or control exchange
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Timeout for the key exchange
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Interval between scheduled polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Consecutive failed polls before a device is considered stale
    #[serde(default = "default_stale_after_failures")]
    pub stale_after_failures: u32,

    /// Retries of a command after the first attempt fails
    #[serde(default = "default_set_retries")]
    pub set_retries: u32,

    /// Consecutive timeouts after which the session is treated as expired
    #[serde(default = "default_timeout_threshold")]
    pub timeout_threshold: u32,

    /// Backoff between command retries and reconnect attempts
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Reconnect attempts before giving up on a device; unlimited when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,

    /// Start the poll scheduler when a device connects
    #[serde(default = "default_true")]
    pub auto_poll: bool,

    /// Accept devices whose model has no registered profile
    #[serde(default = "default_true")]
    pub allow_unknown_models: bool,
}

fn default_request_timeout() -> u64 {
    5000
}

fn default_handshake_timeout() -> u64 {
    5000
}

fn default_poll_interval() -> u64 {
    30_000
}

fn default_stale_after_failures() -> u32 {
    3
}

fn default_set_retries() -> u32 {
    3
}

fn default_timeout_threshold() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            handshake_timeout_ms: default_handshake_timeout(),
            poll_interval_ms: default_poll_interval(),
            stale_after_failures: default_stale_after_failures(),
            set_retries: default_set_retries(),
            timeout_threshold: default_timeout_threshold(),
            backoff: BackoffConfig::default(),
            max_reconnect_attempts: None,
            auto_poll: true,
            allow_unknown_models: true,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Exponential backoff with a ceiling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First delay; each following delay doubles
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Ceiling for a single delay
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Randomize each delay between zero and its nominal value
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    300_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            jitter: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config: ClientConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.stale_after_failures, 3);
        assert_eq!(config.max_reconnect_attempts, None);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
poll_interval_ms: 10000
max_reconnect_attempts: 5
backoff:
  max_delay_ms: 60000
  jitter: false
"#;
        let config: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.max_reconnect_attempts, Some(5));
        assert_eq!(
            config.backoff,
            BackoffConfig {
                initial_delay_ms: 1000,
                max_delay_ms: 60_000,
                jitter: false,
            }
        );
    }
}
