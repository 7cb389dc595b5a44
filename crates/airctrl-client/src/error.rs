//! Client error types
//!
//! Transport and session failures are absorbed and retried inside the
//! client; the errors here are what remains after the retry policy gives up,
//! plus model errors, which are reported immediately.

use airctrl_coap::{FrameError, TransportError};
use airctrl_core::{Capability, CapabilityValue, ModelError};
use thiserror::Error;

/// Errors establishing a session
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HandshakeError {
    /// No response within the handshake timeout
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    /// The device refused the key exchange
    #[error("Handshake rejected: {0}")]
    Rejected(String),

    /// The device does not speak the encrypted protocol
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),
}

/// Errors of a single exchange on an established session
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    /// The session is no longer valid; establish a new one before retrying
    #[error("Session expired: {0}")]
    NeedsReestablish(String),

    #[error("No session established")]
    NotEstablished,

    /// One exchange timed out; the session is kept until the timeout threshold
    #[error("Request timed out")]
    Timeout,

    #[error("Device rejected request: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Errors recovered by establishing a fresh session
    pub fn needs_new_session(&self) -> bool {
        matches!(
            self,
            SessionError::NeedsReestablish(_)
                | SessionError::NotEstablished
                | SessionError::Transport(_)
        )
    }
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        SessionError::NeedsReestablish(err.to_string())
    }
}

/// Errors connecting to a device
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// First status poll failed after the handshake
    #[error("Initial status failed: {0}")]
    InitialStatus(String),

    /// Unknown model while unknown models are not allowed
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Errors polling a device
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PollError {
    /// No valid status even after re-establishing the session
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Device handle disconnected")]
    Disconnected,
}

/// Errors applying a command
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SetError {
    /// The command cannot be expressed for this model; never retried
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Every attempt failed
    #[error("Could not set {capability} to {value} after {attempts} attempts: {message}")]
    Unreachable {
        capability: Capability,
        value: CapabilityValue,
        attempts: u32,
        message: String,
    },

    #[error("Device handle disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_errors_invalidate_session() {
        let err: SessionError = FrameError::IntegrityMismatch.into();
        assert!(err.needs_new_session());
        assert!(!SessionError::Timeout.needs_new_session());
    }

    #[test]
    fn test_set_error_names_capability_and_value() {
        let err = SetError::Unreachable {
            capability: Capability::FanSpeed,
            value: CapabilityValue::from("turbo"),
            attempts: 4,
            message: "Request timed out".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Could not set fan_speed to turbo after 4 attempts: Request timed out"
        );
    }
}
