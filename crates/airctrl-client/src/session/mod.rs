//! Encrypted session with one device
//!
//! The session manager performs the key exchange, sends status and control
//! requests under the session key, and tracks session validity. It never
//! re-establishes on its own: when the session becomes invalid it reports
//! `SessionError::NeedsReestablish` and the device client decides what to do.

mod manager;

pub use manager::{Request, Response, SessionManager};

use std::fmt;

/// Validity of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No key exchange performed yet
    #[default]
    Unestablished,
    /// Key exchange in flight
    Handshaking,
    /// Key agreed; requests may be sent
    Active,
    /// Invalidated by a decode failure, repeated timeouts or a device
    /// rejection; a new handshake is required
    Expired,
    /// The last handshake failed
    Failed,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Unestablished => "unestablished",
            SessionState::Handshaking => "handshaking",
            SessionState::Active => "active",
            SessionState::Expired => "expired",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}
