//! Frame decoding errors

use thiserror::Error;

/// Result type for codec operations
pub type FrameResult<T> = Result<T, FrameError>;

/// Errors decoding a frame received from a device
///
/// Every variant is fatal to the exchange it occurred in and invalidates the
/// session that produced it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Truncated or structurally invalid frame
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Digest does not match: tampering, or a wrong or stale key
    #[error("Integrity check failed")]
    IntegrityMismatch,

    /// Unknown CoAP version, or a plaintext firmware payload
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),
}

impl FrameError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }
}

/// Errors interpreting a device response
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResponseError {
    /// The device answered with a 4.xx/5.xx code
    #[error("Device rejected request with code {0}")]
    Rejected(crate::message::Code),

    /// The payload does not have the shape this endpoint answers with
    #[error("Unexpected payload: {0}")]
    UnexpectedPayload(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}
