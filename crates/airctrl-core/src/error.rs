//! Model-level errors
//!
//! These are mapping gaps between a device's raw vocabulary and the
//! normalized capability model. Retrying never fixes them.

use thiserror::Error;

use crate::models::{Capability, CapabilityValue};

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while resolving profiles or mapping capability values
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// No profile is registered for this model id (diagnostic, not fatal)
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// The device's profile has no descriptor for this capability
    #[error("Capability not supported by {model}: {capability}")]
    UnsupportedCapability { capability: Capability, model: String },

    /// The requested value lies outside the descriptor's domain
    #[error("Value {value} out of domain for {capability}: {reason}")]
    OutOfDomain {
        capability: Capability,
        value: CapabilityValue,
        reason: String,
    },

    /// The capability is observable only
    #[error("Capability is read-only: {0}")]
    ReadOnly(Capability),
}

impl ModelError {
    /// Create an out-of-domain error
    pub fn out_of_domain(
        capability: Capability,
        value: CapabilityValue,
        reason: impl Into<String>,
    ) -> Self {
        Self::OutOfDomain {
            capability,
            value,
            reason: reason.into(),
        }
    }
}
