//! Error types for profile loading and command encoding

use airctrl_core::{Capability, ModelError};
use thiserror::Error;

/// Errors encoding a command are model errors: never retried
pub type EncodeError = ModelError;

/// Errors that can occur while loading profiles
#[derive(Debug, Error)]
pub enum ConvError {
    /// A profile describes one capability twice
    #[error("profile {model} describes {capability} more than once")]
    DuplicateCapability { model: String, capability: Capability },

    /// A descriptor is internally inconsistent
    #[error("invalid definition for {model}: {reason}")]
    InvalidDefinition { model: String, reason: String },

    /// YAML parsing error
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for profile loading
pub type ConvResult<T> = Result<T, ConvError>;
