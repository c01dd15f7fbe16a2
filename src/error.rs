//! Error types for a3s-guard

use crate::types::ActivityCategory;
use thiserror::Error;

/// Errors that can occur in the guard layer
#[derive(Debug, Error)]
pub enum GuardError {
    /// A network or frame target was denied by the allowlist
    ///
    /// The only error a guard raises on purpose.
    #[error("Unauthorized {category} target blocked: {target}")]
    PolicyViolation {
        category: ActivityCategory,
        target: String,
    },

    /// Target address could not be parsed or has no host
    #[error("Invalid target address '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Guards refuse to install outside the protected property
    #[error("Page '{0}' is outside the protected site")]
    UnsupportedPage(String),

    /// The wrapped platform capability failed on its own
    #[error("Capability error: {0}")]
    Capability(String),

    /// Fetching the monitored resource failed
    #[error("Failed to fetch '{address}': {reason}")]
    Fetch { address: String, reason: String },

    /// Durable store read/write failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuardError {
    /// Whether this error is a deliberate policy block rather than a fault
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::PolicyViolation { .. })
    }
}

/// Result type alias for guard operations
pub type Result<T> = std::result::Result<T, GuardError>;
