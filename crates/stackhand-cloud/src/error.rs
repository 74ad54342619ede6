//! Error type for cloud capability operations.

use serde::{Deserialize, Serialize};

/// Failure of a single cloud capability call.
///
/// Every operation on [`crate::CloudCapability`] fails with this one shape:
/// a machine-readable `code` (the upstream API error code where one exists)
/// and a human-readable `message`. Callers decide whether to retry; the
/// capability layer itself never does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("capability call failed [{code}]: {message}")]
pub struct CapabilityError {
    /// Upstream error code (e.g. "Throttling", "AccessDenied").
    pub code: String,

    /// Human-readable description of the failure.
    pub message: String,
}

impl CapabilityError {
    /// Create a new capability error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Shorthand for transient throttling failures.
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new("Throttling", message)
    }
}

/// Result type for capability operations.
pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;
