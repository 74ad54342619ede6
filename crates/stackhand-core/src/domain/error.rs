//! Domain-level error taxonomy for Stackhand.

use stackhand_cloud::CapabilityError;

use super::run::RunId;

/// Stackhand domain errors.
///
/// Timeouts and source-level evidence failures are deliberately absent:
/// `TimedOut` is a terminal run status and `SourceUnavailable` is an
/// evidence marker, neither is an error to propagate.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("invalid application spec: {0}")]
    InvalidSpec(String),

    #[error("unsupported deployment topology: {0}")]
    UnsupportedTopology(String),

    #[error("a run is already active for target '{target}'")]
    RunInProgress { target: String },

    #[error("run not found: {0}")]
    RunNotFound(RunId),

    #[error("cloud capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for Stackhand domain operations.
pub type Result<T> = std::result::Result<T, DeployError>;
