//! Diagnosis output types: ranked findings with remediation guidance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::RunId;

/// Root-cause category a finding points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseCategory {
    ImagePullFailure,
    HealthCheckFailure,
    InsufficientCapacity,
    TaskDefinitionMisconfiguration,
    LoadBalancerTargetUnhealthy,
    IamPermissionDenied,
    OutOfMemory,
    Unknown,
}

impl CauseCategory {
    /// Stable name used in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            CauseCategory::ImagePullFailure => "image pull failure",
            CauseCategory::HealthCheckFailure => "health check failure",
            CauseCategory::InsufficientCapacity => "insufficient task placement capacity",
            CauseCategory::TaskDefinitionMisconfiguration => "task definition misconfiguration",
            CauseCategory::LoadBalancerTargetUnhealthy => "load balancer target unhealthy",
            CauseCategory::IamPermissionDenied => "iam permission denied",
            CauseCategory::OutOfMemory => "out of memory",
            CauseCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CauseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One candidate root cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Cause category.
    pub cause: CauseCategory,

    /// Confidence in [0, 1].
    pub confidence: f64,

    /// Ids of the evidence records supporting this finding. Every id must
    /// exist in the evidence snapshot the diagnosis was computed from.
    pub evidence_refs: Vec<String>,

    /// Suggested remediation.
    pub remediation: String,

    /// Timestamp of the most recent supporting record; tie-breaker for
    /// ranking.
    pub latest_evidence_at: Option<DateTime<Utc>>,
}

/// Ranked diagnosis for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// Run the diagnosis is for.
    pub run_id: RunId,

    /// Collection timestamp of the evidence this was computed from.
    pub evidence_collected_at: DateTime<Utc>,

    /// Findings ordered by descending confidence; ties broken by most
    /// recent supporting evidence first. Never empty.
    pub findings: Vec<Finding>,
}

impl Diagnosis {
    /// The highest-ranked finding.
    ///
    /// A diagnosis is never empty (the engine emits an `Unknown` finding
    /// when nothing matched), so this only returns `None` for a value
    /// constructed by hand.
    pub fn top_finding(&self) -> Option<&Finding> {
        self.findings.first()
    }
}
