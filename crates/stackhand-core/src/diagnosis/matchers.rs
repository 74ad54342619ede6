//! Failure-pattern matchers.
//!
//! Each matcher is a pure predicate over an evidence snapshot: it scans for
//! its signature and, when found, emits one finding. Matchers never look at
//! live state and never short-circuit each other; the engine runs all of
//! them, because cloud failures routinely have several contributing causes.

use chrono::{DateTime, Duration, Utc};

use crate::domain::diagnosis::{CauseCategory, Finding};
use crate::domain::evidence::{Evidence, EvidenceRecord, EvidenceSource};

/// A registered failure-pattern matcher.
pub trait FailureMatcher: Send + Sync {
    /// Cause category this matcher reports.
    fn cause(&self) -> CauseCategory;

    /// Inspect evidence; `Some` when the signature is present.
    ///
    /// Must be pure and deterministic for identical evidence.
    fn evaluate(&self, evidence: &Evidence) -> Option<Finding>;
}

/// Base confidence of the `Unknown` fallback finding; real matches must
/// score above this.
pub const UNKNOWN_CONFIDENCE: f64 = 0.1;

/// Fixed confidence adjusted by corroboration and recency, capped at 0.99.
fn adjusted_confidence(
    base: f64,
    match_count: usize,
    latest: Option<DateTime<Utc>>,
    collected_at: DateTime<Utc>,
) -> f64 {
    let corroboration = 0.05 * match_count.saturating_sub(1).min(4) as f64;
    let recency = match latest {
        Some(ts) if collected_at - ts <= Duration::minutes(5) => 0.1,
        Some(ts) if collected_at - ts <= Duration::minutes(30) => 0.05,
        _ => 0.0,
    };
    (base + corroboration + recency).min(0.99)
}

fn finding_from_matches(
    cause: CauseCategory,
    base_confidence: f64,
    remediation: &str,
    matched: Vec<&EvidenceRecord>,
    collected_at: DateTime<Utc>,
) -> Option<Finding> {
    if matched.is_empty() {
        return None;
    }
    let latest = matched.iter().map(|r| r.timestamp).max();
    Some(Finding {
        cause,
        confidence: adjusted_confidence(base_confidence, matched.len(), latest, collected_at),
        evidence_refs: matched.iter().map(|r| r.id.clone()).collect(),
        remediation: remediation.to_string(),
        latest_evidence_at: latest,
    })
}

/// Substring-signature matcher over selected sources.
pub struct SignatureMatcher {
    cause: CauseCategory,
    base_confidence: f64,
    sources: &'static [EvidenceSource],
    patterns: &'static [&'static str],
    remediation: &'static str,
}

impl FailureMatcher for SignatureMatcher {
    fn cause(&self) -> CauseCategory {
        self.cause
    }

    fn evaluate(&self, evidence: &Evidence) -> Option<Finding> {
        let matched: Vec<&EvidenceRecord> = self
            .sources
            .iter()
            .flat_map(|s| evidence.records(*s).iter())
            .filter(|record| {
                let message = record.message.to_ascii_lowercase();
                self.patterns.iter().any(|p| message.contains(p))
            })
            .collect();
        finding_from_matches(
            self.cause,
            self.base_confidence,
            self.remediation,
            matched,
            evidence.collected_at,
        )
    }
}

/// Out-of-memory matcher: signature text plus the structured exit code the
/// container runtime reports for OOM kills.
pub struct OutOfMemoryMatcher;

impl FailureMatcher for OutOfMemoryMatcher {
    fn cause(&self) -> CauseCategory {
        CauseCategory::OutOfMemory
    }

    fn evaluate(&self, evidence: &Evidence) -> Option<Finding> {
        let matched: Vec<&EvidenceRecord> = evidence
            .all_records()
            .filter(|record| {
                let message = record.message.to_ascii_lowercase();
                if message.contains("outofmemory") || message.contains("oom-killed") {
                    return true;
                }
                record.source == EvidenceSource::TaskStopReasons
                    && record.detail.get("exit_code").and_then(|c| c.as_i64()) == Some(137)
            })
            .collect();
        finding_from_matches(
            CauseCategory::OutOfMemory,
            0.7,
            "raise the task memory limit or fix the container's memory usage",
            matched,
            evidence.collected_at,
        )
    }
}

const STOPS_AND_SERVICE: &[EvidenceSource] = &[
    EvidenceSource::ServiceEvents,
    EvidenceSource::TaskStopReasons,
];

const ALL_SOURCES: &[EvidenceSource] = &[
    EvidenceSource::StackEvents,
    EvidenceSource::ServiceEvents,
    EvidenceSource::TaskStopReasons,
    EvidenceSource::LogTail,
];

/// The registered matcher set, in registration order.
///
/// Order does not affect ranking (the engine sorts by confidence), only the
/// stability of equal-confidence output.
pub fn default_matchers() -> Vec<Box<dyn FailureMatcher>> {
    vec![
        Box::new(SignatureMatcher {
            cause: CauseCategory::ImagePullFailure,
            base_confidence: 0.75,
            sources: STOPS_AND_SERVICE,
            patterns: &[
                "cannotpullcontainererror",
                "pull access denied",
                "repository does not exist",
                "manifest unknown",
                "image not found",
            ],
            remediation: "verify the image reference exists in the registry and the task \
                          execution role can pull it (ecr:BatchGetImage, \
                          ecr:GetDownloadUrlForLayer)",
        }),
        Box::new(SignatureMatcher {
            cause: CauseCategory::HealthCheckFailure,
            base_confidence: 0.7,
            sources: STOPS_AND_SERVICE,
            patterns: &[
                "failed container health checks",
                "health check",
                "unhealthy",
            ],
            remediation: "confirm the container answers the health check path on the \
                          configured port, or lengthen the health check grace period",
        }),
        Box::new(SignatureMatcher {
            cause: CauseCategory::InsufficientCapacity,
            base_confidence: 0.7,
            sources: STOPS_AND_SERVICE,
            patterns: &[
                "unable to place a task",
                "insufficient cpu",
                "insufficient memory",
                "no container instances",
                "resource:cpu",
                "resource:memory",
            ],
            remediation: "reduce task sizing or desired count, or add capacity to the cluster",
        }),
        Box::new(SignatureMatcher {
            cause: CauseCategory::TaskDefinitionMisconfiguration,
            base_confidence: 0.6,
            sources: ALL_SOURCES,
            patterns: &[
                "cannotstartcontainererror",
                "invalid task definition",
                "executable file not found",
                "no command specified",
                "invalid container path",
            ],
            remediation: "review the task definition revision: image entry point, command, \
                          mounts, and required environment variables",
        }),
        Box::new(SignatureMatcher {
            cause: CauseCategory::LoadBalancerTargetUnhealthy,
            base_confidence: 0.65,
            sources: &[EvidenceSource::StackEvents, EvidenceSource::ServiceEvents],
            patterns: &[
                "target group",
                "deregistered",
                "elb health check",
            ],
            remediation: "check target group health check settings and the security group \
                          path from the load balancer to the tasks",
        }),
        Box::new(SignatureMatcher {
            cause: CauseCategory::IamPermissionDenied,
            base_confidence: 0.75,
            sources: ALL_SOURCES,
            patterns: &[
                "accessdenied",
                "not authorized",
                "unable to assume role",
                "iam:",
            ],
            remediation: "grant the missing permission to the task execution or task role \
                          named in the denial message",
        }),
        Box::new(OutOfMemoryMatcher),
    ]
}
