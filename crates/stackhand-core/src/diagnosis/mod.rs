//! Diagnosis engine.
//!
//! Runs every registered failure-pattern matcher over an evidence snapshot
//! and returns the full ranked finding set. New failure patterns are added
//! by registering a matcher, not by extending a branch chain.

pub mod matchers;

use tracing::debug;

use crate::domain::diagnosis::{CauseCategory, Diagnosis, Finding};
use crate::domain::evidence::Evidence;

pub use matchers::{default_matchers, FailureMatcher, OutOfMemoryMatcher, SignatureMatcher, UNKNOWN_CONFIDENCE};

/// Applies an ordered matcher list to evidence snapshots.
pub struct DiagnosisEngine {
    matchers: Vec<Box<dyn FailureMatcher>>,
}

impl DiagnosisEngine {
    /// Engine with the built-in matcher set.
    pub fn new() -> Self {
        Self {
            matchers: default_matchers(),
        }
    }

    /// Engine with an explicit matcher list.
    pub fn with_matchers(matchers: Vec<Box<dyn FailureMatcher>>) -> Self {
        Self { matchers }
    }

    /// Register an additional matcher.
    pub fn register(&mut self, matcher: Box<dyn FailureMatcher>) {
        self.matchers.push(matcher);
    }

    /// Diagnose an evidence snapshot.
    ///
    /// Every matcher runs; multiple contributing causes are common, so
    /// there is no short-circuit. Findings are ranked by descending
    /// confidence, ties broken by most recent supporting evidence, then by
    /// cause for full determinism. When nothing matches, the result is a
    /// single low-confidence `Unknown` finding, never an empty list.
    pub fn diagnose(&self, evidence: &Evidence) -> Diagnosis {
        let mut findings: Vec<Finding> = self
            .matchers
            .iter()
            .filter_map(|m| m.evaluate(evidence))
            .collect();

        // Findings must not reference records outside the snapshot.
        debug_assert!(findings
            .iter()
            .flat_map(|f| f.evidence_refs.iter())
            .all(|id| evidence.contains_record(id)));

        if findings.is_empty() {
            findings.push(Finding {
                cause: CauseCategory::Unknown,
                confidence: UNKNOWN_CONFIDENCE,
                evidence_refs: Vec::new(),
                remediation: "insufficient evidence; see raw records".to_string(),
                latest_evidence_at: None,
            });
        }

        findings.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.latest_evidence_at.cmp(&a.latest_evidence_at))
                .then_with(|| a.cause.cmp(&b.cause))
        });

        debug!(
            run_id = %evidence.run_id,
            findings = findings.len(),
            top = %findings[0].cause,
            "diagnosis computed"
        );

        Diagnosis {
            run_id: evidence.run_id.clone(),
            evidence_collected_at: evidence.collected_at,
            findings,
        }
    }
}

impl Default for DiagnosisEngine {
    fn default() -> Self {
        Self::new()
    }
}
