//! Collected diagnostic evidence.
//!
//! Evidence is a one-shot, immutable snapshot of raw records pulled from the
//! telemetry sources around a run. A source that could not be read is kept
//! as an explicit `Unavailable` marker; partial evidence is valid evidence.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::run::RunId;

/// Telemetry source an evidence record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    StackEvents,
    ServiceEvents,
    TaskStopReasons,
    LogTail,
}

impl EvidenceSource {
    /// All sources, in collection order.
    pub const ALL: [EvidenceSource; 4] = [
        EvidenceSource::StackEvents,
        EvidenceSource::ServiceEvents,
        EvidenceSource::TaskStopReasons,
        EvidenceSource::LogTail,
    ];

    /// Stable name used in record ids and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            EvidenceSource::StackEvents => "stack_events",
            EvidenceSource::ServiceEvents => "service_events",
            EvidenceSource::TaskStopReasons => "task_stop_reasons",
            EvidenceSource::LogTail => "log_tail",
        }
    }
}

impl std::fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One raw record from a telemetry source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Stable id within the evidence snapshot ("{source}-{index}").
    pub id: String,

    /// Source this record came from.
    pub source: EvidenceSource,

    /// When the record was produced.
    pub timestamp: DateTime<Utc>,

    /// Primary message text matchers scan.
    pub message: String,

    /// Structured detail preserved from the raw response.
    pub detail: Value,
}

/// What was collected from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceEvidence {
    /// Records retrieved, oldest first, bounded by the collector cap.
    Records { records: Vec<EvidenceRecord> },

    /// The source could not be read; collection continued without it.
    Unavailable { error: String },
}

/// Immutable evidence snapshot for one diagnosis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Run the evidence was collected for.
    pub run_id: RunId,

    /// When collection happened; matchers measure recency against this.
    pub collected_at: DateTime<Utc>,

    /// Start of the collection window (run start).
    pub window_from: DateTime<Utc>,

    /// Per-source results.
    pub sources: BTreeMap<EvidenceSource, SourceEvidence>,
}

impl Evidence {
    /// Records from one source; empty when absent or unavailable.
    pub fn records(&self, source: EvidenceSource) -> &[EvidenceRecord] {
        match self.sources.get(&source) {
            Some(SourceEvidence::Records { records }) => records,
            _ => &[],
        }
    }

    /// All records across sources, in source order then record order.
    pub fn all_records(&self) -> impl Iterator<Item = &EvidenceRecord> {
        EvidenceSource::ALL
            .into_iter()
            .flat_map(|s| self.records(s).iter())
    }

    /// Whether a record id exists in this snapshot.
    pub fn contains_record(&self, id: &str) -> bool {
        self.all_records().any(|r| r.id == id)
    }

    /// Whether no source yielded any record.
    pub fn is_empty(&self) -> bool {
        self.all_records().next().is_none()
    }

    /// Sources that were marked unavailable.
    pub fn unavailable_sources(&self) -> Vec<EvidenceSource> {
        self.sources
            .iter()
            .filter_map(|(source, evidence)| match evidence {
                SourceEvidence::Unavailable { .. } => Some(*source),
                SourceEvidence::Records { .. } => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(source: EvidenceSource, index: usize, message: &str) -> EvidenceRecord {
        EvidenceRecord {
            id: format!("{}-{}", source, index),
            source,
            timestamp: Utc::now(),
            message: message.to_string(),
            detail: json!({}),
        }
    }

    fn evidence_with(sources: BTreeMap<EvidenceSource, SourceEvidence>) -> Evidence {
        Evidence {
            run_id: RunId::new(),
            collected_at: Utc::now(),
            window_from: Utc::now(),
            sources,
        }
    }

    #[test]
    fn test_records_for_unavailable_source_is_empty() {
        let mut sources = BTreeMap::new();
        sources.insert(
            EvidenceSource::LogTail,
            SourceEvidence::Unavailable {
                error: "log group not found".to_string(),
            },
        );
        let evidence = evidence_with(sources);

        assert!(evidence.records(EvidenceSource::LogTail).is_empty());
        assert_eq!(
            evidence.unavailable_sources(),
            vec![EvidenceSource::LogTail]
        );
    }

    #[test]
    fn test_contains_record() {
        let mut sources = BTreeMap::new();
        sources.insert(
            EvidenceSource::TaskStopReasons,
            SourceEvidence::Records {
                records: vec![record(
                    EvidenceSource::TaskStopReasons,
                    0,
                    "CannotPullContainerError",
                )],
            },
        );
        let evidence = evidence_with(sources);

        assert!(evidence.contains_record("task_stop_reasons-0"));
        assert!(!evidence.contains_record("task_stop_reasons-1"));
        assert!(!evidence.is_empty());
    }

    #[test]
    fn test_all_records_iterates_in_source_order() {
        let mut sources = BTreeMap::new();
        sources.insert(
            EvidenceSource::LogTail,
            SourceEvidence::Records {
                records: vec![record(EvidenceSource::LogTail, 0, "log line")],
            },
        );
        sources.insert(
            EvidenceSource::StackEvents,
            SourceEvidence::Records {
                records: vec![record(EvidenceSource::StackEvents, 0, "CREATE_FAILED")],
            },
        );
        let evidence = evidence_with(sources);

        let ids: Vec<&str> = evidence.all_records().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["stack_events-0", "log_tail-0"]);
    }
}
