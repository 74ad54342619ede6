//! Evidence collection from deployment telemetry sources.
//!
//! Pulls the most recent records per source inside the run's time window.
//! Collection never fails as a whole: a source that errors is recorded as
//! `SourceUnavailable` and the rest of the snapshot stands.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::json;
use stackhand_cloud::CloudCapability;
use tracing::{debug, warn};

use crate::config::EvidenceConfig;
use crate::domain::evidence::{Evidence, EvidenceRecord, EvidenceSource, SourceEvidence};
use crate::domain::run::DeploymentRun;

/// Raw record before ids are assigned.
struct RawRecord {
    timestamp: DateTime<Utc>,
    message: String,
    detail: serde_json::Value,
}

/// Collects one immutable evidence snapshot for a run.
pub struct EvidenceCollector {
    cloud: Arc<dyn CloudCapability>,
    config: EvidenceConfig,
}

impl EvidenceCollector {
    pub fn new(cloud: Arc<dyn CloudCapability>, config: EvidenceConfig) -> Self {
        Self { cloud, config }
    }

    /// Gather evidence for `run` across all sources.
    pub async fn collect(&self, run: &DeploymentRun) -> Evidence {
        let window_from = run.started_at;
        let collected_at = Utc::now();

        let (stack_events, service_events, stop_reasons, log_tail) = tokio::join!(
            self.collect_stack_events(run, window_from),
            self.collect_service_events(run, window_from),
            self.collect_stop_reasons(run, window_from),
            self.collect_log_tail(run, window_from),
        );

        let mut sources = BTreeMap::new();
        sources.insert(EvidenceSource::StackEvents, stack_events);
        sources.insert(EvidenceSource::ServiceEvents, service_events);
        sources.insert(EvidenceSource::TaskStopReasons, stop_reasons);
        sources.insert(EvidenceSource::LogTail, log_tail);

        for (source, evidence) in &sources {
            match evidence {
                SourceEvidence::Records { records } => {
                    debug!(source = %source, count = records.len(), "evidence collected")
                }
                SourceEvidence::Unavailable { error } => {
                    warn!(source = %source, error = %error, "evidence source unavailable")
                }
            }
        }

        Evidence {
            run_id: run.run_id.clone(),
            collected_at,
            window_from,
            sources,
        }
    }

    async fn collect_stack_events(
        &self,
        run: &DeploymentRun,
        window_from: DateTime<Utc>,
    ) -> SourceEvidence {
        let stack_names: Vec<&str> = run
            .plan
            .steps()
            .iter()
            .filter(|s| s.kind.is_stack_backed())
            .map(|s| s.target_resource.as_str())
            .collect();

        let described = join_all(
            stack_names
                .iter()
                .map(|name| self.cloud.describe_stack(name)),
        )
        .await;

        let mut raw = Vec::new();
        let mut first_error: Option<String> = None;
        for (name, result) in stack_names.iter().zip(described) {
            match result {
                Ok(Some(description)) => {
                    for event in description.events {
                        if event.timestamp < window_from {
                            continue;
                        }
                        raw.push(RawRecord {
                            timestamp: event.timestamp,
                            message: match &event.reason {
                                Some(reason) => {
                                    format!("{} {}: {}", event.logical_id, event.resource_status, reason)
                                }
                                None => format!("{} {}", event.logical_id, event.resource_status),
                            },
                            detail: json!({
                                "stack": name,
                                "logical_id": event.logical_id,
                                "resource_status": event.resource_status,
                                "reason": event.reason,
                            }),
                        });
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    first_error.get_or_insert_with(|| err.to_string());
                }
            }
        }

        if raw.is_empty() {
            if let Some(error) = first_error {
                return SourceEvidence::Unavailable { error };
            }
        }
        finalize(EvidenceSource::StackEvents, raw, self.config.max_records_per_source)
    }

    async fn collect_service_events(
        &self,
        run: &DeploymentRun,
        window_from: DateTime<Utc>,
    ) -> SourceEvidence {
        let service = &run.plan.targets.service_name;
        match self.cloud.describe_service(service).await {
            Ok(Some(state)) => {
                let raw = state
                    .events
                    .into_iter()
                    .filter(|e| e.timestamp >= window_from)
                    .map(|e| RawRecord {
                        timestamp: e.timestamp,
                        message: e.message,
                        detail: json!({ "service": service }),
                    })
                    .collect();
                finalize(
                    EvidenceSource::ServiceEvents,
                    raw,
                    self.config.max_records_per_source,
                )
            }
            Ok(None) => finalize(EvidenceSource::ServiceEvents, Vec::new(), 0),
            Err(err) => SourceEvidence::Unavailable {
                error: err.to_string(),
            },
        }
    }

    async fn collect_stop_reasons(
        &self,
        run: &DeploymentRun,
        window_from: DateTime<Utc>,
    ) -> SourceEvidence {
        let service = &run.plan.targets.service_name;
        match self.cloud.list_stopped_tasks(service, window_from).await {
            Ok(stops) => {
                let raw = stops
                    .into_iter()
                    .map(|stop| RawRecord {
                        timestamp: stop.stopped_at,
                        message: stop.stopped_reason.clone(),
                        detail: json!({
                            "task_id": stop.task_id,
                            "task_definition": stop.task_definition,
                            "stop_code": stop.stop_code,
                            "exit_code": stop.exit_code,
                        }),
                    })
                    .collect();
                finalize(
                    EvidenceSource::TaskStopReasons,
                    raw,
                    self.config.max_records_per_source,
                )
            }
            Err(err) => SourceEvidence::Unavailable {
                error: err.to_string(),
            },
        }
    }

    async fn collect_log_tail(
        &self,
        run: &DeploymentRun,
        window_from: DateTime<Utc>,
    ) -> SourceEvidence {
        let log_group = &run.plan.targets.log_group;
        match self
            .cloud
            .tail_logs(log_group, window_from, self.config.max_records_per_source)
            .await
        {
            Ok(lines) => {
                let raw = lines
                    .into_iter()
                    .map(|line| RawRecord {
                        timestamp: line.timestamp,
                        message: line.message,
                        detail: json!({ "log_group": log_group }),
                    })
                    .collect();
                finalize(EvidenceSource::LogTail, raw, self.config.max_records_per_source)
            }
            Err(err) => SourceEvidence::Unavailable {
                error: err.to_string(),
            },
        }
    }
}

/// Order records chronologically, keep the most recent `cap`, assign ids.
fn finalize(source: EvidenceSource, mut raw: Vec<RawRecord>, cap: usize) -> SourceEvidence {
    raw.sort_by_key(|r| r.timestamp);
    if raw.len() > cap {
        raw.drain(..raw.len() - cap);
    }
    let records = raw
        .into_iter()
        .enumerate()
        .map(|(index, r)| EvidenceRecord {
            id: format!("{}-{}", source, index),
            source,
            timestamp: r.timestamp,
            message: r.message,
            detail: r.detail,
        })
        .collect();
    SourceEvidence::Records { records }
}
