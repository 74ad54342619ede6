//! Convergence poller.
//!
//! Samples live service state with exponential backoff until the deployment
//! converges, fails, times out, or is cancelled. Each sample is an
//! independent, stateless poll; the accumulated signal (stable streak,
//! crash-loop counting) lives in this loop, and every sample is appended to
//! the run's snapshot history for later diagnosis.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use stackhand_cloud::{CloudCapability, TaskStopInfo};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::PollerConfig;
use crate::domain::run::ConvergenceOutcome;
use crate::domain::snapshot::ServiceSnapshot;
use crate::registry::SharedRun;

/// How a polling session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollVerdict {
    /// The poller reached a convergence verdict.
    Outcome(ConvergenceOutcome),

    /// Cancellation was observed before any verdict.
    Cancelled,
}

/// Polls a service until its deployment reaches a terminal state.
pub struct ConvergencePoller {
    cloud: Arc<dyn CloudCapability>,
    config: PollerConfig,
}

impl ConvergencePoller {
    pub fn new(cloud: Arc<dyn CloudCapability>, config: PollerConfig) -> Self {
        Self { cloud, config }
    }

    /// Poll until `Stable`, `Failed`, `TimedOut`, or cancellation.
    ///
    /// Cancellation is checked once per sample and while sleeping, so an
    /// external cancel is observed within one sampling interval. Capability
    /// errors during a sample are tolerated: the sample is skipped and the
    /// accumulated stable streak is left untouched.
    pub async fn run(&self, run: &SharedRun, cancel: &CancelToken) -> PollVerdict {
        let (service, window_start) = {
            let run = run.lock().unwrap();
            (run.plan.targets.service_name.clone(), run.started_at)
        };

        let deadline = Instant::now() + self.config.timeout_budget;
        let mut interval = self.config.initial_interval;
        let mut stable_streak: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return PollVerdict::Cancelled;
            }
            if Instant::now() >= deadline {
                return PollVerdict::Outcome(ConvergenceOutcome::TimedOut);
            }

            match self.cloud.describe_service(&service).await {
                Ok(Some(state)) => {
                    let snapshot = ServiceSnapshot::from_state(&state, Utc::now());
                    let revision = snapshot.task_definition.clone();
                    let stable = snapshot.is_stable();
                    run.lock()
                        .unwrap()
                        .record_snapshot(snapshot, self.config.snapshot_history_limit);

                    match self.cloud.list_stopped_tasks(&service, window_start).await {
                        Ok(stops) => {
                            if let Some(reason) = self.detect_crash_loop(&revision, &stops) {
                                return PollVerdict::Outcome(ConvergenceOutcome::Failed {
                                    reason,
                                });
                            }
                        }
                        Err(err) => {
                            warn!(service = %service, error = %err, "stopped-task listing failed, continuing");
                        }
                    }

                    if stable {
                        stable_streak += 1;
                        debug!(service = %service, stable_streak, "stable sample");
                        if stable_streak >= self.config.stable_samples_required {
                            return PollVerdict::Outcome(ConvergenceOutcome::Stable);
                        }
                    } else {
                        stable_streak = 0;
                    }
                }
                Ok(None) => {
                    debug!(service = %service, "service not visible yet");
                    stable_streak = 0;
                }
                Err(err) => {
                    warn!(service = %service, error = %err, "service sample failed, continuing");
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return PollVerdict::Outcome(ConvergenceOutcome::TimedOut);
            }
            let sleep_for = interval.min(remaining);
            tokio::select! {
                _ = cancel.cancelled() => return PollVerdict::Cancelled,
                _ = tokio::time::sleep(sleep_for) => {}
            }
            interval = (interval * self.config.backoff_factor).min(self.config.max_interval);
        }
    }

    /// Crash-loop detection: enough short-lived exits of the deploying
    /// revision declares the deployment non-recoverable before timeout.
    fn detect_crash_loop(&self, revision: &str, stops: &[TaskStopInfo]) -> Option<String> {
        let crashed: Vec<&TaskStopInfo> = stops
            .iter()
            .filter(|s| s.task_definition == revision)
            .filter(|s| match s.runtime().map(|d| d.to_std()) {
                // Tasks that never started count as immediate exits.
                None => true,
                Some(Ok(runtime)) => runtime < self.config.crash_runtime_ceiling,
                Some(Err(_)) => true,
            })
            .collect();

        if (crashed.len() as u32) < self.config.crash_loop_threshold {
            return None;
        }

        // Most frequent stop reason carries the headline.
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for stop in &crashed {
            *counts.entry(stop.stopped_reason.as_str()).or_default() += 1;
        }
        let (reason, count) = counts
            .into_iter()
            .max_by_key(|(reason, count)| (*count, std::cmp::Reverse(*reason)))?;

        Some(format!(
            "{} of {} stopped tasks for revision {} exited immediately: {}",
            count,
            crashed.len(),
            revision,
            reason
        ))
    }
}
