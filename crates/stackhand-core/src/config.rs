//! Operational configuration.
//!
//! Every tuning value the orchestration core depends on lives here with an
//! explicit default, so deployments can adjust thresholds without touching
//! orchestration code.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff for step-level capability retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per step, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Ceiling on the delay between retries.
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each attempt.
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            factor: 2,
        }
    }
}

/// Convergence poller tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Interval before the second sample.
    pub initial_interval: Duration,

    /// Ceiling on the sampling interval.
    pub max_interval: Duration,

    /// Backoff multiplier applied to the interval after each sample.
    pub backoff_factor: u32,

    /// Wall-clock budget for the whole convergence wait.
    pub timeout_budget: Duration,

    /// Consecutive stable samples required before reporting `Stable`.
    pub stable_samples_required: u32,

    /// Stopped-task count of the current revision that declares a crash
    /// loop.
    pub crash_loop_threshold: u32,

    /// A stopped task counts toward the crash loop only when it ran for
    /// less than this.
    pub crash_runtime_ceiling: Duration,

    /// Snapshots retained in the run history.
    pub snapshot_history_limit: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(60),
            backoff_factor: 2,
            timeout_budget: Duration::from_secs(600),
            stable_samples_required: 2,
            crash_loop_threshold: 3,
            crash_runtime_ceiling: Duration::from_secs(30),
            snapshot_history_limit: 60,
        }
    }
}

/// Evidence collector tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceConfig {
    /// Most recent records retained per source.
    pub max_records_per_source: usize,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            max_records_per_source: 50,
        }
    }
}

/// Per-target lock tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Age past which a still-held lock becomes eligible for force-unlock.
    pub grace_period: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(900),
        }
    }
}

/// Aggregated orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrchestratorConfig {
    pub retry: RetryPolicy,
    pub poller: PollerConfig,
    pub evidence: EvidenceConfig,
    pub lock: LockConfig,
}
