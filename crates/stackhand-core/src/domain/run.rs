//! Deployment run tracking.
//!
//! A [`DeploymentRun`] records one execution of a plan: the append-only step
//! results, the snapshot history from the convergence poller, and the
//! convergence outcome. The run's [`RunStatus`] is never stored; it is
//! derived from those records on every read, so status can never drift from
//! the history that justifies it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::plan::{DeploymentPlan, StepKind};
use super::snapshot::ServiceSnapshot;

/// Unique identifier for a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random run id.
    pub fn new() -> Self {
        RunId(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derived status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Converging,
    Stable,
    Failed,
    TimedOut,
    Cancelled,
}

impl RunStatus {
    /// Whether the run has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Stable | RunStatus::Failed | RunStatus::TimedOut | RunStatus::Cancelled
        )
    }
}

/// Outcome of one executed (or skipped) step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// Record of one step attempt within a run. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Id of the plan step this result belongs to.
    pub step_id: String,

    /// Step kind, denormalized for diagnosis and reporting.
    pub kind: StepKind,

    /// Resource the step targeted.
    pub target_resource: String,

    /// How the step ended.
    pub outcome: StepOutcome,

    /// Raw capability response for succeeded/skipped steps.
    pub response: Option<Value>,

    /// Error detail for failed steps.
    pub error: Option<String>,

    /// Capability call attempts consumed (1 for skipped steps' probe).
    pub attempts: u32,

    /// When execution of the step began.
    pub started_at: DateTime<Utc>,

    /// When the step finished.
    pub finished_at: DateTime<Utc>,
}

/// Terminal verdict of the convergence poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConvergenceOutcome {
    /// Running count matched desired and held for the required samples.
    Stable,

    /// Non-recoverable task failures detected before the budget elapsed.
    Failed { reason: String },

    /// The wall-clock budget elapsed without stabilizing or failing.
    TimedOut,
}

/// One execution of a deployment plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRun {
    /// Unique identifier for this run.
    pub run_id: RunId,

    /// The plan being executed.
    pub plan: DeploymentPlan,

    /// Results of attempted steps, in execution order. Append-only.
    pub step_results: Vec<StepResult>,

    /// Snapshot history from the convergence poller, oldest first, bounded.
    pub snapshots: Vec<ServiceSnapshot>,

    /// Convergence verdict once polling terminated.
    pub convergence: Option<ConvergenceOutcome>,

    /// Whether cancellation was requested and observed.
    pub cancelled: bool,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeploymentRun {
    /// Start a new run for `plan`.
    pub fn new(plan: DeploymentPlan) -> Self {
        Self {
            run_id: RunId::new(),
            plan,
            step_results: Vec::new(),
            snapshots: Vec::new(),
            convergence: None,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Derive the run status from the recorded history.
    ///
    /// Precedence: cancellation, then step failure, then the convergence
    /// verdict, then progress through the plan. This is the only way a
    /// status is ever produced.
    pub fn status(&self) -> RunStatus {
        if self.cancelled {
            return RunStatus::Cancelled;
        }
        if self
            .step_results
            .iter()
            .any(|r| r.outcome == StepOutcome::Failed)
        {
            return RunStatus::Failed;
        }
        match &self.convergence {
            Some(ConvergenceOutcome::Stable) => RunStatus::Stable,
            Some(ConvergenceOutcome::Failed { .. }) => RunStatus::Failed,
            Some(ConvergenceOutcome::TimedOut) => RunStatus::TimedOut,
            None => {
                if self.step_results.is_empty() {
                    RunStatus::Pending
                } else if self.step_results.len() < self.plan.steps().len() {
                    RunStatus::InProgress
                } else {
                    RunStatus::Converging
                }
            }
        }
    }

    /// Append a step result.
    pub fn record_step(&mut self, result: StepResult) {
        self.step_results.push(result);
    }

    /// Append a snapshot, keeping at most `history_limit` entries.
    pub fn record_snapshot(&mut self, snapshot: ServiceSnapshot, history_limit: usize) {
        self.snapshots.push(snapshot);
        if self.snapshots.len() > history_limit {
            let excess = self.snapshots.len() - history_limit;
            self.snapshots.drain(..excess);
        }
    }

    /// The most recent snapshot, if any sample has been taken.
    pub fn latest_snapshot(&self) -> Option<&ServiceSnapshot> {
        self.snapshots.last()
    }

    /// Record the convergence verdict and close the run.
    pub fn finish_with(&mut self, outcome: ConvergenceOutcome) {
        self.convergence = Some(outcome);
        self.finished_at = Some(Utc::now());
    }

    /// Mark the run cancelled and close it.
    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
        self.finished_at = Some(Utc::now());
    }

    /// Close a run that failed during step execution.
    pub fn finish_failed(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// The failed step result, when the run failed during step execution.
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.step_results
            .iter()
            .find(|r| r.outcome == StepOutcome::Failed)
    }
}

/// Compact run view for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub app_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&DeploymentRun> for RunSummary {
    fn from(run: &DeploymentRun) -> Self {
        Self {
            run_id: run.run_id.clone(),
            app_name: run.plan.app_name.clone(),
            status: run.status(),
            started_at: run.started_at,
            finished_at: run.finished_at,
        }
    }
}
