//! Cloud capability trait and wire types.
//!
//! `CloudCapability` is the only boundary between the orchestration core and
//! actual AWS APIs (ECR, CloudFormation, ECS, CloudWatch Logs). It carries
//! no orchestration logic: each operation maps to a small number of cloud
//! calls performed by an external adapter. In-memory fakes for testing live
//! in the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CapabilityResult;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Fully qualified container image reference (registry/repository:tag).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef(pub String);

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a provisioned infrastructure stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackId(pub String);

impl std::fmt::Display for StackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Stack records
// ---------------------------------------------------------------------------

/// One event from a stack's provisioning history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Logical resource the event refers to.
    pub logical_id: String,

    /// Resource status (e.g. "CREATE_COMPLETE", "CREATE_FAILED").
    pub resource_status: String,

    /// Status reason, present for failures.
    pub reason: Option<String>,
}

/// Point-in-time description of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDescription {
    /// Stack identifier.
    pub stack_id: StackId,

    /// Overall stack status (e.g. "CREATE_COMPLETE", "ROLLBACK_COMPLETE").
    pub status: String,

    /// Recent stack events, oldest first.
    pub events: Vec<StackEvent>,

    /// Per-resource status keyed by logical id.
    pub resource_states: BTreeMap<String, String>,
}

impl StackDescription {
    /// Whether the stack is in a settled, usable state.
    ///
    /// Rolled-back stacks are settled but not usable; they must be
    /// re-provisioned.
    pub fn is_healthy(&self) -> bool {
        self.status.ends_with("_COMPLETE") && !self.status.contains("ROLLBACK")
    }
}

// ---------------------------------------------------------------------------
// Service records
// ---------------------------------------------------------------------------

/// One event from a service's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Event message.
    pub message: String,
}

/// Reported health of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Observed status of a single running or starting task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskObservation {
    /// Task identifier.
    pub task_id: String,

    /// Lifecycle status (e.g. "PROVISIONING", "RUNNING").
    pub last_status: String,

    /// Container health as reported by the health check, if configured.
    pub health: TaskHealth,
}

/// Point-in-time state of a deployed service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    /// Service name.
    pub service_name: String,

    /// Task definition revision the service is currently deploying.
    pub task_definition: String,

    /// Number of tasks in RUNNING state.
    pub running_count: u32,

    /// Desired task count.
    pub desired_count: u32,

    /// Number of tasks still provisioning.
    pub pending_count: u32,

    /// Recent service events, oldest first.
    pub events: Vec<ServiceEvent>,

    /// Per-task observations.
    pub tasks: Vec<TaskObservation>,
}

/// Stop record for a task that is no longer running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStopInfo {
    /// Task identifier.
    pub task_id: String,

    /// Task definition revision the task ran.
    pub task_definition: String,

    /// When the task started, if it got that far.
    pub started_at: Option<DateTime<Utc>>,

    /// When the task stopped.
    pub stopped_at: DateTime<Utc>,

    /// Stop code (e.g. "TaskFailedToStart", "EssentialContainerExited").
    pub stop_code: Option<String>,

    /// Human-readable stop reason.
    pub stopped_reason: String,

    /// Exit code of the essential container, if it ran.
    pub exit_code: Option<i32>,
}

impl TaskStopInfo {
    /// How long the task ran before stopping, when it started at all.
    pub fn runtime(&self) -> Option<chrono::Duration> {
        self.started_at.map(|s| self.stopped_at - s)
    }
}

/// One line retrieved from a log group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    /// When the line was emitted.
    pub timestamp: DateTime<Utc>,

    /// Log message.
    pub message: String,
}

// ---------------------------------------------------------------------------
// CloudCapability
// ---------------------------------------------------------------------------

/// Narrow, mockable cloud operations.
///
/// Guarantees required of implementations:
/// - Safe for concurrent use by independent deployment runs.
/// - Every failure is a [`crate::CapabilityError`]; operations never panic.
/// - `describe_*` operations return `Ok(None)` for resources that do not
///   exist, reserving `Err` for genuine call failures.
/// - No operation retries internally; retry policy belongs to the caller.
#[async_trait]
pub trait CloudCapability: Send + Sync {
    /// Build a container image from a local build context.
    async fn build_image(&self, context_dir: &str) -> CapabilityResult<ImageRef>;

    /// Publish an image (a built ref or an upstream image) to the registry.
    async fn publish_image(&self, source: &str) -> CapabilityResult<ImageRef>;

    /// Look up whether an image for this source is already published.
    async fn resolve_image(&self, source: &str) -> CapabilityResult<Option<ImageRef>>;

    /// Create the named stack, or update it if it already exists.
    async fn create_or_update_stack(
        &self,
        name: &str,
        template: &str,
        params: &BTreeMap<String, String>,
    ) -> CapabilityResult<StackId>;

    /// Describe a stack by name. `None` when the stack does not exist.
    async fn describe_stack(&self, name: &str) -> CapabilityResult<Option<StackDescription>>;

    /// Describe a service by name. `None` when the service does not exist.
    async fn describe_service(&self, service: &str) -> CapabilityResult<Option<ServiceState>>;

    /// List tasks of a service that stopped at or after `since`.
    async fn list_stopped_tasks(
        &self,
        service: &str,
        since: DateTime<Utc>,
    ) -> CapabilityResult<Vec<TaskStopInfo>>;

    /// Tail the most recent lines from a log group, bounded by `limit`.
    async fn tail_logs(
        &self,
        log_group: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> CapabilityResult<Vec<LogLine>>;
}
