//! Point-in-time service snapshots produced by the convergence poller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackhand_cloud::{ServiceEvent, ServiceState, TaskHealth};

/// Immutable view of a service at one poll sample.
///
/// Snapshots are never mutated; newer samples supersede older ones in the
/// run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    /// When the sample was taken.
    pub observed_at: DateTime<Utc>,

    /// Task definition revision the service was deploying at sample time.
    pub task_definition: String,

    /// Number of tasks in RUNNING state.
    pub running_count: u32,

    /// Desired task count.
    pub desired_count: u32,

    /// Number of tasks still provisioning.
    pub pending_count: u32,

    /// Whether every observed task was RUNNING and not reporting unhealthy.
    pub all_tasks_healthy: bool,

    /// Service events visible at sample time, oldest first.
    pub events: Vec<ServiceEvent>,
}

impl ServiceSnapshot {
    /// Derive a snapshot from a live service description.
    pub fn from_state(state: &ServiceState, observed_at: DateTime<Utc>) -> Self {
        let all_tasks_healthy = state
            .tasks
            .iter()
            .all(|t| t.last_status == "RUNNING" && t.health != TaskHealth::Unhealthy);
        Self {
            observed_at,
            task_definition: state.task_definition.clone(),
            running_count: state.running_count,
            desired_count: state.desired_count,
            pending_count: state.pending_count,
            all_tasks_healthy,
            events: state.events.clone(),
        }
    }

    /// Whether this sample looks converged: running matches desired and no
    /// task reports unhealthy.
    pub fn is_stable(&self) -> bool {
        self.running_count == self.desired_count
            && self.pending_count == 0
            && self.all_tasks_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackhand_cloud::fakes::running_service_state;
    use stackhand_cloud::TaskObservation;

    #[test]
    fn test_snapshot_from_steady_state_is_stable() {
        let state = running_service_state("web-app", 2, 2);
        let snapshot = ServiceSnapshot::from_state(&state, Utc::now());
        assert!(snapshot.is_stable());
    }

    #[test]
    fn test_snapshot_with_pending_tasks_not_stable() {
        let state = running_service_state("web-app", 1, 2);
        let snapshot = ServiceSnapshot::from_state(&state, Utc::now());
        assert!(!snapshot.is_stable());
    }

    #[test]
    fn test_unhealthy_task_blocks_stability() {
        let mut state = running_service_state("web-app", 2, 2);
        state.tasks.push(TaskObservation {
            task_id: "task-2".to_string(),
            last_status: "RUNNING".to_string(),
            health: TaskHealth::Unhealthy,
        });
        let snapshot = ServiceSnapshot::from_state(&state, Utc::now());
        assert!(!snapshot.all_tasks_healthy);
        assert!(!snapshot.is_stable());
    }

    #[test]
    fn test_zero_desired_count_is_stable() {
        let state = running_service_state("web-app", 0, 0);
        let snapshot = ServiceSnapshot::from_state(&state, Utc::now());
        assert!(snapshot.is_stable());
    }
}
