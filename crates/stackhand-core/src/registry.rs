//! Run registry and per-target locking.
//!
//! Replaces any notion of a process-global "current deployment": every run
//! is registered here under its id, and a per-target-name lock guarantees at
//! most one active run per deployment target. Lock lifetime is tied to the
//! run lifecycle: released on terminal state, reclaimable past a grace
//! period only through an explicit, logged force-unlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::domain::error::{DeployError, Result};
use crate::domain::run::{DeploymentRun, RunId, RunSummary};

/// Shared handle to a registered run.
pub type SharedRun = Arc<Mutex<DeploymentRun>>;

struct TargetLock {
    run_id: RunId,
    run: SharedRun,
    acquired_at: DateTime<Utc>,
}

struct RunEntry {
    run: SharedRun,
    cancel: CancelToken,
}

/// In-memory registry of deployment runs keyed by run id, with one lock per
/// target resource name.
#[derive(Default)]
pub struct RunRegistry {
    locks: Mutex<HashMap<String, TargetLock>>,
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run, acquiring the lock for its target.
    ///
    /// Fails with `RunInProgress` when another run holds the target's lock
    /// and has not reached a terminal state. A lock left behind by a
    /// terminal run is reclaimed silently.
    pub fn register(&self, run: DeploymentRun, cancel: CancelToken) -> Result<(RunId, SharedRun)> {
        let target = run.plan.app_name.clone();
        let run_id = run.run_id.clone();
        let shared: SharedRun = Arc::new(Mutex::new(run));

        {
            let mut locks = self.locks.lock().unwrap();
            if let Some(held) = locks.get(&target) {
                let holder_terminal = held.run.lock().unwrap().status().is_terminal();
                if !holder_terminal {
                    return Err(DeployError::RunInProgress { target });
                }
            }
            locks.insert(
                target.clone(),
                TargetLock {
                    run_id: run_id.clone(),
                    run: Arc::clone(&shared),
                    acquired_at: Utc::now(),
                },
            );
        }

        let mut runs = self.runs.lock().unwrap();
        runs.insert(
            run_id.0.clone(),
            RunEntry {
                run: Arc::clone(&shared),
                cancel,
            },
        );
        info!(run_id = %run_id, target = %target, "run registered");
        Ok((run_id, shared))
    }

    /// Look up a registered run and its cancel token.
    pub fn get(&self, run_id: &RunId) -> Option<(SharedRun, CancelToken)> {
        let runs = self.runs.lock().unwrap();
        runs.get(&run_id.0)
            .map(|e| (Arc::clone(&e.run), e.cancel.clone()))
    }

    /// Release the target lock held by `run_id`.
    ///
    /// A lock held by a different run is left untouched, so a force-unlock
    /// followed by a new run must not be broken by the stale run's cleanup.
    pub fn release(&self, target: &str, run_id: &RunId) {
        let mut locks = self.locks.lock().unwrap();
        match locks.get(target) {
            Some(held) if held.run_id == *run_id => {
                locks.remove(target);
                info!(run_id = %run_id, target, "target lock released");
            }
            Some(_) => {
                warn!(run_id = %run_id, target, "lock held by another run, not released");
            }
            None => {}
        }
    }

    /// Forcibly release a target lock.
    ///
    /// Succeeds when the holder is terminal, or when the lock is older than
    /// `grace_period` (the override is logged). Returns whether a lock was
    /// removed.
    pub fn force_unlock(&self, target: &str, grace_period: Duration) -> bool {
        let mut locks = self.locks.lock().unwrap();
        let Some(held) = locks.get(target) else {
            return false;
        };

        let holder_terminal = held.run.lock().unwrap().status().is_terminal();
        let age = Utc::now() - held.acquired_at;
        let past_grace = age
            .to_std()
            .map(|a| a >= grace_period)
            .unwrap_or(false);

        if holder_terminal {
            locks.remove(target);
            return true;
        }
        if past_grace {
            warn!(
                target,
                run_id = %held.run_id,
                age_secs = age.num_seconds(),
                "force-unlock override of active run lock"
            );
            locks.remove(target);
            return true;
        }
        false
    }

    /// Whether a target's lock is currently held.
    pub fn is_locked(&self, target: &str) -> bool {
        self.locks.lock().unwrap().contains_key(target)
    }

    /// Summaries of all registered runs.
    pub fn list(&self) -> Vec<RunSummary> {
        let runs = self.runs.lock().unwrap();
        let mut summaries: Vec<RunSummary> = runs
            .values()
            .map(|e| RunSummary::from(&*e.run.lock().unwrap()))
            .collect();
        summaries.sort_by_key(|s| s.started_at);
        summaries
    }

    /// Drop terminal runs that finished before `cutoff`. Returns how many
    /// were removed. Active runs are never expired.
    pub fn expire_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let mut runs = self.runs.lock().unwrap();
        let before = runs.len();
        runs.retain(|_, entry| {
            let run = entry.run.lock().unwrap();
            match (run.status().is_terminal(), run.finished_at) {
                (true, Some(finished)) => finished >= cutoff,
                _ => true,
            }
        });
        before - runs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::app_spec::{AppSpec, ImageSource};
    use crate::domain::run::ConvergenceOutcome;
    use crate::planner::build_plan;

    fn new_run(name: &str) -> DeploymentRun {
        let spec = AppSpec::new(
            name,
            ImageSource::Registry {
                image: "nginx:1.25".to_string(),
            },
        )
        .with_port(8080);
        DeploymentRun::new(build_plan(&spec).expect("plan"))
    }

    #[test]
    fn test_second_registration_for_same_target_rejected() {
        let registry = RunRegistry::new();
        let (first_id, _) = registry
            .register(new_run("web-app"), CancelToken::new())
            .expect("first registration");

        let err = registry
            .register(new_run("web-app"), CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, DeployError::RunInProgress { .. }));

        // A different target is unaffected.
        assert!(registry
            .register(new_run("other-app"), CancelToken::new())
            .is_ok());
        assert!(registry.get(&first_id).is_some());
    }

    #[test]
    fn test_terminal_holder_lock_is_reclaimed() {
        let registry = RunRegistry::new();
        let (_, shared) = registry
            .register(new_run("web-app"), CancelToken::new())
            .expect("register");
        shared
            .lock()
            .unwrap()
            .finish_with(ConvergenceOutcome::Stable);

        assert!(registry
            .register(new_run("web-app"), CancelToken::new())
            .is_ok());
    }

    #[test]
    fn test_release_only_by_holder() {
        let registry = RunRegistry::new();
        let (run_id, _) = registry
            .register(new_run("web-app"), CancelToken::new())
            .expect("register");

        registry.release("web-app", &RunId("someone-else".to_string()));
        assert!(registry.is_locked("web-app"));

        registry.release("web-app", &run_id);
        assert!(!registry.is_locked("web-app"));
    }

    #[test]
    fn test_force_unlock_respects_grace_period() {
        let registry = RunRegistry::new();
        registry
            .register(new_run("web-app"), CancelToken::new())
            .expect("register");

        // Fresh active lock, generous grace period: refused.
        assert!(!registry.force_unlock("web-app", Duration::from_secs(900)));
        assert!(registry.is_locked("web-app"));

        // Zero grace period: any active lock is stale.
        assert!(registry.force_unlock("web-app", Duration::from_secs(0)));
        assert!(!registry.is_locked("web-app"));
    }

    #[test]
    fn test_expire_finished_keeps_active_runs() {
        let registry = RunRegistry::new();
        let (stable_id, shared) = registry
            .register(new_run("web-app"), CancelToken::new())
            .expect("register");
        shared
            .lock()
            .unwrap()
            .finish_with(ConvergenceOutcome::Stable);
        registry
            .register(new_run("other-app"), CancelToken::new())
            .expect("register");

        let removed = registry.expire_finished(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(removed, 1);
        assert!(registry.get(&stable_id).is_none());
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_list_reports_current_status() {
        let registry = RunRegistry::new();
        registry
            .register(new_run("web-app"), CancelToken::new())
            .expect("register");

        let summaries = registry.list();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].app_name, "web-app");
        assert_eq!(summaries[0].status, crate::domain::run::RunStatus::Pending);
    }
}
