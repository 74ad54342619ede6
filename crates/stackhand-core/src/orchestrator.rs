//! Deployment orchestrator.
//!
//! Executes a deployment plan as a state machine
//! (`Pending -> InProgress -> Converging -> {Stable | Failed | TimedOut}`,
//! `Cancelled` from any non-terminal state) and exposes the operation
//! surface the surrounding transport binds to: build a plan, start a run,
//! query status, cancel, diagnose.
//!
//! Steps run strictly in plan order. Before execution each step is probed
//! for already-applied infrastructure and skipped when present, which makes
//! re-running a plan against existing resources idempotent. A failed step
//! stops the run immediately; infrastructure created by earlier steps is
//! left in place and recorded for the caller to remediate or tear down.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use stackhand_cloud::{CapabilityResult, CloudCapability};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::{OrchestratorConfig, RetryPolicy};
use crate::diagnosis::{DiagnosisEngine, FailureMatcher};
use crate::domain::app_spec::AppSpec;
use crate::domain::diagnosis::Diagnosis;
use crate::domain::error::{DeployError, Result};
use crate::domain::evidence::Evidence;
use crate::domain::plan::{DeploymentPlan, Step, StepKind};
use crate::domain::run::{DeploymentRun, RunId, RunSummary, StepOutcome, StepResult};
use crate::evidence::EvidenceCollector;
use crate::planner;
use crate::poller::{ConvergencePoller, PollVerdict};
use crate::registry::{RunRegistry, SharedRun};
use crate::report::render_diagnosis_md;
use crate::retry::{with_retry, Retried};

/// Orchestrates deployment runs against a cloud capability.
pub struct Orchestrator {
    cloud: Arc<dyn CloudCapability>,
    config: OrchestratorConfig,
    registry: Arc<RunRegistry>,
    engine: DiagnosisEngine,
}

impl Orchestrator {
    /// Create an orchestrator with the built-in diagnosis matcher set.
    pub fn new(cloud: Arc<dyn CloudCapability>, config: OrchestratorConfig) -> Self {
        Self {
            cloud,
            config,
            registry: Arc::new(RunRegistry::new()),
            engine: DiagnosisEngine::new(),
        }
    }

    /// Register an additional failure-pattern matcher.
    pub fn register_matcher(&mut self, matcher: Box<dyn FailureMatcher>) {
        self.engine.register(matcher);
    }

    /// Build a deployment plan from an application descriptor.
    pub fn build_plan(&self, spec: &AppSpec) -> Result<DeploymentPlan> {
        planner::build_plan(spec)
    }

    /// Start executing a plan; returns once the run is registered.
    ///
    /// Fails with `RunInProgress` when another run is active for the same
    /// target. The run itself executes on a spawned task; observe it via
    /// [`run_status`](Self::run_status).
    pub fn start_run(&self, plan: DeploymentPlan) -> Result<RunId> {
        let run = DeploymentRun::new(plan);
        let cancel = CancelToken::new();
        let (run_id, shared) = self.registry.register(run, cancel.clone())?;

        info!(run_id = %run_id, "deployment run starting");
        let cloud = Arc::clone(&self.cloud);
        let config = self.config.clone();
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            drive_run(cloud, config, registry, shared, cancel).await;
        });

        Ok(run_id)
    }

    /// Current state of a run.
    pub fn run_status(&self, run_id: &RunId) -> Result<DeploymentRun> {
        let (shared, _) = self
            .registry
            .get(run_id)
            .ok_or_else(|| DeployError::RunNotFound(run_id.clone()))?;
        let run = shared.lock().unwrap().clone();
        Ok(run)
    }

    /// Summaries of all registered runs.
    pub fn list_runs(&self) -> Vec<RunSummary> {
        self.registry.list()
    }

    /// Request cancellation of a run.
    ///
    /// Acknowledged immediately; the run observes the request at its next
    /// step boundary or poll sample and marks itself `Cancelled`, leaving
    /// already-created infrastructure untouched. Cancelling a terminal run
    /// is a no-op.
    pub fn cancel_run(&self, run_id: &RunId) -> Result<()> {
        let (shared, cancel) = self
            .registry
            .get(run_id)
            .ok_or_else(|| DeployError::RunNotFound(run_id.clone()))?;
        if shared.lock().unwrap().status().is_terminal() {
            return Ok(());
        }
        info!(run_id = %run_id, "cancellation requested");
        cancel.cancel();
        Ok(())
    }

    /// Forcibly release the lock for a target name.
    ///
    /// Only effective when the holding run is terminal or the lock has
    /// outlived the configured grace period; the override is logged.
    pub fn force_unlock(&self, target: &str) -> bool {
        self.registry
            .force_unlock(target, self.config.lock.grace_period)
    }

    /// Collect an evidence snapshot for a run.
    pub async fn collect_evidence(&self, run_id: &RunId) -> Result<Evidence> {
        let run = self.run_status(run_id)?;
        let collector =
            EvidenceCollector::new(Arc::clone(&self.cloud), self.config.evidence.clone());
        Ok(collector.collect(&run).await)
    }

    /// Diagnose a run from freshly collected evidence.
    pub async fn diagnose(&self, run_id: &RunId) -> Result<Diagnosis> {
        let evidence = self.collect_evidence(run_id).await?;
        Ok(self.engine.diagnose(&evidence))
    }

    /// Diagnose a run and render the result as markdown.
    pub async fn diagnose_report(&self, run_id: &RunId) -> Result<String> {
        let evidence = self.collect_evidence(run_id).await?;
        let diagnosis = self.engine.diagnose(&evidence);
        Ok(render_diagnosis_md(&diagnosis, &evidence))
    }

    /// Poll until the run reaches a terminal status.
    ///
    /// Intended for embedders that want a blocking wait; combine with
    /// `tokio::time::timeout` for a bounded version.
    pub async fn wait_until_terminal(&self, run_id: &RunId) -> Result<DeploymentRun> {
        loop {
            let run = self.run_status(run_id)?;
            if run.status().is_terminal() {
                return Ok(run);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

/// Execute the plan's steps in order, then hand off to the convergence
/// poller. Every attempted mutation's outcome is recorded in the run
/// history before the driver moves on or returns.
async fn drive_run(
    cloud: Arc<dyn CloudCapability>,
    config: OrchestratorConfig,
    registry: Arc<RunRegistry>,
    shared: SharedRun,
    cancel: CancelToken,
) {
    let (run_id, target, steps) = {
        let run = shared.lock().unwrap();
        (
            run.run_id.clone(),
            run.plan.app_name.clone(),
            run.plan.steps().to_vec(),
        )
    };

    let mut image_ref: Option<String> = None;
    let mut step_failed = false;

    for step in &steps {
        if cancel.is_cancelled() {
            info!(run_id = %run_id, step = %step.id, "cancelled before step");
            shared.lock().unwrap().mark_cancelled();
            registry.release(&target, &run_id);
            return;
        }

        let deps_satisfied = {
            let run = shared.lock().unwrap();
            step.depends_on.iter().all(|dep| {
                run.step_results.iter().any(|r| {
                    r.step_id == *dep
                        && matches!(r.outcome, StepOutcome::Succeeded | StepOutcome::Skipped)
                })
            })
        };
        let started_at = Utc::now();
        if !deps_satisfied {
            // Builder plans are topologically ordered; only a hand-built
            // plan can reach this.
            shared.lock().unwrap().record_step(StepResult {
                step_id: step.id.clone(),
                kind: step.kind,
                target_resource: step.target_resource.clone(),
                outcome: StepOutcome::Failed,
                response: None,
                error: Some("dependency not satisfied".to_string()),
                attempts: 0,
                started_at,
                finished_at: Utc::now(),
            });
            step_failed = true;
            break;
        }

        match probe_existing(cloud.as_ref(), step).await {
            Ok(Some(existing)) => {
                info!(run_id = %run_id, step = %step.id, "resource already applied, skipping");
                capture_image_ref(step.kind, &existing, &mut image_ref);
                shared.lock().unwrap().record_step(StepResult {
                    step_id: step.id.clone(),
                    kind: step.kind,
                    target_resource: step.target_resource.clone(),
                    outcome: StepOutcome::Skipped,
                    response: Some(existing),
                    error: None,
                    attempts: 1,
                    started_at,
                    finished_at: Utc::now(),
                });
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                // A failed probe is not a failed step; fall through and
                // attempt the mutation.
                warn!(run_id = %run_id, step = %step.id, error = %err, "idempotence probe failed");
            }
        }

        let retried = execute_step(cloud.as_ref(), &config.retry, step, image_ref.as_deref()).await;
        match retried.result {
            Ok(response) => {
                capture_image_ref(step.kind, &response, &mut image_ref);
                info!(run_id = %run_id, step = %step.id, attempts = retried.attempts, "step succeeded");
                shared.lock().unwrap().record_step(StepResult {
                    step_id: step.id.clone(),
                    kind: step.kind,
                    target_resource: step.target_resource.clone(),
                    outcome: StepOutcome::Succeeded,
                    response: Some(response),
                    error: None,
                    attempts: retried.attempts,
                    started_at,
                    finished_at: Utc::now(),
                });
            }
            Err(err) => {
                warn!(
                    run_id = %run_id,
                    step = %step.id,
                    attempts = retried.attempts,
                    error = %err,
                    "step failed, run stops"
                );
                shared.lock().unwrap().record_step(StepResult {
                    step_id: step.id.clone(),
                    kind: step.kind,
                    target_resource: step.target_resource.clone(),
                    outcome: StepOutcome::Failed,
                    response: None,
                    error: Some(err.to_string()),
                    attempts: retried.attempts,
                    started_at,
                    finished_at: Utc::now(),
                });
                step_failed = true;
                break;
            }
        }
    }

    if step_failed {
        shared.lock().unwrap().finish_failed();
        registry.release(&target, &run_id);
        return;
    }
    if cancel.is_cancelled() {
        shared.lock().unwrap().mark_cancelled();
        registry.release(&target, &run_id);
        return;
    }

    info!(run_id = %run_id, "all steps applied, waiting for convergence");
    let poller = ConvergencePoller::new(Arc::clone(&cloud), config.poller.clone());
    match poller.run(&shared, &cancel).await {
        PollVerdict::Outcome(outcome) => {
            let mut run = shared.lock().unwrap();
            run.finish_with(outcome);
            info!(run_id = %run_id, status = ?run.status(), "run finished");
        }
        PollVerdict::Cancelled => {
            shared.lock().unwrap().mark_cancelled();
            info!(run_id = %run_id, "run cancelled during convergence");
        }
    }
    registry.release(&target, &run_id);
}

/// Probe whether a step's resource is already applied.
///
/// Image steps resolve through the registry; stack-backed steps describe
/// the stack by name and require a settled, non-rolled-back state.
async fn probe_existing(
    cloud: &dyn CloudCapability,
    step: &Step,
) -> CapabilityResult<Option<Value>> {
    if step.kind.is_stack_backed() {
        let described = cloud.describe_stack(&step.target_resource).await?;
        Ok(described.and_then(|d| {
            d.is_healthy().then(|| {
                json!({
                    "stack_id": d.stack_id.0,
                    "status": d.status,
                    "already_present": true,
                })
            })
        }))
    } else {
        let resolved = cloud.resolve_image(&step.target_resource).await?;
        Ok(resolved.map(|image| {
            json!({
                "image_ref": image.0,
                "already_present": true,
            })
        }))
    }
}

/// Execute one step through the capability, with step-level retry.
async fn execute_step(
    cloud: &dyn CloudCapability,
    retry: &RetryPolicy,
    step: &Step,
    image_ref: Option<&str>,
) -> Retried<Value> {
    match step.kind {
        StepKind::BuildImage => {
            let context = step
                .parameters
                .get("context_dir")
                .and_then(Value::as_str)
                .unwrap_or(&step.target_resource)
                .to_string();
            let retried = with_retry(retry, "build_image", || cloud.build_image(&context)).await;
            Retried {
                result: retried.result.map(|image| json!({ "image_ref": image.0 })),
                attempts: retried.attempts,
            }
        }
        StepKind::PublishImage => {
            let source = step
                .parameters
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or(&step.target_resource)
                .to_string();
            let retried = with_retry(retry, "publish_image", || cloud.publish_image(&source)).await;
            Retried {
                result: retried.result.map(|image| json!({ "image_ref": image.0 })),
                attempts: retried.attempts,
            }
        }
        _ => {
            let template = step
                .parameters
                .get("template")
                .and_then(Value::as_str)
                .unwrap_or(step.kind.id())
                .to_string();
            let params = stack_parameters(step, image_ref);
            let retried = with_retry(retry, "create_or_update_stack", || {
                cloud.create_or_update_stack(&step.target_resource, &template, &params)
            })
            .await;
            Retried {
                result: retried
                    .result
                    .map(|stack_id| json!({ "stack_id": stack_id.0 })),
                attempts: retried.attempts,
            }
        }
    }
}

/// Flatten step parameters into stack parameters, substituting the image
/// produced earlier in the run where the template expects one.
fn stack_parameters(step: &Step, image_ref: Option<&str>) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    if let Some(object) = step.parameters.as_object() {
        for (key, value) in object {
            if key == "template" || value.is_null() {
                continue;
            }
            let rendered = match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            };
            params.insert(key.clone(), rendered);
        }
    }
    if step.kind == StepKind::RegisterTaskDefinition {
        if let Some(image) = image_ref {
            params.insert("image".to_string(), image.to_string());
        }
    }
    params
}

/// Remember the image reference a build/publish step produced or found.
fn capture_image_ref(kind: StepKind, response: &Value, image_ref: &mut Option<String>) {
    if matches!(kind, StepKind::BuildImage | StepKind::PublishImage) {
        if let Some(image) = response.get("image_ref").and_then(Value::as_str) {
            *image_ref = Some(image.to_string());
        }
    }
}
