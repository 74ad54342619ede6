//! End-to-end deployment workflow tests against the scripted cloud fake.

use std::sync::Arc;
use std::time::Duration;

use stackhand_cloud::fakes::{running_service_state, ScriptedCloud};
use stackhand_cloud::{CapabilityError, ImageRef};
use stackhand_core::{
    AppSpec, DeployError, ImageSource, LockConfig, Orchestrator, OrchestratorConfig, PollerConfig,
    RetryPolicy, RunStatus, StepKind, StepOutcome,
};

fn web_app_spec() -> AppSpec {
    AppSpec::new(
        "web-app",
        ImageSource::Registry {
            image: "nginx:1.25".to_string(),
        },
    )
    .with_port(8080)
    .with_desired_count(2)
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            factor: 2,
        },
        poller: PollerConfig {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(80),
            timeout_budget: Duration::from_secs(5),
            ..PollerConfig::default()
        },
        ..OrchestratorConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn happy_path_reaches_stable() {
    let cloud = Arc::new(ScriptedCloud::new());
    cloud.push_service_state(running_service_state("web-app", 0, 2));
    cloud.push_service_state(running_service_state("web-app", 2, 2));

    let orchestrator = Orchestrator::new(cloud.clone(), fast_config());
    let plan = orchestrator.build_plan(&web_app_spec()).expect("plan");
    let kinds: Vec<StepKind> = plan.steps().iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![
            StepKind::PublishImage,
            StepKind::RegisterTaskDefinition,
            StepKind::CreateOrUpdateService,
        ]
    );

    let run_id = orchestrator.start_run(plan).expect("start");
    let run = tokio::time::timeout(
        Duration::from_secs(60),
        orchestrator.wait_until_terminal(&run_id),
    )
    .await
    .expect("run should terminate")
    .expect("run should exist");

    assert_eq!(run.status(), RunStatus::Stable);
    assert_eq!(run.step_results.len(), 3);
    assert!(run
        .step_results
        .iter()
        .all(|r| r.outcome == StepOutcome::Succeeded));
    assert!(run.finished_at.is_some());

    // One publish, two stacks (task definition + service).
    assert_eq!(cloud.call_count("publish_image"), 1);
    assert_eq!(cloud.call_count("create_or_update_stack"), 2);

    // The latest snapshot reflects the converged service.
    let snapshot = run.latest_snapshot().expect("snapshot");
    assert_eq!(snapshot.running_count, 2);
    assert_eq!(snapshot.desired_count, 2);
}

#[tokio::test(start_paused = true)]
async fn failing_step_stops_the_run() {
    let cloud = Arc::new(ScriptedCloud::new());
    for _ in 0..3 {
        cloud.inject_failure(
            "publish_image",
            CapabilityError::new("ServerException", "registry unavailable"),
        );
    }

    let orchestrator = Orchestrator::new(cloud.clone(), fast_config());
    let plan = orchestrator.build_plan(&web_app_spec()).expect("plan");
    let run_id = orchestrator.start_run(plan).expect("start");
    let run = tokio::time::timeout(
        Duration::from_secs(60),
        orchestrator.wait_until_terminal(&run_id),
    )
    .await
    .expect("run should terminate")
    .expect("run should exist");

    assert_eq!(run.status(), RunStatus::Failed);

    // Retries were exhausted at the step level, then the run stopped: no
    // result exists for any later step.
    assert_eq!(run.step_results.len(), 1);
    let failed = &run.step_results[0];
    assert_eq!(failed.kind, StepKind::PublishImage);
    assert_eq!(failed.outcome, StepOutcome::Failed);
    assert_eq!(failed.attempts, 3);
    assert!(failed.error.as_deref().unwrap().contains("ServerException"));

    // No infrastructure step ever ran.
    assert_eq!(cloud.call_count("create_or_update_stack"), 0);
}

#[tokio::test(start_paused = true)]
async fn rerun_against_existing_infrastructure_skips_everything() {
    let cloud = Arc::new(ScriptedCloud::new());
    cloud.seed_image("nginx:1.25", ImageRef("registry.local/nginx:1.25".into()));
    cloud.seed_healthy_stack("web-app-taskdef");
    cloud.seed_healthy_stack("web-app-service");
    cloud.push_service_state(running_service_state("web-app", 2, 2));

    let orchestrator = Orchestrator::new(cloud.clone(), fast_config());
    let plan = orchestrator.build_plan(&web_app_spec()).expect("plan");
    let run_id = orchestrator.start_run(plan).expect("start");
    let run = tokio::time::timeout(
        Duration::from_secs(60),
        orchestrator.wait_until_terminal(&run_id),
    )
    .await
    .expect("run should terminate")
    .expect("run should exist");

    assert_eq!(run.status(), RunStatus::Stable);
    assert!(run
        .step_results
        .iter()
        .all(|r| r.outcome == StepOutcome::Skipped));

    // No duplicate resources were created.
    assert_eq!(cloud.call_count("publish_image"), 0);
    assert_eq!(cloud.call_count("create_or_update_stack"), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_run_for_same_target_is_rejected() {
    let cloud = Arc::new(ScriptedCloud::new());
    // Never stabilizes, so the first run stays active.
    cloud.push_service_state(running_service_state("web-app", 1, 2));

    let orchestrator = Orchestrator::new(cloud.clone(), fast_config());
    let first = orchestrator
        .start_run(orchestrator.build_plan(&web_app_spec()).expect("plan"))
        .expect("first run");

    // Let the first run get past step execution.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!orchestrator
        .run_status(&first)
        .expect("status")
        .status()
        .is_terminal());

    let second = orchestrator.start_run(orchestrator.build_plan(&web_app_spec()).expect("plan"));
    assert!(matches!(second, Err(DeployError::RunInProgress { .. })));

    // A different target is unaffected.
    let other_spec = AppSpec::new(
        "other-app",
        ImageSource::Registry {
            image: "nginx:1.25".to_string(),
        },
    )
    .with_port(8080);
    assert!(orchestrator
        .start_run(orchestrator.build_plan(&other_spec).expect("plan"))
        .is_ok());

    orchestrator.cancel_run(&first).expect("cancel");
}

#[tokio::test(start_paused = true)]
async fn cancellation_marks_run_cancelled_and_leaves_infrastructure() {
    let cloud = Arc::new(ScriptedCloud::new());
    cloud.push_service_state(running_service_state("web-app", 1, 2));

    let orchestrator = Orchestrator::new(cloud.clone(), fast_config());
    let run_id = orchestrator
        .start_run(orchestrator.build_plan(&web_app_spec()).expect("plan"))
        .expect("start");

    // Let the steps finish and the poller take a sample.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stacks_created = cloud.call_count("create_or_update_stack");
    assert_eq!(stacks_created, 2);

    orchestrator.cancel_run(&run_id).expect("cancel");
    let run = tokio::time::timeout(
        Duration::from_secs(60),
        orchestrator.wait_until_terminal(&run_id),
    )
    .await
    .expect("cancel observed within one interval")
    .expect("run should exist");

    assert_eq!(run.status(), RunStatus::Cancelled);
    // Nothing was torn down or re-created.
    assert_eq!(cloud.call_count("create_or_update_stack"), stacks_created);

    // Cancelling a terminal run is an accepted no-op.
    orchestrator.cancel_run(&run_id).expect("cancel again");
}

#[tokio::test(start_paused = true)]
async fn force_unlock_recovers_stale_target() {
    let cloud = Arc::new(ScriptedCloud::new());
    cloud.push_service_state(running_service_state("web-app", 1, 2));

    let config = OrchestratorConfig {
        lock: LockConfig {
            grace_period: Duration::from_secs(0),
        },
        ..fast_config()
    };
    let orchestrator = Orchestrator::new(cloud.clone(), config);
    let first = orchestrator
        .start_run(orchestrator.build_plan(&web_app_spec()).expect("plan"))
        .expect("first run");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Active run, but zero grace period makes the lock reclaimable.
    assert!(orchestrator.force_unlock("web-app"));
    assert!(orchestrator
        .start_run(orchestrator.build_plan(&web_app_spec()).expect("plan"))
        .is_ok());

    orchestrator.cancel_run(&first).expect("cancel stale run");
}

#[tokio::test(start_paused = true)]
async fn run_listing_reports_current_statuses() {
    let cloud = Arc::new(ScriptedCloud::new());
    cloud.push_service_state(running_service_state("web-app", 2, 2));

    let orchestrator = Orchestrator::new(cloud.clone(), fast_config());
    let run_id = orchestrator
        .start_run(orchestrator.build_plan(&web_app_spec()).expect("plan"))
        .expect("start");
    tokio::time::timeout(
        Duration::from_secs(60),
        orchestrator.wait_until_terminal(&run_id),
    )
    .await
    .expect("terminates")
    .expect("exists");

    let runs = orchestrator.list_runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].app_name, "web-app");
    assert_eq!(runs[0].status, RunStatus::Stable);
}

#[tokio::test(start_paused = true)]
async fn unknown_run_id_is_an_error() {
    let cloud = Arc::new(ScriptedCloud::new());
    let orchestrator = Orchestrator::new(cloud, fast_config());

    let bogus = stackhand_core::RunId("no-such-run".to_string());
    assert!(matches!(
        orchestrator.run_status(&bogus),
        Err(DeployError::RunNotFound(_))
    ));
    assert!(matches!(
        orchestrator.cancel_run(&bogus),
        Err(DeployError::RunNotFound(_))
    ));
}
