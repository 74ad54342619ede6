//! End-to-end failure diagnosis tests: crash-looping deployment, evidence
//! collection, and ranked findings.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stackhand_cloud::fakes::{running_service_state, ScriptedCloud};
use stackhand_cloud::{CapabilityError, LogLine, TaskStopInfo};
use stackhand_core::{
    AppSpec, CauseCategory, DiagnosisEngine, EvidenceSource, ImageSource, Orchestrator,
    OrchestratorConfig, PollerConfig, RetryPolicy, RunStatus, UNKNOWN_CONFIDENCE,
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
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            ..RetryPolicy::default()
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

fn pull_failure_stop(task_id: &str) -> TaskStopInfo {
    TaskStopInfo {
        task_id: task_id.to_string(),
        task_definition: "web-app:1".to_string(),
        started_at: None,
        // Stops are seeded before the run starts; stamp them inside the
        // run's evidence window.
        stopped_at: Utc::now() + chrono::Duration::seconds(60),
        stop_code: Some("TaskFailedToStart".to_string()),
        stopped_reason:
            "CannotPullContainerError: pull image manifest has been retried 5 time(s)".to_string(),
        exit_code: None,
    }
}

/// Crash-looping image pull: the run fails before timeout, and the top
/// finding names the image pull with confidence above the unknown baseline.
#[tokio::test(start_paused = true)]
async fn image_pull_crash_loop_diagnosed() {
    let cloud = Arc::new(ScriptedCloud::new());
    cloud.push_service_state(running_service_state("web-app", 0, 2));
    for i in 0..3 {
        cloud.push_stopped_task(pull_failure_stop(&format!("task-{}", i)));
    }

    let orchestrator = Orchestrator::new(cloud.clone(), fast_config());
    let run_id = orchestrator
        .start_run(orchestrator.build_plan(&web_app_spec()).expect("plan"))
        .expect("start");
    let run = tokio::time::timeout(
        Duration::from_secs(60),
        orchestrator.wait_until_terminal(&run_id),
    )
    .await
    .expect("run should terminate")
    .expect("run should exist");

    // The poller detected the crash loop before the budget elapsed.
    assert_eq!(run.status(), RunStatus::Failed);

    let diagnosis = orchestrator.diagnose(&run_id).await.expect("diagnosis");
    let top = diagnosis.top_finding().expect("never empty");
    assert_eq!(top.cause, CauseCategory::ImagePullFailure);
    assert!(top.confidence > UNKNOWN_CONFIDENCE);
    assert!(!top.evidence_refs.is_empty());
    assert!(top
        .evidence_refs
        .iter()
        .all(|id| id.starts_with("task_stop_reasons")));
}

/// The same evidence snapshot always diagnoses byte-identically.
#[tokio::test(start_paused = true)]
async fn diagnosis_is_deterministic_for_identical_evidence() {
    let cloud = Arc::new(ScriptedCloud::new());
    cloud.push_service_state(running_service_state("web-app", 0, 2));
    for i in 0..3 {
        cloud.push_stopped_task(pull_failure_stop(&format!("task-{}", i)));
    }

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

    let evidence = orchestrator
        .collect_evidence(&run_id)
        .await
        .expect("evidence");
    let engine = DiagnosisEngine::new();

    let first = serde_json::to_vec(&engine.diagnose(&evidence)).expect("serialize");
    let second = serde_json::to_vec(&engine.diagnose(&evidence)).expect("serialize");
    assert_eq!(first, second);
}

/// A source failing during collection never aborts diagnosis.
#[tokio::test(start_paused = true)]
async fn partial_evidence_still_diagnoses() {
    let cloud = Arc::new(ScriptedCloud::new());
    cloud.push_service_state(running_service_state("web-app", 0, 2));
    for i in 0..3 {
        cloud.push_stopped_task(pull_failure_stop(&format!("task-{}", i)));
    }

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

    cloud.inject_failure(
        "tail_logs",
        CapabilityError::new("ResourceNotFoundException", "log group missing"),
    );
    let evidence = orchestrator
        .collect_evidence(&run_id)
        .await
        .expect("evidence");
    assert!(evidence
        .unavailable_sources()
        .contains(&EvidenceSource::LogTail));

    let diagnosis = DiagnosisEngine::new().diagnose(&evidence);
    assert_eq!(
        diagnosis.top_finding().expect("never empty").cause,
        CauseCategory::ImagePullFailure
    );
}

/// A stable run with clean telemetry diagnoses to a single Unknown finding.
#[tokio::test(start_paused = true)]
async fn clean_run_diagnoses_unknown() {
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

    let diagnosis = orchestrator.diagnose(&run_id).await.expect("diagnosis");
    assert_eq!(diagnosis.findings.len(), 1);
    assert_eq!(diagnosis.findings[0].cause, CauseCategory::Unknown);
    assert_eq!(diagnosis.findings[0].confidence, UNKNOWN_CONFIDENCE);
}

/// The rendered report names the top cause and the evidence that backs it.
#[tokio::test(start_paused = true)]
async fn diagnosis_report_renders_findings() {
    let cloud = Arc::new(ScriptedCloud::new());
    cloud.push_service_state(running_service_state("web-app", 0, 2));
    for i in 0..3 {
        cloud.push_stopped_task(pull_failure_stop(&format!("task-{}", i)));
    }
    cloud.push_log_line(LogLine {
        timestamp: Utc::now() + chrono::Duration::seconds(60),
        message: "exec /app/server: exec format error".to_string(),
    });

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

    let report = orchestrator
        .diagnose_report(&run_id)
        .await
        .expect("report");
    assert!(report.contains("# Deployment Diagnosis"));
    assert!(report.contains("image pull failure"));
    assert!(report.contains("CannotPullContainerError"));
    assert!(report.contains("task_stop_reasons"));
}
