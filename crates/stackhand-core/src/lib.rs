//! Stackhand Core Library
//!
//! Deployment orchestration state machine and failure-diagnosis engine:
//! plan building, sequential step execution with idempotence probes,
//! convergence polling, evidence collection, and ranked root-cause
//! diagnosis. Cloud I/O goes exclusively through the capability boundary
//! in `stackhand-cloud`.

pub mod cancel;
pub mod config;
pub mod diagnosis;
pub mod domain;
pub mod evidence;
pub mod orchestrator;
pub mod planner;
pub mod poller;
pub mod registry;
pub mod report;
pub mod retry;
pub mod telemetry;

pub use domain::{
    AppSpec, CauseCategory, ConvergenceOutcome, DeployError, DeploymentPlan, DeploymentRun,
    DeploymentTargets, Diagnosis, Evidence, EvidenceRecord, EvidenceSource, Finding, ImageSource,
    ResourceClass, Result, RunId, RunStatus, RunSummary, ServiceSnapshot, SourceEvidence, Step,
    StepKind, StepOutcome, StepResult,
};

pub use cancel::CancelToken;
pub use config::{EvidenceConfig, LockConfig, OrchestratorConfig, PollerConfig, RetryPolicy};
pub use diagnosis::{default_matchers, DiagnosisEngine, FailureMatcher, UNKNOWN_CONFIDENCE};
pub use evidence::EvidenceCollector;
pub use orchestrator::Orchestrator;
pub use planner::build_plan;
pub use poller::{ConvergencePoller, PollVerdict};
pub use registry::RunRegistry;
pub use report::render_diagnosis_md;
pub use telemetry::init_tracing;

/// Stackhand version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
