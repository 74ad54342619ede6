//! Stackhand domain model.

pub mod app_spec;
pub mod diagnosis;
pub mod error;
pub mod evidence;
pub mod plan;
pub mod run;
pub mod snapshot;

pub use app_spec::{AppSpec, ImageSource, ResourceClass};
pub use diagnosis::{CauseCategory, Diagnosis, Finding};
pub use error::{DeployError, Result};
pub use evidence::{Evidence, EvidenceRecord, EvidenceSource, SourceEvidence};
pub use plan::{DeploymentPlan, DeploymentTargets, Step, StepKind};
pub use run::{
    ConvergenceOutcome, DeploymentRun, RunId, RunStatus, RunSummary, StepOutcome, StepResult,
};
pub use snapshot::ServiceSnapshot;
