//! Deployment plan: ordered provisioning steps and target topology.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of provisioning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    BuildImage,
    PublishImage,
    ProvisionNetwork,
    ProvisionCluster,
    RegisterTaskDefinition,
    CreateOrUpdateService,
    AttachLoadBalancer,
}

impl StepKind {
    /// Whether this step provisions infrastructure through a stack.
    ///
    /// Stack-backed steps are probed by stack name for idempotence; image
    /// steps are probed through the registry instead.
    pub fn is_stack_backed(self) -> bool {
        !matches!(self, StepKind::BuildImage | StepKind::PublishImage)
    }

    /// Stable identifier used as the step id within a plan.
    pub fn id(self) -> &'static str {
        match self {
            StepKind::BuildImage => "build-image",
            StepKind::PublishImage => "publish-image",
            StepKind::ProvisionNetwork => "provision-network",
            StepKind::ProvisionCluster => "provision-cluster",
            StepKind::RegisterTaskDefinition => "register-task-definition",
            StepKind::CreateOrUpdateService => "create-or-update-service",
            StepKind::AttachLoadBalancer => "attach-load-balancer",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// One provisioning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique id within the plan.
    pub id: String,

    /// Step kind.
    pub kind: StepKind,

    /// Resource the step creates or updates (stack name or image source).
    pub target_resource: String,

    /// Step parameters handed to the capability call.
    pub parameters: Value,

    /// Ids of steps that must succeed (or be skipped) before this one runs.
    pub depends_on: Vec<String>,
}

/// Derived resource names for one application deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTargets {
    /// ECS service name.
    pub service_name: String,

    /// Cluster the service runs in.
    pub cluster_name: String,

    /// ECR repository the image is published to.
    pub image_repository: String,

    /// CloudWatch log group the tasks write to.
    pub log_group: String,
}

impl DeploymentTargets {
    /// Conventional resource names derived from the application name.
    pub fn for_app(app_name: &str, dedicated_cluster: bool) -> Self {
        let cluster_name = if dedicated_cluster {
            format!("{}-cluster", app_name)
        } else {
            "default".to_string()
        };
        Self {
            service_name: app_name.to_string(),
            cluster_name,
            image_repository: format!("{}-repo", app_name),
            log_group: format!("/ecs/{}", app_name),
        }
    }
}

/// Ordered provisioning steps for one application, immutable once built.
///
/// Construction goes through the plan builder, which guarantees the step
/// sequence is a valid topological order of `depends_on`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    /// Application (and deployment target) name.
    pub app_name: String,

    /// Derived resource names.
    pub targets: DeploymentTargets,

    steps: Vec<Step>,
}

impl DeploymentPlan {
    /// Assemble a plan from already-ordered steps.
    ///
    /// Callers outside the plan builder should not need this; it does not
    /// re-validate ordering beyond a debug assertion.
    pub(crate) fn from_parts(app_name: String, targets: DeploymentTargets, steps: Vec<Step>) -> Self {
        let plan = Self {
            app_name,
            targets,
            steps,
        };
        debug_assert!(plan.is_topologically_ordered());
        plan
    }

    /// The ordered steps.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Whether every step appears after all of its dependencies.
    pub fn is_topologically_ordered(&self) -> bool {
        let mut seen: HashSet<&str> = HashSet::new();
        for step in &self.steps {
            if !step.depends_on.iter().all(|d| seen.contains(d.as_str())) {
                return false;
            }
            seen.insert(&step.id);
        }
        true
    }
}
