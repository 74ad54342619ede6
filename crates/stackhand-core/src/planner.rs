//! Deployment plan builder.
//!
//! Pure transformation from an application descriptor to an ordered step
//! sequence and target topology. No side effects; every cloud interaction
//! belongs to the orchestrator.

use serde_json::json;

use crate::domain::app_spec::{AppSpec, ImageSource};
use crate::domain::error::{DeployError, Result};
use crate::domain::plan::{DeploymentPlan, DeploymentTargets, Step, StepKind};

/// Build a deployment plan from an application descriptor.
///
/// Emits only the steps the requested topology needs: a registry-image spec
/// with default cluster and networking plans to exactly
/// `[PublishImage, RegisterTaskDefinition, CreateOrUpdateService]`.
///
/// # Errors
///
/// - `DeployError::InvalidSpec` when descriptor validation fails.
/// - `DeployError::UnsupportedTopology` when the requested combination has
///   no valid mapping (load balancer or health check without a routable
///   port).
pub fn build_plan(spec: &AppSpec) -> Result<DeploymentPlan> {
    spec.validate()?;

    if spec.load_balancer && spec.port.is_none() {
        return Err(DeployError::UnsupportedTopology(
            "load balancer requested without a routable port".to_string(),
        ));
    }
    if spec.health_check_path.is_some() && spec.port.is_none() {
        return Err(DeployError::UnsupportedTopology(
            "health check path requested without a routable port".to_string(),
        ));
    }

    let targets = DeploymentTargets::for_app(&spec.name, spec.dedicated_cluster);
    let mut steps = Vec::new();

    let image_source = match &spec.image {
        ImageSource::Build { context_dir } => {
            steps.push(Step {
                id: StepKind::BuildImage.id().to_string(),
                kind: StepKind::BuildImage,
                target_resource: context_dir.clone(),
                parameters: json!({ "context_dir": context_dir }),
                depends_on: Vec::new(),
            });
            context_dir.clone()
        }
        ImageSource::Registry { image } => image.clone(),
    };

    let publish_deps = if matches!(spec.image, ImageSource::Build { .. }) {
        vec![StepKind::BuildImage.id().to_string()]
    } else {
        Vec::new()
    };
    steps.push(Step {
        id: StepKind::PublishImage.id().to_string(),
        kind: StepKind::PublishImage,
        target_resource: image_source.clone(),
        parameters: json!({
            "source": image_source,
            "repository": targets.image_repository,
        }),
        depends_on: publish_deps,
    });

    if spec.dedicated_network {
        steps.push(Step {
            id: StepKind::ProvisionNetwork.id().to_string(),
            kind: StepKind::ProvisionNetwork,
            target_resource: format!("{}-network", spec.name),
            parameters: json!({ "template": "network" }),
            depends_on: Vec::new(),
        });
    }

    if spec.dedicated_cluster {
        let depends_on = if spec.dedicated_network {
            vec![StepKind::ProvisionNetwork.id().to_string()]
        } else {
            Vec::new()
        };
        steps.push(Step {
            id: StepKind::ProvisionCluster.id().to_string(),
            kind: StepKind::ProvisionCluster,
            target_resource: format!("{}-cluster", spec.name),
            parameters: json!({
                "template": "cluster",
                "cluster_name": targets.cluster_name,
            }),
            depends_on,
        });
    }

    steps.push(Step {
        id: StepKind::RegisterTaskDefinition.id().to_string(),
        kind: StepKind::RegisterTaskDefinition,
        target_resource: format!("{}-taskdef", spec.name),
        parameters: json!({
            "template": "task-definition",
            "family": spec.name,
            "image": image_source,
            "cpu": spec.resources.cpu_units(),
            "memory": spec.resources.memory_mib(),
            "port": spec.port,
            "environment": spec.environment,
            "log_group": targets.log_group,
        }),
        depends_on: vec![StepKind::PublishImage.id().to_string()],
    });

    let mut service_deps = vec![StepKind::RegisterTaskDefinition.id().to_string()];
    if spec.dedicated_cluster {
        service_deps.push(StepKind::ProvisionCluster.id().to_string());
    }
    if spec.dedicated_network {
        service_deps.push(StepKind::ProvisionNetwork.id().to_string());
    }
    steps.push(Step {
        id: StepKind::CreateOrUpdateService.id().to_string(),
        kind: StepKind::CreateOrUpdateService,
        target_resource: format!("{}-service", spec.name),
        parameters: json!({
            "template": "service",
            "service_name": targets.service_name,
            "cluster": targets.cluster_name,
            "desired_count": spec.desired_count,
            "port": spec.port,
        }),
        depends_on: service_deps,
    });

    if spec.load_balancer {
        let mut lb_deps = vec![StepKind::CreateOrUpdateService.id().to_string()];
        if spec.dedicated_network {
            lb_deps.push(StepKind::ProvisionNetwork.id().to_string());
        }
        steps.push(Step {
            id: StepKind::AttachLoadBalancer.id().to_string(),
            kind: StepKind::AttachLoadBalancer,
            target_resource: format!("{}-lb", spec.name),
            parameters: json!({
                "template": "load-balancer",
                "port": spec.port,
                "health_check_path": spec.health_check_path,
            }),
            depends_on: lb_deps,
        });
    }

    Ok(DeploymentPlan::from_parts(spec.name.clone(), targets, steps))
}
