//! Application descriptor and its validation rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{DeployError, Result};

/// Where the container image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Build from a local context directory, then publish.
    Build { context_dir: String },

    /// Publish an existing upstream image into the deployment registry.
    Registry { image: String },
}

/// Coarse CPU/memory sizing class mapped to task-level resource values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    #[default]
    Small,
    Medium,
    Large,
}

impl ResourceClass {
    /// CPU units for the task definition (1024 = one vCPU).
    pub fn cpu_units(self) -> u32 {
        match self {
            ResourceClass::Small => 256,
            ResourceClass::Medium => 512,
            ResourceClass::Large => 1024,
        }
    }

    /// Memory in MiB for the task definition.
    pub fn memory_mib(self) -> u32 {
        match self {
            ResourceClass::Small => 512,
            ResourceClass::Medium => 1024,
            ResourceClass::Large => 2048,
        }
    }
}

/// Declarative description of the application to deploy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSpec {
    /// Application name; doubles as the deployment target resource name.
    pub name: String,

    /// Container image source.
    pub image: ImageSource,

    /// Container port to expose, when the application serves traffic.
    pub port: Option<u16>,

    /// CPU/memory sizing class.
    pub resources: ResourceClass,

    /// Desired running task count.
    pub desired_count: u32,

    /// Environment variables passed to the container.
    pub environment: BTreeMap<String, String>,

    /// Whether to front the service with a load balancer.
    pub load_balancer: bool,

    /// HTTP health check path, when the service exposes one.
    pub health_check_path: Option<String>,

    /// Provision a dedicated cluster instead of deploying into the default.
    pub dedicated_cluster: bool,

    /// Provision dedicated networking instead of the default VPC.
    pub dedicated_network: bool,
}

impl AppSpec {
    /// Create a minimal spec; remaining fields are set with the `with_*`
    /// builders.
    pub fn new(name: impl Into<String>, image: ImageSource) -> Self {
        Self {
            name: name.into(),
            image,
            port: None,
            resources: ResourceClass::default(),
            desired_count: 1,
            environment: BTreeMap::new(),
            load_balancer: false,
            health_check_path: None,
            dedicated_cluster: false,
            dedicated_network: false,
        }
    }

    /// Set the container port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the desired task count.
    pub fn with_desired_count(mut self, count: u32) -> Self {
        self.desired_count = count;
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Request a load balancer in front of the service.
    pub fn with_load_balancer(mut self) -> Self {
        self.load_balancer = true;
        self
    }

    /// Set the HTTP health check path.
    pub fn with_health_check(mut self, path: impl Into<String>) -> Self {
        self.health_check_path = Some(path.into());
        self
    }

    /// Validate the descriptor.
    ///
    /// Checks:
    /// 1. `name` matches `[a-z][a-z0-9-]{1,30}`.
    /// 2. `port`, when present, is non-zero.
    /// 3. Environment variable names are non-empty and free of `=`.
    /// 4. A build-source context directory is non-empty.
    pub fn validate(&self) -> Result<()> {
        if !valid_name(&self.name) {
            return Err(DeployError::InvalidSpec(format!(
                "name '{}' must match [a-z][a-z0-9-]{{1,30}}",
                self.name
            )));
        }
        if self.port == Some(0) {
            return Err(DeployError::InvalidSpec("port must be in 1-65535".to_string()));
        }
        for key in self.environment.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(DeployError::InvalidSpec(format!(
                    "invalid environment variable name '{}'",
                    key
                )));
            }
        }
        if let ImageSource::Build { context_dir } = &self.image {
            if context_dir.is_empty() {
                return Err(DeployError::InvalidSpec(
                    "build context directory must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Whether `name` matches `[a-z][a-z0-9-]{1,30}`.
fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }
    let rest_len = name.len() - 1;
    if !(1..=30).contains(&rest_len) {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
