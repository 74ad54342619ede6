//! In-memory fake for the cloud capability trait (testing only).
//!
//! `ScriptedCloud` satisfies [`CloudCapability`] without touching any cloud
//! API. Tests seed it with stacks, images, a scripted sequence of service
//! states, stopped tasks, and log lines, and may inject one-shot errors per
//! operation to exercise failure paths.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::capability::*;
use crate::error::{CapabilityError, CapabilityResult};

/// Scripted in-memory cloud.
///
/// Service state is consumed as a sticky-last queue: each `describe_service`
/// call pops the next scripted state and the final one repeats forever, so a
/// convergence test can script "2 pending samples, then steady" without
/// counting poll iterations exactly.
#[derive(Debug, Default)]
pub struct ScriptedCloud {
    stacks: Mutex<HashMap<String, StackDescription>>,
    images: Mutex<HashMap<String, ImageRef>>,
    service_script: Mutex<VecDeque<ServiceState>>,
    stopped_tasks: Mutex<Vec<TaskStopInfo>>,
    log_lines: Mutex<Vec<LogLine>>,
    failures: Mutex<HashMap<String, VecDeque<CapabilityError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a stack in a settled CREATE_COMPLETE state.
    pub fn seed_healthy_stack(&self, name: &str) {
        let description = StackDescription {
            stack_id: StackId(format!("arn:aws:cloudformation:stack/{}", name)),
            status: "CREATE_COMPLETE".to_string(),
            events: Vec::new(),
            resource_states: BTreeMap::new(),
        };
        self.seed_stack(name, description);
    }

    /// Seed a stack with an explicit description.
    pub fn seed_stack(&self, name: &str, description: StackDescription) {
        let mut stacks = self.stacks.lock().unwrap();
        stacks.insert(name.to_string(), description);
    }

    /// Seed an already-published image for `source`.
    pub fn seed_image(&self, source: &str, image: ImageRef) {
        let mut images = self.images.lock().unwrap();
        images.insert(source.to_string(), image);
    }

    /// Append the next scripted service state.
    pub fn push_service_state(&self, state: ServiceState) {
        let mut script = self.service_script.lock().unwrap();
        script.push_back(state);
    }

    /// Record a stopped task for `list_stopped_tasks` to return.
    pub fn push_stopped_task(&self, stop: TaskStopInfo) {
        let mut stops = self.stopped_tasks.lock().unwrap();
        stops.push(stop);
    }

    /// Record a log line for `tail_logs` to return.
    pub fn push_log_line(&self, line: LogLine) {
        let mut lines = self.log_lines.lock().unwrap();
        lines.push(line);
    }

    /// Queue a one-shot error for the named operation.
    ///
    /// Errors are consumed in FIFO order, one per call; once the queue for an
    /// operation is drained, calls succeed again.
    pub fn inject_failure(&self, operation: &str, error: CapabilityError) {
        let mut failures = self.failures.lock().unwrap();
        failures
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Every call made so far, as "operation:argument" strings.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls made to the named operation.
    pub fn call_count(&self, operation: &str) -> usize {
        let prefix = format!("{}:", operation);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    fn record_call(&self, operation: &str, argument: &str) {
        let mut calls = self.calls.lock().unwrap();
        calls.push(format!("{}:{}", operation, argument));
    }

    fn take_failure(&self, operation: &str) -> Option<CapabilityError> {
        let mut failures = self.failures.lock().unwrap();
        failures.get_mut(operation).and_then(|q| q.pop_front())
    }
}

#[async_trait]
impl CloudCapability for ScriptedCloud {
    async fn build_image(&self, context_dir: &str) -> CapabilityResult<ImageRef> {
        self.record_call("build_image", context_dir);
        if let Some(err) = self.take_failure("build_image") {
            return Err(err);
        }
        Ok(ImageRef(format!("built/{}:latest", context_dir)))
    }

    async fn publish_image(&self, source: &str) -> CapabilityResult<ImageRef> {
        self.record_call("publish_image", source);
        if let Some(err) = self.take_failure("publish_image") {
            return Err(err);
        }
        let image = ImageRef(format!("registry.local/{}", source));
        let mut images = self.images.lock().unwrap();
        images.insert(source.to_string(), image.clone());
        Ok(image)
    }

    async fn resolve_image(&self, source: &str) -> CapabilityResult<Option<ImageRef>> {
        self.record_call("resolve_image", source);
        if let Some(err) = self.take_failure("resolve_image") {
            return Err(err);
        }
        let images = self.images.lock().unwrap();
        Ok(images.get(source).cloned())
    }

    async fn create_or_update_stack(
        &self,
        name: &str,
        _template: &str,
        _params: &BTreeMap<String, String>,
    ) -> CapabilityResult<StackId> {
        self.record_call("create_or_update_stack", name);
        if let Some(err) = self.take_failure("create_or_update_stack") {
            return Err(err);
        }
        let stack_id = StackId(format!("arn:aws:cloudformation:stack/{}", name));
        let mut stacks = self.stacks.lock().unwrap();
        stacks.insert(
            name.to_string(),
            StackDescription {
                stack_id: stack_id.clone(),
                status: "CREATE_COMPLETE".to_string(),
                events: Vec::new(),
                resource_states: BTreeMap::new(),
            },
        );
        Ok(stack_id)
    }

    async fn describe_stack(&self, name: &str) -> CapabilityResult<Option<StackDescription>> {
        self.record_call("describe_stack", name);
        if let Some(err) = self.take_failure("describe_stack") {
            return Err(err);
        }
        let stacks = self.stacks.lock().unwrap();
        Ok(stacks.get(name).cloned())
    }

    async fn describe_service(&self, service: &str) -> CapabilityResult<Option<ServiceState>> {
        self.record_call("describe_service", service);
        if let Some(err) = self.take_failure("describe_service") {
            return Err(err);
        }
        let mut script = self.service_script.lock().unwrap();
        if script.len() > 1 {
            Ok(script.pop_front())
        } else {
            Ok(script.front().cloned())
        }
    }

    async fn list_stopped_tasks(
        &self,
        service: &str,
        since: DateTime<Utc>,
    ) -> CapabilityResult<Vec<TaskStopInfo>> {
        self.record_call("list_stopped_tasks", service);
        if let Some(err) = self.take_failure("list_stopped_tasks") {
            return Err(err);
        }
        let stops = self.stopped_tasks.lock().unwrap();
        Ok(stops
            .iter()
            .filter(|s| s.stopped_at >= since)
            .cloned()
            .collect())
    }

    async fn tail_logs(
        &self,
        log_group: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> CapabilityResult<Vec<LogLine>> {
        self.record_call("tail_logs", log_group);
        if let Some(err) = self.take_failure("tail_logs") {
            return Err(err);
        }
        let lines = self.log_lines.lock().unwrap();
        let mut recent: Vec<LogLine> = lines
            .iter()
            .filter(|l| l.timestamp >= since)
            .cloned()
            .collect();
        if recent.len() > limit {
            recent.drain(..recent.len() - limit);
        }
        Ok(recent)
    }
}

/// Service state with `running` healthy RUNNING tasks out of `desired`.
pub fn running_service_state(service: &str, running: u32, desired: u32) -> ServiceState {
    let tasks = (0..running)
        .map(|i| TaskObservation {
            task_id: format!("task-{}", i),
            last_status: "RUNNING".to_string(),
            health: TaskHealth::Healthy,
        })
        .collect();
    ServiceState {
        service_name: service.to_string(),
        task_definition: format!("{}:1", service),
        running_count: running,
        desired_count: desired,
        pending_count: desired.saturating_sub(running),
        events: Vec::new(),
        tasks,
    }
}
