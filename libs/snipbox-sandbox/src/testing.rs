// Scriptable in-memory ContainerRuntime for unit tests.

use crate::error::RuntimeError;
use crate::runtime::{CapturedOutput, ContainerRuntime, ContainerSpec};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Exists(String),
    Pull(String),
    Create(String),
    Start(String),
    Wait(String),
    Logs(String),
    Kill(String),
    Remove(String),
}

impl Call {
    pub fn kind(&self) -> &'static str {
        match self {
            Call::Exists(_) => "exists",
            Call::Pull(_) => "pull",
            Call::Create(_) => "create",
            Call::Start(_) => "start",
            Call::Wait(_) => "wait",
            Call::Logs(_) => "logs",
            Call::Kill(_) => "kill",
            Call::Remove(_) => "remove",
        }
    }
}

#[derive(Default)]
struct Recorded {
    calls: Vec<Call>,
    specs: Vec<ContainerSpec>,
    created: Vec<String>,
    removed: HashSet<String>,
    running: HashSet<String>,
    local_images: HashSet<String>,
}

#[derive(Default)]
pub struct MockRuntime {
    recorded: Mutex<Recorded>,
    stdout: String,
    stderr: String,
    exit_code: i64,
    wait_delay: Option<Duration>,
    first_remove_delay: Option<Duration>,
    first_remove_seen: AtomicBool,
    fail_inspect: bool,
    fail_pull: bool,
    fail_pull_images: HashSet<String>,
    fail_create: bool,
    missing_image: bool,
    fail_start: bool,
    fail_wait: bool,
    fail_kill: bool,
    fail_remove: bool,
    wait_notify: Notify,
    max_running: AtomicUsize,
}

fn mock_error(what: &str) -> RuntimeError {
    RuntimeError::Other(format!("mock {} failure", what))
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, stdout: &str, stderr: &str, exit_code: i64) -> Self {
        self.stdout = stdout.to_string();
        self.stderr = stderr.to_string();
        self.exit_code = exit_code;
        self
    }

    pub fn with_wait_delay(mut self, delay: Duration) -> Self {
        self.wait_delay = Some(delay);
        self
    }

    /// Stall the first `remove_container` call for `delay`
    pub fn with_first_remove_delay(mut self, delay: Duration) -> Self {
        self.first_remove_delay = Some(delay);
        self
    }

    pub fn with_local_images(self, images: &[&str]) -> Self {
        {
            let mut recorded = self.recorded.lock().unwrap();
            recorded
                .local_images
                .extend(images.iter().map(|i| i.to_string()));
        }
        self
    }

    pub fn failing_inspect(mut self) -> Self {
        self.fail_inspect = true;
        self
    }

    pub fn failing_pull(mut self) -> Self {
        self.fail_pull = true;
        self
    }

    pub fn failing_pull_for(mut self, image: &str) -> Self {
        self.fail_pull_images.insert(image.to_string());
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn missing_image(mut self) -> Self {
        self.missing_image = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_wait(mut self) -> Self {
        self.fail_wait = true;
        self
    }

    pub fn failing_kill(mut self) -> Self {
        self.fail_kill = true;
        self
    }

    pub fn failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.recorded.lock().unwrap().calls.clone()
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.recorded.lock().unwrap().specs.clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.recorded.lock().unwrap().created.clone()
    }

    /// Every created container has been removed
    pub fn all_removed(&self) -> bool {
        let recorded = self.recorded.lock().unwrap();
        recorded.created.iter().all(|id| recorded.removed.contains(id))
    }

    /// Highest number of containers started and not yet removed at once
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Resolves once some container has entered `wait_container`
    pub async fn wait_started(&self) {
        self.wait_notify.notified().await;
    }

    fn record(&self, call: Call) {
        self.recorded.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        self.record(Call::Exists(image.to_string()));
        if self.fail_inspect {
            return Err(mock_error("inspect"));
        }
        Ok(self.recorded.lock().unwrap().local_images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(Call::Pull(image.to_string()));
        if self.fail_pull || self.fail_pull_images.contains(image) {
            return Err(mock_error("pull"));
        }
        self.recorded
            .lock()
            .unwrap()
            .local_images
            .insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.record(Call::Create(spec.name.clone()));
        if self.missing_image {
            return Err(RuntimeError::ImageNotFound(spec.image.clone()));
        }
        if self.fail_create {
            return Err(mock_error("create"));
        }

        let mut recorded = self.recorded.lock().unwrap();
        let id = format!("container-{}", recorded.created.len() + 1);
        recorded.created.push(id.clone());
        recorded.specs.push(spec.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(Call::Start(id.to_string()));
        if self.fail_start {
            return Err(mock_error("start"));
        }

        let mut recorded = self.recorded.lock().unwrap();
        recorded.running.insert(id.to_string());
        self.max_running
            .fetch_max(recorded.running.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        self.record(Call::Wait(id.to_string()));
        self.wait_notify.notify_one();
        if let Some(delay) = self.wait_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_wait {
            return Err(mock_error("wait"));
        }
        Ok(self.exit_code)
    }

    async fn collect_logs(&self, id: &str) -> Result<CapturedOutput, RuntimeError> {
        self.record(Call::Logs(id.to_string()));
        Ok(CapturedOutput {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        })
    }

    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(Call::Kill(id.to_string()));
        if self.fail_kill {
            return Err(mock_error("kill"));
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(Call::Remove(id.to_string()));
        if let Some(delay) = self.first_remove_delay {
            if !self.first_remove_seen.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(delay).await;
            }
        }
        if self.fail_remove {
            return Err(mock_error("remove"));
        }

        let mut recorded = self.recorded.lock().unwrap();
        recorded.running.remove(id);
        recorded.removed.insert(id.to_string());
        Ok(())
    }
}
