/// Sandbox Executor - runs one command in a fresh, locked-down container
///
/// **Per-execution lifecycle:**
/// `Created → Running → {Completed | TimedOut} → Removed`, or
/// `CreationFailed` when no container was ever made.
///
/// **Guarantees:**
/// - Every constraint is applied when the container is created
/// - Waiting never blocks a runtime thread (async Docker API)
/// - Timeout kills the container; the abandoned wait is dropped
/// - A created container is force-removed before `execute` returns, on
///   every path. If the execution future itself is dropped half-way, the
///   guard's `Drop` schedules the removal instead.
/// - Failures come back as an `ExecutionResult` with the sentinel exit
///   code, never as an error
use crate::command::{SandboxCommand, WORK_DIR};
use crate::config::SandboxLimits;
use crate::error::{ExecutionFailure, RuntimeError};
use crate::runtime::{ContainerRuntime, ContainerSpec};
use snipbox_common::types::ExecutionResult;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Created,
    Running,
    Completed,
    TimedOut,
    CreationFailed,
    Removed,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SandboxState::Created => "created",
            SandboxState::Running => "running",
            SandboxState::Completed => "completed",
            SandboxState::TimedOut => "timed_out",
            SandboxState::CreationFailed => "creation_failed",
            SandboxState::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// A resolved unit of work: which image, which command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxJob {
    /// Language name used in logs and user-facing messages
    pub label: String,
    pub image: String,
    pub command: SandboxCommand,
}

/// Owns a created container until it is removed
struct ContainerGuard<R: ContainerRuntime + 'static> {
    runtime: Arc<R>,
    container_id: String,
    armed: bool,
}

impl<R: ContainerRuntime + 'static> ContainerGuard<R> {
    fn new(runtime: Arc<R>, container_id: String) -> Self {
        Self {
            runtime,
            container_id,
            armed: true,
        }
    }

    /// Remove the container now. Failures are logged, never returned.
    ///
    /// The guard stays armed until the call returns, so dropping this future
    /// half-way still schedules the removal.
    async fn remove(mut self) {
        let removed = self.runtime.remove_container(&self.container_id).await;
        self.armed = false;
        match removed {
            Ok(()) => debug!(
                container_id = %self.container_id,
                state = %SandboxState::Removed,
                "Container removed"
            ),
            Err(e) => warn!(
                container_id = %self.container_id,
                error = %e,
                "Failed to remove container"
            ),
        }
    }
}

impl<R: ContainerRuntime + 'static> Drop for ContainerGuard<R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        // Cannot await in Drop; hand the removal to the runtime
        let runtime = Arc::clone(&self.runtime);
        let container_id = std::mem::take(&mut self.container_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = runtime.remove_container(&container_id).await {
                        warn!(
                            container_id = %container_id,
                            error = %e,
                            "Failed to remove abandoned container"
                        );
                    }
                });
            }
            Err(_) => warn!(
                container_id = %container_id,
                "No async runtime available to remove abandoned container"
            ),
        }
    }
}

fn infrastructure(e: RuntimeError) -> ExecutionFailure {
    ExecutionFailure::Infrastructure(e.to_string())
}

pub struct SandboxExecutor<R: ContainerRuntime + 'static> {
    runtime: Arc<R>,
    limits: SandboxLimits,
}

impl<R: ContainerRuntime + 'static> SandboxExecutor<R> {
    pub fn new(runtime: Arc<R>, limits: SandboxLimits) -> Self {
        Self { runtime, limits }
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    fn container_spec(&self, job: &SandboxJob) -> ContainerSpec {
        let mut writable_dirs = vec![WORK_DIR.to_string()];
        if let Some(cache_dir) = job.command.cache_dir {
            writable_dirs.push(cache_dir.to_string());
        }

        ContainerSpec {
            name: format!("snipbox-{}", uuid::Uuid::new_v4()),
            image: job.image.clone(),
            argv: job.command.argv.clone(),
            env: job.command.env.clone(),
            working_dir: WORK_DIR.to_string(),
            writable_dirs,
            limits: self.limits.clone(),
        }
    }

    /// Run a job under `timeout` and always come back with a result
    #[tracing::instrument(
        skip(self, job, timeout),
        fields(
            language = %job.label,
            image = %job.image,
            timeout_ms = timeout.as_millis() as u64
        )
    )]
    pub async fn execute(&self, job: &SandboxJob, timeout: Duration) -> ExecutionResult {
        let start = Instant::now();
        let result = match self.try_execute(job, timeout).await {
            Ok(result) => result,
            Err(failure) => {
                warn!(error = %failure, "Execution did not produce an exit code");
                failure.into()
            }
        };

        info!(
            exit_code = result.exit_code,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Execution finished"
        );
        result
    }

    async fn try_execute(
        &self,
        job: &SandboxJob,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionFailure> {
        // Best effort: the image may already be cached locally
        if let Err(e) = self.runtime.pull_image(&job.image).await {
            warn!(image = %job.image, error = %e, "Image pull failed, trying local copy");
        }

        let spec = self.container_spec(job);
        let container_id = match self.runtime.create_container(&spec).await {
            Ok(id) => id,
            Err(e) => {
                debug!(state = %SandboxState::CreationFailed, error = %e, "Container creation failed");
                return Err(match e {
                    RuntimeError::ImageNotFound(_) => ExecutionFailure::ImageNotFound {
                        language: job.label.clone(),
                    },
                    other => infrastructure(other),
                });
            }
        };
        debug!(container_id = %container_id, name = %spec.name, state = %SandboxState::Created, "Container created");

        let guard = ContainerGuard::new(Arc::clone(&self.runtime), container_id.clone());
        let outcome = self.run_to_completion(&container_id, timeout).await;
        guard.remove().await;
        outcome
    }

    async fn run_to_completion(
        &self,
        container_id: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionFailure> {
        self.runtime
            .start_container(container_id)
            .await
            .map_err(infrastructure)?;
        debug!(container_id = %container_id, state = %SandboxState::Running, "Container started");

        let completion = async {
            let exit_code = self.runtime.wait_container(container_id).await?;
            let output = self.runtime.collect_logs(container_id).await?;
            Ok::<_, RuntimeError>((exit_code, output))
        };

        match tokio::time::timeout(timeout, completion).await {
            Ok(Ok((exit_code, output))) => {
                debug!(
                    container_id = %container_id,
                    state = %SandboxState::Completed,
                    exit_code,
                    "Container exited"
                );
                Ok(ExecutionResult {
                    stdout: output.stdout,
                    stderr: output.stderr,
                    exit_code,
                })
            }
            Ok(Err(e)) => Err(infrastructure(e)),
            Err(_) => {
                warn!(
                    container_id = %container_id,
                    state = %SandboxState::TimedOut,
                    timeout_ms = timeout.as_millis() as u64,
                    "Execution timed out, killing container"
                );
                if let Err(e) = self.runtime.kill_container(container_id).await {
                    warn!(container_id = %container_id, error = %e, "Failed to kill timed-out container");
                }
                Err(ExecutionFailure::TimeoutExceeded)
            }
        }
    }
}
