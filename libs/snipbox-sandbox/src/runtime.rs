//! Container runtime boundary.
//!
//! The executor only talks to a [`ContainerRuntime`]; [`DockerRuntime`] is
//! the production implementation on top of bollard.

use crate::config::SandboxLimits;
use crate::error::RuntimeError;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;

/// Label put on every container the sandbox creates
pub const MANAGED_LABEL: &str = "snipbox.managed";

/// Everything needed to create one sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    /// Writable tmpfs mount points; everything else is read-only
    pub writable_dirs: Vec<String>,
    pub limits: SandboxLimits,
}

/// Output of a finished container, split by stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Operations the sandbox needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create (but do not start) a container; returns its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Wait until the container stops; returns its exit status code
    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError>;

    async fn collect_logs(&self, id: &str) -> Result<CapturedOutput, RuntimeError>;

    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Force-remove a container, running or not
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;
}

/// Host-side constraints for a sandbox container.
///
/// All of them are set at creation time and never relaxed afterwards.
pub fn host_config(spec: &ContainerSpec) -> HostConfig {
    let limits = &spec.limits;
    let tmpfs: HashMap<String, String> = spec
        .writable_dirs
        .iter()
        .map(|dir| (dir.clone(), limits.tmpfs_options()))
        .collect();

    HostConfig {
        memory: Some(limits.memory_bytes()),
        memory_swap: Some(limits.memory_bytes()),
        cpu_period: Some(limits.cpu_period),
        cpu_quota: Some(limits.cpu_quota),
        pids_limit: Some(limits.pids_limit),
        network_mode: Some("none".to_string()),
        readonly_rootfs: Some(true),
        tmpfs: Some(tmpfs),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        ..Default::default()
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let mut labels = HashMap::new();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.argv.clone()),
        env: Some(spec.env.clone()),
        working_dir: Some(spec.working_dir.clone()),
        labels: Some(labels),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        network_disabled: Some(true), // SECURITY: No network access
        host_config: Some(host_config(spec)),
        ..Default::default()
    }
}

/// Split log frames by stream and decode each stream once.
///
/// Long lines arrive cut into several frames at arbitrary byte offsets, so
/// a multibyte character may straddle two frames.
fn demultiplex(frames: impl IntoIterator<Item = LogOutput>) -> CapturedOutput {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    for frame in frames {
        match frame {
            LogOutput::StdOut { message } | LogOutput::Console { message } => {
                stdout.extend_from_slice(&message)
            }
            LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
            LogOutput::StdIn { .. } => {}
        }
    }

    CapturedOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    }
}

fn is_not_found(error: &DockerError) -> bool {
    matches!(
        error,
        DockerError::DockerResponseServerError { status_code: 404, .. }
    )
}

/// Docker engine reached through the local socket
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    /// Round-trip to the daemon to check it is reachable
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Ids of every container carrying the managed label, running or not
    pub async fn managed_containers(&self) -> Result<Vec<String>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}=true", MANAGED_LABEL)]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            match progress {
                Ok(_) => {}
                Err(e) if is_not_found(&e) => {
                    return Err(RuntimeError::ImageNotFound(image.to_string()))
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        match self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
        {
            Ok(response) => Ok(response.id),
            Err(e) if is_not_found(&e) => Err(RuntimeError::ImageNotFound(spec.image.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error; it is still a status
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(RuntimeError::Other(format!(
                "wait stream for container {} ended without a status",
                id
            ))),
        }
    }

    async fn collect_logs(&self, id: &str) -> Result<CapturedOutput, RuntimeError> {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        });

        let mut frames = Vec::new();
        let mut stream = self.docker.logs(id, options);
        while let Some(frame) = stream.next().await {
            frames.push(frame?);
        }
        Ok(demultiplex(frames))
    }

    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "snipbox-test".to_string(),
            image: "python:3.9-slim".to_string(),
            argv: vec!["sh".into(), "-c".into(), "true".into()],
            env: vec!["A=1".to_string()],
            working_dir: "/tmp".to_string(),
            writable_dirs: vec!["/tmp".to_string(), "/root/.cache".to_string()],
            limits: SandboxLimits::default(),
        }
    }

    #[test]
    fn test_host_config_applies_every_constraint() {
        let host = host_config(&spec());

        assert_eq!(host.memory, Some(100 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.cpu_period, Some(100_000));
        assert_eq!(host.cpu_quota, Some(10_000));
        assert_eq!(host.pids_limit, Some(50));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(host.security_opt, Some(vec!["no-new-privileges".to_string()]));

        let tmpfs = host.tmpfs.unwrap();
        assert_eq!(tmpfs.len(), 2);
        assert_eq!(tmpfs["/tmp"], "size=10m,mode=1777");
        assert_eq!(tmpfs["/root/.cache"], "size=10m,mode=1777");
    }

    #[test]
    fn test_container_config() {
        let config = container_config(&spec());

        assert_eq!(config.image.as_deref(), Some("python:3.9-slim"));
        assert_eq!(config.working_dir.as_deref(), Some("/tmp"));
        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(config.tty, Some(false));
        assert_eq!(config.env, Some(vec!["A=1".to_string()]));
        assert_eq!(
            config.labels.unwrap().get(MANAGED_LABEL).map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_demultiplex_joins_split_characters() {
        let line = "é".repeat(20_000);
        let bytes = line.as_bytes();
        // Cut inside a two-byte character
        let cut = 16_385;
        assert!(!line.is_char_boundary(cut));

        let frames = vec![
            LogOutput::StdOut {
                message: Bytes::copy_from_slice(&bytes[..cut]),
            },
            LogOutput::StdErr {
                message: Bytes::from_static(b"warn\n"),
            },
            LogOutput::StdOut {
                message: Bytes::copy_from_slice(&bytes[cut..]),
            },
        ];
        let output = demultiplex(frames);

        assert_eq!(output.stdout, line);
        assert_eq!(output.stderr, "warn\n");
        assert!(!output.stdout.contains('\u{FFFD}'));
    }

    #[test]
    fn test_not_found_detection() {
        let missing = DockerError::DockerResponseServerError {
            status_code: 404,
            message: "No such image: nope:latest".to_string(),
        };
        let conflict = DockerError::DockerResponseServerError {
            status_code: 409,
            message: "conflict".to_string(),
        };
        assert!(is_not_found(&missing));
        assert!(!is_not_found(&conflict));
    }
}
