// Environment configuration for the Snipbox worker
use anyhow::{Context, Result};
use snipbox_common::redis::CODE_EXECUTION_QUEUE;
use snipbox_sandbox::catalog::ImageCatalog;
use snipbox_sandbox::config::{parse_seconds, RunnerConfig, SandboxLimits};
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub queue: String,
    pub catalog_path: Option<PathBuf>,
    pub json_logs: bool,
    pub runner: RunnerConfig,
}

impl WorkerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut runner = RunnerConfig::default();
        if let Some(raw) = get("MAX_CONCURRENT_EXECUTIONS") {
            runner.max_concurrent_executions = parse(&raw, "MAX_CONCURRENT_EXECUTIONS")?;
        }
        if let Some(raw) = get("DEFAULT_TIMEOUT_SECONDS") {
            runner.default_timeout =
                parse_seconds(&raw).context("Invalid DEFAULT_TIMEOUT_SECONDS")?;
        }
        if let Some(raw) = get("MAX_TIMEOUT_SECONDS") {
            runner.max_timeout = parse_seconds(&raw).context("Invalid MAX_TIMEOUT_SECONDS")?;
        }
        if let Some(raw) = get("UNKNOWN_LANGUAGE_POLICY") {
            runner.unknown_language = raw.parse().context("Invalid UNKNOWN_LANGUAGE_POLICY")?;
        }

        let mut limits = SandboxLimits::default();
        if let Some(raw) = get("SANDBOX_MEMORY_MB") {
            limits.memory_mb = parse(&raw, "SANDBOX_MEMORY_MB")?;
        }
        if let Some(raw) = get("SANDBOX_CPU_QUOTA") {
            limits.cpu_quota = parse(&raw, "SANDBOX_CPU_QUOTA")?;
        }
        if let Some(raw) = get("SANDBOX_PIDS_LIMIT") {
            limits.pids_limit = parse(&raw, "SANDBOX_PIDS_LIMIT")?;
        }
        if let Some(raw) = get("SANDBOX_TMPFS_SIZE") {
            limits.tmpfs_size = raw.trim().to_string();
        }
        runner.limits = limits;
        runner.validate().context("Invalid runner configuration")?;

        Ok(Self {
            redis_url: get("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            queue: get("QUEUE_NAME").unwrap_or_else(|| CODE_EXECUTION_QUEUE.to_string()),
            catalog_path: get("IMAGE_CATALOG_PATH").map(PathBuf::from),
            json_logs: get("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
            runner,
        })
    }

    /// Catalog from `IMAGE_CATALOG_PATH`, or the built-in table
    pub fn load_catalog(&self) -> Result<ImageCatalog> {
        match &self.catalog_path {
            Some(path) => ImageCatalog::load(path)
                .with_context(|| format!("Failed to load image catalog from {}", path.display())),
            None => Ok(ImageCatalog::builtin()),
        }
    }
}

fn parse<T>(raw: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid {}: '{}'", key, raw))
}
