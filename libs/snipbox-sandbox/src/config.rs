//! Runner and sandbox configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECONDS: f64 = 10.0;
pub const DEFAULT_MAX_TIMEOUT_SECONDS: f64 = 60.0;
pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 3;

/// Resource and security limits applied to every sandbox container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Memory ceiling in MiB (swap is capped to the same value)
    pub memory_mb: i64,
    /// CFS period in microseconds
    pub cpu_period: i64,
    /// CFS quota in microseconds per period
    pub cpu_quota: i64,
    /// Maximum number of processes/threads inside the container
    pub pids_limit: i64,
    /// Size of each writable tmpfs mount, in Docker's size syntax
    pub tmpfs_size: String,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_mb: 100,
            cpu_period: 100_000,
            cpu_quota: 10_000, // 10% of one core
            pids_limit: 50,
            tmpfs_size: "10m".to_string(),
        }
    }
}

impl SandboxLimits {
    pub fn memory_bytes(&self) -> i64 {
        self.memory_mb * 1024 * 1024
    }

    /// Mount options for a writable scratch tmpfs
    pub fn tmpfs_options(&self) -> String {
        format!("size={},mode=1777", self.tmpfs_size)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_mb <= 0 {
            return Err(ConfigError("memory_mb must be > 0".into()));
        }
        if self.memory_mb.checked_mul(1024 * 1024).is_none() {
            return Err(ConfigError(format!("memory_mb {} is too large", self.memory_mb)));
        }
        if self.cpu_period <= 0 || self.cpu_quota <= 0 {
            return Err(ConfigError("cpu_period and cpu_quota must be > 0".into()));
        }
        if self.pids_limit <= 0 {
            return Err(ConfigError("pids_limit must be > 0".into()));
        }
        if self.tmpfs_size.trim().is_empty() {
            return Err(ConfigError("tmpfs_size must not be empty".into()));
        }
        Ok(())
    }
}

/// What to do with a request whose language string is not a known language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownLanguagePolicy {
    /// Answer with an "Unsupported language" result without touching Docker
    #[default]
    Reject,
    /// Run a decode-and-print command in the default language's image
    Fallback,
}

impl fmt::Display for UnknownLanguagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownLanguagePolicy::Reject => f.write_str("reject"),
            UnknownLanguagePolicy::Fallback => f.write_str("fallback"),
        }
    }
}

impl FromStr for UnknownLanguagePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(UnknownLanguagePolicy::Reject),
            "fallback" => Ok(UnknownLanguagePolicy::Fallback),
            other => Err(ConfigError(format!(
                "unknown language policy '{}' (expected reject or fallback)",
                other
            ))),
        }
    }
}

/// Settings for [`crate::runner::CodeRunner`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub max_concurrent_executions: usize,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub unknown_language: UnknownLanguagePolicy,
    pub limits: SandboxLimits,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
            default_timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECONDS),
            max_timeout: Duration::from_secs_f64(DEFAULT_MAX_TIMEOUT_SECONDS),
            unknown_language: UnknownLanguagePolicy::default(),
            limits: SandboxLimits::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_executions == 0 {
            return Err(ConfigError("max_concurrent_executions must be > 0".into()));
        }
        if self.default_timeout.is_zero() {
            return Err(ConfigError("default_timeout must be > 0".into()));
        }
        if self.max_timeout < self.default_timeout {
            return Err(ConfigError(format!(
                "max_timeout ({:?}) is shorter than default_timeout ({:?})",
                self.max_timeout, self.default_timeout
            )));
        }
        self.limits.validate()
    }

    /// Wall-clock budget for a request.
    ///
    /// Missing, non-finite and non-positive values get the default; anything
    /// above the maximum is clamped to it.
    pub fn effective_timeout(&self, requested_seconds: Option<f64>) -> Duration {
        match requested_seconds {
            Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
                if seconds >= self.max_timeout.as_secs_f64() {
                    self.max_timeout
                } else {
                    Duration::from_secs_f64(seconds)
                }
            }
            _ => self.default_timeout,
        }
    }
}

/// Parse a seconds value that must be a positive, finite number.
pub fn parse_seconds(raw: &str) -> Result<Duration, ConfigError> {
    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError(format!("'{}' is not a number of seconds", raw)))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(ConfigError(format!("'{}' must be a positive number of seconds", raw)));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| ConfigError(format!("'{}' is out of range: {}", raw, e)))
}
