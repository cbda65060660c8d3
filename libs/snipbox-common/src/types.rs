use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Exit code reported when the sandboxed process never produced one of its
/// own (timeout, missing image, infrastructure failure, rejected request).
pub const SENTINEL_EXIT_CODE: i64 = -1;

/// Languages the sandbox knows how to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Python,
    Javascript,
    Java,
    Go,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::Javascript,
        Language::Java,
        Language::Go,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Java => "java",
            Language::Go => "go",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown language: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::Javascript),
            "java" => Ok(Language::Java),
            "go" => Ok(Language::Go),
            _ => Err(UnknownLanguage(s.to_string())),
        }
    }
}

/// A single request to run untrusted code.
///
/// `language` stays a plain string on the wire: producers are expected to
/// validate it, but the sandbox decides what to do with one it does not know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
            version: None,
            timeout_seconds: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// Outcome of one execution, as handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecutionResult {
    /// A result for a failure where no program exit code exists.
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: SENTINEL_EXIT_CODE,
        }
    }

    /// True when the program ran to completion with exit code 0.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// True when the sandbox, not the program, produced this result.
    pub fn is_sandbox_failure(&self) -> bool {
        self.exit_code == SENTINEL_EXIT_CODE
    }
}

/// Envelope pushed onto the task queue by the API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub event: String,
    pub data: TaskData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskData {
    pub task_id: String,
    #[serde(flatten)]
    pub request: ExecutionRequest,
}

pub const RUN_CODE_EVENT: &str = "run_code";

impl TaskMessage {
    pub fn run_code(task_id: impl Into<String>, request: ExecutionRequest) -> Self {
        Self {
            event: RUN_CODE_EVENT.to_string(),
            data: TaskData {
                task_id: task_id.into(),
                request,
            },
        }
    }
}
