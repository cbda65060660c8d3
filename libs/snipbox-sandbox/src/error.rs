//! Error types for snipbox-sandbox.

use snipbox_common::types::{ExecutionResult, Language};
use thiserror::Error;

/// Why an execution produced no program exit code.
///
/// Every variant is turned into an [`ExecutionResult`] with the sentinel
/// exit code and its `Display` text as stderr; none of them ever crosses the
/// runner boundary as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionFailure {
    /// No image could be found for the requested runtime
    #[error("Image for {language} not found")]
    ImageNotFound {
        /// Language label used in the message
        language: String,
    },

    /// The container outlived its wall-clock budget
    #[error("Timeout exceeded")]
    TimeoutExceeded,

    /// Container engine unreachable, resource exhaustion, malformed response...
    #[error("System error: {0}")]
    Infrastructure(String),

    /// Language string not in the catalog, rejected by policy
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Request the sandbox refuses to run as given
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<ExecutionFailure> for ExecutionResult {
    fn from(failure: ExecutionFailure) -> Self {
        ExecutionResult::failure(failure.to_string())
    }
}

/// Errors reported by a [`crate::runtime::ContainerRuntime`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The engine has no such image
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Error from the Docker API
    #[error("docker: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Anything else the runtime wants to report
    #[error("{0}")]
    Other(String),
}

/// Errors raised while loading or validating the image catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read image catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse image catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown language '{0}' in image catalog")]
    UnknownLanguage(String),

    #[error("language {0} has no versions")]
    EmptyLanguage(Language),

    #[error("language {language} lists version {version} more than once")]
    DuplicateVersion { language: Language, version: String },

    #[error("language {0} appears more than once")]
    DuplicateLanguage(Language),

    #[error("no languages configured in image catalog")]
    Empty,
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);
