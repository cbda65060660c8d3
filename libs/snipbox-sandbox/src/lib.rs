//! Sandboxed execution of untrusted code snippets in throwaway containers.

pub mod admission;
pub mod catalog;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod runner;
pub mod runtime;
pub mod warmer;

#[cfg(test)]
mod testing;

pub use admission::{AdmissionGate, AdmissionSlot};
pub use catalog::{ImageCatalog, ImageVersion, LanguageImages};
pub use command::{build_command, decode_only, SandboxCommand};
pub use config::{RunnerConfig, SandboxLimits, UnknownLanguagePolicy};
pub use error::{CatalogError, ConfigError, ExecutionFailure, RuntimeError};
pub use executor::{SandboxExecutor, SandboxJob};
pub use runner::CodeRunner;
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use warmer::{warm_images, WarmReport};
