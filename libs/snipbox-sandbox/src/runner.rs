/// Code Runner - the inbound `run_code` operation
///
/// **Flow:**
/// 1. Resolve the language under the unknown-language policy
/// 2. Image Catalog picks the image, Command Builder the command
/// 3. Take an admission slot (waits while the gate is full)
/// 4. Sandbox Executor runs it
/// 5. Slot goes back when the guard drops
///
/// Requests rejected in steps 1-2 never touch Docker and never wait.
///
/// Always returns an `ExecutionResult`; problems become sentinel results.
use crate::admission::AdmissionGate;
use crate::catalog::ImageCatalog;
use crate::command::{build_command, decode_only};
use crate::config::{RunnerConfig, UnknownLanguagePolicy};
use crate::error::ExecutionFailure;
use crate::executor::{SandboxExecutor, SandboxJob};
use crate::runtime::ContainerRuntime;
use snipbox_common::types::{ExecutionRequest, ExecutionResult, Language};
use std::sync::Arc;
use tracing::{info, warn};

pub struct CodeRunner<R: ContainerRuntime + 'static> {
    catalog: Arc<ImageCatalog>,
    gate: AdmissionGate,
    executor: SandboxExecutor<R>,
    config: RunnerConfig,
}

impl<R: ContainerRuntime + 'static> CodeRunner<R> {
    pub fn new(runtime: Arc<R>, catalog: Arc<ImageCatalog>, config: RunnerConfig) -> Self {
        Self {
            gate: AdmissionGate::new(config.max_concurrent_executions),
            executor: SandboxExecutor::new(runtime, config.limits.clone()),
            catalog,
            config,
        }
    }

    pub fn catalog(&self) -> &ImageCatalog {
        &self.catalog
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run untrusted code and report what happened
    #[tracing::instrument(
        skip(self, request),
        fields(
            language = %request.language,
            version = request.version.as_deref().unwrap_or("default"),
            source_bytes = request.code.len()
        )
    )]
    pub async fn run_code(&self, request: &ExecutionRequest) -> ExecutionResult {
        let job = match self.resolve(request) {
            Ok(job) => job,
            Err(failure) => {
                warn!(error = %failure, "Request rejected");
                return failure.into();
            }
        };

        let _slot = match self.gate.acquire().await {
            Ok(slot) => slot,
            Err(failure) => return failure.into(),
        };

        let timeout = self.config.effective_timeout(request.timeout_seconds);
        info!(
            image = %job.image,
            timeout_ms = timeout.as_millis() as u64,
            in_flight = self.gate.in_flight(),
            "Running code"
        );

        self.executor.execute(&job, timeout).await
    }

    /// Map a request onto an image and a command
    pub fn resolve(&self, request: &ExecutionRequest) -> Result<SandboxJob, ExecutionFailure> {
        match request.language.parse::<Language>() {
            Ok(language) => {
                let image = self
                    .catalog
                    .resolve_image(language, request.version.as_deref())
                    .ok_or_else(|| ExecutionFailure::ImageNotFound {
                        language: language.to_string(),
                    })?;

                Ok(SandboxJob {
                    label: language.to_string(),
                    image: image.to_string(),
                    command: build_command(&request.code, language)?,
                })
            }
            Err(unknown) => match self.config.unknown_language {
                UnknownLanguagePolicy::Reject => {
                    Err(ExecutionFailure::UnsupportedLanguage(unknown.0))
                }
                UnknownLanguagePolicy::Fallback => {
                    let fallback = Language::default();
                    let image = self.catalog.default_image(fallback).ok_or_else(|| {
                        ExecutionFailure::ImageNotFound {
                            language: request.language.clone(),
                        }
                    })?;
                    warn!(
                        requested = %request.language,
                        image = image,
                        "Unknown language, echoing source in fallback image"
                    );

                    Ok(SandboxJob {
                        label: request.language.clone(),
                        image: image.to_string(),
                        command: decode_only(&request.code)?,
                    })
                }
            },
        }
    }
}
