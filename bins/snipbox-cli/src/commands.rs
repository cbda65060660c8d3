// CLI commands for operating Snipbox
use anyhow::{bail, Context, Result};
use snipbox_common::redis;
use snipbox_common::types::{ExecutionRequest, ExecutionResult, TaskMessage};
use snipbox_sandbox::catalog::ImageCatalog;
use snipbox_sandbox::config::{RunnerConfig, UnknownLanguagePolicy};
use snipbox_sandbox::runner::CodeRunner;
use snipbox_sandbox::runtime::{ContainerRuntime, DockerRuntime};
use snipbox_sandbox::warmer;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn load_catalog(path: Option<&Path>) -> Result<ImageCatalog> {
    match path {
        Some(path) => ImageCatalog::load(path)
            .with_context(|| format!("Failed to load image catalog from {}", path.display())),
        None => Ok(ImageCatalog::builtin()),
    }
}

async fn connect_docker() -> Result<DockerRuntime> {
    let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;
    runtime
        .ping()
        .await
        .context("Docker daemon is not reachable")?;
    Ok(runtime)
}

/// Read a source file ("-" means stdin) into a request
pub fn read_request(
    file: &Path,
    language: &str,
    version: Option<String>,
    timeout: Option<f64>,
) -> Result<ExecutionRequest> {
    let code = if file == Path::new("-") {
        let mut code = String::new();
        io::stdin()
            .read_to_string(&mut code)
            .context("Failed to read source from stdin")?;
        code
    } else {
        fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };

    let mut request = ExecutionRequest::new(code, language);
    request.version = version;
    request.timeout_seconds = timeout;
    Ok(request)
}

/// Process exit status mirroring a sandbox result
pub fn exit_status(result: &ExecutionResult) -> i32 {
    match result.exit_code {
        code if (0..=255).contains(&code) => code as i32,
        _ => 1,
    }
}

/// Pull missing catalog images
pub async fn warm_images(catalog: Option<&Path>, strict: bool) -> Result<i32> {
    let catalog = load_catalog(catalog)?;
    let runtime = connect_docker().await?;

    println!("🐳 Warming {} image(s)...\n", catalog.images().len());
    let report = warmer::warm_images(&runtime, &catalog).await;

    for image in &report.present {
        println!("  ✅ {:<40} present", image);
    }
    for image in &report.pulled {
        println!("  ⬇️  {:<40} pulled", image);
    }
    for (image, reason) in &report.failed {
        println!("  ❌ {:<40} {}", image, reason);
    }

    println!(
        "\n📋 {} present, {} pulled, {} failed",
        report.present.len(),
        report.pulled.len(),
        report.failed.len()
    );

    if strict && !report.is_complete() {
        return Ok(1);
    }
    Ok(0)
}

/// Print the catalog
pub fn list_languages(catalog: Option<&Path>) -> Result<i32> {
    let catalog = load_catalog(catalog)?;

    let languages = catalog.languages();
    if languages.is_empty() {
        println!("No languages configured.");
        return Ok(0);
    }

    println!("📋 Supported Languages:\n");
    println!("{:<12} {:<10} {:<36} {:<8}", "LANGUAGE", "VERSION", "IMAGE", "DEFAULT");
    println!("{}", "─".repeat(70));

    for language in &languages {
        if let Some(images) = catalog.language(*language) {
            let default = images.default_version();
            for entry in images.iter() {
                println!(
                    "{:<12} {:<10} {:<36} {:<8}",
                    language,
                    entry.version,
                    entry.image,
                    if entry == default { "yes" } else { "" }
                );
            }
        }
    }

    println!("\n✅ Total: {} language(s)", languages.len());
    Ok(0)
}

/// Execute a request in a local sandbox
pub async fn run_local(
    catalog: Option<&Path>,
    request: ExecutionRequest,
    unknown_language: UnknownLanguagePolicy,
    json: bool,
) -> Result<i32> {
    let catalog = load_catalog(catalog)?;
    let runtime = connect_docker().await?;

    let config = RunnerConfig {
        max_concurrent_executions: 1,
        unknown_language,
        ..Default::default()
    };
    let runner = CodeRunner::new(Arc::new(runtime), Arc::new(catalog), config);
    let result = runner.run_code(&request).await;

    print_result(&result, json)?;
    Ok(exit_status(&result))
}

/// Queue a request for the worker and wait for the published result
pub async fn submit(
    redis_url: &str,
    queue: &str,
    request: ExecutionRequest,
    wait_seconds: u64,
) -> Result<i32> {
    let client = ::redis::Client::open(redis_url)
        .with_context(|| format!("Invalid Redis URL: {}", redis_url))?;
    let mut conn = client
        .get_connection_manager()
        .await
        .context("Failed to connect to Redis")?;

    let task_id = Uuid::new_v4().to_string();
    // Subscribe first so a fast worker cannot publish before we listen
    let mut pubsub = redis::subscribe_result(&client, &task_id)
        .await
        .context("Failed to subscribe to result channel")?;

    let task = TaskMessage::run_code(task_id.clone(), request);
    redis::push_task(&mut conn, queue, &task)
        .await
        .context("Failed to queue task")?;
    eprintln!("📤 Submitted task {} to {}", task_id, redis::queue_name(queue));

    let result = tokio::time::timeout(
        Duration::from_secs(wait_seconds),
        redis::next_result(&mut pubsub),
    )
    .await
    .with_context(|| format!("No result for task {} within {}s", task_id, wait_seconds))?
    .context("Failed to read result")?;

    match result {
        Some(result) => {
            print_result(&result, false)?;
            Ok(exit_status(&result))
        }
        None => bail!("Result channel for task {} closed", task_id),
    }
}

/// Force-remove every container carrying the managed label
pub async fn reap() -> Result<i32> {
    let runtime = connect_docker().await?;
    let containers = runtime
        .managed_containers()
        .await
        .context("Failed to list sandbox containers")?;

    if containers.is_empty() {
        println!("✅ No sandbox containers found");
        return Ok(0);
    }

    let mut failed = 0;
    for id in &containers {
        match runtime.remove_container(id).await {
            Ok(()) => println!("🗑️  Removed {}", short_id(id)),
            Err(e) => {
                failed += 1;
                println!("❌ {}: {}", short_id(id), e);
            }
        }
    }

    println!("\n📋 Removed {} of {} container(s)", containers.len() - failed, containers.len());
    Ok(if failed == 0 { 0 } else { 1 })
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

fn print_result(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
    if result.is_sandbox_failure() {
        eprintln!();
    }
    Ok(())
}
