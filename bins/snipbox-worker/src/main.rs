mod config;
mod intake;

use anyhow::Context;
use config::WorkerConfig;
use intake::{run_intake, RedisSource};
use snipbox_common::redis;
use snipbox_common::types::TaskMessage;
use snipbox_sandbox::admission::{AdmissionGate, AdmissionSlot};
use snipbox_sandbox::runner::CodeRunner;
use snipbox_sandbox::runtime::DockerRuntime;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

type Runner = CodeRunner<DockerRuntime>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    init_tracing(config.json_logs);

    info!("Snipbox Worker booting...");

    let catalog = config.load_catalog().map_err(|e| {
        error!("Failed to load image catalog: {:#}", e);
        e
    })?;
    info!(languages = ?catalog.languages(), images = catalog.images().len(), "Image catalog loaded");

    let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;
    runtime
        .ping()
        .await
        .context("Docker daemon is not reachable")?;
    info!("Connected to Docker");

    info!(
        max_concurrent = config.runner.max_concurrent_executions,
        default_timeout_ms = config.runner.default_timeout.as_millis() as u64,
        max_timeout_ms = config.runner.max_timeout.as_millis() as u64,
        unknown_language = %config.runner.unknown_language,
        memory_mb = config.runner.limits.memory_mb,
        cpu_quota = config.runner.limits.cpu_quota,
        pids_limit = config.runner.limits.pids_limit,
        "Runner configured"
    );
    let runner = Arc::new(CodeRunner::new(
        Arc::new(runtime),
        Arc::new(catalog),
        config.runner.clone(),
    ));

    let client = ::redis::Client::open(config.redis_url.as_str())?;
    let redis_conn = ::redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    info!(redis_url = %config.redis_url, queue = %redis::queue_name(&config.queue), "Connected to Redis");

    let mut in_flight = worker_loop(redis_conn, &config.queue, runner).await;

    if !in_flight.is_empty() {
        info!(tasks = in_flight.len(), "Waiting for in-flight executions");
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Execution task failed");
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

/// Take tasks until Ctrl+C; returns the executions still running
#[instrument(skip(redis_conn, runner))]
async fn worker_loop(
    redis_conn: ::redis::aio::ConnectionManager,
    queue: &str,
    runner: Arc<Runner>,
) -> JoinSet<()> {
    let mut in_flight = JoinSet::new();
    // Separate from the runner's own gate so a held intake slot never
    // competes with the execution it was taken for
    let intake = AdmissionGate::new(runner.gate().capacity());
    let mut source = RedisSource::new(redis_conn.clone(), queue);

    run_intake(&mut source, &intake, signal::ctrl_c(), |task, slot| {
        // Reap finished executions so the set does not grow unbounded
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Execution task failed");
            }
        }
        in_flight.spawn(handle_task(task, Arc::clone(&runner), redis_conn.clone(), slot));
    })
    .await;

    in_flight
}

#[instrument(skip_all, fields(task_id = %task.data.task_id))]
async fn handle_task(
    task: TaskMessage,
    runner: Arc<Runner>,
    mut redis_conn: ::redis::aio::ConnectionManager,
    _slot: AdmissionSlot,
) {
    let request = task.data.request;
    info!(
        language = %request.language,
        version = request.version.as_deref().unwrap_or("default"),
        source_size = request.code.len(),
        "Received task"
    );

    let start = std::time::Instant::now();
    let result = runner.run_code(&request).await;
    info!(
        exit_code = result.exit_code,
        execution_ms = start.elapsed().as_millis() as u64,
        "Execution completed"
    );

    match redis::publish_result(&mut redis_conn, &task.data.task_id, &result).await {
        Ok(0) => warn!("Result published but nobody was listening"),
        Ok(receivers) => debug!(receivers, "Result published"),
        Err(e) => {
            error!(error = %e, "Failed to publish result");
            // Non-fatal - worker continues
        }
    }
}
