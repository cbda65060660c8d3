// Task intake: pop from the queue only when an execution slot is free
use async_trait::async_trait;
use snipbox_common::redis;
use snipbox_common::types::{TaskMessage, RUN_CODE_EVENT};
use snipbox_sandbox::admission::{AdmissionGate, AdmissionSlot};
use std::future::Future;
use tracing::{error, info, warn};

/// BLPOP timeout; bounds how long shutdown waits for a pop in progress
pub const POP_TIMEOUT_SECONDS: f64 = 5.0;

#[async_trait]
pub trait TaskSource: Send {
    async fn next_task(&mut self) -> ::redis::RedisResult<Option<TaskMessage>>;
}

pub struct RedisSource {
    conn: ::redis::aio::ConnectionManager,
    queue: String,
}

impl RedisSource {
    pub fn new(conn: ::redis::aio::ConnectionManager, queue: impl Into<String>) -> Self {
        Self {
            conn,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl TaskSource for RedisSource {
    async fn next_task(&mut self) -> ::redis::RedisResult<Option<TaskMessage>> {
        redis::pop_task(&mut self.conn, &self.queue, POP_TIMEOUT_SECONDS).await
    }
}

/// Take tasks until `shutdown` resolves.
///
/// A slot is held before every pop, so at most `intake.capacity()` tasks are
/// off the queue at once; `dispatch` receives the slot with the task. A pop
/// in progress is never cancelled, so a task taken from the queue is always
/// dispatched.
pub async fn run_intake<S, F>(
    source: &mut S,
    intake: &AdmissionGate,
    shutdown: impl Future<Output = std::io::Result<()>>,
    mut dispatch: F,
) where
    S: TaskSource,
    F: FnMut(TaskMessage, AdmissionSlot),
{
    tokio::pin!(shutdown);

    loop {
        let slot = tokio::select! {
            biased;
            signalled = &mut shutdown => {
                if let Err(e) = signalled {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                warn!("Received shutdown signal, no longer taking tasks");
                break;
            }
            slot = intake.acquire() => match slot {
                Ok(slot) => slot,
                Err(e) => {
                    error!(error = %e, "Intake gate closed");
                    break;
                }
            },
        };

        match source.next_task().await {
            Ok(Some(task)) => {
                if task.event != RUN_CODE_EVENT {
                    warn!(event = %task.event, task_id = %task.data.task_id, "Ignoring unknown event");
                    continue;
                }
                info!(task_id = %task.data.task_id, in_flight = intake.in_flight(), "Task taken");
                dispatch(task, slot);
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                drop(slot);
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}
