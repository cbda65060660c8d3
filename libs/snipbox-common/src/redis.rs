use crate::types::{ExecutionResult, TaskMessage};
use futures_util::StreamExt;
use redis::{AsyncCommands, RedisResult};

/// Redis hand-off semantics shared by producers and the worker.
/// Keys and channels are deterministic so both sides never drift.

pub const QUEUE_PREFIX: &str = "snipbox:queue";
pub const RESULT_CHANNEL_PREFIX: &str = "task_results";
pub const CODE_EXECUTION_QUEUE: &str = "code_execution";

/// Fully qualified name of a task queue
pub fn queue_name(queue: &str) -> String {
    format!("{}:{}", QUEUE_PREFIX, queue)
}

/// Pub/sub channel a task's result is published on
pub fn result_channel(task_id: &str) -> String {
    format!("{}:{}", RESULT_CHANNEL_PREFIX, task_id)
}

fn serialization_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

/// Push a task onto a queue
/// Uses RPUSH so BLPOP consumers see FIFO order
pub async fn push_task(
    conn: &mut redis::aio::ConnectionManager,
    queue: &str,
    task: &TaskMessage,
) -> RedisResult<()> {
    let payload = serde_json::to_string(task).map_err(serialization_error)?;
    conn.rpush(queue_name(queue), payload).await
}

/// Pop a task from a queue
/// BLPOP with timeout so callers get a chance to observe shutdown
pub async fn pop_task(
    conn: &mut redis::aio::ConnectionManager,
    queue: &str,
    timeout_seconds: f64,
) -> RedisResult<Option<TaskMessage>> {
    let result: Option<(String, String)> = conn.blpop(queue_name(queue), timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let task: TaskMessage = serde_json::from_str(&payload).map_err(|e| {
                redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "deserialization error",
                    e.to_string(),
                ))
            })?;
            Ok(Some(task))
        }
        None => Ok(None),
    }
}

/// Publish a finished result on the task's channel
/// Returns the number of subscribers that received it
pub async fn publish_result(
    conn: &mut redis::aio::ConnectionManager,
    task_id: &str,
    result: &ExecutionResult,
) -> RedisResult<usize> {
    let payload = serde_json::to_string(result).map_err(serialization_error)?;
    conn.publish(result_channel(task_id), payload).await
}

/// Subscribe to a task's result channel
/// Subscribe before pushing the task, otherwise a fast worker can publish first
pub async fn subscribe_result(
    client: &redis::Client,
    task_id: &str,
) -> RedisResult<redis::aio::PubSub> {
    let mut pubsub = client.get_async_connection().await?.into_pubsub();
    pubsub.subscribe(result_channel(task_id)).await?;
    Ok(pubsub)
}

/// Wait for the next result on a subscribed channel
pub async fn next_result(pubsub: &mut redis::aio::PubSub) -> RedisResult<Option<ExecutionResult>> {
    let mut messages = pubsub.on_message();
    match messages.next().await {
        Some(msg) => {
            let payload: String = msg.get_payload()?;
            let result = serde_json::from_str(&payload).map_err(|e| {
                redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "deserialization error",
                    e.to_string(),
                ))
            })?;
            Ok(Some(result))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_naming() {
        assert_eq!(queue_name(CODE_EXECUTION_QUEUE), "snipbox:queue:code_execution");
        assert_eq!(queue_name("custom"), "snipbox:queue:custom");
    }

    #[test]
    fn test_result_channel_deterministic() {
        let id = uuid::Uuid::new_v4().to_string();
        let first = result_channel(&id);
        let second = result_channel(&id);
        assert_eq!(first, second);
        assert_eq!(first, format!("task_results:{}", id));
    }
}
