//! Execution admission control.
//!
//! A process-wide budget of concurrently running sandboxes, shared by every
//! language. Slots are handed out in FIFO order by the underlying tokio
//! semaphore and go back when the [`AdmissionSlot`] is dropped, whatever
//! happened while it was held.

use crate::error::ExecutionFailure;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One unit of the concurrency budget; released on drop
#[derive(Debug)]
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    /// A gate admitting `capacity` executions at once (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots free right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<AdmissionSlot, ExecutionFailure> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ExecutionFailure::Infrastructure("admission gate closed".to_string()))?;

        debug!(
            in_flight = self.in_flight(),
            capacity = self.capacity,
            "Admission slot acquired"
        );
        Ok(AdmissionSlot { _permit: permit })
    }
}
