//! In-process queue, for tests and for embedding the dispatcher in a
//! process that produces its own work.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;

use super::TaskQueueSource;
use crate::error::QueueError;

#[derive(Default)]
pub struct MemoryQueue {
    entries: Mutex<VecDeque<Vec<u8>>>,
    pushed: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, payload: impl Into<Vec<u8>>) {
        self.lock().push_back(payload.into());
        self.pushed.notify_one();
    }

    /// Serialize `value` as JSON and enqueue it.
    pub fn push_json<T: Serialize>(&self, value: &T) -> Result<(), serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        self.push(bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Put a payload back at the head of the queue.
    pub fn push_front(&self, payload: impl Into<Vec<u8>>) {
        self.lock().push_front(payload.into());
        self.pushed.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TaskQueueSource for MemoryQueue {
    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(entry) = self.lock().pop_front() {
                return Ok(Some(entry));
            }
            if tokio::time::timeout_at(deadline, self.pushed.notified())
                .await
                .is_err()
            {
                return Ok(self.lock().pop_front());
            }
        }
    }

    async fn requeue(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        self.push_front(payload);
        Ok(())
    }
}
