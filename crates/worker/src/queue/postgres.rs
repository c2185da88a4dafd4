//! Queue source backed by the `task_queue` table.

use std::time::Duration;

use async_trait::async_trait;
use browserq_db::{DbPool, TaskQueueRepo};

use super::TaskQueueSource;
use crate::error::QueueError;

/// Re-poll interval while waiting for work inside one `pop`.
const POLL_STEP: Duration = Duration::from_millis(250);

pub struct PgTaskQueue {
    pool: DbPool,
    queue: String,
}

impl PgTaskQueue {
    pub fn new(pool: DbPool, queue: impl Into<String>) -> Self {
        Self {
            pool,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl TaskQueueSource for PgTaskQueue {
    async fn ping(&self) -> Result<(), QueueError> {
        browserq_db::health_check(&self.pool).await?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(entry) = TaskQueueRepo::claim_next(&self.pool, &self.queue).await? {
                tracing::debug!(entry_id = entry.id, queue = %self.queue, "Claimed queue entry");
                return Ok(Some(entry.payload));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_STEP.min(deadline - now)).await;
        }
    }

    /// The claimed row is gone, so the payload goes back as a new tail entry.
    async fn requeue(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        let id = TaskQueueRepo::enqueue(&self.pool, &self.queue, &payload).await?;
        tracing::debug!(entry_id = id, queue = %self.queue, "Requeued unprocessed entry");
        Ok(())
    }
}
