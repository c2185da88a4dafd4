//! Result sink backed by the `task_results` table.

use async_trait::async_trait;
use browserq_core::TaskResult;
use browserq_db::{DbPool, TaskResultRepo};

use super::ResultSink;
use crate::error::SinkError;

pub struct PgResultSink {
    pool: DbPool,
    queue: String,
}

impl PgResultSink {
    pub fn new(pool: DbPool, queue: impl Into<String>) -> Self {
        Self {
            pool,
            queue: queue.into(),
        }
    }

    pub async fn store(&self, result: &TaskResult) -> Result<i64, SinkError> {
        Ok(TaskResultRepo::push(&self.pool, &self.queue, result).await?)
    }
}

#[async_trait]
impl ResultSink for PgResultSink {
    async fn push(&self, result: TaskResult) {
        match self.store(&result).await {
            Ok(id) => tracing::debug!(result_id = id, task_id = %result.task_id, "Result stored"),
            Err(e) => tracing::error!(
                queue = %self.queue,
                task_id = %result.task_id,
                error = %e,
                "Failed to store result"
            ),
        }
    }
}
