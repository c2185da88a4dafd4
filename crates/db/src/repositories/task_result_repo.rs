//! Repository for the `task_results` table.

use browserq_core::TaskResult;
use sqlx::PgPool;

use crate::models::StoredResult;

const COLUMNS: &str = "id, queue, task_id, success, payload, created_at";

/// Append-only result queue.
pub struct TaskResultRepo;

impl TaskResultRepo {
    /// Push a finished result onto `queue`.
    pub async fn push(pool: &PgPool, queue: &str, result: &TaskResult) -> Result<i64, sqlx::Error> {
        let payload = serde_json::to_value(result)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query_scalar::<_, i64>(
            "INSERT INTO task_results (queue, task_id, success, payload) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(queue)
        .bind(&result.task_id)
        .bind(result.success)
        .bind(payload)
        .fetch_one(pool)
        .await
    }

    /// All stored results for a task id, oldest first.
    pub async fn find_by_task_id(
        pool: &PgPool,
        task_id: &str,
    ) -> Result<Vec<StoredResult>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM task_results WHERE task_id = $1 ORDER BY id ASC"
        );
        sqlx::query_as::<_, StoredResult>(&query)
            .bind(task_id)
            .fetch_all(pool)
            .await
    }
}
