//! Repository for the `task_queue` table.

use sqlx::PgPool;

use crate::models::QueueEntry;

/// Column list for `task_queue` queries.
const COLUMNS: &str = "id, queue, payload, enqueued_at";

/// FIFO queue operations over `task_queue`.
pub struct TaskQueueRepo;

impl TaskQueueRepo {
    /// Append a raw payload to the tail of `queue`.
    pub async fn enqueue(pool: &PgPool, queue: &str, payload: &[u8]) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO task_queue (queue, payload) VALUES ($1, $2) RETURNING id",
        )
        .bind(queue)
        .bind(payload)
        .fetch_one(pool)
        .await
    }

    /// Atomically remove and return the oldest entry of `queue`.
    ///
    /// Rows locked by a concurrent claimer are skipped, so two workers
    /// never receive the same entry.
    pub async fn claim_next(pool: &PgPool, queue: &str) -> Result<Option<QueueEntry>, sqlx::Error> {
        let query = format!(
            "DELETE FROM task_queue \
             WHERE id = ( \
                 SELECT id FROM task_queue \
                 WHERE queue = $1 \
                 ORDER BY id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueueEntry>(&query)
            .bind(queue)
            .fetch_optional(pool)
            .await
    }

    /// Number of entries waiting in `queue`.
    pub async fn depth(pool: &PgPool, queue: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM task_queue WHERE queue = $1")
            .bind(queue)
            .fetch_one(pool)
            .await
    }
}
