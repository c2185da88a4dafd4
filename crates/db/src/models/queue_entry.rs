use browserq_core::Timestamp;
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `task_queue` table.
#[derive(Debug, Clone, FromRow)]
pub struct QueueEntry {
    pub id: i64,
    pub queue: String,
    pub payload: Vec<u8>,
    pub enqueued_at: Timestamp,
}

/// A row from the `task_results` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StoredResult {
    pub id: i64,
    pub queue: String,
    pub task_id: String,
    pub success: bool,
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
}
