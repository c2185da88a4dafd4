/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Tracking identifier of a task. Either supplied by the producer or
/// generated by [`crate::task_id::TaskIdGenerator`].
pub type TaskId = String;
