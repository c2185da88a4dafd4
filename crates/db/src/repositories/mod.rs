//! Data access for the queue tables. Repositories are zero-sized and take
//! the pool per call, so they can be used from any task.

pub mod task_queue_repo;
pub mod task_result_repo;

pub use task_queue_repo::TaskQueueRepo;
pub use task_result_repo::TaskResultRepo;
