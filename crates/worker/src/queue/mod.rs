//! Task queue sources.
//!
//! A source yields raw payload bytes in FIFO order. `pop` always waits a
//! bounded amount of time for work instead of returning immediately, so
//! the admission loop never busy-spins on an empty queue.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryQueue;
pub use postgres::PgTaskQueue;

#[async_trait]
pub trait TaskQueueSource: Send + Sync {
    /// Verify the transport is reachable. Called once at startup.
    async fn ping(&self) -> Result<(), QueueError>;

    /// Remove and return the next payload, waiting at most `timeout`.
    ///
    /// `Ok(None)` means no work arrived within the wait.
    async fn pop(&self, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError>;

    /// Hand back a popped payload that was not processed.
    async fn requeue(&self, payload: Vec<u8>) -> Result<(), QueueError>;
}
