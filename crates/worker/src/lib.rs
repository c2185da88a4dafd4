//! `browserq-worker` library crate.
//!
//! Bounded-concurrency dispatcher that drains browser-automation jobs
//! from a task queue. The binary entrypoint lives in `main.rs`; modules
//! are public so integration tests can assemble a dispatcher around
//! in-memory queues, sinks, and mock browsers.

pub mod browser;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod queue;
pub mod reclaim;
pub mod signals;
pub mod sink;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_http;

pub use config::{DispatcherConfig, JobConfig, WorkerConfig};
pub use dispatcher::{Dispatcher, DrainReport};
pub use error::{ConfigError, JobError, QueueError, SinkError};
pub use executor::JobExecutor;
