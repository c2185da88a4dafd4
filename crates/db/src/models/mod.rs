//! Row types for the queue tables.

pub mod queue_entry;

pub use queue_entry::{QueueEntry, StoredResult};
