//! Domain types shared by the browserq crates.
//!
//! Pure data and validation only: no async runtime, no I/O. The queue
//! transport lives in `browserq-db`, execution in `browserq-worker`.

pub mod error;
pub mod payload;
pub mod result;
pub mod task_id;
pub mod types;

pub use error::CoreError;
pub use payload::{parse_payload, Action, CaptureKind, JobPayload};
pub use result::{JobOutcome, SlotStatus, TaskResult};
pub use task_id::TaskIdGenerator;
pub use types::{TaskId, Timestamp};
