//! Dispatcher-generated task ids.
//!
//! Ids are millisecond timestamps, bumped by one whenever the clock has not
//! advanced since the previous id. They are unique within a process and
//! increase monotonically, which is all tracking needs; they are never
//! used as queue keys.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use crate::types::TaskId;

#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    last: AtomicI64,
}

impl TaskIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> TaskId {
        self.next_at(Utc::now().timestamp_millis()).to_string()
    }

    fn next_at(&self, now_ms: i64) -> i64 {
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now_ms.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}
