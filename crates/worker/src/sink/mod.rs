//! Result delivery.
//!
//! Every admitted job produces exactly one [`TaskResult`], which the slot
//! hands to a [`ResultSink`]. Sinks own their failure handling: a result
//! that cannot be delivered is logged and dropped, never retried by the
//! dispatcher and never allowed to stall a slot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use browserq_core::TaskResult;
use tokio::sync::Notify;

pub mod callback;
pub mod postgres;

pub use callback::CallbackSink;
pub use postgres::PgResultSink;

#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Deliver one result. Failures are handled (logged) inside the sink.
    async fn push(&self, result: TaskResult);
}

// ---------------------------------------------------------------------------
// FanoutSink
// ---------------------------------------------------------------------------

/// Delivers each result to several sinks in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ResultSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl ResultSink for FanoutSink {
    async fn push(&self, result: TaskResult) {
        for sink in &self.sinks {
            sink.push(result.clone()).await;
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryResultSink
// ---------------------------------------------------------------------------

/// Collects results in memory.
#[derive(Default)]
pub struct MemoryResultSink {
    results: Mutex<Vec<TaskResult>>,
    pushed: Notify,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far, in delivery order.
    pub fn results(&self) -> Vec<TaskResult> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` results arrived, for at most `timeout`.
    ///
    /// Returns `true` if the count was reached.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.pushed.notified();
            if self.len() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.len() >= count;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TaskResult>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn push(&self, result: TaskResult) {
        self.lock().push(result);
        self.pushed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use browserq_core::JobOutcome;
    use chrono::Utc;

    use super::*;

    fn result(id: &str) -> TaskResult {
        let now = Utc::now();
        TaskResult::finish(
            id.into(),
            "https://a".into(),
            now,
            now,
            JobOutcome::default(),
            None,
            None,
        )
    }

    #[tokio::test]
    async fn fanout_delivers_to_every_sink() {
        let a = Arc::new(MemoryResultSink::new());
        let b = Arc::new(MemoryResultSink::new());
        let fanout = FanoutSink::new(vec![a.clone(), b.clone()]);

        fanout.push(result("t1")).await;

        assert_eq!(a.results()[0].task_id, "t1");
        assert_eq!(b.results()[0].task_id, "t1");
    }

    #[tokio::test]
    async fn wait_for_sees_later_push() {
        let sink = Arc::new(MemoryResultSink::new());
        let pusher = {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                sink.push(result("t1")).await;
            })
        };

        assert!(sink.wait_for(1, Duration::from_secs(5)).await);
        pusher.await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        let sink = MemoryResultSink::new();
        assert!(!sink.wait_for(1, Duration::from_millis(20)).await);
    }
}
