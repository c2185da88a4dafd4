//! Shared fixtures for dispatcher integration tests.
//!
//! The mock browser picks its behaviour from the target host:
//!
//! | Host          | `perform` behaviour                                 |
//! |---------------|-----------------------------------------------------|
//! | `ok.test`     | succeeds immediately                                |
//! | `delay.test`  | sleeps for the milliseconds in the path, `/25`      |
//! | `gate.test`   | waits for a permit released with [`MockLauncher::open_gate`] |
//! | `fail.test`   | returns an error                                    |
//! | `panic.test`  | panics                                              |
//! | `hang.test`   | never returns                                       |

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use browserq_core::{Action, CaptureKind};
use serde_json::json;
use tokio::sync::{Notify, Semaphore};

use browserq_worker::browser::{BrowserLauncher, BrowserSession};
use browserq_worker::queue::{MemoryQueue, TaskQueueSource};
use browserq_worker::reclaim::{IdleReclaimer, ReclaimReport, ResourceTracker};
use browserq_worker::sink::MemoryResultSink;
use browserq_worker::{
    Dispatcher, DispatcherConfig, JobConfig, JobError, JobExecutor, QueueError,
};

// ---------------------------------------------------------------------------
// Mock browser
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct BrowserCounters {
    pub launches: AtomicUsize,
    pub closes: AtomicUsize,
    pub live: AtomicUsize,
    pub high_water: AtomicUsize,
}

pub struct MockLauncher {
    counters: Arc<BrowserCounters>,
    gate: Arc<Semaphore>,
    next_handle: AtomicUsize,
}

impl MockLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counters: Arc::new(BrowserCounters::default()),
            gate: Arc::new(Semaphore::new(0)),
            next_handle: AtomicUsize::new(1),
        })
    }

    /// Let `n` gated actions proceed.
    pub fn open_gate(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn launches(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    /// Most sessions that were open at the same time.
    pub fn high_water(&self) -> usize {
        self.counters.high_water.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, JobError> {
        let n = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.high_water.fetch_max(live, Ordering::SeqCst);

        Ok(Arc::new(MockSession {
            handle: format!("mock-{n}"),
            location: Mutex::new(String::new()),
            counters: Arc::clone(&self.counters),
            gate: Arc::clone(&self.gate),
            closed: Mutex::new(false),
        }))
    }
}

struct MockSession {
    handle: String,
    location: Mutex<String>,
    counters: Arc<BrowserCounters>,
    gate: Arc<Semaphore>,
    closed: Mutex<bool>,
}

impl MockSession {
    fn host_and_path(&self) -> (String, String) {
        let location = self.location.lock().unwrap().clone();
        let rest = location
            .strip_prefix("https://")
            .unwrap_or(&location)
            .to_string();
        match rest.split_once('/') {
            Some((host, path)) => (host.to_string(), path.to_string()),
            None => (rest, String::new()),
        }
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    fn handle(&self) -> &str {
        &self.handle
    }

    async fn open(&self, target: &str) -> Result<(), JobError> {
        *self.location.lock().unwrap() = target.to_string();
        Ok(())
    }

    async fn perform(&self, _action: &Action) -> Result<(), JobError> {
        let (host, path) = self.host_and_path();
        match host.as_str() {
            "delay.test" => {
                let ms: u64 = path.parse().unwrap_or(10);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            "gate.test" => {
                let permit = self.gate.acquire().await.unwrap();
                permit.forget();
            }
            "fail.test" => return Err(JobError::Protocol("boom".into())),
            "panic.test" => panic!("mock renderer crashed"),
            "hang.test" => std::future::pending::<()>().await,
            _ => {}
        }
        Ok(())
    }

    async fn current_location(&self) -> Result<String, JobError> {
        Ok(self.location.lock().unwrap().clone())
    }

    async fn capture(&self, kind: CaptureKind) -> Result<serde_json::Value, JobError> {
        Ok(json!(format!("{kind:?}")))
    }

    async fn close(&self) -> Result<(), JobError> {
        let mut closed = self.closed.lock().unwrap();
        if !*closed {
            *closed = true;
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reclaimer and queues
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingReclaimer {
    calls: AtomicUsize,
    called: Notify,
}

impl CountingReclaimer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdleReclaimer for CountingReclaimer {
    async fn reclaim(&self) -> ReclaimReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.called.notify_waiters();
        ReclaimReport::default()
    }
}

/// Memory queue whose first `failures` pops fail.
pub struct FlakyQueue {
    pub inner: MemoryQueue,
    failures: AtomicUsize,
    pops: AtomicUsize,
    ping_fails: bool,
}

impl FlakyQueue {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryQueue::new(),
            failures: AtomicUsize::new(failures),
            pops: AtomicUsize::new(0),
            ping_fails: false,
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryQueue::new(),
            failures: AtomicUsize::new(0),
            pops: AtomicUsize::new(0),
            ping_fails: true,
        })
    }

    pub fn pops(&self) -> usize {
        self.pops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskQueueSource for FlakyQueue {
    async fn ping(&self) -> Result<(), QueueError> {
        if self.ping_fails {
            return Err(QueueError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<Vec<u8>>, QueueError> {
        self.pops.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Unavailable("connection reset".into()));
        }
        self.inner.pop(timeout).await
    }

    async fn requeue(&self, payload: Vec<u8>) -> Result<(), QueueError> {
        self.inner.requeue(payload).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub fn dispatcher_config(capacity: usize) -> DispatcherConfig {
    DispatcherConfig {
        capacity,
        poll_interval: Duration::from_millis(20),
        idle_timeout: Duration::from_secs(3600),
        drain_timeout: Duration::from_secs(5),
        queue_error_backoff: Duration::from_millis(50),
    }
}

pub fn job_config() -> JobConfig {
    JobConfig {
        scroll_interval: Duration::from_millis(10),
        visit_duration: Duration::from_millis(30),
        timeout: None,
    }
}

/// JSON payload running a single scroll against `target`.
pub fn payload(target: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "url": target,
        "actions": [{"type": "scroll"}],
    }))
    .unwrap()
}

pub fn payload_with_id(target: &str, task_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "url": target,
        "task_id": task_id,
        "actions": [{"type": "scroll"}],
    }))
    .unwrap()
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub sink: Arc<MemoryResultSink>,
    pub browser: Arc<MockLauncher>,
    pub reclaimer: Arc<CountingReclaimer>,
    pub tracker: Arc<ResourceTracker>,
}

impl Harness {
    pub fn new(config: DispatcherConfig, job: JobConfig, queue: Arc<dyn TaskQueueSource>) -> Self {
        let sink = Arc::new(MemoryResultSink::new());
        let browser = MockLauncher::new();
        let reclaimer = Arc::new(CountingReclaimer::default());
        let tracker = Arc::new(ResourceTracker::new());
        let executor = Arc::new(JobExecutor::new(
            browser.clone(),
            Arc::clone(&tracker),
            job,
        ));
        let dispatcher = Dispatcher::new(config, queue, sink.clone(), executor, reclaimer.clone());
        Self {
            dispatcher,
            sink,
            browser,
            reclaimer,
            tracker,
        }
    }

    /// Harness around a fresh memory queue, returned alongside.
    pub fn with_memory_queue(config: DispatcherConfig, job: JobConfig) -> (Self, Arc<MemoryQueue>) {
        let queue = Arc::new(MemoryQueue::new());
        (Self::new(config, job, queue.clone()), queue)
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
