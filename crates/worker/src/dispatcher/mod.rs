//! Bounded-concurrency admission loop.
//!
//! One control task runs [`Dispatcher::run`]. Each tick it reserves a unit
//! of capacity (bounded wait), pops one payload (bounded wait), and admits
//! it as a worker slot running on its own task. A payload is never popped
//! without capacity to run it. When a slot finishes it delivers its result
//! and releases its capacity, in that order.
//!
//! Shutdown is cooperative: [`Dispatcher::request_shutdown`] stops the loop
//! and running jobs see the cancellation at their next checkpoint. An entry
//! popped after the request is requeued rather than run. The loop then
//! waits for active slots up to `drain_timeout` before reporting the rest
//! as abandoned.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use browserq_core::{parse_payload, JobPayload, TaskId, TaskIdGenerator, TaskResult, Timestamp};
use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::DispatcherConfig;
use crate::error::{JobError, QueueError};
use crate::executor::{panic_message, JobExecutor};
use crate::queue::TaskQueueSource;
use crate::reclaim::IdleReclaimer;
use crate::sink::ResultSink;

pub mod progress;
pub mod registry;

use progress::ProgressReporter;
use registry::{Reservation, SlotRegistry};

/// How shutdown ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Every active slot finished within the drain timeout.
    pub drained: bool,
    /// Slots still active when the drain timeout elapsed.
    pub abandoned: Vec<TaskId>,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    queue: Arc<dyn TaskQueueSource>,
    sink: Arc<dyn ResultSink>,
    executor: Arc<JobExecutor>,
    reclaimer: Arc<dyn IdleReclaimer>,
    registry: Arc<SlotRegistry>,
    task_ids: TaskIdGenerator,
    activity: ActivityClock,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        queue: Arc<dyn TaskQueueSource>,
        sink: Arc<dyn ResultSink>,
        executor: Arc<JobExecutor>,
        reclaimer: Arc<dyn IdleReclaimer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(SlotRegistry::new(config.capacity)),
            config,
            queue,
            sink,
            executor,
            reclaimer,
            task_ids: TaskIdGenerator::new(),
            activity: ActivityClock::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Check the queue transport and spawn the admission loop.
    ///
    /// The returned handle resolves once shutdown has drained.
    pub async fn start(self: Arc<Self>) -> Result<JoinHandle<DrainReport>, QueueError> {
        self.queue.ping().await?;
        Ok(tokio::spawn(self.run()))
    }

    /// Run the admission loop until shutdown is requested, then drain.
    pub async fn run(self: Arc<Self>) -> DrainReport {
        tracing::info!(
            capacity = self.config.capacity,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            "Dispatcher started"
        );

        while !self.shutdown.is_cancelled() {
            self.tick().await;
        }

        self.drain().await
    }

    /// One admission attempt.
    async fn tick(self: &Arc<Self>) {
        let reservation = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            reservation = self.registry.reserve_within(self.config.poll_interval) => reservation,
        };
        // Pool full for the whole wait.
        let Some(reservation) = reservation else {
            return;
        };

        // Not raced against shutdown: an entry claimed from the transport
        // must not be dropped on the floor. One that arrives after shutdown
        // goes back instead of being admitted.
        match self.queue.pop(self.config.poll_interval).await {
            Ok(Some(bytes)) if self.shutdown.is_cancelled() => {
                drop(reservation);
                self.hand_back(bytes).await;
            }
            Ok(Some(bytes)) => self.admit(reservation, &bytes),
            Ok(None) => {
                drop(reservation);
                self.check_idle().await;
            }
            Err(e) => {
                drop(reservation);
                tracing::error!(
                    error = %e,
                    backoff_secs = self.config.queue_error_backoff.as_secs_f64(),
                    "Queue poll failed, backing off"
                );
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.config.queue_error_backoff) => {}
                }
            }
        }
    }

    async fn hand_back(&self, bytes: Vec<u8>) {
        let payload_len = bytes.len();
        match self.queue.requeue(bytes).await {
            Ok(()) => tracing::info!(payload_len, "Requeued entry popped during shutdown"),
            Err(e) => tracing::error!(
                error = %e,
                payload_len,
                "Failed to requeue entry popped during shutdown, entry lost"
            ),
        }
    }

    /// Reserve capacity for a job not yet known, if any is free right now.
    pub fn try_admit(&self) -> Option<Reservation> {
        self.registry.try_reserve()
    }

    fn admit(self: &Arc<Self>, reservation: Reservation, bytes: &[u8]) {
        let payload = match parse_payload(bytes) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    payload_len = bytes.len(),
                    "Discarding malformed payload"
                );
                return;
            }
        };

        let requested = payload
            .task_id
            .clone()
            .unwrap_or_else(|| self.task_ids.next_id());
        let started_at = Utc::now();
        let task_id =
            self.registry
                .admit(reservation, requested, payload.target.clone(), started_at);
        self.activity.touch();

        tracing::info!(
            task_id = %task_id,
            target = %payload.target,
            active = self.registry.active_count(),
            capacity = self.config.capacity,
            "Job admitted"
        );

        let progress = ProgressReporter::new(task_id.clone(), Arc::clone(&self.registry));
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            dispatcher
                .run_slot(task_id, payload, progress, started_at)
                .await;
        });
    }

    async fn run_slot(
        self: Arc<Self>,
        task_id: TaskId,
        payload: JobPayload,
        progress: ProgressReporter,
        started_at: Timestamp,
    ) {
        let _guard = SlotGuard {
            dispatcher: Arc::clone(&self),
            task_id: task_id.clone(),
        };

        let cancel = self.shutdown.child_token();
        let execution = AssertUnwindSafe(self.executor.execute(&payload, &progress, started_at, cancel))
            .catch_unwind()
            .await;
        let result = match execution {
            Ok(result) => result,
            Err(panic) => {
                let error = JobError::Panicked(panic_message(panic.as_ref()));
                tracing::error!(task_id = %task_id, error = %error, "Job execution panicked");
                TaskResult::finish(
                    task_id.clone(),
                    payload.target.clone(),
                    started_at,
                    Utc::now(),
                    progress.outcome(),
                    Some(error.to_string()),
                    payload.result_fields.as_deref(),
                )
            }
        };

        self.registry.set_status(&task_id, result.status);
        self.sink.push(result).await;
    }

    /// Remove a finished slot and release its capacity.
    ///
    /// Idempotent: returns `false` and changes nothing if the slot is
    /// already gone.
    pub fn on_slot_finished(&self, task_id: &str) -> bool {
        let removed = self.registry.finish(task_id);
        if removed {
            self.activity.touch();
            tracing::debug!(
                task_id,
                active = self.registry.active_count(),
                capacity = self.config.capacity,
                "Slot released"
            );
        }
        removed
    }

    /// Run idle reclaim if the dispatcher has been quiet for `idle_timeout`.
    ///
    /// Fires at most once per idle period. Returns `true` if it ran.
    pub async fn check_idle(&self) -> bool {
        if self.registry.active_count() > 0 || !self.activity.claim_idle(self.config.idle_timeout) {
            return false;
        }
        tracing::info!(
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            "Dispatcher idle, reclaiming browser resources"
        );
        self.reclaimer.reclaim().await;
        true
    }

    /// Stop pulling work. The admission loop drains and exits.
    pub fn request_shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!(active = self.registry.active_count(), "Shutdown requested");
        }
        self.shutdown.cancel();
    }

    async fn drain(&self) -> DrainReport {
        tracing::info!(
            active = self.registry.active_count(),
            drain_timeout_secs = self.config.drain_timeout.as_secs(),
            "Draining active slots"
        );

        if self.registry.wait_until_empty(self.config.drain_timeout).await {
            tracing::info!("Dispatcher drained");
            return DrainReport {
                drained: true,
                abandoned: Vec::new(),
            };
        }

        let abandoned = self.registry.active_task_ids();
        tracing::warn!(?abandoned, "Drain timed out, abandoning active slots");
        DrainReport {
            drained: false,
            abandoned,
        }
    }

    pub fn active_count(&self) -> usize {
        self.registry.active_count()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn registry(&self) -> &Arc<SlotRegistry> {
        &self.registry
    }
}

// ---------------------------------------------------------------------------
// Slot guard
// ---------------------------------------------------------------------------

/// Releases the slot when the slot task ends, including by panic.
struct SlotGuard {
    dispatcher: Arc<Dispatcher>,
    task_id: TaskId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.dispatcher.on_slot_finished(&self.task_id);
    }
}

// ---------------------------------------------------------------------------
// Activity clock
// ---------------------------------------------------------------------------

struct ActivityState {
    last_activity_at: Instant,
    reclaimed: bool,
}

/// Last admission or completion, and whether the current idle period was
/// already reclaimed.
struct ActivityClock {
    state: Mutex<ActivityState>,
}

impl ActivityClock {
    fn new() -> Self {
        Self {
            state: Mutex::new(ActivityState {
                last_activity_at: Instant::now(),
                reclaimed: false,
            }),
        }
    }

    fn touch(&self) {
        let mut state = self.lock();
        state.last_activity_at = Instant::now();
        state.reclaimed = false;
    }

    /// Claim the reclaim for the current idle period if `idle_timeout`
    /// has elapsed and it was not claimed yet.
    fn claim_idle(&self, idle_timeout: Duration) -> bool {
        let mut state = self.lock();
        if state.reclaimed || state.last_activity_at.elapsed() < idle_timeout {
            return false;
        }
        state.reclaimed = true;
        true
    }

    fn lock(&self) -> MutexGuard<'_, ActivityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_is_claimed_once_per_period() {
        let clock = ActivityClock::new();
        let idle = Duration::from_secs(10);

        assert!(!clock.claim_idle(idle));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(clock.claim_idle(idle));
        assert!(!clock.claim_idle(idle));

        clock.touch();
        assert!(!clock.claim_idle(idle));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(clock.claim_idle(idle));
    }
}
