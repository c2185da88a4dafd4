//! Registry of admitted worker slots.
//!
//! The slot map and the capacity permits are kept consistent under one
//! mutex: each [`WorkerSlot`] owns the [`OwnedSemaphorePermit`] that
//! admitted it, so removing a slot and releasing its capacity happen in
//! the same critical section. Readers (stats, drain) never observe a slot
//! whose capacity was already released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use browserq_core::{SlotStatus, TaskId, Timestamp};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Last progress a running job reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlotProgress {
    pub actions_completed: u32,
    pub current_location: Option<String>,
    pub visited_count: usize,
}

/// One admitted execution.
#[derive(Debug)]
pub struct WorkerSlot {
    pub task_id: TaskId,
    pub target: String,
    pub started_at: Timestamp,
    pub status: SlotStatus,
    pub progress: SlotProgress,
    /// Released when the slot is removed from the registry.
    _permit: OwnedSemaphorePermit,
}

/// Point-in-time copy of a slot for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotSummary {
    pub task_id: TaskId,
    pub target: String,
    pub status: SlotStatus,
    pub started_at: Timestamp,
    pub elapsed_seconds: f64,
    pub progress: SlotProgress,
}

/// Capacity reserved ahead of knowing which job will use it.
///
/// Dropping a reservation returns the capacity.
#[derive(Debug)]
pub struct Reservation {
    permit: OwnedSemaphorePermit,
}

pub struct SlotRegistry {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    slots: Mutex<HashMap<TaskId, WorkerSlot>>,
    finished: Notify,
}

impl SlotRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            slots: Mutex::new(HashMap::with_capacity(capacity)),
            finished: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserve one unit of capacity if any is free right now.
    pub fn try_reserve(&self) -> Option<Reservation> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| Reservation { permit })
    }

    /// Reserve one unit of capacity, waiting at most `wait` for one to free up.
    pub async fn reserve_within(&self, wait: Duration) -> Option<Reservation> {
        match tokio::time::timeout(wait, Arc::clone(&self.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => Some(Reservation { permit }),
            // Timed out, or the semaphore was closed.
            _ => None,
        }
    }

    /// Bind a reservation to a task and record the slot as `pending`.
    ///
    /// If `requested` is already active the id is suffixed (`-2`, `-3`, ...)
    /// so both slots stay tracked. Returns the id actually used.
    pub fn admit(
        &self,
        reservation: Reservation,
        requested: TaskId,
        target: String,
        started_at: Timestamp,
    ) -> TaskId {
        let mut slots = self.lock();

        let mut task_id = requested.clone();
        let mut n = 2;
        while slots.contains_key(&task_id) {
            task_id = format!("{requested}-{n}");
            n += 1;
        }

        slots.insert(
            task_id.clone(),
            WorkerSlot {
                task_id: task_id.clone(),
                target,
                started_at,
                status: SlotStatus::Pending,
                progress: SlotProgress::default(),
                _permit: reservation.permit,
            },
        );
        task_id
    }

    pub fn set_status(&self, task_id: &str, status: SlotStatus) {
        if let Some(slot) = self.lock().get_mut(task_id) {
            slot.status = status;
        }
    }

    pub fn update_progress<F>(&self, task_id: &str, update: F)
    where
        F: FnOnce(&mut SlotProgress),
    {
        if let Some(slot) = self.lock().get_mut(task_id) {
            update(&mut slot.progress);
        }
    }

    /// Remove a slot and release its capacity.
    ///
    /// Returns `false` if the slot was already gone; repeated calls are
    /// no-ops.
    pub fn finish(&self, task_id: &str) -> bool {
        let removed = {
            let mut slots = self.lock();
            // The permit drops with the slot, inside the lock.
            slots.remove(task_id).is_some()
        };
        if removed {
            self.finished.notify_waiters();
        }
        removed
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    pub fn active_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Consistent copy of `(active_count, slot summaries)` taken under one lock.
    pub fn snapshot(&self) -> (usize, Vec<SlotSummary>) {
        let now = Utc::now();
        let slots = self.lock();
        let mut summaries: Vec<SlotSummary> = slots
            .values()
            .map(|slot| SlotSummary {
                task_id: slot.task_id.clone(),
                target: slot.target.clone(),
                status: slot.status,
                started_at: slot.started_at,
                elapsed_seconds: ((now - slot.started_at).num_milliseconds().max(0) as f64)
                    / 1000.0,
                progress: slot.progress.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        (slots.len(), summaries)
    }

    /// Wait until no slot is active, for at most `timeout`.
    ///
    /// Returns `true` if the registry emptied in time.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so a finish in between is
            // not missed.
            let notified = self.finished.notified();
            if self.active_count() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.active_count() == 0;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, WorkerSlot>> {
        // A panic while holding the lock cannot leave the map half-written:
        // every critical section is a single insert/remove/field update.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
