//! Narrow channel through which a running job reports progress.
//!
//! A [`ProgressReporter`] is handed to the job when its slot is admitted.
//! It accumulates the partial [`JobOutcome`] (so a timed-out or faulted job
//! can still report what it did) and mirrors a summary into the slot
//! registry for stats. Jobs never touch the registry directly.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use browserq_core::{CaptureKind, JobOutcome, SlotStatus, TaskId};

use super::registry::SlotRegistry;

#[derive(Clone)]
pub struct ProgressReporter {
    task_id: TaskId,
    registry: Arc<SlotRegistry>,
    outcome: Arc<Mutex<JobOutcome>>,
}

impl ProgressReporter {
    pub fn new(task_id: TaskId, registry: Arc<SlotRegistry>) -> Self {
        Self {
            task_id,
            registry,
            outcome: Arc::new(Mutex::new(JobOutcome::default())),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn running(&self) {
        self.registry.set_status(&self.task_id, SlotStatus::Running);
    }

    /// Record the page the session is currently on.
    pub fn visited(&self, location: &str) {
        let visited_count = {
            let mut outcome = self.lock();
            outcome.record_visit(location);
            outcome.visited_targets.len()
        };
        self.registry.update_progress(&self.task_id, |p| {
            p.current_location = Some(location.to_string());
            p.visited_count = visited_count;
        });
    }

    pub fn action_completed(&self) -> u32 {
        let completed = {
            let mut outcome = self.lock();
            outcome.record_action();
            outcome.actions_completed
        };
        self.registry
            .update_progress(&self.task_id, |p| p.actions_completed = completed);
        completed
    }

    pub fn captured(&self, kind: CaptureKind, value: serde_json::Value) {
        self.lock().record_capture(kind, value);
    }

    /// Copy of everything reported so far.
    pub fn outcome(&self) -> JobOutcome {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, JobOutcome> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn reporter() -> (Arc<SlotRegistry>, ProgressReporter) {
        let registry = Arc::new(SlotRegistry::new(1));
        let reservation = registry.try_reserve().unwrap();
        let id = registry.admit(reservation, "t1".into(), "https://a".into(), Utc::now());
        let reporter = ProgressReporter::new(id, Arc::clone(&registry));
        (registry, reporter)
    }

    #[test]
    fn progress_is_mirrored_into_registry() {
        let (registry, reporter) = reporter();

        reporter.running();
        reporter.visited("https://a");
        reporter.visited("https://b");
        reporter.action_completed();
        reporter.action_completed();

        let (_, slots) = registry.snapshot();
        let slot = &slots[0];
        assert_eq!(slot.status, SlotStatus::Running);
        assert_eq!(slot.progress.actions_completed, 2);
        assert_eq!(slot.progress.visited_count, 2);
        assert_eq!(slot.progress.current_location.as_deref(), Some("https://b"));
    }

    #[test]
    fn outcome_accumulates_captures() {
        let (_, reporter) = reporter();
        reporter.captured(CaptureKind::Title, json!("Example"));
        reporter.visited("https://a");

        let outcome = reporter.outcome();
        assert_eq!(outcome.collected_fields["title"], json!("Example"));
        assert_eq!(outcome.visited_targets, vec!["https://a"]);
    }

    #[test]
    fn reporting_after_slot_finished_is_harmless() {
        let (registry, reporter) = reporter();
        registry.finish(reporter.task_id());

        reporter.action_completed();
        assert_eq!(reporter.outcome().actions_completed, 1);
        assert_eq!(registry.active_count(), 0);
    }
}
