//! Runs one job against a browser session.
//!
//! The executor owns the session for the whole job: it launches it,
//! registers it with the [`ResourceTracker`], drives the payload's actions
//! (or the timed-scroll default), and always attempts teardown, whether
//! the job completed, faulted, panicked, timed out or was interrupted. A
//! session that cannot be closed stays tracked so idle reclaim can retry.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use browserq_core::{Action, JobPayload, TaskResult, Timestamp};
use chrono::Utc;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserLauncher, BrowserSession};
use crate::config::JobConfig;
use crate::dispatcher::progress::ProgressReporter;
use crate::error::JobError;
use crate::reclaim::ResourceTracker;

/// Upper bound for closing a session after the job ended.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct JobExecutor {
    launcher: Arc<dyn BrowserLauncher>,
    tracker: Arc<ResourceTracker>,
    config: JobConfig,
}

impl JobExecutor {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        tracker: Arc<ResourceTracker>,
        config: JobConfig,
    ) -> Self {
        Self {
            launcher,
            tracker,
            config,
        }
    }

    pub fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.tracker
    }

    /// Execute `payload` to completion and build its result.
    ///
    /// Never fails: every fault becomes the `error` of the returned result.
    pub async fn execute(
        &self,
        payload: &JobPayload,
        progress: &ProgressReporter,
        started_at: Timestamp,
        cancel: CancellationToken,
    ) -> TaskResult {
        progress.running();
        let deadline = self.config.timeout.map(|t| Instant::now() + t);

        let error = match within(deadline, self.launch()).await {
            Ok(session) => {
                tracing::debug!(
                    task_id = progress.task_id(),
                    handle = session.handle(),
                    "Browser session launched"
                );

                let run = AssertUnwindSafe(self.run(session.as_ref(), payload, progress, &cancel))
                    .catch_unwind();
                let error = match within(deadline, async { Ok::<_, JobError>(run.await) }).await {
                    Ok(Ok(Ok(()))) => None,
                    Ok(Ok(Err(e))) => Some(e),
                    Ok(Err(panic)) => Some(JobError::Panicked(panic_message(panic.as_ref()))),
                    Err(e) => Some(e),
                };

                self.teardown(session.as_ref(), progress.task_id()).await;
                error
            }
            Err(e) => Some(e),
        };

        let result = TaskResult::finish(
            progress.task_id().to_string(),
            payload.target.clone(),
            started_at,
            Utc::now(),
            progress.outcome(),
            error.as_ref().map(ToString::to_string),
            payload.result_fields.as_deref(),
        );

        match &error {
            None => tracing::info!(
                task_id = %result.task_id,
                target = %result.target,
                actions_completed = result.actions_completed,
                duration_seconds = result.duration_seconds,
                "Job completed"
            ),
            Some(e) => tracing::warn!(
                task_id = %result.task_id,
                target = %result.target,
                actions_completed = result.actions_completed,
                error = %e,
                "Job failed"
            ),
        }
        result
    }

    /// Launch on a task of its own that tracks the session as soon as it
    /// exists. A launch still in flight when the job deadline passes keeps
    /// going, and its session is left for idle reclaim.
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, JobError> {
        let launcher = Arc::clone(&self.launcher);
        let tracker = Arc::clone(&self.tracker);
        let launch = tokio::spawn(async move {
            let session = launcher.launch().await?;
            tracker.track(Arc::clone(&session));
            Ok::<_, JobError>(session)
        });

        match launch.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                Err(JobError::Panicked(panic_message(e.into_panic().as_ref())))
            }
            Err(e) => Err(JobError::Launch(e.to_string())),
        }
    }

    async fn run(
        &self,
        session: &dyn BrowserSession,
        payload: &JobPayload,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        session.open(&payload.target).await?;
        record_location(session, progress).await?;

        match &payload.actions {
            Some(actions) => {
                for action in actions {
                    if cancel.is_cancelled() {
                        return Err(JobError::Cancelled);
                    }
                    perform(session, action, progress, cancel).await?;
                    progress.action_completed();
                    record_location(session, progress).await?;
                }
            }
            None => self.scroll_until_done(session, progress, cancel).await?,
        }
        Ok(())
    }

    /// Default behaviour: scroll every `scroll_interval` for `visit_duration`.
    async fn scroll_until_done(
        &self,
        session: &dyn BrowserSession,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let until = Instant::now() + self.config.visit_duration;
        while Instant::now() < until {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            session.perform(&Action::Scroll).await?;
            progress.action_completed();
            record_location(session, progress).await?;

            let remaining = until.saturating_duration_since(Instant::now());
            sleep_or_cancel(self.config.scroll_interval.min(remaining), cancel).await?;
        }
        Ok(())
    }

    async fn teardown(&self, session: &dyn BrowserSession, task_id: &str) {
        match tokio::time::timeout(TEARDOWN_TIMEOUT, session.close()).await {
            Ok(Ok(())) => {
                self.tracker.release(session.handle());
            }
            Ok(Err(e)) => tracing::warn!(
                task_id,
                handle = session.handle(),
                error = %e,
                "Failed to close browser session, leaving it for idle reclaim"
            ),
            Err(_) => tracing::warn!(
                task_id,
                handle = session.handle(),
                "Timed out closing browser session, leaving it for idle reclaim"
            ),
        }
    }
}

async fn perform(
    session: &dyn BrowserSession,
    action: &Action,
    progress: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<(), JobError> {
    if let Action::Wait { seconds } = action {
        return sleep_or_cancel(Duration::from_secs_f64(*seconds), cancel).await;
    }
    match action.capture_kind() {
        Some(kind) => {
            let value = session.capture(kind).await?;
            progress.captured(kind, value);
            Ok(())
        }
        None => session.perform(action).await,
    }
}

async fn record_location(
    session: &dyn BrowserSession,
    progress: &ProgressReporter,
) -> Result<(), JobError> {
    let location = session.current_location().await?;
    progress.visited(&location);
    Ok(())
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), JobError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(JobError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Await `fut`, failing with [`JobError::Timeout`] once `deadline` passes.
async fn within<T, F>(deadline: Option<Instant>, fut: F) -> Result<T, JobError>
where
    F: Future<Output = Result<T, JobError>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| JobError::Timeout)?,
        None => fut.await,
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
