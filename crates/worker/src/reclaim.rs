//! Idle resource reclamation.
//!
//! Browser sessions a job failed to close stay registered in the
//! [`ResourceTracker`]. When the dispatcher has been idle long enough it
//! asks an [`IdleReclaimer`] to clean up; the stock one closes whatever
//! the tracker still holds and can additionally signal stray browser
//! processes by command-line pattern, never the worker itself. Reclaim never touches the sessions
//! of running jobs: those are released by their own slots before the
//! dispatcher can be idle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::browser::BrowserSession;

/// Upper bound for closing one leaked session.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for the process sweep.
const SWEEP_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// ResourceTracker
// ---------------------------------------------------------------------------

/// Live browser sessions keyed by their native handle.
#[derive(Default)]
pub struct ResourceTracker {
    sessions: Mutex<HashMap<String, Arc<dyn BrowserSession>>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, session: Arc<dyn BrowserSession>) {
        self.lock().insert(session.handle().to_string(), session);
    }

    /// Forget a session that was closed. Returns `false` if it was not tracked.
    pub fn release(&self, handle: &str) -> bool {
        self.lock().remove(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every tracked session out of the tracker.
    pub fn drain_all(&self) -> Vec<Arc<dyn BrowserSession>> {
        self.lock().drain().map(|(_, session)| session).collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn BrowserSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Reclaimer
// ---------------------------------------------------------------------------

/// What one reclaim pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub handles_closed: usize,
    pub handles_failed: usize,
    /// The process sweep signalled at least one process.
    pub processes_signalled: bool,
}

#[async_trait]
pub trait IdleReclaimer: Send + Sync {
    async fn reclaim(&self) -> ReclaimReport;
}

/// Closes leaked sessions and optionally sweeps stray processes.
pub struct TrackedResourceReclaimer {
    tracker: Arc<ResourceTracker>,
    process_pattern: Option<String>,
}

impl TrackedResourceReclaimer {
    pub fn new(tracker: Arc<ResourceTracker>, process_pattern: Option<String>) -> Self {
        Self {
            tracker,
            process_pattern,
        }
    }

    /// Send SIGTERM to every process whose command line contains
    /// `pattern`, except this one. Returns `true` if any was signalled.
    async fn sweep_processes(&self, pattern: &str) -> bool {
        let pattern = pattern.trim();
        if !is_safe_pattern(pattern) {
            tracing::warn!(pattern, "Refusing to sweep processes with unsafe pattern");
            return false;
        }

        let regex = literal_regex(pattern);
        let result = tokio::time::timeout(
            SWEEP_TIMEOUT,
            Command::new("pgrep").args(["-f", &regex]).output(),
        )
        .await;

        match result {
            // pgrep exits 0 when something matched, 1 when nothing did.
            Ok(Ok(output)) => match output.status.code() {
                Some(0) => {
                    let pids = matched_pids(&output.stdout, std::process::id());
                    let signalled = pids.iter().filter(|&&pid| terminate(pid)).count();
                    tracing::info!(
                        pattern,
                        matched = pids.len(),
                        signalled,
                        "Signalled stray browser processes"
                    );
                    signalled > 0
                }
                Some(1) => false,
                code => {
                    tracing::warn!(
                        pattern,
                        exit_code = code.unwrap_or(-1),
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "Process sweep failed"
                    );
                    false
                }
            },
            Ok(Err(e)) => {
                tracing::warn!(pattern, error = %e, "Failed to execute pgrep");
                false
            }
            Err(_) => {
                tracing::warn!(pattern, "Process sweep timed out");
                false
            }
        }
    }
}

#[async_trait]
impl IdleReclaimer for TrackedResourceReclaimer {
    async fn reclaim(&self) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        for session in self.tracker.drain_all() {
            match tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await {
                Ok(Ok(())) => report.handles_closed += 1,
                Ok(Err(e)) => {
                    report.handles_failed += 1;
                    tracing::warn!(handle = session.handle(), error = %e, "Failed to close leaked session");
                }
                Err(_) => {
                    report.handles_failed += 1;
                    tracing::warn!(handle = session.handle(), "Timed out closing leaked session");
                }
            }
        }

        if let Some(pattern) = &self.process_pattern {
            report.processes_signalled = self.sweep_processes(pattern).await;
        }

        tracing::info!(
            handles_closed = report.handles_closed,
            handles_failed = report.handles_failed,
            processes_signalled = report.processes_signalled,
            "Idle reclaim finished"
        );
        report
    }
}

/// Allowed pattern characters: alphanumeric, hyphen, underscore, dot,
/// slash, equals and space, with at least three alphanumerics so the
/// pattern names something.
fn is_safe_pattern(pattern: &str) -> bool {
    let trimmed = pattern.trim();
    let alphanumerics = trimmed.chars().filter(char::is_ascii_alphanumeric).count();
    alphanumerics >= 3
        && trimmed.len() <= 128
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '=' | ' '))
}

/// `pgrep` reads the pattern as an extended regex; `.` is the only allowed
/// character that is special there.
fn literal_regex(pattern: &str) -> String {
    pattern.replace('.', r"\.")
}

/// Pids from `pgrep` output, without `own_pid`.
fn matched_pids(stdout: &[u8], own_pid: u32) -> Vec<u32> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .filter(|&pid| pid != own_pid)
        .collect()
}

#[cfg(unix)]
fn terminate(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Safety: kill has no memory preconditions.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> bool {
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
