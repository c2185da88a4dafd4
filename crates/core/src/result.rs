//! Task results and the partial outcome a job accumulates while running.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::payload::CaptureKind;
use crate::types::{TaskId, Timestamp};

// ---------------------------------------------------------------------------
// Field keys
// ---------------------------------------------------------------------------

pub const FIELD_TITLE: &str = "title";
pub const FIELD_SOURCE: &str = "source";
pub const FIELD_CONSOLE_LOG: &str = "console_log";
pub const FIELD_SCREENSHOT: &str = "screenshot";

// ---------------------------------------------------------------------------
// SlotStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SlotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// JobOutcome
// ---------------------------------------------------------------------------

/// What a job has produced so far.
///
/// Kept outside the job future so that a timed-out or faulted job still
/// reports everything it managed to do before stopping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutcome {
    pub visited_targets: Vec<String>,
    pub collected_fields: BTreeMap<String, serde_json::Value>,
    pub actions_completed: u32,
}

impl JobOutcome {
    /// Append `location` to the visit log unless it is where we already are.
    ///
    /// Returns `true` when a new entry was recorded.
    pub fn record_visit(&mut self, location: &str) -> bool {
        if location.is_empty() || self.visited_targets.last().map(String::as_str) == Some(location)
        {
            return false;
        }
        self.visited_targets.push(location.to_string());
        true
    }

    /// Store a capture. Console log entries accumulate across reads; every
    /// other kind keeps only the latest value.
    pub fn record_capture(&mut self, kind: CaptureKind, value: serde_json::Value) {
        let key = kind.field_key().to_string();
        match kind {
            CaptureKind::ConsoleLog => {
                let entries = match value {
                    serde_json::Value::Array(entries) => entries,
                    other => vec![other],
                };
                let slot = self
                    .collected_fields
                    .entry(key)
                    .or_insert_with(|| serde_json::Value::Array(Vec::new()));
                if let serde_json::Value::Array(existing) = slot {
                    existing.extend(entries);
                }
            }
            _ => {
                self.collected_fields.insert(key, value);
            }
        }
    }

    pub fn record_action(&mut self) {
        self.actions_completed += 1;
    }
}

// ---------------------------------------------------------------------------
// TaskResult
// ---------------------------------------------------------------------------

/// Final report for one admitted job. Built exactly once per slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub target: String,
    pub started_at: Timestamp,
    pub ended_at: Timestamp,
    pub duration_seconds: f64,
    pub success: bool,
    /// `completed` or `failed`.
    pub status: SlotStatus,
    pub error: Option<String>,
    pub visited_targets: Vec<String>,
    pub collected_fields: BTreeMap<String, serde_json::Value>,
    pub actions_completed: u32,
}

impl TaskResult {
    /// Seal an outcome into a result.
    ///
    /// `error == None` means success. When `result_fields` is given, only
    /// the selected keys survive in `collected_fields`.
    pub fn finish(
        task_id: TaskId,
        target: String,
        started_at: Timestamp,
        ended_at: Timestamp,
        outcome: JobOutcome,
        error: Option<String>,
        result_fields: Option<&[String]>,
    ) -> Self {
        let JobOutcome {
            visited_targets,
            mut collected_fields,
            actions_completed,
        } = outcome;

        if let Some(selected) = result_fields {
            collected_fields.retain(|key, _| selected.iter().any(|s| s == key));
        }

        let duration_seconds =
            ((ended_at - started_at).num_milliseconds().max(0) as f64) / 1000.0;
        let success = error.is_none();

        Self {
            task_id,
            target,
            started_at,
            ended_at,
            duration_seconds,
            success,
            status: if success {
                SlotStatus::Completed
            } else {
                SlotStatus::Failed
            },
            error,
            visited_targets,
            collected_fields,
            actions_completed,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
