//! Job payloads as they arrive from the task queue.
//!
//! Producers push JSON objects. The only required field is `target`
//! (`url` is accepted as an alias, matching the producers already in the
//! field). Everything else is optional:
//!
//! ```json
//! {
//!   "url": "https://example.com",
//!   "task_id": "import-42",
//!   "actions": [{"type": "scroll"}, {"type": "wait", "seconds": 2}, {"type": "read_title"}],
//!   "result_fields": ["title"]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::result::{FIELD_CONSOLE_LOG, FIELD_SCREENSHOT, FIELD_SOURCE, FIELD_TITLE};
use crate::types::TaskId;

/// Longest caller-supplied task id we are willing to track.
const MAX_TASK_ID_LEN: usize = 128;

/// Upper bound for a single `wait` action.
const MAX_WAIT_SECS: f64 = 3600.0;

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// One directive executed by a job. Order-significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Scroll the viewport down by one window height.
    Scroll,
    /// Pause for the given number of seconds.
    Wait { seconds: f64 },
    Screenshot,
    ReadTitle,
    ReadSource,
    ReadConsoleLog,
}

/// Things a browser session can capture into the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureKind {
    Screenshot,
    Title,
    Source,
    ConsoleLog,
}

impl CaptureKind {
    /// Key under which the capture is stored in `collected_fields`.
    pub fn field_key(self) -> &'static str {
        match self {
            Self::Screenshot => FIELD_SCREENSHOT,
            Self::Title => FIELD_TITLE,
            Self::Source => FIELD_SOURCE,
            Self::ConsoleLog => FIELD_CONSOLE_LOG,
        }
    }

    /// Inverse of [`field_key`](Self::field_key).
    pub fn from_field_key(key: &str) -> Option<Self> {
        match key {
            FIELD_SCREENSHOT => Some(Self::Screenshot),
            FIELD_TITLE => Some(Self::Title),
            FIELD_SOURCE => Some(Self::Source),
            FIELD_CONSOLE_LOG => Some(Self::ConsoleLog),
            _ => None,
        }
    }
}

impl Action {
    /// The capture this action produces, if it is a read action.
    pub fn capture_kind(&self) -> Option<CaptureKind> {
        match self {
            Self::Screenshot => Some(CaptureKind::Screenshot),
            Self::ReadTitle => Some(CaptureKind::Title),
            Self::ReadSource => Some(CaptureKind::Source),
            Self::ReadConsoleLog => Some(CaptureKind::ConsoleLog),
            Self::Scroll | Self::Wait { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A validated job payload. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(alias = "url", default)]
    pub target: String,

    #[serde(alias = "taskId", default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,

    /// When absent the job falls back to timed scrolling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,

    /// Restricts which collected fields end up in the result.
    #[serde(alias = "resultFields", default, skip_serializing_if = "Option::is_none")]
    pub result_fields: Option<Vec<String>>,
}

impl JobPayload {
    /// Payload with just a target, as produced by the simplest producers.
    pub fn for_target(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            task_id: None,
            actions: None,
            result_fields: None,
        }
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn with_result_fields(mut self, fields: Vec<String>) -> Self {
        self.result_fields = Some(fields);
        self
    }

    /// Check the invariants a payload must satisfy before admission.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.target.trim().is_empty() {
            return Err(CoreError::MalformedPayload(
                "payload has no target".to_string(),
            ));
        }

        if let Some(task_id) = &self.task_id {
            if task_id.trim().is_empty() {
                return Err(CoreError::MalformedPayload(
                    "task_id must not be blank".to_string(),
                ));
            }
            if task_id.len() > MAX_TASK_ID_LEN {
                return Err(CoreError::MalformedPayload(format!(
                    "task_id must not exceed {MAX_TASK_ID_LEN} characters"
                )));
            }
        }

        for (i, action) in self.actions.iter().flatten().enumerate() {
            if let Action::Wait { seconds } = action {
                if !seconds.is_finite() || *seconds < 0.0 || *seconds > MAX_WAIT_SECS {
                    return Err(CoreError::MalformedPayload(format!(
                        "action {i}: wait must be between 0 and {MAX_WAIT_SECS} seconds"
                    )));
                }
            }
        }

        for field in self.result_fields.iter().flatten() {
            if CaptureKind::from_field_key(field).is_none() {
                return Err(CoreError::MalformedPayload(format!(
                    "unknown result field \"{field}\""
                )));
            }
        }

        Ok(())
    }
}

/// Decode raw queue bytes into a validated [`JobPayload`].
///
/// Any failure is a [`CoreError::MalformedPayload`]; callers discard such
/// entries instead of requeueing them.
pub fn parse_payload(bytes: &[u8]) -> Result<JobPayload, CoreError> {
    let payload: JobPayload = serde_json::from_slice(bytes)
        .map_err(|e| CoreError::MalformedPayload(format!("invalid JSON: {e}")))?;
    payload.validate()?;
    Ok(payload)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
