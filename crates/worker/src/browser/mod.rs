//! Browser automation capability used by jobs.
//!
//! The dispatcher only needs something that can open a target, perform
//! actions, report where it is, capture page data, and be closed. Concrete
//! drivers implement [`BrowserLauncher`] and [`BrowserSession`];
//! [`webdriver`] ships one that speaks the W3C WebDriver protocol.

use std::sync::Arc;

use async_trait::async_trait;
use browserq_core::{Action, CaptureKind};

use crate::error::JobError;

pub mod webdriver;

pub use webdriver::{WebDriverLauncher, WebDriverSession};

/// A live browser session. Owns one native resource (a driver session,
/// a browser process) that must be released with [`close`](Self::close).
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Identifier of the underlying native resource, for logs.
    fn handle(&self) -> &str;

    async fn open(&self, target: &str) -> Result<(), JobError>;

    /// Perform a page action. Only [`Action::Scroll`] reaches the driver;
    /// waits and captures are handled by the caller.
    async fn perform(&self, action: &Action) -> Result<(), JobError>;

    async fn current_location(&self) -> Result<String, JobError>;

    async fn capture(&self, kind: CaptureKind) -> Result<serde_json::Value, JobError>;

    /// Release the native resource. Calling it again after success is a no-op.
    async fn close(&self) -> Result<(), JobError>;
}

/// Creates browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, JobError>;
}
