//! Error taxonomy of the worker.
//!
//! Only [`ConfigError`] and startup [`QueueError`]s end the process. Every
//! other error is confined to the tick, job, or delivery it happened in.

/// Invalid or missing configuration. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} environment variable is required")]
    Missing { var: &'static str },

    #[error("{var} must be {expected}, got \"{value}\"")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Failure talking to the task queue transport.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// A fault inside one job. Never crosses the slot boundary; it ends up as
/// the `error` string of that job's result.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("WebDriver error (HTTP {status}) {error}: {message}")]
    WebDriver {
        status: u16,
        error: String,
        message: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected driver response: {0}")]
    Protocol(String),

    #[error("Job panicked: {0}")]
    Panicked(String),

    /// Rendered verbatim into results, consumers match on it.
    #[error("timeout")]
    Timeout,

    #[error("interrupted by shutdown")]
    Cancelled,
}

/// Failure delivering a result. Logged by the sink, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Callback returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
