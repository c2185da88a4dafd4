//! HTTP callback delivery with exponential-backoff retry.
//!
//! [`CallbackSink`] POSTs each [`TaskResult`] as JSON to a configured URL.
//! Failed attempts are retried with backoff (1 s, 2 s, 4 s) and the result
//! is dropped with an error log once every attempt failed.

use std::time::Duration;

use async_trait::async_trait;
use browserq_core::TaskResult;

use super::ResultSink;
use crate::error::SinkError;

/// Retry delays (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CallbackSink {
    client: reqwest::Client,
    url: String,
    retry_delays: Vec<Duration>,
}

impl CallbackSink {
    pub fn new(url: impl Into<String>) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            retry_delays: RETRY_DELAYS.to_vec(),
        })
    }

    /// Override the backoff schedule. One attempt is made per delay, plus a
    /// final one.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Deliver with retry. Returns `Ok(())` on the first successful attempt.
    pub async fn deliver(&self, result: &TaskResult) -> Result<(), SinkError> {
        for (attempt, delay) in self.retry_delays.iter().enumerate() {
            match self.try_send(result).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url = %self.url,
                        task_id = %result.task_id,
                        error = %e,
                        "Result callback attempt failed, retrying"
                    );
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        // Final attempt after the last backoff.
        self.try_send(result).await
    }

    async fn try_send(&self, result: &TaskResult) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(result).send().await?;
        if !response.status().is_success() {
            return Err(SinkError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResultSink for CallbackSink {
    async fn push(&self, result: TaskResult) {
        if let Err(e) = self.deliver(&result).await {
            tracing::error!(
                url = %self.url,
                task_id = %result.task_id,
                error = %e,
                "Result callback failed after all retries, dropping result"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
