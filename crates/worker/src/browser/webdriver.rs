//! W3C WebDriver client.
//!
//! Talks JSON over HTTP to `chromedriver` (or any WebDriver endpoint).
//! Each [`WebDriverSession`] corresponds to one remote session and
//! therefore one browser process on the driver host; deleting the
//! session is what releases it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use browserq_core::{Action, CaptureKind};
use reqwest::Method;
use serde_json::{json, Value};

use super::{BrowserLauncher, BrowserSession};
use crate::error::JobError;

/// HTTP timeout for a single driver command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

const SCROLL_SCRIPT: &str = "window.scrollBy(0, window.innerHeight);";

/// Connection settings for the WebDriver endpoint.
#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    /// Base URL, e.g. `http://localhost:9515`.
    pub url: String,
    /// Passed to Chrome as `--memory-limit`.
    pub max_memory: String,
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

pub struct WebDriverLauncher {
    client: reqwest::Client,
    base: String,
    capabilities: Value,
}

impl WebDriverLauncher {
    pub fn new(config: &WebDriverConfig) -> Result<Self, JobError> {
        let client = reqwest::Client::builder()
            .timeout(COMMAND_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base: config.url.trim_end_matches('/').to_string(),
            capabilities: chrome_capabilities(&config.max_memory),
        })
    }
}

/// Headless Chrome capabilities with browser console logging enabled.
fn chrome_capabilities(max_memory: &str) -> Value {
    json!({
        "browserName": "chrome",
        "goog:chromeOptions": {
            "args": [
                "--headless",
                "--disable-gpu",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--disable-extensions",
                format!("--memory-limit={max_memory}"),
                "--window-size=1920,1080",
            ]
        },
        "goog:loggingPrefs": { "browser": "ALL" }
    })
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, JobError> {
        let body = json!({ "capabilities": { "alwaysMatch": self.capabilities } });
        let value = send(
            &self.client,
            Method::POST,
            &format!("{}/session", self.base),
            Some(body),
        )
        .await
        .map_err(|e| JobError::Launch(e.to_string()))?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| JobError::Protocol("new session response has no sessionId".into()))?
            .to_string();

        tracing::debug!(session_id = %session_id, "WebDriver session created");

        Ok(Arc::new(WebDriverSession {
            client: self.client.clone(),
            base: self.base.clone(),
            session_id,
            closed: AtomicBool::new(false),
        }))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct WebDriverSession {
    client: reqwest::Client,
    base: String,
    session_id: String,
    closed: AtomicBool,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, JobError> {
        let url = format!("{}/session/{}{}", self.base, self.session_id, path);
        send(&self.client, method, &url, body).await
    }

    async fn get_string(&self, path: &str) -> Result<String, JobError> {
        match self.command(Method::GET, path, None).await? {
            Value::String(s) => Ok(s),
            other => Err(JobError::Protocol(format!(
                "expected string from {path}, got {other}"
            ))),
        }
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    fn handle(&self) -> &str {
        &self.session_id
    }

    async fn open(&self, target: &str) -> Result<(), JobError> {
        self.command(Method::POST, "/url", Some(json!({ "url": target })))
            .await?;
        Ok(())
    }

    async fn perform(&self, action: &Action) -> Result<(), JobError> {
        match action {
            Action::Scroll => {
                self.command(
                    Method::POST,
                    "/execute/sync",
                    Some(json!({ "script": SCROLL_SCRIPT, "args": [] })),
                )
                .await?;
                Ok(())
            }
            other => Err(JobError::Protocol(format!(
                "{other:?} is not a driver action"
            ))),
        }
    }

    async fn current_location(&self) -> Result<String, JobError> {
        self.get_string("/url").await
    }

    async fn capture(&self, kind: CaptureKind) -> Result<Value, JobError> {
        match kind {
            // Base64-encoded PNG, passed through untouched.
            CaptureKind::Screenshot => self.get_string("/screenshot").await.map(Value::String),
            CaptureKind::Title => self.get_string("/title").await.map(Value::String),
            CaptureKind::Source => self.get_string("/source").await.map(Value::String),
            CaptureKind::ConsoleLog => {
                self.command(Method::POST, "/se/log", Some(json!({ "type": "browser" })))
                    .await
            }
        }
    }

    async fn close(&self) -> Result<(), JobError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let url = format!("{}/session/{}", self.base, self.session_id);
        send(&self.client, Method::DELETE, &url, None).await?;
        self.closed.store(true, Ordering::Release);
        tracing::debug!(session_id = %self.session_id, "WebDriver session deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

/// Execute one WebDriver command and unwrap the `value` envelope.
async fn send(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, JobError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await?;
    let status = response.status();
    let payload: Value = response.json().await.unwrap_or(Value::Null);

    if !status.is_success() {
        return Err(driver_error(status.as_u16(), &payload));
    }

    Ok(payload.get("value").cloned().unwrap_or(Value::Null))
}

/// Build a [`JobError::WebDriver`] from an error response body.
fn driver_error(status: u16, payload: &Value) -> JobError {
    let value = payload.get("value");
    let field = |name: &str| {
        value
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let error = field("error");
    JobError::WebDriver {
        status,
        error: if error.is_empty() {
            "unknown error".to_string()
        } else {
            error
        },
        message: field("message"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::test_http::FakeServer;

    fn driver_routes(method: &str, path: &str, _body: &str) -> (u16, String) {
        let body = match (method, path) {
            ("POST", "/session") => json!({"value": {"sessionId": "abc", "capabilities": {}}}),
            ("POST", "/session/abc/url") => json!({"value": null}),
            ("GET", "/session/abc/url") => json!({"value": "https://example.com/landing"}),
            ("GET", "/session/abc/title") => json!({"value": "Example Domain"}),
            ("POST", "/session/abc/execute/sync") => json!({"value": null}),
            ("POST", "/session/abc/se/log") => {
                json!({"value": [{"level": "INFO", "message": "hello"}]})
            }
            ("DELETE", "/session/abc") => json!({"value": null}),
            _ => {
                return (
                    404,
                    json!({"value": {"error": "unknown command", "message": path}}).to_string(),
                )
            }
        };
        (200, body.to_string())
    }

    fn config(url: &str) -> WebDriverConfig {
        WebDriverConfig {
            url: url.to_string(),
            max_memory: "512MB".into(),
        }
    }

    #[test]
    fn capabilities_carry_memory_limit_and_logging() {
        let caps = chrome_capabilities("2GB");
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(args.iter().any(|a| a == "--memory-limit=2GB"));
        assert!(args.iter().any(|a| a == "--headless"));
        assert_eq!(caps["goog:loggingPrefs"]["browser"], "ALL");
    }

    #[test]
    fn driver_error_extracts_code_and_message() {
        let err = driver_error(
            404,
            &json!({"value": {"error": "invalid session id", "message": "gone"}}),
        );
        assert_matches!(
            err,
            JobError::WebDriver { status: 404, ref error, ref message }
                if error == "invalid session id" && message == "gone"
        );
    }

    #[test]
    fn driver_error_without_body_is_unknown() {
        assert_matches!(
            driver_error(500, &Value::Null),
            JobError::WebDriver { status: 500, ref error, .. } if error == "unknown error"
        );
    }

    #[tokio::test]
    async fn session_lifecycle_against_fake_driver() {
        let server = FakeServer::start(driver_routes).await;
        let launcher = WebDriverLauncher::new(&config(&server.url)).unwrap();

        let session = launcher.launch().await.unwrap();
        assert_eq!(session.handle(), "abc");

        session.open("https://example.com").await.unwrap();
        session.perform(&Action::Scroll).await.unwrap();
        assert_eq!(
            session.current_location().await.unwrap(),
            "https://example.com/landing"
        );
        assert_eq!(
            session.capture(CaptureKind::Title).await.unwrap(),
            json!("Example Domain")
        );
        assert_eq!(
            session.capture(CaptureKind::ConsoleLog).await.unwrap(),
            json!([{"level": "INFO", "message": "hello"}])
        );
        session.close().await.unwrap();
        // Second close does not hit the driver again.
        session.close().await.unwrap();

        let requests = server.requests();
        let deletes = requests.iter().filter(|r| r.method == "DELETE").count();
        assert_eq!(deletes, 1);

        let open = requests
            .iter()
            .find(|r| r.path == "/session/abc/url" && r.method == "POST")
            .unwrap();
        assert!(open.body.contains("https://example.com"));
    }

    #[tokio::test]
    async fn non_driver_actions_are_rejected_without_a_request() {
        let server = FakeServer::start(driver_routes).await;
        let launcher = WebDriverLauncher::new(&config(&server.url)).unwrap();
        let session = launcher.launch().await.unwrap();

        assert_matches!(
            session.perform(&Action::Wait { seconds: 1.0 }).await,
            Err(JobError::Protocol(_))
        );
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn unknown_command_surfaces_as_webdriver_error() {
        let server = FakeServer::start(driver_routes).await;
        let launcher = WebDriverLauncher::new(&config(&server.url)).unwrap();
        let session = launcher.launch().await.unwrap();

        assert_matches!(
            session.capture(CaptureKind::Screenshot).await,
            Err(JobError::WebDriver { status: 404, .. })
        );
    }

    #[tokio::test]
    async fn launch_failure_is_reported_as_launch_error() {
        let server = FakeServer::start(|_, _, _| {
            (
                500,
                json!({"value": {"error": "session not created", "message": "no chrome"}})
                    .to_string(),
            )
        })
        .await;
        let launcher = WebDriverLauncher::new(&config(&server.url)).unwrap();

        assert_matches!(
            launcher.launch().await.err(),
            Some(JobError::Launch(msg)) if msg.contains("session not created")
        );
    }
}
