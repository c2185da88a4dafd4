//! Canned axum server for exercising the HTTP clients in tests.
//!
//! Every request lands in one fallback handler that maps
//! `(method, path, body)` to `(status, json body)` and records the call.

use std::sync::{Arc, Mutex};

use axum::http::{Method, StatusCode, Uri};
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: String,
}

type Handler = dyn Fn(&str, &str, &str) -> (u16, String) + Send + Sync;

pub struct FakeServer {
    pub url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &str, &str) -> (u16, String) + Send + Sync + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let app = {
            let requests = Arc::clone(&requests);
            Router::new().fallback(move |method: Method, uri: Uri, body: String| {
                let requests = Arc::clone(&requests);
                let handler = Arc::clone(&handler);
                async move { respond(&*handler, &requests, method, uri, body) }
            })
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url,
            requests,
            task,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn respond(
    handler: &Handler,
    requests: &Mutex<Vec<Recorded>>,
    method: Method,
    uri: Uri,
    body: String,
) -> (StatusCode, Json<Value>) {
    let method = method.as_str().to_string();
    let path = uri.path().to_string();
    let (status, response) = handler(&method, &path, &body);
    requests.lock().unwrap().push(Recorded { method, path, body });

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::from_str(&response).unwrap_or(Value::Null)))
}
