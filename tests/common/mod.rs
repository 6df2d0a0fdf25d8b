//! Mock Microsoft Graph server shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use graph_relay::config::GraphConfig;

/// Maximum time any test is allowed to run before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One request as the mock saw it.
#[derive(Debug, Clone)]
pub struct Seen {
    pub op: &'static str,
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Seen {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body is not JSON")
    }
}

pub struct MockGraph {
    pub base: String,
    seen: Mutex<Vec<Seen>>,
    failures: Mutex<HashMap<&'static str, u16>>,
    sessions: Mutex<usize>,
    session_status: Mutex<u16>,
}

impl MockGraph {
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.seen().iter().map(|s| s.op).collect()
    }

    pub fn only(&self, op: &str) -> Vec<Seen> {
        self.seen().into_iter().filter(|s| s.op == op).collect()
    }

    /// Answer `op` with `status` from now on.
    pub fn fail(&self, op: &'static str, status: u16) {
        self.failures.lock().unwrap().insert(op, status);
    }

    /// Success status used for `createUploadSession`.
    pub fn session_status(&self, status: u16) {
        *self.session_status.lock().unwrap() = status;
    }

    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig {
            client_id: "client-1".into(),
            client_secret: String::from("secret-1").into(),
            authority: format!("{}/tenant-1", self.base),
            scope: "https://graph.microsoft.com/.default".into(),
            base_url: format!("{}/v1.0", self.base),
        }
    }
}

fn classify(method: &Method, path: &str) -> &'static str {
    match *method {
        Method::POST if path.ends_with("/oauth2/v2.0/token") => "token",
        Method::POST if path.ends_with("/attachments/createUploadSession") => "session",
        Method::POST if path.ends_with("/send") => "send",
        Method::POST if path.ends_with("/messages") => "draft",
        Method::PUT if path.starts_with("/upload/") => "chunk",
        Method::DELETE if path.contains("/messages/") => "delete",
        _ => "unknown",
    }
}

async fn graph(
    State(state): State<Arc<MockGraph>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let op = classify(&method, &path);
    state.seen.lock().unwrap().push(Seen {
        op,
        method,
        path,
        headers,
        body,
    });

    if let Some(&status) = state.failures.lock().unwrap().get(op) {
        let status = StatusCode::from_u16(status).unwrap();
        return (status, Json(json!({"error": {"code": "mock", "message": "injected"}})))
            .into_response();
    }

    match op {
        "token" => Json(json!({"access_token": "tok-1", "token_type": "Bearer"})).into_response(),
        "draft" => (StatusCode::CREATED, Json(json!({"id": "draft-1"}))).into_response(),
        "session" => {
            let n = {
                let mut sessions = state.sessions.lock().unwrap();
                *sessions += 1;
                *sessions
            };
            let url = format!("{}/upload/{n}", state.base);
            let status = StatusCode::from_u16(*state.session_status.lock().unwrap()).unwrap();
            (status, Json(json!({"uploadUrl": url}))).into_response()
        }
        "chunk" => StatusCode::ACCEPTED.into_response(),
        "send" => StatusCode::ACCEPTED.into_response(),
        "delete" => StatusCode::NO_CONTENT.into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Start the mock on a random port.
pub async fn start_graph() -> Arc<MockGraph> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(MockGraph {
        base: format!("http://{addr}"),
        seen: Mutex::new(Vec::new()),
        failures: Mutex::new(HashMap::new()),
        sessions: Mutex::new(0),
        session_status: Mutex::new(200),
    });

    let app = Router::new().fallback(graph).with_state(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;
    state
}
