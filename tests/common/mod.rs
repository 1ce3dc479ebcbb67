//! Test harness: real axum servers on ephemeral ports standing in for the
//! upstream chat service and the backend message API.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};

use qihang_chat::consumer::{AccumulatedResponse, ResponseSink};
use qihang_chat::routes;
use qihang_chat::service::transcoder::CompletionRelay;
use qihang_chat::upstream::UpstreamChatClient;

pub const TOKEN: &str = "test-token";

/// Binds `app` to 127.0.0.1 on a free port and returns its base URL.
pub async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn data_line(kind: &str, content: &str) -> String {
    format!("data: {}\n\n", json!({ "type": kind, "content": content }))
}

// ── Fake upstream ─────────────────────────────────────────────────────────────

/// How the fake upstream answers.
#[derive(Clone)]
pub enum Script {
    /// 200 and the given chunks, then end of stream.
    Stream(Vec<String>),
    /// 200, the given chunks, then a transport failure.
    FailAfter(Vec<String>),
    /// 200, the given chunks, then nothing ever again.
    Stall(Vec<String>),
    /// Error status before any byte is streamed.
    Status(u16, &'static str),
    /// Error status whose body never arrives.
    StalledStatus(u16),
}

#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub topic_id: String,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
pub struct FakeUpstream {
    script: Arc<Mutex<Vec<Script>>>,
    calls: Arc<Mutex<Vec<UpstreamCall>>>,
}

impl FakeUpstream {
    /// Scripts are used in order; the last one repeats.
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            script: Arc::new(Mutex::new(scripts)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<UpstreamCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next_script(&self) -> Script {
        let mut scripts = self.script.lock().unwrap();
        if scripts.len() > 1 {
            scripts.remove(0)
        } else {
            scripts[0].clone()
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/topics/{topic_id}/chat/stream", post(upstream_handler))
            .with_state(self.clone())
    }
}

async fn upstream_handler(
    State(fake): State<FakeUpstream>,
    Path(topic_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    fake.calls.lock().unwrap().push(UpstreamCall {
        topic_id,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        body,
    });

    let (chunks, tail): (Vec<String>, BoxStream<'static, Result<Bytes, std::io::Error>>) =
        match fake.next_script() {
            Script::Status(status, body) => {
                return (StatusCode::from_u16(status).unwrap(), body).into_response();
            }
            Script::StalledStatus(status) => {
                let body = stream::pending::<Result<Bytes, std::io::Error>>();
                return Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .body(Body::from_stream(body))
                    .unwrap();
            }
            Script::Stream(chunks) => (chunks, stream::empty().boxed()),
            Script::FailAfter(chunks) => (
                chunks,
                stream::once(async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err(std::io::Error::other("upstream crashed"))
                })
                .boxed(),
            ),
            Script::Stall(chunks) => (chunks, stream::pending().boxed()),
        };

    let head = stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok::<_, std::io::Error>(Bytes::from(chunk))
    });
    Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(head.chain(tail)))
        .unwrap()
}

/// Starts the fake upstream and a relay pointed at it; returns the relay's
/// completion URL.
pub async fn spawn_relay(upstream: &FakeUpstream) -> String {
    let upstream_url = spawn(upstream.router()).await;
    format!("{}/api/completion", spawn(relay_router(&upstream_url, Duration::from_secs(5))).await)
}

pub fn relay_router(upstream_url: &str, timeout: Duration) -> Router {
    let relay = CompletionRelay::new(UpstreamChatClient::new(upstream_url, timeout).unwrap());
    routes::router(relay)
}

// ── Fake message API ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StoredCall {
    pub topic_id: i64,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Clone, Default)]
pub struct FakeMessageApi {
    calls: Arc<Mutex<Vec<StoredCall>>>,
    next_id: Arc<AtomicUsize>,
    fail_status: Option<u16>,
    garbled: bool,
}

impl FakeMessageApi {
    pub fn failing(status: u16) -> Self {
        Self { fail_status: Some(status), ..Default::default() }
    }

    /// Stores every message but answers with a body that is not a record.
    pub fn garbled() -> Self {
        Self { garbled: true, ..Default::default() }
    }

    pub fn calls(&self) -> Vec<StoredCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/topics/{topic_id}/messages", post(message_handler))
            .with_state(self.clone())
    }
}

async fn message_handler(
    State(api): State<FakeMessageApi>,
    Path(topic_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    api.calls.lock().unwrap().push(StoredCall {
        topic_id,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        body: body.clone(),
    });
    if let Some(status) = api.fail_status {
        return (StatusCode::from_u16(status).unwrap(), "store down").into_response();
    }
    if api.garbled {
        return (StatusCode::CREATED, "ok").into_response();
    }

    let message_id = api.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    (
        StatusCode::CREATED,
        Json(json!({
            "message_id": message_id,
            "topic_id": topic_id,
            "user_id": 1,
            "message_type": body.get("message_type").and_then(Value::as_str).unwrap_or("user"),
            "content": body["content"],
            "created_at": "2025-06-01T08:00:00",
        })),
    )
        .into_response()
}

// ── Sink ──────────────────────────────────────────────────────────────────────

/// Thread-safe sink so exchanges can run on spawned tasks.
#[derive(Clone, Default)]
pub struct SharedSink {
    pub updates: Arc<Mutex<Vec<(String, String, bool)>>>,
    pub completed: Arc<Mutex<Vec<String>>>,
    pub first_update: Arc<tokio::sync::Notify>,
}

impl SharedSink {
    pub fn updates(&self) -> Vec<(String, String, bool)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

impl ResponseSink for SharedSink {
    fn on_update(&mut self, snapshot: &AccumulatedResponse) {
        let mut updates = self.updates.lock().unwrap();
        updates.push((
            snapshot.reasoning_text().to_string(),
            snapshot.answer_text().to_string(),
            snapshot.is_typing(),
        ));
        if updates.len() == 1 {
            self.first_update.notify_one();
        }
    }

    fn on_complete(&mut self, response: &AccumulatedResponse) {
        self.completed.lock().unwrap().push(response.answer_text().to_string());
    }
}
