//! Scripted backend for integration tests.
//!
//! Provides:
//! - MockBackend: a local HTTP server that records request bodies and
//!   answers each one with a [`Reply`] chosen by a responder closure
//! - Reply: status plus body chunks, each optionally delayed
//! - Helpers to read the command out of a recorded request

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::debug;

/// One piece of a streamed response body.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub delay: Duration,
    pub bytes: Bytes,
}

/// How the mock answers one request.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    chunks: Vec<Chunk>,
    broken: bool,
}

impl Reply {
    /// 200 with the given answer tuples as one JSON array.
    pub fn answers(answers: Vec<Value>) -> Self {
        Self::raw(Value::Array(answers).to_string())
    }

    /// 200 with a literal body.
    pub fn raw(body: impl Into<String>) -> Self {
        Self::chunked([body.into()])
    }

    /// 200 with the body split into the given chunks.
    pub fn chunked<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            status: 200,
            chunks: chunks
                .into_iter()
                .map(|chunk| Chunk {
                    delay: Duration::ZERO,
                    bytes: Bytes::from(chunk.into()),
                })
                .collect(),
            broken: false,
        }
    }

    /// A bare status with an empty body.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            chunks: Vec::new(),
            broken: false,
        }
    }

    /// Wait before sending anything.
    pub fn after(mut self, delay: Duration) -> Self {
        self.chunks.insert(
            0,
            Chunk {
                delay,
                bytes: Bytes::new(),
            },
        );
        self
    }

    /// Wait before every chunk after the first.
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        for chunk in self.chunks.iter_mut().skip(1) {
            chunk.delay += delay;
        }
        self
    }

    /// Abort the connection after the last chunk instead of ending the body.
    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let broken = self.broken;
        let chunks = futures_util::stream::iter(self.chunks).then(|chunk| async move {
            if !chunk.delay.is_zero() {
                tokio::time::sleep(chunk.delay).await;
            }
            Ok::<Bytes, std::io::Error>(chunk.bytes)
        });
        let tail = futures_util::stream::iter(broken.then(|| {
            Err::<Bytes, std::io::Error>(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "mock backend aborted the body",
            ))
        }));
        (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            Body::from_stream(chunks.chain(tail)),
        )
            .into_response()
    }
}

type Responder = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

struct MockState {
    requests: Mutex<Vec<Value>>,
    responder: Responder,
}

/// A running mock backend. Stops when dropped.
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockBackend {
    /// Start a server on an ephemeral local port.
    pub async fn start<F>(responder: F) -> std::io::Result<Self>
    where
        F: Fn(&Value) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(MockState {
            requests: Mutex::new(Vec::new()),
            responder: Arc::new(responder),
        });
        let app = Router::new()
            .route("/", post(handle))
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });
        debug!(%addr, "Mock backend listening");

        Ok(Self {
            addr,
            state,
            shutdown: Some(shutdown_tx),
        })
    }

    /// Answer every command with the same tags for its own id.
    pub async fn answering(tags: &'static [&'static str]) -> std::io::Result<Self> {
        Self::start(move |request| answers_for(request, tags)).await
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// All request bodies received so far.
    pub fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The single command of every request received so far.
    pub fn commands(&self) -> Vec<Value> {
        self.requests().iter().map(|r| command(r).clone()).collect()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn handle(State(state): State<Arc<MockState>>, body: Bytes) -> Response {
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());
    (state.responder)(&request).into_response()
}

/// The first command of a request body.
pub fn command(request: &Value) -> &Value {
    &request["commands"][0]
}

/// The id answers to this request must carry: `meta.id` for action
/// commands, `authId` for auth commands.
pub fn correlation_id(request: &Value) -> String {
    let command = command(request);
    let id = match command[0].as_str() {
        Some("auth") => &command[1],
        _ => &command[2]["id"],
    };
    id.as_str().unwrap_or_default().to_string()
}

/// The action type of an action command, or `""`.
pub fn action_type(request: &Value) -> String {
    command(request)[1]["type"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

/// A reply carrying `[tag, id]` for each tag, where id matches the request.
pub fn answers_for(request: &Value, tags: &[&str]) -> Reply {
    let id = correlation_id(request);
    Reply::answers(tags.iter().map(|tag| json!([tag, id])).collect())
}

/// A URL nothing listens on.
pub async fn refused_url() -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{}/", addr))
}
