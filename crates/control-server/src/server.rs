//! Request dispatch: routing, envelope checks, secret and lockout.

use crate::route::{ControlRequest, ControlRoute, HealthRoute, RouteResponse};
use crate::{ControlError, ControlResult};
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bruteforce_guard::BruteforceGuard;
use futures_util::future::join_all;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Highest control envelope version understood.
pub const CONTROL_PROTOCOL_VERSION: u64 = 3;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// A parsed POST body.
#[derive(Debug)]
struct Envelope {
    version: u64,
    secret: String,
    commands: Vec<Value>,
}

impl Envelope {
    fn parse(body: &[u8]) -> ControlResult<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ControlError::InvalidBody(e.to_string()))?;
        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| ControlError::InvalidBody("version must be a number".into()))?;
        let secret = value
            .get("secret")
            .and_then(Value::as_str)
            .ok_or_else(|| ControlError::InvalidBody("secret must be a string".into()))?
            .to_string();
        let commands = value
            .get("commands")
            .and_then(Value::as_array)
            .ok_or_else(|| ControlError::InvalidBody("commands must be an array".into()))?;

        let well_formed = commands.iter().all(|command| {
            command
                .as_array()
                .and_then(|tuple| tuple.first())
                .is_some_and(Value::is_string)
        });
        if !well_formed {
            return Err(ControlError::InvalidBody(
                "every command must be a [kind, ...] tuple".into(),
            ));
        }

        Ok(Self {
            version,
            secret,
            commands: commands.clone(),
        })
    }
}

/// Control plane server. Routes are matched by exact path.
pub struct ControlServer {
    routes: HashMap<String, ControlRoute>,
    secret_digest: Option<Vec<u8>>,
    guard: Arc<BruteforceGuard>,
}

impl ControlServer {
    /// A server with `GET /health` installed. Without a secret every
    /// secret-gated request is refused.
    pub fn new(secret: Option<&str>, guard: Arc<BruteforceGuard>) -> Self {
        let mut routes = HashMap::new();
        routes.insert(
            "/health".to_string(),
            ControlRoute::Request(Arc::new(HealthRoute)),
        );
        Self {
            routes,
            secret_digest: secret.map(digest),
            guard,
        }
    }

    pub fn route(mut self, path: &str, route: ControlRoute) -> Self {
        self.routes.insert(path.to_string(), route);
        self
    }

    pub fn router(self) -> Router {
        Router::new().fallback(dispatch).with_state(Arc::new(self))
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(%addr, "Control server listening");
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
    }

    async fn handle(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        request: ControlRequest,
        body: Bytes,
    ) -> ControlResult<Response> {
        let route = self
            .routes
            .get(path)
            .ok_or_else(|| ControlError::NotFound(path.to_string()))?;

        match (route, method) {
            (ControlRoute::Command(route), method) if method == Method::POST => {
                let envelope = Envelope::parse(&body)?;
                if envelope.version > CONTROL_PROTOCOL_VERSION {
                    return Err(ControlError::UnsupportedVersion(envelope.version));
                }
                self.check_secret(&envelope.secret, &request)?;

                if let Some(invalid) = envelope
                    .commands
                    .iter()
                    .find(|command| !route.is_valid(command))
                {
                    return Err(ControlError::InvalidCommand(invalid.to_string()));
                }

                let count = envelope.commands.len();
                let results = join_all(
                    envelope
                        .commands
                        .into_iter()
                        .map(|command| route.command(command, &request)),
                )
                .await;
                if let Some(e) = results.into_iter().find_map(Result::err) {
                    return Err(ControlError::RouteFailed(format!("{:#}", e)));
                }
                debug!(path, count, "Control commands accepted");
                Ok(StatusCode::OK.into_response())
            }
            (ControlRoute::Request(route), method) if method == Method::GET => {
                if !route.safe() {
                    self.check_secret(&query_secret(query.unwrap_or_default()), &request)?;
                }
                let response = route
                    .request(&request)
                    .await
                    .map_err(|e| ControlError::RouteFailed(format!("{:#}", e)))?;
                Ok(write_response(response))
            }
            _ => Err(ControlError::MethodNotAllowed(path.to_string())),
        }
    }

    fn check_secret(&self, secret: &str, request: &ControlRequest) -> ControlResult<()> {
        if let Some(addr) = request.remote_addr {
            if self.guard.is_locked(addr) {
                return Err(ControlError::TooManyAttempts);
            }
        }

        let matches = self
            .secret_digest
            .as_deref()
            .is_some_and(|expected| digest(secret).as_slice() == expected);
        if matches {
            return Ok(());
        }

        if let Some(addr) = request.remote_addr {
            self.guard.record_failure(addr);
        }
        Err(ControlError::WrongSecret)
    }
}

/// The whole query string is the secret, percent-decoded.
fn query_secret(query: &str) -> Cow<'_, str> {
    urlencoding::decode(query).unwrap_or(Cow::Borrowed(query))
}

fn digest(secret: &str) -> Vec<u8> {
    Sha256::digest(secret.as_bytes()).to_vec()
}

fn write_response(route_response: RouteResponse) -> Response {
    let mut response = Response::new(Body::from(route_response.body));
    for (name, value) in route_response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid route header"),
        }
    }
    response
}

async fn dispatch(State(server): State<Arc<ControlServer>>, request: Request) -> Response {
    let remote_addr: Option<IpAddr> = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return ControlError::InvalidBody(e.to_string()).into_response(),
    };

    let control_request = ControlRequest { remote_addr };
    match server
        .handle(&method, &path, query.as_deref(), control_request, body)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            let addr = remote_addr.map(|addr| addr.to_string()).unwrap_or_default();
            match e.status_code() {
                StatusCode::INTERNAL_SERVER_ERROR => {
                    warn!(%method, path = %path, addr = %addr, error = %e, "Control route failed")
                }
                status => {
                    debug!(%method, path = %path, addr = %addr, status = status.as_u16(), error = %e, "Control request refused")
                }
            }
            e.into_response()
        }
    }
}
