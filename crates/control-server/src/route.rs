//! Route contracts and the built-in routes.

use async_trait::async_trait;
use serde_json::Value;
use std::net::IpAddr;
use std::sync::Arc;
use sync_core::{HookResult, MetricsReporter};

/// Who sent a control request.
#[derive(Debug, Clone, Default)]
pub struct ControlRequest {
    pub remote_addr: Option<IpAddr>,
}

/// A POST route. Every command in the envelope is checked with
/// `is_valid` before any of them runs.
#[async_trait]
pub trait CommandRoute: Send + Sync {
    fn is_valid(&self, command: &Value) -> bool;

    async fn command(&self, command: Value, request: &ControlRequest) -> HookResult<()>;
}

/// Headers and body written verbatim by a GET route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteResponse {
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RouteResponse {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: body.into(),
        }
    }
}

/// A GET route.
#[async_trait]
pub trait RequestRoute: Send + Sync {
    /// Safe routes skip the secret check.
    fn safe(&self) -> bool {
        false
    }

    async fn request(&self, request: &ControlRequest) -> HookResult<RouteResponse>;
}

#[derive(Clone)]
pub enum ControlRoute {
    /// POST only.
    Command(Arc<dyn CommandRoute>),
    /// GET only.
    Request(Arc<dyn RequestRoute>),
}

/// `GET /health`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthRoute;

#[async_trait]
impl RequestRoute for HealthRoute {
    fn safe(&self) -> bool {
        true
    }

    async fn request(&self, _request: &ControlRequest) -> HookResult<RouteResponse> {
        Ok(RouteResponse::text("OK"))
    }
}

/// `GET /metrics`: event counters in Prometheus text format.
pub struct MetricsRoute {
    metrics: Arc<MetricsReporter>,
}

impl MetricsRoute {
    pub fn new(metrics: Arc<MetricsReporter>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl RequestRoute for MetricsRoute {
    async fn request(&self, _request: &ControlRequest) -> HookResult<RouteResponse> {
        Ok(RouteResponse {
            headers: vec![(
                "content-type".to_string(),
                "text/plain; version=0.0.4; charset=utf-8".to_string(),
            )],
            body: self.metrics.render_prometheus(),
        })
    }
}
