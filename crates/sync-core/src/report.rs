//! Reporter sink for pipeline events.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// A named pipeline event with its structured payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    BackendSent {
        action_id: String,
        action_type: String,
    },
    BackendGranted {
        action_id: String,
        latency_ms: u64,
    },
    BackendProcessed {
        action_id: String,
        latency_ms: u64,
    },
    Denied {
        action_id: String,
    },
    Error {
        action_id: Option<String>,
        message: String,
    },
    UnknownType {
        action_id: String,
        action_type: String,
    },
    WrongChannel {
        action_id: String,
        channel: String,
    },
    Authenticated {
        user_id: String,
        authenticated: bool,
    },
}

impl ReportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ReportEvent::BackendSent { .. } => "backendSent",
            ReportEvent::BackendGranted { .. } => "backendGranted",
            ReportEvent::BackendProcessed { .. } => "backendProcessed",
            ReportEvent::Denied { .. } => "denied",
            ReportEvent::Error { .. } => "error",
            ReportEvent::UnknownType { .. } => "unknownType",
            ReportEvent::WrongChannel { .. } => "wrongChannel",
            ReportEvent::Authenticated { .. } => "authenticated",
        }
    }
}

pub trait Reporter: Send + Sync {
    fn report(&self, event: ReportEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: ReportEvent) {
        let name = event.name();
        match event {
            ReportEvent::BackendSent {
                action_id,
                action_type,
            } => info!(event = name, action_id = %action_id, action_type = %action_type, "Action sent to backend"),
            ReportEvent::BackendGranted {
                action_id,
                latency_ms,
            } => info!(event = name, action_id = %action_id, latency_ms, "Backend granted access"),
            ReportEvent::BackendProcessed {
                action_id,
                latency_ms,
            } => info!(event = name, action_id = %action_id, latency_ms, "Backend processed action"),
            ReportEvent::Denied { action_id } => {
                info!(event = name, action_id = %action_id, "Action denied")
            }
            ReportEvent::Error { action_id, message } => warn!(
                event = name,
                action_id = action_id.as_deref().unwrap_or("-"),
                error = %message,
                "Action failed"
            ),
            ReportEvent::UnknownType {
                action_id,
                action_type,
            } => warn!(event = name, action_id = %action_id, action_type = %action_type, "Unknown action type"),
            ReportEvent::WrongChannel { action_id, channel } => {
                warn!(event = name, action_id = %action_id, channel = %channel, "Wrong channel")
            }
            ReportEvent::Authenticated {
                user_id,
                authenticated,
            } => info!(event = name, user_id = %user_id, authenticated, "Authentication checked"),
        }
    }
}

/// Counts events by name, then forwards them to another reporter.
pub struct MetricsReporter {
    inner: Arc<dyn Reporter>,
    counters: Mutex<BTreeMap<&'static str, u64>>,
}

impl MetricsReporter {
    pub fn new(inner: Arc<dyn Reporter>) -> Self {
        Self {
            inner,
            counters: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, name: &str) -> u64 {
        self.snapshot().get(name).copied().unwrap_or(0)
    }

    /// Render counters in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::from(
            "# HELP sync_proxy_events_total Pipeline events by name.\n\
             # TYPE sync_proxy_events_total counter\n",
        );
        for (name, value) in self.snapshot() {
            out.push_str(&format!(
                "sync_proxy_events_total{{event=\"{}\"}} {}\n",
                name, value
            ));
        }
        out
    }
}

impl Reporter for MetricsReporter {
    fn report(&self, event: ReportEvent) {
        {
            let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
            *counters.entry(event.name()).or_insert(0) += 1;
        }
        self.inner.report(event);
    }
}

/// Keeps every event in memory. Used by tests across the workspace.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ReportEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(ReportEvent::name).collect()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, event: ReportEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
