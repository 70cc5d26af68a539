//! The append-only action log port and an in-memory implementation.

use crate::{Action, CoreResult, Meta};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Append-only action log consumed by the pipeline.
#[async_trait]
pub trait ActionLog: Send + Sync {
    /// Append an action.
    ///
    /// Returns the stored meta, or `None` when an entry with the same id
    /// already exists.
    async fn add(&self, action: Action, meta: Meta) -> CoreResult<Option<Meta>>;

    /// Visit entries oldest first until `visit` returns `false`.
    async fn each(
        &self,
        visit: &mut (dyn for<'a> FnMut(&'a Action, &'a Meta) -> bool + Send),
    ) -> CoreResult<()>;

    /// Drop `reason` from every entry and remove entries left without reasons.
    ///
    /// Returns the number of removed entries.
    async fn remove_reason(&self, reason: &str) -> CoreResult<usize>;

    /// A fresh, unique action id for entries created by this node.
    fn generate_id(&self) -> String;
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Log kept in process memory.
pub struct MemoryLog {
    node_id: String,
    sequence: AtomicU64,
    entries: Mutex<Vec<(Action, Meta)>>,
}

impl MemoryLog {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            sequence: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Snapshot of all entries, oldest first.
    pub fn entries(&self) -> Vec<(Action, Meta)> {
        self.lock().clone()
    }

    /// Snapshot of all actions, oldest first.
    pub fn actions(&self) -> Vec<Action> {
        self.lock().iter().map(|(action, _)| action.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Action, Meta)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ActionLog for MemoryLog {
    async fn add(&self, action: Action, mut meta: Meta) -> CoreResult<Option<Meta>> {
        if meta.id.is_empty() {
            meta.id = self.generate_id();
        }
        if meta.time == 0.0 {
            meta.time = now_ms() as f64;
        }

        let mut entries = self.lock();
        if entries.iter().any(|(_, existing)| existing.id == meta.id) {
            debug!(action_id = %meta.id, "Skipping duplicate action");
            return Ok(None);
        }
        entries.push((action, meta.clone()));
        Ok(Some(meta))
    }

    async fn each(
        &self,
        visit: &mut (dyn for<'a> FnMut(&'a Action, &'a Meta) -> bool + Send),
    ) -> CoreResult<()> {
        let snapshot = self.entries();
        for (action, meta) in &snapshot {
            if !visit(action, meta) {
                break;
            }
        }
        Ok(())
    }

    async fn remove_reason(&self, reason: &str) -> CoreResult<usize> {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain_mut(|(_, meta)| {
            let had_reason = meta.reasons.iter().any(|r| r == reason);
            meta.reasons.retain(|r| r != reason);
            !(had_reason && meta.reasons.is_empty())
        });
        Ok(before - entries.len())
    }

    fn generate_id(&self) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("{} {} {}", now_ms(), self.node_id, sequence)
    }
}
