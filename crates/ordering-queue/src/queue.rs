//! Lane table and per-lane workers.

use crate::{QueueError, QueueResult};
use futures_util::FutureExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use sync_core::{
    now_ms, undo_record, Access, Action, ActionHooks, ActionLog, HookContext, HookRegistry,
    HookResult, Meta, ReportEvent, Reporter, UndoReason, UnknownKind,
};
use tracing::{debug, error, info, warn};

/// Lane every action falls back to.
pub const MAIN_LANE: &str = "main";

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Lane names. Must include [`MAIN_LANE`].
    pub lanes: Vec<String>,
    /// Attach error messages to error undo records.
    pub development: bool,
    /// How often `drain` checks for idle lanes.
    pub drain_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lanes: vec![MAIN_LANE.to_string()],
            development: false,
            drain_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Default)]
struct Lane {
    pending: VecDeque<(Action, Meta)>,
    processing: bool,
}

struct QueueInner {
    config: QueueConfig,
    lanes: Mutex<HashMap<String, Lane>>,
    /// Ids of pairs being processed, across all lanes.
    in_flight: Mutex<HashSet<String>>,
    hooks: HookRegistry,
    log: Arc<dyn ActionLog>,
    reporter: Arc<dyn Reporter>,
}

/// Named FIFO lanes. One pair per lane is in flight at a time; lanes run
/// concurrently.
#[derive(Clone)]
pub struct OrderingQueue {
    inner: Arc<QueueInner>,
}

impl OrderingQueue {
    pub fn new(
        config: QueueConfig,
        hooks: HookRegistry,
        log: Arc<dyn ActionLog>,
        reporter: Arc<dyn Reporter>,
    ) -> QueueResult<Self> {
        if !config.lanes.iter().any(|lane| lane == MAIN_LANE) {
            return Err(QueueError::MissingMainLane);
        }
        let mut lanes = HashMap::new();
        for name in &config.lanes {
            if lanes.insert(name.clone(), Lane::default()).is_some() {
                return Err(QueueError::DuplicateLane(name.clone()));
            }
        }
        Ok(Self {
            inner: Arc::new(QueueInner {
                config,
                lanes: Mutex::new(lanes),
                in_flight: Mutex::new(HashSet::new()),
                hooks,
                log,
                reporter,
            }),
        })
    }

    /// Lane an action is routed to.
    ///
    /// With a single lane everything goes to `main`. Otherwise the lane is
    /// the type prefix before `/`, or for subscriptions the full channel
    /// name and then its prefix. Unmatched actions go to `main`.
    pub fn lane_key(&self, action: &Action) -> String {
        let lanes = &self.inner.config.lanes;
        if lanes.len() == 1 {
            return MAIN_LANE.to_string();
        }
        let known = |name: &str| lanes.iter().any(|lane| lane == name);

        let candidate = if action.is_subscription() {
            match action.channel() {
                Some(channel) if known(channel) => return channel.to_string(),
                Some(channel) => prefix(channel),
                None => MAIN_LANE,
            }
        } else {
            prefix(action.action_type())
        };

        if known(candidate) {
            candidate.to_string()
        } else {
            MAIN_LANE.to_string()
        }
    }

    /// Append a pair to its lane, starting the lane if it was idle.
    ///
    /// Returns the lane key.
    pub fn enqueue(&self, action: Action, meta: Meta) -> String {
        let key = self.lane_key(&action);
        debug!(action_id = %meta.id, lane = %key, "Enqueued action");

        let start = {
            let mut lanes = self.inner.lock();
            let lane = lanes.entry(key.clone()).or_default();
            lane.pending.push_back((action, meta));
            if lane.processing {
                false
            } else {
                lane.processing = true;
                true
            }
        };

        if start {
            tokio::spawn(run_lane(self.inner.clone(), key.clone()));
        }
        key
    }

    /// Whether no lane has queued or in-flight work.
    pub fn is_idle(&self) -> bool {
        self.inner
            .lock()
            .values()
            .all(|lane| !lane.processing && lane.pending.is_empty())
    }

    /// Pairs waiting in any lane, not counting the ones in flight.
    pub fn pending(&self) -> usize {
        self.inner.lock().values().map(|lane| lane.pending.len()).sum()
    }

    /// Resolve once every lane is idle.
    pub async fn drain(&self) {
        while !self.is_idle() {
            tokio::time::sleep(self.inner.config.drain_interval).await;
        }
        info!("Ordering queue drained");
    }
}

fn prefix(name: &str) -> &str {
    name.split('/').next().unwrap_or(name)
}

async fn run_lane(inner: Arc<QueueInner>, key: String) {
    loop {
        let next = {
            let mut lanes = inner.lock();
            let Some(lane) = lanes.get_mut(&key) else {
                break;
            };
            match lane.pending.pop_front() {
                Some(pair) => pair,
                None => {
                    lane.processing = false;
                    break;
                }
            }
        };

        let (action, meta) = next;
        if !inner.claim(&meta.id) {
            debug!(action_id = %meta.id, lane = %key, "Action with this id is already in flight, skipping");
            continue;
        }
        let outcome = AssertUnwindSafe(inner.process_pair(&action, &meta))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            let message = panic_message(panic.as_ref());
            error!(action_id = %meta.id, lane = %key, error = %message, "Action cleanup panicked");
            inner.fail(&action, &meta, &message).await;
        }
        inner.release(&meta.id);
    }
    debug!(lane = %key, "Lane idle");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Lane>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `id` as in flight. Returns `false` if it already is.
    fn claim(&self, id: &str) -> bool {
        id.is_empty()
            || self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id.to_string())
    }

    fn release(&self, id: &str) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    async fn process_pair(&self, action: &Action, meta: &Meta) {
        let ctx = HookContext::from_meta(meta);
        let Some(hooks) = self.hooks.resolve(action) else {
            self.unknown(action, meta, unknown_kind(action)).await;
            return;
        };

        let result = AssertUnwindSafe(self.authorize_and_commit(hooks.as_ref(), &ctx, action, meta))
            .catch_unwind()
            .await;
        // `finally` runs for every resolved pair, including panicked ones.
        hooks.finally(&ctx, action, meta).await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(action_id = %meta.id, error = %e, "Action failed");
                self.fail(action, meta, &format!("{:#}", e)).await;
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(action_id = %meta.id, error = %message, "Action processing panicked");
                self.fail(action, meta, &message).await;
            }
        }
    }

    async fn authorize_and_commit(
        &self,
        hooks: &dyn ActionHooks,
        ctx: &HookContext,
        action: &Action,
        meta: &Meta,
    ) -> HookResult<()> {
        match hooks.access(ctx, action, meta).await? {
            Access::Granted => {}
            Access::Denied => {
                self.reporter.report(ReportEvent::Denied {
                    action_id: meta.id.clone(),
                });
                self.write_undo(action, meta, UndoReason::Denied, None).await?;
                return Ok(());
            }
            Access::Unknown(kind) => {
                // Whoever answered Unknown has reported it already.
                self.write_undo(action, meta, undo_reason(kind), None).await?;
                return Ok(());
            }
        }

        let mut meta = meta.clone();
        if !action.is_subscription() {
            if let Some(resend) = hooks.resend(ctx, action, &meta).await? {
                meta.apply_resend(&resend);
            }
        }

        let id = meta.id.clone();
        match self.log.add(action.clone(), meta).await? {
            Some(stored) => {
                debug!(action_id = %id, "Action committed");
                hooks.process(ctx, action, &stored).await?;
            }
            None => debug!(action_id = %id, "Duplicate action skipped"),
        }
        Ok(())
    }

    async fn unknown(&self, action: &Action, meta: &Meta, kind: UnknownKind) {
        match kind {
            UnknownKind::Type => self.reporter.report(ReportEvent::UnknownType {
                action_id: meta.id.clone(),
                action_type: action.action_type().to_string(),
            }),
            UnknownKind::Channel => self.reporter.report(ReportEvent::WrongChannel {
                action_id: meta.id.clone(),
                channel: action.channel().unwrap_or_default().to_string(),
            }),
        }
        if let Err(e) = self.write_undo(action, meta, undo_reason(kind), None).await {
            error!(action_id = %meta.id, error = %e, "Failed to write undo record");
        }
    }

    /// Report a failure and send an error undo to the author.
    async fn fail(&self, action: &Action, meta: &Meta, message: &str) {
        self.reporter.report(ReportEvent::Error {
            action_id: Some(meta.id.clone()),
            message: message.to_string(),
        });
        let detail = self.config.development.then_some(message);
        if let Err(e) = self.write_undo(action, meta, UndoReason::Error, detail).await {
            error!(action_id = %meta.id, error = %e, "Failed to write undo record");
        }
    }

    async fn write_undo(
        &self,
        action: &Action,
        meta: &Meta,
        reason: UndoReason,
        error_message: Option<&str>,
    ) -> HookResult<()> {
        let (undo, undo_meta) = undo_record(
            action,
            meta,
            reason,
            self.log.generate_id(),
            now_ms() as f64,
            error_message,
        );
        info!(action_id = %meta.id, reason = %reason, "Undoing action");
        self.log.add(undo, undo_meta).await?;
        Ok(())
    }
}

fn unknown_kind(action: &Action) -> UnknownKind {
    if action.is_subscription() {
        UnknownKind::Channel
    } else {
        UnknownKind::Type
    }
}

fn undo_reason(kind: UnknownKind) -> UndoReason {
    match kind {
        UnknownKind::Type => UndoReason::UnknownType,
        UnknownKind::Channel => UndoReason::WrongChannel,
    }
}
