//! Control route that injects actions into the ordering queue.

use async_trait::async_trait;
use control_server::{CommandRoute, ControlRequest};
use ordering_queue::OrderingQueue;
use serde_json::Value;
use std::sync::Arc;
use sync_core::{now_ms, ActionLog, Command, HookResult};
use tracing::debug;

/// `POST /`: accepts `["action", action, meta?]` commands.
///
/// Missing meta ids and times are filled in by this node, then the pair is
/// queued like any client action. The command completes once the pair is
/// queued, so a 200 reply does not mean the action was accepted: denials
/// and failures surface later as undo records in the log.
pub struct ActionCommandRoute {
    queue: OrderingQueue,
    log: Arc<dyn ActionLog>,
}

impl ActionCommandRoute {
    pub fn new(queue: OrderingQueue, log: Arc<dyn ActionLog>) -> Self {
        Self { queue, log }
    }
}

#[async_trait]
impl CommandRoute for ActionCommandRoute {
    fn is_valid(&self, command: &Value) -> bool {
        Command::action_from_value(command).is_ok()
    }

    async fn command(&self, command: Value, request: &ControlRequest) -> HookResult<()> {
        let Command::Action {
            action, mut meta, ..
        } = Command::action_from_value(&command)?
        else {
            anyhow::bail!("expected an action command");
        };
        if meta.id.is_empty() {
            meta.id = self.log.generate_id();
        }
        if meta.time == 0.0 {
            meta.time = now_ms() as f64;
        }

        let lane = self.queue.enqueue(action, meta);
        debug!(lane = %lane, remote_addr = ?request.remote_addr, "Queued control action");
        Ok(())
    }
}
