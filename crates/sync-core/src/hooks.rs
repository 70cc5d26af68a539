//! Hook surface the action pipeline drives.
//!
//! Business logic (or the backend proxy standing in for it) registers
//! [`ActionHooks`] per action type and per channel pattern. The ordering
//! queue resolves the hooks for each action and runs them in order:
//! `access`, then `resend`, then `process` (the channel `load` step for
//! subscriptions), and always `finally`.

use crate::{Action, Meta, Resend};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hook failures are arbitrary errors; the queue turns them into undo records.
pub type HookResult<T> = anyhow::Result<T>;

/// Why an action was not recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnknownKind {
    /// No handler for the action type.
    Type,
    /// No handler for the subscribed channel.
    Channel,
}

/// Outcome of the access step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    Denied,
    Unknown(UnknownKind),
}

impl Access {
    pub fn is_granted(&self) -> bool {
        matches!(self, Access::Granted)
    }
}

impl From<bool> for Access {
    fn from(granted: bool) -> Self {
        if granted {
            Access::Granted
        } else {
            Access::Denied
        }
    }
}

static NEXT_PASS: AtomicU64 = AtomicU64::new(1);

/// Identity of the action's author, derived from its meta.
///
/// Each context also carries a `pass` number that tells apart two runs of
/// the hooks for the same action id. Hooks that keep per-action state use
/// it to clean up only what their own run created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookContext {
    pub pass: u64,
    pub node_id: String,
    pub client_id: String,
    pub user_id: Option<String>,
    pub subprotocol: Option<String>,
    pub headers: Map<String, Value>,
}

impl HookContext {
    pub fn from_meta(meta: &Meta) -> Self {
        let parsed = meta.parsed_id();
        Self {
            pass: NEXT_PASS.fetch_add(1, Ordering::Relaxed),
            node_id: parsed.node_id,
            client_id: parsed.client_id,
            user_id: parsed.user_id,
            subprotocol: meta.subprotocol.clone(),
            headers: Map::new(),
        }
    }
}

/// Lifecycle hooks for one action type or channel.
#[async_trait]
pub trait ActionHooks: Send + Sync {
    async fn access(&self, ctx: &HookContext, action: &Action, meta: &Meta) -> HookResult<Access>;

    async fn resend(
        &self,
        _ctx: &HookContext,
        _action: &Action,
        _meta: &Meta,
    ) -> HookResult<Option<Resend>> {
        Ok(None)
    }

    async fn process(&self, _ctx: &HookContext, _action: &Action, _meta: &Meta) -> HookResult<()> {
        Ok(())
    }

    /// Runs after every other step, whatever the outcome. Must be idempotent.
    async fn finally(&self, _ctx: &HookContext, _action: &Action, _meta: &Meta) {}
}

/// Credentials presented by a connecting client.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub user_id: String,
    pub token: Option<String>,
    pub headers: Map<String, Value>,
    pub cookie: Map<String, Value>,
    pub remote_addr: Option<IpAddr>,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &AuthRequest) -> HookResult<bool>;
}

/// Channel name pattern such as `users/:id`.
///
/// `:name` segments match any single non-empty segment; other segments must
/// match literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPattern {
    segments: Vec<String>,
}

impl ChannelPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            segments: pattern.split('/').map(str::to_string).collect(),
        }
    }

    pub fn matches(&self, channel: &str) -> bool {
        let parts: Vec<&str> = channel.split('/').collect();
        parts.len() == self.segments.len()
            && self
                .segments
                .iter()
                .zip(parts)
                .all(|(segment, part)| match segment.strip_prefix(':') {
                    Some(_) => !part.is_empty(),
                    None => segment == part,
                })
    }
}

/// Registered hooks, looked up per action.
#[derive(Default, Clone)]
pub struct HookRegistry {
    types: HashMap<String, Arc<dyn ActionHooks>>,
    other_type: Option<Arc<dyn ActionHooks>>,
    channels: Vec<(ChannelPattern, Arc<dyn ActionHooks>)>,
    other_channel: Option<Arc<dyn ActionHooks>>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register hooks for one action type.
    pub fn action_type(&mut self, name: &str, hooks: Arc<dyn ActionHooks>) -> &mut Self {
        self.types.insert(name.to_string(), hooks);
        self
    }

    /// Register hooks for every action type without its own hooks.
    pub fn other_type(&mut self, hooks: Arc<dyn ActionHooks>) -> &mut Self {
        self.other_type = Some(hooks);
        self
    }

    /// Register hooks for channels matching `pattern`. Earlier patterns win.
    pub fn channel(&mut self, pattern: &str, hooks: Arc<dyn ActionHooks>) -> &mut Self {
        self.channels.push((ChannelPattern::new(pattern), hooks));
        self
    }

    /// Register hooks for every channel without its own hooks.
    pub fn other_channel(&mut self, hooks: Arc<dyn ActionHooks>) -> &mut Self {
        self.other_channel = Some(hooks);
        self
    }

    pub fn auth(&mut self, authenticator: Arc<dyn Authenticator>) -> &mut Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Find the hooks responsible for `action`.
    ///
    /// Subscriptions resolve by channel, everything else by type. A
    /// subscription without a channel name resolves to nothing.
    pub fn resolve(&self, action: &Action) -> Option<Arc<dyn ActionHooks>> {
        if action.is_subscription() {
            let channel = action.channel()?;
            return self
                .channels
                .iter()
                .find(|(pattern, _)| pattern.matches(channel))
                .map(|(_, hooks)| hooks.clone())
                .or_else(|| self.other_channel.clone());
        }
        self.types
            .get(action.action_type())
            .cloned()
            .or_else(|| self.other_type.clone())
    }

    pub fn authenticator(&self) -> Option<Arc<dyn Authenticator>> {
        self.authenticator.clone()
    }
}
