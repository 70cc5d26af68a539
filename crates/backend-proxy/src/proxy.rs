//! BackendProxy: the hook surface backed by backend exchanges.

use crate::auth::AuthDriver;
use crate::exchange::{self, ActionExchange, OutcomeReceiver};
use crate::table::{ExchangeDriver, ExchangeTable};
use crate::{ProxyError, ProxyResult};
use async_trait::async_trait;
use backend_client::BackendClient;
use bruteforce_guard::BruteforceGuard;
use std::sync::Arc;
use sync_core::{
    Access, Action, ActionHooks, AuthRequest, Authenticator, Command, HookContext, HookRegistry,
    HookResult, Meta, ReportEvent, Reporter, Resend,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sends every action to the backend and answers the hooks from the
/// backend's verdicts.
pub struct BackendProxy {
    client: BackendClient,
    reporter: Arc<dyn Reporter>,
    exchanges: ExchangeTable,
    guard: Option<Arc<BruteforceGuard>>,
}

impl BackendProxy {
    pub fn new(client: BackendClient, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            client,
            reporter,
            exchanges: ExchangeTable::new(),
            guard: None,
        }
    }

    /// Count denied authentications against the client's address and refuse
    /// locked addresses.
    pub fn with_guard(mut self, guard: Arc<BruteforceGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Install this proxy for every action type, every channel and auth.
    pub fn register(self: &Arc<Self>, registry: &mut HookRegistry) {
        registry
            .other_type(self.clone())
            .other_channel(self.clone())
            .auth(self.clone());
    }

    pub fn exchanges(&self) -> &ExchangeTable {
        &self.exchanges
    }

    /// Create the exchange, send the command in the background and return
    /// the access outcome.
    fn start(
        &self,
        ctx: &HookContext,
        action: &Action,
        meta: &Meta,
    ) -> ProxyResult<OutcomeReceiver<Access>> {
        let mut exchange = ActionExchange::new(&meta.id, action);
        let access = exchange
            .take_access()
            .ok_or(ProxyError::OutcomeDropped)?;
        exchange.dispatch();
        if !self.exchanges.insert(exchange, ctx.pass) {
            warn!(action_id = %meta.id, "Action is already being sent to the backend");
            return Err(ProxyError::DuplicateAction(meta.id.clone()));
        }

        self.reporter.report(ReportEvent::BackendSent {
            action_id: meta.id.clone(),
            action_type: action.action_type().to_string(),
        });

        let command = Command::Action {
            action: action.clone(),
            meta: meta.clone(),
            headers: ctx.headers.clone(),
        };
        let client = self.client.clone();
        let mut driver = ExchangeDriver::new(
            &meta.id,
            ctx.pass,
            self.exchanges.clone(),
            self.reporter.clone(),
        );
        tokio::spawn(async move {
            client.send(&command, &mut driver).await;
        });

        Ok(access)
    }

    fn receiver<T>(
        &self,
        id: &str,
        take: impl FnOnce(&mut ActionExchange) -> Option<OutcomeReceiver<T>>,
    ) -> ProxyResult<OutcomeReceiver<T>> {
        self.exchanges
            .with(id, take)
            .flatten()
            .ok_or_else(|| ProxyError::ExchangeNotFound(id.to_string()))
    }
}

#[async_trait]
impl ActionHooks for BackendProxy {
    async fn access(&self, ctx: &HookContext, action: &Action, meta: &Meta) -> HookResult<Access> {
        let receiver = self.start(ctx, action, meta)?;
        let outcome = exchange::wait(receiver).await;
        if !matches!(outcome, Ok(Access::Granted)) {
            // Nothing further will be read from a refused or failed exchange.
            self.exchanges.remove(&meta.id, ctx.pass);
        }
        Ok(outcome?)
    }

    async fn resend(
        &self,
        _ctx: &HookContext,
        _action: &Action,
        meta: &Meta,
    ) -> HookResult<Option<Resend>> {
        let receiver = self.receiver(&meta.id, ActionExchange::take_resend)?;
        Ok(exchange::wait(receiver).await?)
    }

    async fn process(&self, ctx: &HookContext, _action: &Action, meta: &Meta) -> HookResult<()> {
        let receiver = self.receiver(&meta.id, ActionExchange::take_process)?;
        let outcome = exchange::wait(receiver).await;
        self.exchanges.remove(&meta.id, ctx.pass);
        Ok(outcome?)
    }

    /// Discards the exchange this pass started. A pass refused as a
    /// duplicate leaves the live exchange for the same id alone.
    async fn finally(&self, ctx: &HookContext, _action: &Action, meta: &Meta) {
        if self.exchanges.remove(&meta.id, ctx.pass) {
            debug!(action_id = %meta.id, "Discarded backend exchange");
        }
    }
}

#[async_trait]
impl Authenticator for BackendProxy {
    async fn authenticate(&self, request: &AuthRequest) -> HookResult<bool> {
        if let (Some(guard), Some(addr)) = (&self.guard, request.remote_addr) {
            if guard.is_locked(addr) {
                warn!(%addr, user_id = %request.user_id, "Authentication refused for locked address");
                return Err(ProxyError::Bruteforce.into());
            }
        }

        let auth_id = Uuid::new_v4().to_string();
        let command = Command::Auth {
            auth_id: auth_id.clone(),
            user_id: request.user_id.clone(),
            token: request.token.clone(),
            headers: request.headers.clone(),
            cookie: request.cookie.clone(),
        };
        let mut driver = AuthDriver::new(&auth_id);
        self.client.send(&command, &mut driver).await;
        let authenticated = driver.into_outcome()?;

        info!(user_id = %request.user_id, authenticated, "Backend authentication finished");
        self.reporter.report(ReportEvent::Authenticated {
            user_id: request.user_id.clone(),
            authenticated,
        });
        if !authenticated {
            if let (Some(guard), Some(addr)) = (&self.guard, request.remote_addr) {
                guard.record_failure(addr);
            }
        }
        Ok(authenticated)
    }
}
