//! Live exchanges keyed by action id, plus the answer handler that drives them.

use crate::exchange::ActionExchange;
use crate::{ProxyError, ProxyResult};
use backend_client::AnswerHandler;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sync_core::{Answer, Reporter};
use tracing::{debug, warn};

/// Exchanges in flight. Each exchange is only touched through its own id,
/// and only the hook pass that inserted it may remove it.
#[derive(Clone, Default)]
pub struct ExchangeTable {
    inner: Arc<Mutex<HashMap<String, Owned>>>,
}

struct Owned {
    pass: u64,
    exchange: ActionExchange,
}

impl ExchangeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an exchange owned by hook pass `pass`. Returns `false` if one
    /// with the same id is live.
    pub fn insert(&self, exchange: ActionExchange, pass: u64) -> bool {
        let mut exchanges = self.lock();
        if exchanges.contains_key(exchange.id()) {
            return false;
        }
        exchanges.insert(exchange.id().to_string(), Owned { pass, exchange });
        true
    }

    /// Run `f` on the exchange for `id`, if it is live.
    pub fn with<R>(&self, id: &str, f: impl FnOnce(&mut ActionExchange) -> R) -> Option<R> {
        self.lock().get_mut(id).map(|owned| f(&mut owned.exchange))
    }

    /// Remove the exchange for `id` if hook pass `pass` inserted it.
    pub fn remove(&self, id: &str, pass: u64) -> bool {
        let mut exchanges = self.lock();
        let owned = exchanges.get(id).is_some_and(|owned| owned.pass == pass);
        if owned {
            exchanges.remove(id);
        }
        owned
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Owned>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Feeds one backend answer stream into the exchange with the same id.
pub(crate) struct ExchangeDriver {
    id: String,
    pass: u64,
    table: ExchangeTable,
    reporter: Arc<dyn Reporter>,
}

impl ExchangeDriver {
    pub(crate) fn new(
        id: &str,
        pass: u64,
        table: ExchangeTable,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            id: id.to_string(),
            pass,
            table,
            reporter,
        }
    }
}

impl AnswerHandler for ExchangeDriver {
    type Error = ProxyError;

    fn filter(&self, answer: &Answer) -> bool {
        answer.correlation_id() == self.id
    }

    fn on_answer(&mut self, answer: Answer) -> ProxyResult<()> {
        let reporter = self.reporter.as_ref();
        let unknown = self
            .table
            .with(&self.id, |exchange| {
                exchange
                    .apply(answer, reporter)
                    .map(|()| exchange.is_unknown())
            })
            .ok_or_else(|| ProxyError::ExchangeNotFound(self.id.clone()))??;

        if unknown {
            // Nothing else will be asked of an undeclared type or channel.
            self.table.remove(&self.id, self.pass);
        }
        Ok(())
    }

    fn on_error(&mut self, error: ProxyError) {
        warn!(action_id = %self.id, error = %error, "Backend exchange failed");
        if self
            .table
            .with(&self.id, |exchange| exchange.fail(error))
            .is_none()
        {
            debug!(action_id = %self.id, "Exchange already discarded");
        }
    }

    fn on_end(&mut self) {
        self.table.with(&self.id, ActionExchange::end);
    }
}
