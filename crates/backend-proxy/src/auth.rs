//! Authentication round-trip: `authenticated` or `denied`, nothing else.

use crate::{ProxyError, ProxyResult};
use backend_client::{AnswerHandler, BackendError};
use sync_core::Answer;

pub(crate) struct AuthDriver {
    auth_id: String,
    outcome: Option<ProxyResult<bool>>,
}

impl AuthDriver {
    pub(crate) fn new(auth_id: &str) -> Self {
        Self {
            auth_id: auth_id.to_string(),
            outcome: None,
        }
    }

    pub(crate) fn into_outcome(self) -> ProxyResult<bool> {
        self.outcome.unwrap_or(Err(ProxyError::IncompleteAnswer))
    }
}

impl AnswerHandler for AuthDriver {
    type Error = ProxyError;

    fn filter(&self, answer: &Answer) -> bool {
        answer.correlation_id() == self.auth_id
    }

    fn on_answer(&mut self, answer: Answer) -> ProxyResult<()> {
        let authenticated = match answer {
            Answer::Authenticated { .. } => true,
            Answer::Denied { .. } => false,
            other => return Err(BackendError::UnknownAnswer(other.tag().to_string()).into()),
        };
        if self.outcome.is_some() {
            return Err(ProxyError::UnexpectedAnswer(
                if authenticated { "authenticated" } else { "denied" }.to_string(),
            ));
        }
        self.outcome = Some(Ok(authenticated));
        Ok(())
    }

    fn on_error(&mut self, error: ProxyError) {
        self.outcome = Some(Err(error));
    }

    fn on_end(&mut self) {}
}
