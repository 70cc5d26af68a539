//! Per-action backend exchange.
//!
//! ## State Diagram
//!
//! ```text
//! ┌──────┐ Dispatch ┌───────────────┐ Approve ┌──────────┐ Process ┌───────────┐
//! │ Sent │ ───────► │ AccessPending │ ──────► │ Approved │ ──────► │ Processed │
//! └──────┘          └───────┬───────┘         └────┬─────┘         └───────────┘
//!                     │ ▲   │ Forbid                │ Fail
//!              Resend └─┘   ├──────► Forbidden       ▼
//!                           ├──────► UnknownAction  Errored
//!                           ├──────► UnknownChannel
//!                           └──────► Errored (Fail)
//! ```
//!
//! Each exchange owns three outcome cells that settle at most once:
//! access, resend and process. Answers advance the machine; an answer the
//! machine cannot consume fails the exchange.

use crate::{ProxyError, ProxyResult};
use rust_fsm::*;
use std::time::Instant;
use sync_core::{Access, Action, Answer, CoreError, ReportEvent, Reporter, Resend, UnknownKind};
use tokio::sync::oneshot;
use tracing::{debug, trace};

state_machine! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub exchange_machine(Sent)

    Sent => {
        Dispatch => AccessPending,
        Fail => Errored
    },
    AccessPending => {
        Resend => AccessPending,
        Approve => Approved,
        Forbid => Forbidden,
        RejectUnknownAction => UnknownAction,
        RejectUnknownChannel => UnknownChannel,
        Fail => Errored
    },
    Approved => {
        Process => Processed,
        Fail => Errored
    }
}

pub use exchange_machine::Input as ExchangeInput;
pub use exchange_machine::State as ExchangeState;
pub use exchange_machine::StateMachine as ExchangeMachine;

pub type Outcome<T> = ProxyResult<T>;
pub type OutcomeReceiver<T> = oneshot::Receiver<Outcome<T>>;

/// A result that settles at most once and is read by at most one waiter.
pub(crate) struct OutcomeCell<T> {
    sender: Option<oneshot::Sender<Outcome<T>>>,
    receiver: Option<OutcomeReceiver<T>>,
}

impl<T> OutcomeCell<T> {
    fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            sender: Some(sender),
            receiver: Some(receiver),
        }
    }

    /// Returns `false` when the cell had already settled.
    fn settle(&mut self, outcome: Outcome<T>) -> bool {
        match self.sender.take() {
            Some(sender) => {
                // The waiter may be gone; the outcome is still final.
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    fn take_receiver(&mut self) -> Option<OutcomeReceiver<T>> {
        self.receiver.take()
    }
}

/// Await an outcome, treating a dropped cell as [`ProxyError::OutcomeDropped`].
pub async fn wait<T>(receiver: OutcomeReceiver<T>) -> Outcome<T> {
    receiver.await.unwrap_or(Err(ProxyError::OutcomeDropped))
}

/// Bookkeeping for one action sent to the backend, keyed by `meta.id`.
pub struct ActionExchange {
    id: String,
    /// Action type, or channel name for subscriptions. Used in reports.
    label: String,
    subscription: bool,
    machine: ExchangeMachine,
    sent_at: Instant,
    pending_resend: Option<Resend>,
    access: OutcomeCell<Access>,
    resend: OutcomeCell<Option<Resend>>,
    process: OutcomeCell<()>,
}

impl ActionExchange {
    pub fn new(id: &str, action: &Action) -> Self {
        let subscription = action.is_subscription();
        let label = if subscription {
            action.channel().unwrap_or_default().to_string()
        } else {
            action.action_type().to_string()
        };
        Self {
            id: id.to_string(),
            label,
            subscription,
            machine: ExchangeMachine::new(),
            sent_at: Instant::now(),
            pending_resend: None,
            access: OutcomeCell::new(),
            resend: OutcomeCell::new(),
            process: OutcomeCell::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ExchangeState {
        *self.machine.state()
    }

    pub fn is_subscription(&self) -> bool {
        self.subscription
    }

    /// Whether the backend declared the action type or channel unknown.
    pub fn is_unknown(&self) -> bool {
        matches!(
            self.state(),
            ExchangeState::UnknownAction | ExchangeState::UnknownChannel
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state(),
            ExchangeState::Processed
                | ExchangeState::Forbidden
                | ExchangeState::UnknownAction
                | ExchangeState::UnknownChannel
                | ExchangeState::Errored
        )
    }

    /// Mark the command as sent.
    pub fn dispatch(&mut self) {
        self.sent_at = Instant::now();
        if self.machine.consume(&ExchangeInput::Dispatch).is_err() {
            debug!(action_id = %self.id, state = ?self.state(), "Exchange dispatched twice");
        }
    }

    pub fn take_access(&mut self) -> Option<OutcomeReceiver<Access>> {
        self.access.take_receiver()
    }

    pub fn take_resend(&mut self) -> Option<OutcomeReceiver<Option<Resend>>> {
        self.resend.take_receiver()
    }

    pub fn take_process(&mut self) -> Option<OutcomeReceiver<()>> {
        self.process.take_receiver()
    }

    /// Advance the exchange with one answer.
    ///
    /// Events are reported before the outcome they belong to settles. An
    /// error means the answer violated the protocol; the caller fails the
    /// exchange with it.
    pub fn apply(&mut self, answer: Answer, reporter: &dyn Reporter) -> ProxyResult<()> {
        trace!(action_id = %self.id, tag = answer.tag(), state = ?self.state(), "Applying answer");
        match answer {
            Answer::Resend { resend, .. } => {
                if self.subscription {
                    return Err(ProxyError::ResendOnSubscription);
                }
                if self.state() != ExchangeState::AccessPending {
                    return Err(ProxyError::ResendAfterAccess);
                }
                let resend = Resend::from_value(&resend).map_err(|e| match e {
                    CoreError::InvalidResend(message) => ProxyError::InvalidResendData(message),
                    other => ProxyError::InvalidResendData(other.to_string()),
                })?;
                self.consume(ExchangeInput::Resend, "resend")?;
                self.pending_resend = Some(resend);
            }
            Answer::Approved { .. } => {
                self.consume(ExchangeInput::Approve, "approved")?;
                reporter.report(ReportEvent::BackendGranted {
                    action_id: self.id.clone(),
                    latency_ms: self.latency_ms(),
                });
                self.resend.settle(Ok(self.pending_resend.take()));
                self.access.settle(Ok(Access::Granted));
            }
            Answer::Forbidden { .. } => {
                self.consume(ExchangeInput::Forbid, "forbidden")?;
                self.resend.settle(Ok(None));
                self.access.settle(Ok(Access::Denied));
            }
            Answer::Processed { .. } => {
                if self.state() == ExchangeState::AccessPending {
                    return Err(ProxyError::ProcessedBeforeAccess);
                }
                self.consume(ExchangeInput::Process, "processed")?;
                reporter.report(ReportEvent::BackendProcessed {
                    action_id: self.id.clone(),
                    latency_ms: self.latency_ms(),
                });
                self.process.settle(Ok(()));
            }
            Answer::UnknownAction { .. } => {
                self.consume(ExchangeInput::RejectUnknownAction, "unknownAction")?;
                reporter.report(ReportEvent::UnknownType {
                    action_id: self.id.clone(),
                    action_type: self.label.clone(),
                });
                self.resend.settle(Ok(None));
                self.access.settle(Ok(Access::Unknown(UnknownKind::Type)));
            }
            Answer::UnknownChannel { .. } => {
                self.consume(ExchangeInput::RejectUnknownChannel, "unknownChannel")?;
                reporter.report(ReportEvent::WrongChannel {
                    action_id: self.id.clone(),
                    channel: self.label.clone(),
                });
                self.resend.settle(Ok(None));
                self.access.settle(Ok(Access::Unknown(UnknownKind::Channel)));
            }
            other => {
                return Err(
                    backend_client::BackendError::UnknownAnswer(other.tag().to_string()).into(),
                )
            }
        }
        Ok(())
    }

    /// Reject whichever outcome is still pending.
    ///
    /// Before access is decided the failure rejects access (and resend);
    /// afterwards it rejects processing.
    pub fn fail(&mut self, error: ProxyError) {
        match self.state() {
            ExchangeState::Sent | ExchangeState::AccessPending => {
                let _ = self.machine.consume(&ExchangeInput::Fail);
                self.resend.settle(Err(error.clone()));
                self.access.settle(Err(error));
            }
            ExchangeState::Approved => {
                let _ = self.machine.consume(&ExchangeInput::Fail);
                self.process.settle(Err(error));
            }
            state => {
                debug!(action_id = %self.id, ?state, error = %error, "Ignoring error for finished exchange");
            }
        }
    }

    /// The answer stream ended without an error.
    pub fn end(&mut self) {
        if !self.is_finished() {
            self.fail(ProxyError::IncompleteAnswer);
        }
    }

    fn consume(&mut self, input: ExchangeInput, tag: &str) -> ProxyResult<()> {
        self.machine
            .consume(&input)
            .map(|_| ())
            .map_err(|_| ProxyError::UnexpectedAnswer(tag.to_string()))
    }

    fn latency_ms(&self) -> u64 {
        self.sent_at.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_core::{RecordingReporter, SUBSCRIBE_TYPE};

    const ID: &str = "1 10:a 0";

    fn answer(tag: &str) -> Answer {
        Answer::from_value(&json!([tag, ID])).unwrap()
    }

    fn resend(payload: serde_json::Value) -> Answer {
        Answer::from_value(&json!(["resend", ID, payload])).unwrap()
    }

    fn dispatched(action: Action) -> ActionExchange {
        let mut exchange = ActionExchange::new(ID, &action);
        exchange.dispatch();
        exchange
    }

    fn settled<T>(receiver: &mut OutcomeReceiver<T>) -> Option<Outcome<T>> {
        receiver.try_recv().ok()
    }

    #[test]
    fn test_initial_state_is_sent() {
        let exchange = ActionExchange::new(ID, &Action::new("A"));
        assert_eq!(exchange.state(), ExchangeState::Sent);
    }

    #[test]
    fn test_approved_then_processed() {
        let reporter = RecordingReporter::new();
        let mut exchange = dispatched(Action::new("A"));
        let mut access = exchange.take_access().unwrap();
        let mut resend = exchange.take_resend().unwrap();
        let mut process = exchange.take_process().unwrap();

        exchange.apply(answer("approved"), &reporter).unwrap();
        assert_eq!(settled(&mut access), Some(Ok(Access::Granted)));
        assert_eq!(settled(&mut resend), Some(Ok(None)));
        assert_eq!(settled(&mut process), None);

        exchange.apply(answer("processed"), &reporter).unwrap();
        assert_eq!(settled(&mut process), Some(Ok(())));
        assert_eq!(exchange.state(), ExchangeState::Processed);
        assert!(exchange.is_finished());
        assert_eq!(reporter.names(), vec!["backendGranted", "backendProcessed"]);
    }

    #[test]
    fn test_forbidden_leaves_process_unsettled() {
        let reporter = RecordingReporter::new();
        let mut exchange = dispatched(Action::new("BAD"));
        let mut access = exchange.take_access().unwrap();
        let mut process = exchange.take_process().unwrap();

        exchange.apply(answer("forbidden"), &reporter).unwrap();
        assert_eq!(settled(&mut access), Some(Ok(Access::Denied)));
        assert_eq!(settled(&mut process), None);

        exchange.end();
        assert_eq!(exchange.state(), ExchangeState::Forbidden);
        assert_eq!(settled(&mut process), None);
        assert!(reporter.events().is_empty());
    }

    #[test]
    fn test_resend_is_delivered_on_approval() {
        let reporter = RecordingReporter::new();
        let mut exchange = dispatched(Action::new("A"));
        let mut pending = exchange.take_resend().unwrap();
        exchange
            .apply(
                resend(json!({ "channel": "users/1", "users": ["10"], "other": 1 })),
                &reporter,
            )
            .unwrap();
        assert_eq!(exchange.state(), ExchangeState::AccessPending);
        assert_eq!(settled(&mut pending), None);

        exchange.apply(answer("approved"), &reporter).unwrap();
        let expected = Resend {
            channels: vec!["users/1".to_string()],
            users: vec!["10".to_string()],
            ..Default::default()
        };
        assert_eq!(settled(&mut pending), Some(Ok(Some(expected))));
    }

    #[test]
    fn test_invalid_resend_data() {
        let reporter = RecordingReporter::new();
        let mut exchange = dispatched(Action::new("A"));
        assert!(matches!(
            exchange.apply(resend(json!({ "channels": [1] })), &reporter),
            Err(ProxyError::InvalidResendData(_))
        ));
        assert!(matches!(
            exchange.apply(resend(json!("users/1")), &reporter),
            Err(ProxyError::InvalidResendData(_))
        ));
    }

    #[test]
    fn test_processed_before_approved() {
        let reporter = RecordingReporter::new();
        let mut exchange = dispatched(Action::new("A"));
        let mut access = exchange.take_access().unwrap();
        let error = exchange.apply(answer("processed"), &reporter).unwrap_err();
        assert_eq!(error, ProxyError::ProcessedBeforeAccess);

        exchange.fail(error);
        assert_eq!(
            settled(&mut access),
            Some(Err(ProxyError::ProcessedBeforeAccess))
        );
        assert_eq!(exchange.state(), ExchangeState::Errored);
    }

    #[test]
    fn test_resend_after_approved_fails_processing() {
        let reporter = RecordingReporter::new();
        let mut exchange = dispatched(Action::new("A"));
        let mut access = exchange.take_access().unwrap();
        let mut process = exchange.take_process().unwrap();
        exchange.apply(answer("approved"), &reporter).unwrap();

        let error = exchange.apply(resend(json!({})), &reporter).unwrap_err();
        assert_eq!(error, ProxyError::ResendAfterAccess);
        exchange.fail(error);

        assert_eq!(settled(&mut access), Some(Ok(Access::Granted)));
        assert_eq!(settled(&mut process), Some(Err(ProxyError::ResendAfterAccess)));
    }

    #[test]
    fn test_resend_on_subscription() {
        let reporter = RecordingReporter::new();
        let mut exchange = dispatched(Action::new(SUBSCRIBE_TYPE).with("channel", "users/1"));
        assert!(exchange.is_subscription());
        assert_eq!(
            exchange.apply(resend(json!({ "channel": "x" })), &reporter),
            Err(ProxyError::ResendOnSubscription)
        );
    }

    #[test]
    fn test_unknown_action_and_channel() {
        let reporter = RecordingReporter::new();
        let mut exchange = dispatched(Action::new("A"));
        let mut access = exchange.take_access().unwrap();
        exchange.apply(answer("unknownAction"), &reporter).unwrap();
        assert_eq!(
            settled(&mut access),
            Some(Ok(Access::Unknown(UnknownKind::Type)))
        );
        assert!(exchange.is_unknown());

        let mut exchange = dispatched(Action::new(SUBSCRIBE_TYPE).with("channel", "users/1"));
        exchange.apply(answer("unknownChannel"), &reporter).unwrap();
        assert_eq!(
            reporter.events(),
            vec![
                ReportEvent::UnknownType {
                    action_id: ID.to_string(),
                    action_type: "A".to_string()
                },
                ReportEvent::WrongChannel {
                    action_id: ID.to_string(),
                    channel: "users/1".to_string()
                }
            ]
        );
    }

    #[test]
    fn test_error_before_access_rejects_access() {
        let mut exchange = dispatched(Action::new("A"));
        let mut access = exchange.take_access().unwrap();
        let mut process = exchange.take_process().unwrap();
        exchange.fail(ProxyError::Backend(backend_client::BackendError::HttpStatus(500)));
        assert!(matches!(settled(&mut access), Some(Err(ProxyError::Backend(_)))));
        assert_eq!(settled(&mut process), None);
    }

    #[test]
    fn test_end_without_processed_is_incomplete() {
        let reporter = RecordingReporter::new();
        let mut exchange = dispatched(Action::new("A"));
        let mut process = exchange.take_process().unwrap();
        exchange.apply(answer("approved"), &reporter).unwrap();
        exchange.end();
        assert_eq!(settled(&mut process), Some(Err(ProxyError::IncompleteAnswer)));
    }

    #[test]
    fn test_duplicate_approved_is_unexpected() {
        let reporter = RecordingReporter::new();
        let mut exchange = dispatched(Action::new("A"));
        exchange.apply(answer("approved"), &reporter).unwrap();
        assert_eq!(
            exchange.apply(answer("approved"), &reporter),
            Err(ProxyError::UnexpectedAnswer("approved".to_string()))
        );
    }

    #[test]
    fn test_auth_answer_is_unknown_for_actions() {
        let reporter = RecordingReporter::new();
        let mut exchange = dispatched(Action::new("A"));
        assert!(matches!(
            exchange.apply(answer("authenticated"), &reporter),
            Err(ProxyError::Backend(backend_client::BackendError::UnknownAnswer(_)))
        ));
    }
}
