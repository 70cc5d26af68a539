//! One POST per command, answers delivered as they stream in.

use crate::{BackendError, BackendResult};
use answer_stream_parser::AnswerStreamParser;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use sync_core::{Answer, Command, CoreError};
use tracing::{debug, trace, warn};

/// Protocol version sent with every request.
pub const BACKEND_PROTOCOL_VERSION: u32 = 3;

/// Backend connection settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Full URL the commands are POSTed to.
    pub url: String,
    /// Shared secret sent in every request body.
    pub secret: String,
    /// Limit for the whole round-trip, body included. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: secret.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Event contract for one [`BackendClient::send`] call.
///
/// For every send, either `on_end` is called once, or `on_error` is called
/// once. Never both, never more than once.
pub trait AnswerHandler: Send {
    type Error: From<BackendError> + Send;

    /// Whether `answer` belongs to the command being sent.
    fn filter(&self, answer: &Answer) -> bool;

    /// Handle an accepted answer. An error here ends delivery.
    ///
    /// `error` answers never reach this method; they arrive as
    /// [`BackendError::ReportedError`] through `on_error`.
    fn on_answer(&mut self, answer: Answer) -> Result<(), Self::Error>;

    fn on_error(&mut self, error: Self::Error);

    /// The body ended after at least one accepted answer and no error.
    fn on_end(&mut self);
}

#[derive(Serialize)]
struct BackendRequest<'a> {
    version: u32,
    secret: &'a str,
    commands: [&'a Command; 1],
}

/// Enforces the single-error rule and counts accepted answers.
struct Delivery<'a, H: AnswerHandler> {
    handler: &'a mut H,
    failed: bool,
    accepted: usize,
}

impl<'a, H: AnswerHandler> Delivery<'a, H> {
    fn new(handler: &'a mut H) -> Self {
        Self {
            handler,
            failed: false,
            accepted: 0,
        }
    }

    fn fail(&mut self, error: H::Error) {
        if self.failed {
            return;
        }
        self.failed = true;
        self.handler.on_error(error);
    }

    fn element(&mut self, value: Value) {
        if self.failed {
            return;
        }
        let answer = match Answer::from_value(&value) {
            Ok(answer) => answer,
            Err(CoreError::UnknownAnswer(tag)) => {
                self.fail(BackendError::UnknownAnswer(tag).into());
                return;
            }
            Err(e) => {
                self.fail(BackendError::UnknownAnswer(e.to_string()).into());
                return;
            }
        };
        if !self.handler.filter(&answer) {
            trace!(tag = answer.tag(), id = answer.correlation_id(), "Ignoring foreign answer");
            return;
        }
        self.accepted += 1;
        match answer {
            Answer::Error { stack, .. } => self.fail(BackendError::ReportedError(stack).into()),
            answer => {
                if let Err(e) = self.handler.on_answer(answer) {
                    self.fail(e);
                }
            }
        }
    }

    fn finish(mut self) {
        if self.failed {
            return;
        }
        if self.accepted == 0 {
            self.fail(BackendError::EmptyAnswer.into());
        } else {
            self.handler.on_end();
        }
    }
}

/// Client for the backend HTTP protocol.
#[derive(Debug, Clone)]
pub struct BackendClient {
    config: BackendConfig,
    client: Client,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| BackendError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Send `command` and feed the streamed answers to `handler`.
    ///
    /// All outcomes, failures included, are reported through the handler.
    pub async fn send<H: AnswerHandler>(&self, command: &Command, handler: &mut H) {
        debug!(
            url = %self.config.url,
            kind = command.kind(),
            id = command.correlation_id(),
            "Sending backend command"
        );
        let mut delivery = Delivery::new(handler);
        if let Err(e) = self.stream_answers(command, &mut delivery).await {
            warn!(id = command.correlation_id(), error = %e, "Backend request failed");
            delivery.fail(e.into());
        }
        delivery.finish();
    }

    async fn stream_answers<H: AnswerHandler>(
        &self,
        command: &Command,
        delivery: &mut Delivery<'_, H>,
    ) -> BackendResult<()> {
        let request = BackendRequest {
            version: BACKEND_PROTOCOL_VERSION,
            secret: &self.config.secret,
            commands: [command],
        };

        let response = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::HttpStatus(status.as_u16()));
        }

        let mut parser = AnswerStreamParser::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| self.transport_error(e))?;
            if delivery.failed {
                continue;
            }
            let mut elements = Vec::new();
            let parsed = parser.feed(&chunk, |value| elements.push(value));
            for value in elements {
                delivery.element(value);
            }
            if let Err(e) = parsed {
                delivery.fail(BackendError::MalformedAnswer(e.to_string()).into());
            }
        }
        Ok(())
    }

    fn transport_error(&self, error: reqwest::Error) -> BackendError {
        match self.config.timeout {
            Some(timeout) if error.is_timeout() => BackendError::Timeout(timeout.as_millis() as u64),
            _ => BackendError::Network(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_core::{Action, Meta};

    #[derive(Default)]
    struct Recorder {
        id: String,
        answers: Vec<&'static str>,
        errors: Vec<BackendError>,
        ends: usize,
    }

    impl AnswerHandler for Recorder {
        type Error = BackendError;

        fn filter(&self, answer: &Answer) -> bool {
            answer.correlation_id() == self.id
        }

        fn on_answer(&mut self, answer: Answer) -> Result<(), BackendError> {
            self.answers.push(answer.tag());
            Ok(())
        }

        fn on_error(&mut self, error: BackendError) {
            self.errors.push(error);
        }

        fn on_end(&mut self) {
            self.ends += 1;
        }
    }

    fn recorder() -> Recorder {
        Recorder {
            id: "1 10:a 0".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_request_body_shape() {
        let command = Command::Action {
            action: Action::new("A"),
            meta: Meta::new("1 10:a 0", 1),
            headers: Default::default(),
        };
        let body = serde_json::to_value(BackendRequest {
            version: BACKEND_PROTOCOL_VERSION,
            secret: "s",
            commands: [&command],
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "version": 3,
                "secret": "s",
                "commands": [["action", { "type": "A" }, { "id": "1 10:a 0", "time": 1 }, {}]]
            })
        );
    }

    #[test]
    fn test_delivery_filters_and_ends() {
        let mut handler = recorder();
        let mut delivery = Delivery::new(&mut handler);
        delivery.element(json!(["approved", "other"]));
        delivery.element(json!(["approved", "1 10:a 0"]));
        delivery.element(json!(["processed", "1 10:a 0"]));
        delivery.finish();

        assert_eq!(handler.answers, vec!["approved", "processed"]);
        assert!(handler.errors.is_empty());
        assert_eq!(handler.ends, 1);
    }

    #[test]
    fn test_delivery_reports_only_the_first_error() {
        let mut handler = recorder();
        let mut delivery = Delivery::new(&mut handler);
        delivery.element(json!(["error", "1 10:a 0", "Error: first"]));
        delivery.element(json!(["strange", "1 10:a 0"]));
        delivery.element(json!(["processed", "1 10:a 0"]));
        delivery.finish();

        assert_eq!(
            handler.errors,
            vec![BackendError::ReportedError("Error: first".to_string())]
        );
        assert!(handler.answers.is_empty());
        assert_eq!(handler.ends, 0);
    }

    #[test]
    fn test_delivery_unknown_tag() {
        let mut handler = recorder();
        let mut delivery = Delivery::new(&mut handler);
        delivery.element(json!(["maybe", "1 10:a 0"]));
        delivery.finish();
        assert_eq!(
            handler.errors,
            vec![BackendError::UnknownAnswer("maybe".to_string())]
        );
    }

    #[test]
    fn test_delivery_without_accepted_answers_is_empty() {
        let mut handler = recorder();
        let mut delivery = Delivery::new(&mut handler);
        delivery.element(json!(["approved", "other"]));
        delivery.finish();
        assert_eq!(handler.errors, vec![BackendError::EmptyAnswer]);
        assert_eq!(handler.ends, 0);
    }
}
