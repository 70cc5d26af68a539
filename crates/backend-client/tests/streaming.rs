//! BackendClient against a local scripted backend.

use backend_client::{AnswerHandler, BackendClient, BackendConfig, BackendError};
use mock_backend::{answers_for, refused_url, MockBackend, Reply};
use serde_json::json;
use std::time::Duration;
use sync_core::{Action, Answer, Command, Meta};

const ID: &str = "1 10:uuid 0";

#[derive(Default)]
struct Recorder {
    answers: Vec<Answer>,
    errors: Vec<BackendError>,
    ends: usize,
}

impl AnswerHandler for Recorder {
    type Error = BackendError;

    fn filter(&self, answer: &Answer) -> bool {
        answer.correlation_id() == ID
    }

    fn on_answer(&mut self, answer: Answer) -> Result<(), BackendError> {
        self.answers.push(answer);
        Ok(())
    }

    fn on_error(&mut self, error: BackendError) {
        self.errors.push(error);
    }

    fn on_end(&mut self) {
        self.ends += 1;
    }
}

fn action_command() -> Command {
    Command::Action {
        action: Action::new("A"),
        meta: Meta::new(ID, 1),
        headers: Default::default(),
    }
}

async fn send_to(url: String, timeout: Option<Duration>) -> Recorder {
    let mut config = BackendConfig::new(url, "backend-secret");
    config.timeout = timeout;
    let client = BackendClient::new(config).unwrap();
    let mut recorder = Recorder::default();
    client.send(&action_command(), &mut recorder).await;
    recorder
}

#[tokio::test]
async fn test_sends_versioned_body_with_one_command() {
    let backend = MockBackend::answering(&["approved", "processed"]).await.unwrap();
    let recorder = send_to(backend.url(), None).await;

    assert_eq!(recorder.answers.len(), 2);
    assert_eq!(recorder.ends, 1);
    assert!(recorder.errors.is_empty());

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["version"], json!(3));
    assert_eq!(requests[0]["secret"], json!("backend-secret"));
    assert_eq!(
        requests[0]["commands"],
        json!([["action", { "type": "A" }, { "id": ID, "time": 1 }, {}]])
    );
}

#[tokio::test]
async fn test_answers_split_across_delayed_chunks() {
    let backend = MockBackend::start(|_| {
        Reply::chunked([
            "[[\"appro",
            "ved\",\"1 10:uuid 0\"]",
            ",[\"processed\",\"1 10:u",
            "uid 0\"]]",
        ])
        .chunk_delay(Duration::from_millis(20))
    })
    .await
    .unwrap();

    let recorder = send_to(backend.url(), None).await;
    assert_eq!(
        recorder.answers,
        vec![
            Answer::Approved { id: ID.to_string() },
            Answer::Processed { id: ID.to_string() }
        ]
    );
    assert_eq!(recorder.ends, 1);
}

#[tokio::test]
async fn test_foreign_answers_are_ignored() {
    let backend = MockBackend::start(|request| {
        Reply::answers(vec![
            json!(["approved", "other"]),
            json!(["approved", mock_backend::correlation_id(request)]),
        ])
    })
    .await
    .unwrap();

    let recorder = send_to(backend.url(), None).await;
    assert_eq!(recorder.answers, vec![Answer::Approved { id: ID.to_string() }]);
}

#[tokio::test]
async fn test_non_success_status() {
    let backend = MockBackend::start(|_| Reply::status(500)).await.unwrap();
    let recorder = send_to(backend.url(), None).await;
    assert_eq!(recorder.errors, vec![BackendError::HttpStatus(500)]);
    assert_eq!(recorder.ends, 0);
}

#[tokio::test]
async fn test_reported_error_is_delivered_once() {
    let backend = MockBackend::start(|request| {
        let id = mock_backend::correlation_id(request);
        Reply::answers(vec![
            json!(["approved", id]),
            json!(["error", id, "Error: database is down"]),
            json!(["error", id, "Error: again"]),
        ])
    })
    .await
    .unwrap();

    let recorder = send_to(backend.url(), None).await;
    assert_eq!(recorder.answers.len(), 1);
    assert_eq!(
        recorder.errors,
        vec![BackendError::ReportedError("Error: database is down".to_string())]
    );
    assert_eq!(recorder.ends, 0);
}

#[tokio::test]
async fn test_malformed_body() {
    let backend = MockBackend::start(|_| Reply::raw("[[\"approved\",\"1 10:uuid 0\"],{oops"))
        .await
        .unwrap();
    let recorder = send_to(backend.url(), None).await;
    assert_eq!(recorder.answers.len(), 1);
    assert!(matches!(
        recorder.errors.as_slice(),
        [BackendError::MalformedAnswer(_)]
    ));
}

#[tokio::test]
async fn test_empty_array_is_an_empty_answer() {
    let backend = MockBackend::start(|_| Reply::raw("[]")).await.unwrap();
    let recorder = send_to(backend.url(), None).await;
    assert_eq!(recorder.errors, vec![BackendError::EmptyAnswer]);
}

#[tokio::test]
async fn test_unknown_tag() {
    let backend = MockBackend::start(|request| answers_for(request, &["perhaps"]))
        .await
        .unwrap();
    let recorder = send_to(backend.url(), None).await;
    assert_eq!(
        recorder.errors,
        vec![BackendError::UnknownAnswer("perhaps".to_string())]
    );
}

#[tokio::test]
async fn test_connection_refused() {
    let url = refused_url().await.unwrap();
    let recorder = send_to(url, None).await;
    assert!(matches!(
        recorder.errors.as_slice(),
        [BackendError::Network(_)]
    ));
    assert_eq!(recorder.ends, 0);
}

#[tokio::test]
async fn test_body_aborted_midway() {
    let backend = MockBackend::start(|_| {
        Reply::chunked(["[[\"approved\",\"1 10:uuid 0\"]", ",[\"proc"]).broken()
    })
    .await
    .unwrap();
    let recorder = send_to(backend.url(), None).await;
    assert_eq!(recorder.answers.len(), 1);
    assert!(matches!(
        recorder.errors.as_slice(),
        [BackendError::Network(_)]
    ));
    assert_eq!(recorder.ends, 0);
}

#[tokio::test]
async fn test_timeout() {
    let backend = MockBackend::start(|request| {
        answers_for(request, &["approved"]).after(Duration::from_millis(500))
    })
    .await
    .unwrap();
    let recorder = send_to(backend.url(), Some(Duration::from_millis(100))).await;
    assert_eq!(recorder.errors, vec![BackendError::Timeout(100)]);
}
