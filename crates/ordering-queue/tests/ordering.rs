//! Queue plus backend proxy against a scripted local backend.

use backend_client::{BackendClient, BackendConfig};
use backend_proxy::BackendProxy;
use mock_backend::{action_type, answers_for, refused_url, MockBackend};
use ordering_queue::{OrderingQueue, QueueConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use sync_core::{
    Action, ActionLog, CoreResult, HookRegistry, MemoryLog, Meta, RecordingReporter, UNDO_TYPE,
};

struct Pipeline {
    queue: OrderingQueue,
    log: Arc<MemoryLog>,
    reporter: Arc<RecordingReporter>,
    proxy: Arc<BackendProxy>,
}

fn pipeline(url: String, lanes: &[&str]) -> Pipeline {
    pipeline_over(url, lanes, |log| log as Arc<dyn ActionLog>)
}

/// Like `pipeline`, with the queue writing through `wrap(log)`.
fn pipeline_over(
    url: String,
    lanes: &[&str],
    wrap: impl FnOnce(Arc<MemoryLog>) -> Arc<dyn ActionLog>,
) -> Pipeline {
    let reporter = Arc::new(RecordingReporter::new());
    let client = BackendClient::new(BackendConfig::new(url, "secret")).unwrap();
    let proxy = Arc::new(BackendProxy::new(client, reporter.clone()));
    let mut hooks = HookRegistry::new();
    proxy.register(&mut hooks);

    let log = Arc::new(MemoryLog::new("server:test"));
    let queue = OrderingQueue::new(
        QueueConfig {
            lanes: lanes.iter().map(|lane| lane.to_string()).collect(),
            ..Default::default()
        },
        hooks,
        wrap(log.clone()),
        reporter.clone(),
    )
    .unwrap();
    Pipeline {
        queue,
        log,
        reporter,
        proxy,
    }
}

/// Panics when asked to store an action of type `BOOM`.
struct ExplodingLog(Arc<MemoryLog>);

#[async_trait::async_trait]
impl ActionLog for ExplodingLog {
    async fn add(&self, action: Action, meta: Meta) -> CoreResult<Option<Meta>> {
        if action.action_type() == "BOOM" {
            panic!("log storage failed");
        }
        self.0.add(action, meta).await
    }

    async fn each(
        &self,
        visit: &mut (dyn for<'a> FnMut(&'a Action, &'a Meta) -> bool + Send),
    ) -> CoreResult<()> {
        self.0.each(visit).await
    }

    async fn remove_reason(&self, reason: &str) -> CoreResult<usize> {
        self.0.remove_reason(reason).await
    }

    fn generate_id(&self) -> String {
        self.0.generate_id()
    }
}

fn meta(n: u32) -> Meta {
    Meta::new(format!("{} 10:uImkcF4z 0", n), n)
}

/// Answers `approved, processed`, holding back actions whose type contains
/// `slow`.
async fn delaying_backend() -> MockBackend {
    MockBackend::start(|request| {
        let delay = if action_type(request).contains("slow") {
            Duration::from_millis(200)
        } else {
            Duration::ZERO
        };
        answers_for(request, &["approved", "processed"]).after(delay)
    })
    .await
    .unwrap()
}

fn types(log: &MemoryLog) -> Vec<String> {
    log.actions()
        .iter()
        .map(|action| action.action_type().to_string())
        .collect()
}

#[tokio::test]
async fn test_same_lane_commits_in_enqueue_order() {
    let backend = delaying_backend().await;
    let p = pipeline(backend.url(), &["main"]);

    p.queue.enqueue(Action::new("slow/first"), meta(1));
    p.queue.enqueue(Action::new("second"), meta(2));
    p.queue.drain().await;

    assert_eq!(types(&p.log), vec!["slow/first", "second"]);
    assert_eq!(backend.request_count(), 2);
}

#[tokio::test]
async fn test_different_lanes_may_commit_out_of_order() {
    let backend = delaying_backend().await;
    let p = pipeline(backend.url(), &["main", "slow", "fast"]);

    p.queue.enqueue(Action::new("slow/first"), meta(1));
    p.queue.enqueue(Action::new("fast/second"), meta(2));
    p.queue.drain().await;

    assert_eq!(types(&p.log), vec!["fast/second", "slow/first"]);
}

#[tokio::test]
async fn test_slow_backend_answer_holds_only_its_own_lane() {
    let backend = delaying_backend().await;
    let p = pipeline(backend.url(), &["main", "users", "posts"]);

    p.queue.enqueue(Action::new("users/slow"), meta(1));
    p.queue.enqueue(Action::new("users/quick"), meta(2));
    p.queue.enqueue(Action::new("posts/quick"), meta(3));
    p.queue.drain().await;

    // `users/quick` is answered at once but still commits after the slow
    // answer ahead of it in the same lane.
    assert_eq!(types(&p.log), vec!["posts/quick", "users/slow", "users/quick"]);
    let last_sent = &backend.commands()[2];
    assert_eq!(last_sent[1], json!({ "type": "users/quick" }));
}

#[tokio::test]
async fn test_reused_id_on_another_lane_keeps_the_original() {
    let backend = delaying_backend().await;
    let p = pipeline(backend.url(), &["main", "slow", "fast"]);

    p.queue.enqueue(Action::new("slow/a"), meta(1));
    tokio::time::sleep(Duration::from_millis(20)).await;
    p.queue.enqueue(Action::new("fast/a"), meta(1));
    p.queue.drain().await;

    assert_eq!(types(&p.log), vec!["slow/a"]);
    assert_eq!(
        p.reporter.names(),
        vec!["backendSent", "backendGranted", "backendProcessed"]
    );
    assert!(p.proxy.exchanges().is_empty());
}

#[tokio::test]
async fn test_panicking_log_still_discards_the_exchange() {
    let backend = MockBackend::answering(&["approved", "processed"])
        .await
        .unwrap();
    let p = pipeline_over(backend.url(), &["main"], |log| {
        Arc::new(ExplodingLog(log)) as Arc<dyn ActionLog>
    });

    p.queue.enqueue(Action::new("BOOM"), meta(1));
    p.queue.enqueue(Action::new("A"), meta(2));
    p.queue.drain().await;

    assert!(p.proxy.exchanges().is_empty());
    assert_eq!(types(&p.log), vec![UNDO_TYPE, "A"]);
    assert_eq!(p.log.actions()[0].get("reason"), Some(&json!("error")));
}

#[tokio::test]
async fn test_approved_action_is_committed() {
    let backend = MockBackend::answering(&["approved", "processed"])
        .await
        .unwrap();
    let p = pipeline(backend.url(), &["main"]);

    p.queue.enqueue(Action::new("A"), meta(1));
    p.queue.drain().await;

    assert_eq!(p.log.actions(), vec![Action::new("A")]);
    assert_eq!(
        p.reporter.names(),
        vec!["backendSent", "backendGranted", "backendProcessed"]
    );
}

#[tokio::test]
async fn test_forbidden_action_is_undone() {
    let backend = MockBackend::answering(&["forbidden"]).await.unwrap();
    let p = pipeline(backend.url(), &["main"]);

    p.queue.enqueue(Action::new("BAD"), meta(1));
    p.queue.drain().await;

    let entries = p.log.entries();
    assert_eq!(entries.len(), 1);
    let (undo, undo_meta) = &entries[0];
    assert_eq!(
        undo.to_value(),
        json!({
            "type": UNDO_TYPE,
            "id": "1 10:uImkcF4z 0",
            "reason": "denied",
            "action": { "type": "BAD" }
        })
    );
    assert_eq!(undo_meta.clients, Some(vec!["10:uImkcF4z".to_string()]));
    assert_eq!(p.reporter.names(), vec!["backendSent", "denied"]);
}

#[tokio::test]
async fn test_refused_backend_writes_one_error_undo() {
    let p = pipeline(refused_url().await.unwrap(), &["main"]);

    p.queue.enqueue(Action::new("A"), meta(1));
    p.queue.drain().await;

    let actions = p.log.actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action_type(), UNDO_TYPE);
    assert_eq!(actions[0].get("id"), Some(&json!("1 10:uImkcF4z 0")));
    assert_eq!(actions[0].get("reason"), Some(&json!("error")));
    assert!(actions[0].get("errorMessage").is_none());
    assert_eq!(p.reporter.names(), vec!["backendSent", "error"]);
}

#[tokio::test]
async fn test_unknown_action_gets_unknown_type_undo() {
    let backend = MockBackend::answering(&["unknownAction"]).await.unwrap();
    let p = pipeline(backend.url(), &["main"]);

    p.queue.enqueue(Action::new("NOPE"), meta(1));
    p.queue.drain().await;

    let actions = p.log.actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].get("reason"), Some(&json!("unknownType")));
    assert_eq!(p.reporter.names(), vec!["backendSent", "unknownType"]);
}

#[tokio::test]
async fn test_resend_is_stored_with_the_action() {
    let backend = MockBackend::start(|request| {
        let id = mock_backend::correlation_id(request);
        mock_backend::Reply::answers(vec![
            json!(["resend", id, { "channel": "users/10" }]),
            json!(["approved", id]),
            json!(["processed", id]),
        ])
    })
    .await
    .unwrap();
    let p = pipeline(backend.url(), &["main"]);

    p.queue.enqueue(Action::new("users/rename"), meta(1));
    p.queue.drain().await;

    let (_, stored) = &p.log.entries()[0];
    assert_eq!(stored.channels, Some(vec!["users/10".to_string()]));
    let sent: &Value = &backend.commands()[0];
    assert_eq!(sent[1], json!({ "type": "users/rename" }));
}
