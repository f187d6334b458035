use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use finding_notifier::{
    DeliveryPolicy, DispatchOutcome, Dispatcher, Event, FailureReason, NotifierConfig, Transport,
    TransportError, TransportResponse, VULNERABILITY,
};
use serde_json::Value;
use tokio::time::Instant;
use url::Url;

/// Records every POST and answers from a script, then with 200.
#[derive(Default)]
struct RecordingTransport {
    script: Mutex<VecDeque<TransportResponse>>,
    posts: Mutex<Vec<(Instant, String, Value)>>,
}

impl RecordingTransport {
    fn scripted(responses: Vec<TransportResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.into()),
            posts: Mutex::new(Vec::new()),
        })
    }

    fn posts(&self) -> Vec<(Instant, String, Value)> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn post(&self, url: &Url, body: &Value) -> Result<TransportResponse, TransportError> {
        self.posts
            .lock()
            .unwrap()
            .push((Instant::now(), url.to_string(), body.clone()));
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| TransportResponse::new(200, "")))
    }
}

fn config() -> NotifierConfig {
    NotifierConfig::default()
        .with_webhook("critical", "https://x/1")
        .with_min_severity("LOW")
}

#[tokio::test(start_paused = true)]
async fn rate_limit_sleeps_exactly_the_hint_between_posts() {
    let transport = RecordingTransport::scripted(vec![TransportResponse::new(
        429,
        r#"{"retry_after": 5}"#,
    )]);
    let dispatcher = Dispatcher::setup_with_transport(config(), transport.clone()).unwrap();

    let event = Event::new(VULNERABILITY, "rce").with_severity("critical");
    assert_eq!(
        dispatcher.handle(&event).await,
        DispatchOutcome::Delivered { attempts: 2 }
    );

    let posts = transport.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[1].0 - posts[0].0, Duration::from_secs(5));
    assert_eq!(posts[0].1, "https://x/1");
    assert_eq!(posts[0].2, posts[1].2);
}

#[tokio::test(start_paused = true)]
async fn unparsable_failure_body_waits_default() {
    let transport = RecordingTransport::scripted(vec![TransportResponse::new(
        500,
        "<html>internal error</html>",
    )]);
    let dispatcher = Dispatcher::setup_with_transport(config(), transport.clone()).unwrap();

    let event = Event::new(VULNERABILITY, "rce").with_severity("critical");
    assert!(dispatcher.handle(&event).await.is_delivered());

    let posts = transport.posts();
    assert_eq!(posts[1].0 - posts[0].0, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn permanently_failing_endpoint_gives_up() {
    let transport = RecordingTransport::scripted(vec![TransportResponse::new(503, ""); 4]);
    let config = config().with_delivery(DeliveryPolicy::default().with_max_attempts(4));
    let dispatcher = Dispatcher::setup_with_transport(config, transport.clone()).unwrap();

    let event = Event::new(VULNERABILITY, "rce").with_severity("critical");
    assert_eq!(
        dispatcher.handle(&event).await,
        DispatchOutcome::GaveUp {
            attempts: 4,
            reason: FailureReason::RemoteStatus(503),
        }
    );
    assert_eq!(transport.posts().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_delivery() {
    let transport = RecordingTransport::scripted(vec![TransportResponse::new(
        429,
        r#"{"retry_after": 30}"#,
    )]);
    let dispatcher = Dispatcher::setup_with_transport(config(), transport.clone()).unwrap();

    let event = Event::new(VULNERABILITY, "rce").with_severity("critical");
    let handle = dispatcher.spawn(event.clone());

    tokio::time::sleep(Duration::from_secs(1)).await;
    dispatcher.shutdown().await;

    assert_eq!(handle.await.unwrap(), DispatchOutcome::Cancelled);
    assert_eq!(transport.posts().len(), 1);
    assert!(!dispatcher.is_running());
    assert_eq!(dispatcher.handle(&event).await, DispatchOutcome::Shutdown);
}

#[tokio::test]
async fn event_without_bucket_is_dropped_before_formatting() {
    let transport = RecordingTransport::scripted(vec![]);
    let config = config().with_event_types(["*"]);
    let dispatcher = Dispatcher::setup_with_transport(config, transport.clone()).unwrap();

    let event = Event::new("FINDING", "no labels at all");
    assert_eq!(dispatcher.handle(&event).await, DispatchOutcome::Unrouted(None));
    assert!(transport.posts().is_empty());
}
