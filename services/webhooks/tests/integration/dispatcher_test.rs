use std::sync::Arc;

use bytes::Bytes;
use chrono::Duration;

use veganbase_domain::event::{Event, WEBHOOK_PROCESS_TOPIC, WEBHOOK_RECEIVE_TOPIC};
use veganbase_pubsub::MockPubSub;
use veganbase_webhooks::dispatcher::{Dispatcher, ProcessOutcome, RetrySummary};
use veganbase_webhooks::domain::types::{RetryPolicy, TerminalReason};
use veganbase_webhooks::error::WebhooksServiceError;
use veganbase_webhooks::signing::{self, EVENT_TYPE_HEADER, SIGNATURE_HEADER};

use crate::helpers::{
    MockEventRepo, MockTransport, MockWebhookRepo, OWNER, SECRET, test_event, test_webhook,
};

type TestDispatcher = Dispatcher<MockWebhookRepo, MockEventRepo, MockTransport>;

fn dispatcher(
    webhooks: &MockWebhookRepo,
    events: &MockEventRepo,
    transport: &MockTransport,
    broker: &Arc<MockPubSub>,
    policy: RetryPolicy,
) -> TestDispatcher {
    Dispatcher::new(
        webhooks.clone(),
        events.clone(),
        transport.clone(),
        broker.clone(),
        policy,
    )
}

fn encode(event: &Event) -> Bytes {
    Bytes::from(serde_json::to_vec(event).unwrap())
}

/// Receive `event` and process whatever `receive` handed to the process topic.
async fn receive_and_process(
    d: &TestDispatcher,
    broker: &MockPubSub,
    event: &Event,
) -> Result<ProcessOutcome, WebhooksServiceError> {
    d.receive(encode(event)).await?;
    let handed_on = broker.published(WEBHOOK_PROCESS_TOPIC);
    let last = handed_on.last().cloned().expect("nothing on the process topic");
    d.process_raw(last).await
}

#[tokio::test]
async fn should_deliver_matching_event_on_first_attempt() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["purchase-created"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(200);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let event = test_event(OWNER, "purchase-created");
    let outcome = receive_and_process(&d, &broker, &event).await.unwrap();

    assert_eq!(outcome, ProcessOutcome::Delivered);
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://subscriber.example.com/hook");

    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["event_id"], event.event_id.as_str());
    assert_eq!(body["type"], "purchase-created");
    assert!(body.get("destination").is_none());

    let row = events.row(&event.event_id);
    assert!(row.delivery.sent);
    assert!(row.delivery.sent_at.is_some());
    assert!(!row.delivery.retry);
    assert_eq!(row.delivery.attempts, 1);
}

#[tokio::test]
async fn should_sign_payload_bytes_with_webhook_secret() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["*"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(204);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let event = test_event(OWNER, "purchase-created");
    receive_and_process(&d, &broker, &event).await.unwrap();

    let request = &transport.requests()[0];
    let signature = request.headers[SIGNATURE_HEADER].to_str().unwrap();
    assert!(signing::verify_signature(
        event.payload_bytes(),
        SECRET.as_bytes(),
        signature
    ));
    assert!(!signing::verify_signature(b"{}", SECRET.as_bytes(), signature));
    assert_eq!(request.headers[EVENT_TYPE_HEADER], "purchase-created");
}

#[tokio::test]
async fn should_retry_with_linear_backoff_until_delivered() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["purchase-created"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::scripted(vec![Ok(500), Ok(503)], 200);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let event = test_event(OWNER, "purchase-created");
    let err = receive_and_process(&d, &broker, &event).await.unwrap_err();
    assert!(matches!(err, WebhooksServiceError::TransportFailure(_)));
    assert_eq!(events.row(&event.event_id).delivery.attempts, 1);

    // Backoff still running: nothing is due.
    assert_eq!(d.retry_pending().await.unwrap(), RetrySummary::default());

    events.expire_backoff(&event.event_id);
    let summary = d.retry_pending().await.unwrap();
    assert_eq!(summary.failed, 1);

    events.expire_backoff(&event.event_id);
    let summary = d.retry_pending().await.unwrap();
    assert_eq!(summary.delivered, 1);

    let row = events.row(&event.event_id);
    assert!(row.delivery.sent);
    assert_eq!(row.delivery.attempts, 3);
    assert_eq!(
        *events.backoffs.lock().unwrap(),
        vec![Duration::minutes(5), Duration::minutes(10)]
    );
    assert_eq!(transport.requests().len(), 3);
    assert_eq!(events.sent_calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn should_count_transport_error_as_failed_attempt() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["purchase-created"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::scripted(vec![Err("connection refused".to_owned())], 200);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let event = test_event(OWNER, "purchase-created");
    let err = receive_and_process(&d, &broker, &event).await.unwrap_err();

    assert!(matches!(err, WebhooksServiceError::TransportFailure(_)));
    let row = events.row(&event.event_id);
    assert_eq!(row.delivery.attempts, 1);
    assert!(row.delivery.retry);
    assert!(row.delivery.backoff_until.is_some());
}

#[tokio::test]
async fn should_abandon_event_nobody_subscribes_to() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["purchase-refunded"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(200);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let event = test_event(OWNER, "purchase-created");
    let outcome = receive_and_process(&d, &broker, &event).await.unwrap();

    assert_eq!(outcome, ProcessOutcome::Unhandled);
    assert!(transport.requests().is_empty());
    let row = events.row(&event.event_id);
    assert!(!row.delivery.retry);
    assert!(!row.delivery.sent);
    assert_eq!(row.delivery.terminal_reason, Some(TerminalReason::Unhandled));
    assert_eq!(d.retry_pending().await.unwrap(), RetrySummary::default());
}

#[tokio::test]
async fn should_not_deliver_to_disabled_webhook() {
    let mut webhook = test_webhook(OWNER, &["*"]);
    webhook.enabled = false;
    let webhooks = MockWebhookRepo::new(vec![webhook]);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(200);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let outcome = receive_and_process(&d, &broker, &test_event(OWNER, "purchase-created"))
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Unhandled);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn should_not_deliver_to_another_owners_webhook() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook("user_other", &["*"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(200);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let outcome = receive_and_process(&d, &broker, &test_event(OWNER, "purchase-created"))
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::Unhandled);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn should_stop_retrying_when_webhook_is_deleted() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["purchase-created"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(500);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let event = test_event(OWNER, "purchase-created");
    receive_and_process(&d, &broker, &event).await.unwrap_err();

    webhooks.clear();
    events.expire_backoff(&event.event_id);
    let summary = d.retry_pending().await.unwrap();

    assert_eq!(summary.abandoned, 1);
    let row = events.row(&event.event_id);
    assert!(!row.delivery.retry);
    assert_eq!(row.delivery.terminal_reason, Some(TerminalReason::WebhookNotFound));
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn should_give_up_after_max_attempts() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["purchase-created"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(500);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::with_max_attempts(2));

    let event = test_event(OWNER, "purchase-created");
    receive_and_process(&d, &broker, &event).await.unwrap_err();
    events.expire_backoff(&event.event_id);
    let summary = d.retry_pending().await.unwrap();
    assert_eq!(summary.failed, 1);

    let row = events.row(&event.event_id);
    assert_eq!(row.delivery.attempts, 2);
    assert!(!row.delivery.retry);
    assert_eq!(row.delivery.terminal_reason, Some(TerminalReason::MaxAttempts));

    events.expire_backoff(&event.event_id);
    assert_eq!(d.retry_pending().await.unwrap(), RetrySummary::default());
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn should_retry_forever_without_ceiling() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["purchase-created"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(500);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::with_max_attempts(0));

    let event = test_event(OWNER, "purchase-created");
    events.insert_failed(&event, 50);
    let summary = d.retry_pending().await.unwrap();

    assert_eq!(summary.failed, 1);
    let row = events.row(&event.event_id);
    assert_eq!(row.delivery.attempts, 51);
    assert!(row.delivery.retry);
    assert_eq!(*events.backoffs.lock().unwrap(), vec![Duration::minutes(255)]);
}

#[tokio::test]
async fn should_deliver_duplicate_event_once() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["*"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(200);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let event = test_event(OWNER, "purchase-created");
    d.receive(encode(&event)).await.unwrap();
    d.receive(encode(&event)).await.unwrap();
    assert_eq!(events.len(), 1);

    let handed_on = broker.published(WEBHOOK_PROCESS_TOPIC);
    assert_eq!(handed_on.len(), 2);
    let first = d.process_raw(handed_on[0].clone()).await.unwrap();
    let second = d.process_raw(handed_on[1].clone()).await.unwrap();

    assert_eq!(first, ProcessOutcome::Delivered);
    assert_eq!(second, ProcessOutcome::Skipped);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn should_leave_failed_event_to_retry_loop() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["*"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(200);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let event = test_event(OWNER, "purchase-created");
    events.insert_failed(&event, 1);
    let outcome = d.process(&event).await.unwrap();

    assert_eq!(outcome, ProcessOutcome::Skipped);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn should_reject_undecodable_message() {
    let webhooks = MockWebhookRepo::default();
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(200);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let err = d.receive(Bytes::from_static(b"not json")).await.unwrap_err();

    assert!(matches!(err, WebhooksServiceError::DecodeFailure(_)));
    assert_eq!(events.len(), 0);
    assert!(broker.published(WEBHOOK_PROCESS_TOPIC).is_empty());
    assert!(broker.published(WEBHOOK_RECEIVE_TOPIC).is_empty());
}

#[tokio::test(start_paused = true)]
async fn should_redeliver_event_that_failed_to_persist() {
    let webhooks = MockWebhookRepo::default();
    let events = MockEventRepo::failing_add();
    let transport = MockTransport::responding(200);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let raw = encode(&test_event(OWNER, "purchase-created"));
    let err = d.receive(raw.clone()).await.unwrap_err();

    assert!(matches!(err, WebhooksServiceError::Internal(_)));
    assert_eq!(broker.published(WEBHOOK_RECEIVE_TOPIC), vec![raw]);
    assert!(broker.published(WEBHOOK_PROCESS_TOPIC).is_empty());
}

#[tokio::test(start_paused = true)]
async fn should_redeliver_process_message_after_transient_failure() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["purchase-created"])]);
    webhooks.fail_next_lookups(1);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(200);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let event = test_event(OWNER, "purchase-created");
    d.receive(encode(&event)).await.unwrap();
    let first = broker.published(WEBHOOK_PROCESS_TOPIC)[0].clone();

    let err = d.handle_process_message(first).await.unwrap_err();
    assert!(matches!(err, WebhooksServiceError::Internal(_)));
    // Not due for retry: the first attempt never ran.
    assert_eq!(d.retry_pending().await.unwrap(), RetrySummary::default());

    let handed_on = broker.published(WEBHOOK_PROCESS_TOPIC);
    assert_eq!(handed_on.len(), 2);
    let outcome = d.handle_process_message(handed_on[1].clone()).await.unwrap();

    assert_eq!(outcome, ProcessOutcome::Delivered);
    let row = events.row(&event.event_id);
    assert!(row.delivery.sent);
    assert_eq!(row.delivery.attempts, 1);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn should_not_redeliver_message_for_unknown_event() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["*"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(200);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let err = d
        .handle_process_message(encode(&test_event(OWNER, "ping")))
        .await
        .unwrap_err();

    assert!(matches!(err, WebhooksServiceError::EventNotFound));
    assert!(broker.published(WEBHOOK_PROCESS_TOPIC).is_empty());
}

#[tokio::test]
async fn should_not_redeliver_after_recorded_transport_failure() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["*"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(500);
    let broker = Arc::new(MockPubSub::new());
    let d = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let event = test_event(OWNER, "ping");
    d.receive(encode(&event)).await.unwrap();
    let raw = broker.published(WEBHOOK_PROCESS_TOPIC)[0].clone();
    let err = d.handle_process_message(raw).await.unwrap_err();

    assert!(matches!(err, WebhooksServiceError::TransportFailure(_)));
    assert_eq!(broker.published(WEBHOOK_PROCESS_TOPIC).len(), 1);
    assert_eq!(events.row(&event.event_id).delivery.attempts, 1);
}

#[tokio::test]
async fn should_post_once_when_two_replicas_scan_together() {
    let webhooks = MockWebhookRepo::new(vec![test_webhook(OWNER, &["*"])]);
    let events = MockEventRepo::default();
    let transport = MockTransport::responding(500);
    let broker = Arc::new(MockPubSub::new());
    let first = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());
    let second = dispatcher(&webhooks, &events, &transport, &broker, RetryPolicy::default());

    let event = test_event(OWNER, "ping");
    events.insert_failed(&event, 1);
    let (a, b) = tokio::join!(first.retry_pending(), second.retry_pending());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.failed + b.failed, 1);
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(events.row(&event.event_id).delivery.attempts, 2);
}
