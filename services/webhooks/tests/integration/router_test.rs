use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header::CONTENT_TYPE};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;

use veganbase_domain::event::{Event, WEBHOOK_RECEIVE_TOPIC};
use veganbase_pubsub::MockPubSub;
use veganbase_testing::auth::MockAuth;
use veganbase_webhooks::domain::repository::EventRepository;
use veganbase_webhooks::router::build_router;
use veganbase_webhooks::state::AppState;

use crate::helpers::{setup_db, test_event};

struct TestApp {
    router: Router,
    state: AppState,
    broker: Arc<MockPubSub>,
}

async fn app() -> TestApp {
    let broker = Arc::new(MockPubSub::new());
    let state = AppState {
        db: setup_db().await,
        broker: broker.clone(),
    };
    TestApp {
        router: build_router(state.clone()),
        state,
        broker,
    }
}

async fn send(
    app: &TestApp,
    auth: Option<&MockAuth>,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = auth.apply(builder);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create(app: &TestApp, auth: &MockAuth) -> Value {
    let (status, body) = send(
        app,
        Some(auth),
        "POST",
        "/me/subscription",
        Some(json!({
            "url": "https://subscriber.example.com/hook",
            "events": ["purchase-created", " purchase-created ", "ping"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

// ── Health ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_report_health_and_readiness() {
    let app = app().await;
    let (status, _) = send(&app, None, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, None, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
}

// ── Subscriptions ────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_create_subscription_with_generated_secret() {
    let app = app().await;
    let user = MockAuth::user();
    let body = create(&app, &user).await;

    assert!(body["id"].as_str().unwrap().starts_with("wh_"));
    assert!(body["secret"].as_str().unwrap().starts_with("whsec_"));
    assert_eq!(body["enabled"], true);
    assert_eq!(body["livemode"], false);
    assert_eq!(body["events"], json!(["purchase-created", "ping"]));
    assert!(body.get("owner").is_none());
}

#[tokio::test]
async fn should_list_and_get_own_subscriptions() {
    let app = app().await;
    let user = MockAuth::user();
    let created = create(&app, &user).await;
    create(&app, &MockAuth::user()).await;

    let (status, listed) = send(&app, Some(&user), "GET", "/me/subscriptions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], created["id"]);

    let uri = format!("/me/subscription/{}", created["id"].as_str().unwrap());
    let (status, fetched) = send(&app, Some(&user), "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["secret"], created["secret"]);
}

#[tokio::test]
async fn should_forbid_access_to_foreign_subscription() {
    let app = app().await;
    let created = create(&app, &MockAuth::user()).await;
    let uri = format!("/me/subscription/{}", created["id"].as_str().unwrap());
    let intruder = MockAuth::user();

    let (status, body) = send(&app, Some(&intruder), "GET", &uri, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "FORBIDDEN");

    let (status, _) = send(&app, Some(&intruder), "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn should_return_404_for_unknown_subscription() {
    let app = app().await;
    let user = MockAuth::user();

    let (status, body) = send(&app, Some(&user), "GET", "/me/subscription/wh_missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "WEBHOOK_NOT_FOUND");

    let (status, _) = send(&app, Some(&user), "GET", "/me/subscription/garbage", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn should_patch_mutable_fields() {
    let app = app().await;
    let user = MockAuth::user();
    let created = create(&app, &user).await;
    let uri = format!("/me/subscription/{}", created["id"].as_str().unwrap());

    let (status, body) = send(
        &app,
        Some(&user),
        "PATCH",
        &uri,
        Some(json!({"enabled": false, "events": ["*"]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);
    assert_eq!(body["events"], json!(["*"]));
    assert_eq!(body["url"], created["url"]);
    assert_eq!(body["secret"], created["secret"]);
}

#[tokio::test]
async fn should_reject_patch_of_read_only_field() {
    let app = app().await;
    let user = MockAuth::user();
    let created = create(&app, &user).await;
    let uri = format!("/me/subscription/{}", created["id"].as_str().unwrap());

    let (status, body) = send(
        &app,
        Some(&user),
        "PATCH",
        &uri,
        Some(json!({"secret": "whsec_mine", "enabled": false})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "READ_ONLY_FIELD");

    let (_, fetched) = send(&app, Some(&user), "GET", &uri, None).await;
    assert_eq!(fetched["enabled"], true);
}

#[tokio::test]
async fn should_reject_invalid_subscription_input() {
    let app = app().await;
    let user = MockAuth::user();

    let (status, body) = send(
        &app,
        Some(&user),
        "POST",
        "/me/subscription",
        Some(json!({"url": "ftp://example.com", "events": ["ping"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "INVALID_REQUEST");

    let (status, _) = send(
        &app,
        Some(&user),
        "POST",
        "/me/subscription",
        Some(json!({"url": "https://example.com/hook", "events": ["  "]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Some(&user),
        "POST",
        "/me/subscription",
        Some(json!({"events": ["ping"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "INVALID_REQUEST");
}

#[tokio::test]
async fn should_delete_subscription() {
    let app = app().await;
    let user = MockAuth::user();
    let created = create(&app, &user).await;
    let uri = format!("/me/subscription/{}", created["id"].as_str().unwrap());

    let (status, _) = send(&app, Some(&user), "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, Some(&user), "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn should_require_identity_headers() {
    let app = app().await;
    let (status, _) = send(&app, None, "GET", "/me/subscriptions", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ── Events ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_list_own_event_history() {
    let app = app().await;
    let user = MockAuth::user();
    let events = app.state.event_repo();
    let mine = test_event(&user.owner(), "purchase-created");
    events.add_event(&mine, Utc::now()).await.unwrap();
    events
        .add_event(&test_event("user_other", "purchase-created"), Utc::now())
        .await
        .unwrap();

    let (status, body) = send(&app, Some(&user), "GET", "/me/events?limit=10", None).await;

    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["event_id"], mine.event_id.as_str());
    assert_eq!(listed[0]["type"], "purchase-created");
    assert_eq!(listed[0]["payload"]["purchase_id"], "p_1");
    assert_eq!(listed[0]["attempts"], 0);
    assert_eq!(listed[0]["retry"], true);
    assert!(listed[0].get("destination").is_none());
}

#[tokio::test]
async fn should_reject_malformed_events_query() {
    let app = app().await;
    let user = MockAuth::user();
    let (status, body) = send(&app, Some(&user), "GET", "/me/events?limit=lots", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "INVALID_REQUEST");
}

// ── Test events ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_publish_test_event_for_caller() {
    let app = app().await;
    let user = MockAuth::user();

    let (status, body) = send(
        &app,
        Some(&user),
        "POST",
        "/webhooks/send-test-event",
        Some(json!({"type": "purchase-created", "payload": {"total": 1}})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["event_id"].as_str().unwrap().starts_with("evt_test_"));
    assert_eq!(body["livemode"], false);

    let published: Vec<Event> = app.broker.published_json(WEBHOOK_RECEIVE_TOPIC);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].destination, user.owner());
    assert_eq!(published[0].payload_bytes(), br#"{"total":1}"#);
}

#[tokio::test]
async fn should_forbid_test_event_for_other_owner() {
    let app = app().await;
    let (status, _) = send(
        &app,
        Some(&MockAuth::user()),
        "POST",
        "/webhooks/send-test-event",
        Some(json!({"type": "ping", "destination": "user_other"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(app.broker.published(WEBHOOK_RECEIVE_TOPIC).is_empty());

    let (status, _) = send(
        &app,
        Some(&MockAuth::admin()),
        "POST",
        "/webhooks/send-test-event",
        Some(json!({"type": "ping", "destination": "user_other"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}
