use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use veganbase_auth_types::identity::IdentityHeaders;
use veganbase_domain::id::WebhookId;

use crate::domain::types::{NewWebhook, Webhook, WebhookPatch};
use crate::error::WebhooksServiceError;
use crate::state::AppState;
use crate::usecase::subscription::{
    CreateSubscriptionUseCase, DeleteSubscriptionUseCase, GetSubscriptionUseCase,
    ListSubscriptionsUseCase, UpdateSubscriptionUseCase,
};

/// Fields the server assigns; a patch naming any of them is rejected.
const READ_ONLY_FIELDS: [&str; 4] = ["id", "secret", "created_at", "owner"];

// ── Response types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SubscriptionResponse {
    pub id: String,
    pub url: String,
    pub enabled: bool,
    pub livemode: bool,
    pub events: Vec<String>,
    pub secret: String,
    #[serde(serialize_with = "veganbase_core::serde::to_rfc3339_ms")]
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Webhook> for SubscriptionResponse {
    fn from(webhook: Webhook) -> Self {
        Self {
            id: webhook.id.0,
            url: webhook.url,
            enabled: webhook.enabled,
            livemode: webhook.livemode,
            events: webhook.events,
            secret: webhook.secret,
            created_at: webhook.created_at,
        }
    }
}

// ── Request types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchBody {
    url: Option<String>,
    enabled: Option<bool>,
    livemode: Option<bool>,
    events: Option<Vec<String>>,
}

fn parse_patch(body: Value) -> Result<WebhookPatch, WebhooksServiceError> {
    let Value::Object(fields) = body else {
        return Err(WebhooksServiceError::InvalidRequest(
            "body must be a JSON object".to_owned(),
        ));
    };
    if let Some(field) = READ_ONLY_FIELDS.iter().find(|f| fields.contains_key(**f)) {
        return Err(WebhooksServiceError::ReadOnlyField((*field).to_owned()));
    }
    let body: PatchBody = serde_json::from_value(Value::Object(fields))
        .map_err(|e| WebhooksServiceError::InvalidRequest(e.to_string()))?;
    Ok(WebhookPatch {
        url: body.url,
        enabled: body.enabled,
        livemode: body.livemode,
        events: body.events,
    })
}

fn parse_id(raw: &str) -> Result<WebhookId, WebhooksServiceError> {
    raw.parse().map_err(|_| WebhooksServiceError::WebhookNotFound)
}

// ── GET /me/subscriptions ────────────────────────────────────────────────────

pub async fn list_subscriptions(
    identity: IdentityHeaders,
    State(state): State<AppState>,
) -> Result<Json<Vec<SubscriptionResponse>>, WebhooksServiceError> {
    let uc = ListSubscriptionsUseCase {
        repo: state.webhook_repo(),
    };
    let webhooks = uc.execute(&identity.owner()).await?;
    Ok(Json(webhooks.into_iter().map(SubscriptionResponse::from).collect()))
}

// ── GET /me/subscription/{id} ────────────────────────────────────────────────

pub async fn get_subscription(
    identity: IdentityHeaders,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SubscriptionResponse>, WebhooksServiceError> {
    let id = parse_id(&id)?;
    let uc = GetSubscriptionUseCase {
        repo: state.webhook_repo(),
    };
    let webhook = uc.execute(&identity.owner(), &id).await?;
    Ok(Json(webhook.into()))
}

// ── POST /me/subscription ────────────────────────────────────────────────────

pub async fn create_subscription(
    identity: IdentityHeaders,
    State(state): State<AppState>,
    body: Result<Json<NewWebhook>, JsonRejection>,
) -> Result<(StatusCode, Json<SubscriptionResponse>), WebhooksServiceError> {
    let Json(input) = body.map_err(|e| WebhooksServiceError::InvalidRequest(e.body_text()))?;
    let uc = CreateSubscriptionUseCase {
        repo: state.webhook_repo(),
    };
    let webhook = uc.execute(&identity.owner(), input).await?;
    Ok((StatusCode::CREATED, Json(webhook.into())))
}

// ── PATCH /me/subscription/{id} ──────────────────────────────────────────────

pub async fn update_subscription(
    identity: IdentityHeaders,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SubscriptionResponse>, WebhooksServiceError> {
    let id = parse_id(&id)?;
    let Json(body) = body.map_err(|e| WebhooksServiceError::InvalidRequest(e.body_text()))?;
    let patch = parse_patch(body)?;
    let uc = UpdateSubscriptionUseCase {
        repo: state.webhook_repo(),
    };
    let webhook = uc.execute(&identity.owner(), &id, patch).await?;
    Ok(Json(webhook.into()))
}

// ── DELETE /me/subscription/{id} ─────────────────────────────────────────────

pub async fn delete_subscription(
    identity: IdentityHeaders,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, WebhooksServiceError> {
    let id = parse_id(&id)?;
    let uc = DeleteSubscriptionUseCase {
        repo: state.webhook_repo(),
    };
    uc.execute(&identity.owner(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
