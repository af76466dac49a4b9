use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use veganbase_auth_types::identity::IdentityHeaders;

use crate::domain::types::StoredEvent;
use crate::error::WebhooksServiceError;
use crate::state::AppState;
use crate::usecase::events::ListEventsUseCase;

#[derive(Serialize)]
pub struct EventResponse {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub livemode: bool,
    #[serde(serialize_with = "veganbase_core::serde::to_rfc3339_ms")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub payload: Box<RawValue>,
    #[serde(serialize_with = "veganbase_core::serde::to_rfc3339_ms")]
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub sent: bool,
    #[serde(serialize_with = "veganbase_core::serde::to_rfc3339_ms_opt")]
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
    pub attempts: u32,
    pub retry: bool,
    #[serde(serialize_with = "veganbase_core::serde::to_rfc3339_ms_opt")]
    pub last_retry: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(serialize_with = "veganbase_core::serde::to_rfc3339_ms_opt")]
    pub backoff_until: Option<chrono::DateTime<chrono::Utc>>,
    pub terminal_reason: Option<&'static str>,
}

impl From<StoredEvent> for EventResponse {
    fn from(stored: StoredEvent) -> Self {
        let StoredEvent {
            event,
            received_at,
            delivery,
        } = stored;
        Self {
            event_id: event.event_id.0,
            event_type: event.event_type,
            livemode: event.livemode,
            created_at: event.created_at,
            payload: event.payload,
            received_at,
            sent: delivery.sent,
            sent_at: delivery.sent_at,
            attempts: delivery.attempts,
            retry: delivery.retry,
            last_retry: delivery.last_retry,
            backoff_until: delivery.backoff_until,
            terminal_reason: delivery.terminal_reason.map(|r| r.as_str()),
        }
    }
}

#[derive(Deserialize, Default)]
pub struct EventsQuery {
    pub limit: Option<u64>,
}

// ── GET /me/events ───────────────────────────────────────────────────────────

pub async fn list_events(
    identity: IdentityHeaders,
    State(state): State<AppState>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> Result<Json<Vec<EventResponse>>, WebhooksServiceError> {
    let Query(query) = query.map_err(|e| WebhooksServiceError::InvalidRequest(e.body_text()))?;
    let uc = ListEventsUseCase {
        repo: state.event_repo(),
    };
    let events = uc.execute(&identity.owner(), query.limit).await?;
    Ok(Json(events.into_iter().map(EventResponse::from).collect()))
}
