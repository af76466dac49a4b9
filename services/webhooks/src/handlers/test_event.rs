use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Serialize;

use veganbase_auth_types::identity::IdentityHeaders;

use crate::error::WebhooksServiceError;
use crate::state::AppState;
use crate::usecase::test_event::{Caller, SendTestEventUseCase, TestEventTemplate};

#[derive(Serialize)]
pub struct TestEventResponse {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub livemode: bool,
    #[serde(serialize_with = "veganbase_core::serde::to_rfc3339_ms")]
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// ── POST /webhooks/send-test-event ───────────────────────────────────────────

pub async fn send_test_event(
    identity: IdentityHeaders,
    State(state): State<AppState>,
    body: Result<Json<TestEventTemplate>, JsonRejection>,
) -> Result<(StatusCode, Json<TestEventResponse>), WebhooksServiceError> {
    let Json(template) = body.map_err(|e| WebhooksServiceError::InvalidRequest(e.body_text()))?;
    let owner = identity.owner();
    let uc = SendTestEventUseCase {
        broker: state.broker.clone(),
    };
    let event = uc
        .execute(
            Caller {
                owner: &owner,
                is_admin: identity.is_admin(),
            },
            template,
        )
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TestEventResponse {
            event_id: event.event_id.0,
            event_type: event.event_type,
            livemode: event.livemode,
            created_at: event.created_at,
        }),
    ))
}
