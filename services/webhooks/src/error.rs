use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use veganbase_pubsub::PubSubError;

/// Webhooks service error variants.
#[derive(Debug, thiserror::Error)]
pub enum WebhooksServiceError {
    #[error("webhook not found")]
    WebhookNotFound,
    #[error("event not found")]
    EventNotFound,
    #[error("field is read-only: {0}")]
    ReadOnlyField(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("forbidden")]
    Forbidden,
    #[error("delivery failed: {0}")]
    TransportFailure(String),
    #[error("failed to decode message: {0}")]
    DecodeFailure(String),
    #[error("broker error")]
    PubSub(#[from] PubSubError),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl WebhooksServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WebhookNotFound => "WEBHOOK_NOT_FOUND",
            Self::EventNotFound => "EVENT_NOT_FOUND",
            Self::ReadOnlyField(_) => "READ_ONLY_FIELD",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Forbidden => "FORBIDDEN",
            Self::TransportFailure(_) => "TRANSPORT_FAILURE",
            Self::DecodeFailure(_) => "DECODE_FAILURE",
            Self::PubSub(_) => "PUBSUB",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for WebhooksServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::WebhookNotFound | Self::EventNotFound => StatusCode::NOT_FOUND,
            Self::ReadOnlyField(_) | Self::InvalidRequest(_) | Self::DecodeFailure(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::TransportFailure(_) => StatusCode::BAD_GATEWAY,
            Self::PubSub(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        match &self {
            Self::Internal(e) => tracing::error!(error = %format!("{e:#}"), kind = "INTERNAL", "internal error"),
            Self::PubSub(e) => tracing::error!(error = %e, kind = "PUBSUB", "broker error"),
            _ => {}
        }
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
