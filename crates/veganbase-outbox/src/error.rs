use sea_orm::DbErr;
use veganbase_pubsub::PubSubError;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("failed to encode event data: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to persist outbox row: {0}")]
    Persistence(#[from] DbErr),

    #[error("failed to publish event: {0}")]
    Publish(#[from] PubSubError),
}
