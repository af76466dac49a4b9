use deadpool_redis::redis::RedisError;

/// Errors returned by broker bindings.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    /// The topic does not exist and could not be created.
    #[error("unknown topic: {topic}")]
    UnknownTopic { topic: String },
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("broker command failed: {0}")]
    Command(#[from] RedisError),
    #[error("publish rejected: {0}")]
    Rejected(String),
    #[error("pubsub client is closed")]
    Closed,
}

impl From<deadpool_redis::PoolError> for PubSubError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Connection(e.to_string())
    }
}
