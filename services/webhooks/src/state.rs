use std::sync::Arc;

use sea_orm::DatabaseConnection;
use veganbase_pubsub::PubSub;

use crate::infra::db::{DbEventRepository, DbWebhookRepository};

/// Shared application state passed to every handler via axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub broker: Arc<dyn PubSub>,
}

impl AppState {
    pub fn webhook_repo(&self) -> DbWebhookRepository {
        DbWebhookRepository {
            db: self.db.clone(),
        }
    }

    pub fn event_repo(&self) -> DbEventRepository {
        DbEventRepository {
            db: self.db.clone(),
        }
    }
}
