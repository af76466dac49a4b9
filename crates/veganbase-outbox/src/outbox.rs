use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set, TransactionError, TransactionTrait};
use serde::Serialize;
use uuid::Uuid;
use veganbase_domain::event::{Event, WEBHOOK_RECEIVE_TOPIC};
use veganbase_pubsub::PubSub;

use crate::events;
use crate::error::OutboxError;

/// Transactional writer producers emit events through.
///
/// Every emit writes a row into the producer's own `events` table and publishes the same JSON
/// on the broker inside one database transaction. A rejected publish rolls the row back.
/// A publish the broker accepted but later lost stays recoverable from the row.
#[derive(Clone)]
pub struct Outbox {
    db: DatabaseConnection,
    broker: Arc<dyn PubSub>,
}

impl Outbox {
    pub fn new(db: DatabaseConnection, broker: Arc<dyn PubSub>) -> Self {
        Self { db, broker }
    }

    /// Record `data` under `topic` and publish it.
    pub async fn emit<T: Serialize + ?Sized>(&self, topic: &str, data: &T) -> Result<(), OutboxError> {
        let encoded = serde_json::to_vec(data)?;
        let event_data: serde_json::Value = serde_json::from_slice(&encoded)?;
        let payload = Bytes::from(encoded);

        let broker = self.broker.clone();
        let label = topic.to_owned();
        let published = payload.clone();
        let result = self
            .db
            .transaction::<_, (), OutboxError>(|txn| {
                Box::pin(async move {
                    events::ActiveModel {
                        id: Set(Uuid::now_v7()),
                        label: Set(label.clone()),
                        event_data: Set(event_data),
                        created_at: Set(Utc::now()),
                    }
                    .insert(txn)
                    .await?;

                    broker.publish(&label, published).await?;
                    Ok(())
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db) => OutboxError::Persistence(db),
                TransactionError::Transaction(e) => e,
            });

        match &result {
            Ok(()) => tracing::debug!(topic, "event emitted"),
            Err(OutboxError::Persistence(e)) => tracing::error!(
                topic,
                event_data = %String::from_utf8_lossy(&payload),
                error = %e,
                "failed to write outbox row"
            ),
            Err(e) => tracing::warn!(topic, error = %e, "event emit rolled back"),
        }
        result
    }

    /// Build a webhook event for `destination` and emit it on the webhook receive topic.
    pub async fn trigger_webhook_event<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        event_type: &str,
        livemode: bool,
        payload: &T,
    ) -> Result<Event, OutboxError> {
        let payload = serde_json::value::to_raw_value(payload)?;
        let event = Event::new(destination, event_type, livemode, payload);
        self.emit(WEBHOOK_RECEIVE_TOPIC, &event).await?;
        Ok(event)
    }
}
