use anyhow::Context as _;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, DbErr,
    EntityTrait, IntoActiveModel as _, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    sea_query::{Expr, OnConflict},
};
use serde_json::value::RawValue;

use veganbase_domain::event::Event;
use veganbase_domain::id::{EventId, WebhookId};
use veganbase_webhooks_schema::{events, webhooks};

use crate::domain::repository::{EventRepository, WebhookRepository};
use crate::domain::types::{DeliveryState, RetryPolicy, StoredEvent, TerminalReason, Webhook};
use crate::error::WebhooksServiceError;

// ── Webhook repository ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbWebhookRepository {
    pub db: DatabaseConnection,
}

impl DbWebhookRepository {
    async fn enabled_for_owner(&self, owner: &str) -> Result<Vec<Webhook>, WebhooksServiceError> {
        let models = webhooks::Entity::find()
            .filter(webhooks::Column::Owner.eq(owner))
            .filter(webhooks::Column::Enabled.eq(true))
            .order_by_asc(webhooks::Column::CreatedAt)
            .order_by_asc(webhooks::Column::Id)
            .all(&self.db)
            .await
            .context("list enabled webhooks")?;
        models.into_iter().map(webhook_from_model).collect()
    }
}

impl WebhookRepository for DbWebhookRepository {
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Webhook>, WebhooksServiceError> {
        let models = webhooks::Entity::find()
            .filter(webhooks::Column::Owner.eq(owner))
            .order_by_asc(webhooks::Column::CreatedAt)
            .order_by_asc(webhooks::Column::Id)
            .all(&self.db)
            .await
            .context("list webhooks by owner")?;
        models.into_iter().map(webhook_from_model).collect()
    }

    async fn find_by_id(&self, id: &WebhookId) -> Result<Option<Webhook>, WebhooksServiceError> {
        let model = webhooks::Entity::find_by_id(id.as_str().to_owned())
            .one(&self.db)
            .await
            .context("find webhook by id")?;
        model.map(webhook_from_model).transpose()
    }

    async fn create(&self, webhook: &Webhook) -> Result<(), WebhooksServiceError> {
        webhooks::ActiveModel {
            id: Set(webhook.id.as_str().to_owned()),
            owner: Set(webhook.owner.clone()),
            url: Set(webhook.url.clone()),
            enabled: Set(webhook.enabled),
            livemode: Set(webhook.livemode),
            events: Set(serde_json::json!(webhook.events)),
            secret: Set(webhook.secret.clone()),
            created_at: Set(webhook.created_at),
        }
        .insert(&self.db)
        .await
        .context("create webhook")?;
        Ok(())
    }

    async fn update(&self, webhook: &Webhook) -> Result<(), WebhooksServiceError> {
        let result = webhooks::ActiveModel {
            id: Set(webhook.id.as_str().to_owned()),
            url: Set(webhook.url.clone()),
            enabled: Set(webhook.enabled),
            livemode: Set(webhook.livemode),
            events: Set(serde_json::json!(webhook.events)),
            ..Default::default()
        }
        .update(&self.db)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(DbErr::RecordNotUpdated) => Err(WebhooksServiceError::WebhookNotFound),
            Err(e) => Err(anyhow::Error::new(e).context("update webhook").into()),
        }
    }

    async fn delete(&self, id: &WebhookId) -> Result<bool, WebhooksServiceError> {
        let result = webhooks::Entity::delete_by_id(id.as_str().to_owned())
            .exec(&self.db)
            .await
            .context("delete webhook")?;
        Ok(result.rows_affected > 0)
    }

    async fn is_event_handled(
        &self,
        owner: &str,
        event_type: &str,
    ) -> Result<bool, WebhooksServiceError> {
        let candidates = self.enabled_for_owner(owner).await?;
        Ok(candidates.iter().any(|w| w.handles(event_type)))
    }

    async fn webhook_by_owner_and_event_type(
        &self,
        owner: &str,
        event_type: &str,
    ) -> Result<Option<Webhook>, WebhooksServiceError> {
        let candidates = self.enabled_for_owner(owner).await?;
        Ok(candidates.into_iter().find(|w| w.handles(event_type)))
    }
}

fn webhook_from_model(model: webhooks::Model) -> Result<Webhook, WebhooksServiceError> {
    let events: Vec<String> =
        serde_json::from_value(model.events).context("decode webhook event types")?;
    Ok(Webhook {
        id: WebhookId(model.id),
        owner: model.owner,
        url: model.url,
        enabled: model.enabled,
        livemode: model.livemode,
        events,
        secret: model.secret,
        created_at: model.created_at,
    })
}

// ── Event repository ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbEventRepository {
    pub db: DatabaseConnection,
}

impl EventRepository for DbEventRepository {
    async fn add_event(
        &self,
        event: &Event,
        received_at: DateTime<Utc>,
    ) -> Result<bool, WebhooksServiceError> {
        let model = events::ActiveModel {
            event_id: Set(event.event_id.as_str().to_owned()),
            destination: Set(event.destination.clone()),
            event_type: Set(event.event_type.clone()),
            livemode: Set(event.livemode),
            created_at: Set(event.created_at),
            payload: Set(event.payload.get().to_owned()),
            received_at: Set(received_at),
            sent: Set(false),
            sent_at: Set(None),
            attempts: Set(0),
            retry: Set(true),
            last_retry: Set(None),
            backoff_until: Set(None),
            terminal_reason: Set(None),
        };
        let inserted = events::Entity::insert(model)
            .on_conflict(
                OnConflict::column(events::Column::EventId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .context("add event")?;
        Ok(inserted > 0)
    }

    async fn find_event(&self, id: &EventId) -> Result<Option<StoredEvent>, WebhooksServiceError> {
        let model = events::Entity::find_by_id(id.as_str().to_owned())
            .one(&self.db)
            .await
            .context("find event by id")?;
        model.map(stored_event_from_model).transpose()
    }

    async fn list_by_destination(
        &self,
        destination: &str,
        limit: u64,
    ) -> Result<Vec<StoredEvent>, WebhooksServiceError> {
        let models = events::Entity::find()
            .filter(events::Column::Destination.eq(destination))
            .order_by_desc(events::Column::ReceivedAt)
            .order_by_desc(events::Column::EventId)
            .limit(limit)
            .all(&self.db)
            .await
            .context("list events by destination")?;
        models.into_iter().map(stored_event_from_model).collect()
    }

    async fn pending_events(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, WebhooksServiceError> {
        let models = events::Entity::find()
            .filter(events::Column::Retry.eq(true))
            .filter(events::Column::Sent.eq(false))
            .filter(events::Column::Attempts.gt(0))
            .filter(
                Condition::any()
                    .add(events::Column::BackoffUntil.is_null())
                    .add(events::Column::BackoffUntil.lte(now)),
            )
            .order_by_asc(events::Column::ReceivedAt)
            .all(&self.db)
            .await
            .context("list pending events")?;
        models.into_iter().map(stored_event_from_model).collect()
    }

    async fn claim_retry(
        &self,
        stored: &StoredEvent,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, WebhooksServiceError> {
        let result = events::Entity::update_many()
            .col_expr(events::Column::BackoffUntil, Expr::value(now + lease))
            .filter(events::Column::EventId.eq(stored.event.event_id.as_str()))
            .filter(events::Column::Retry.eq(true))
            .filter(events::Column::Sent.eq(false))
            .filter(events::Column::Attempts.eq(stored.delivery.attempts as i32))
            .filter(
                Condition::any()
                    .add(events::Column::BackoffUntil.is_null())
                    .add(events::Column::BackoffUntil.lte(now)),
            )
            .exec(&self.db)
            .await
            .context("claim event for retry")?;
        Ok(result.rows_affected == 1)
    }

    async fn set_sent_status(&self, id: &EventId) -> Result<(), WebhooksServiceError> {
        let result = events::Entity::update_many()
            .col_expr(events::Column::Sent, Expr::value(true))
            .col_expr(events::Column::SentAt, Expr::value(Utc::now()))
            .col_expr(
                events::Column::Attempts,
                Expr::col(events::Column::Attempts).add(1),
            )
            .col_expr(events::Column::Retry, Expr::value(false))
            .filter(events::Column::EventId.eq(id.as_str()))
            .exec(&self.db)
            .await
            .context("set sent status")?;
        if result.rows_affected == 0 {
            return Err(WebhooksServiceError::EventNotFound);
        }
        Ok(())
    }

    async fn increase_failed_attempts(
        &self,
        id: &EventId,
        policy: &RetryPolicy,
    ) -> Result<u32, WebhooksServiceError> {
        let id = id.as_str().to_owned();
        let policy = *policy;
        let attempts = self
            .db
            .transaction::<_, Option<u32>, DbErr>(|txn| {
                Box::pin(async move {
                    // Row lock so concurrent failures of the same event both count.
                    let Some(model) = events::Entity::find_by_id(id)
                        .lock_exclusive()
                        .one(txn)
                        .await?
                    else {
                        return Ok(None);
                    };
                    let attempts = u32::try_from(model.attempts).unwrap_or(0) + 1;
                    let now = Utc::now();
                    let mut am = model.into_active_model();
                    am.attempts = Set(attempts as i32);
                    am.last_retry = Set(Some(now));
                    am.backoff_until = Set(Some(now + policy.backoff(attempts)));
                    am.update(txn).await?;
                    Ok(Some(attempts))
                })
            })
            .await
            .context("increase failed attempts")?;
        attempts.ok_or(WebhooksServiceError::EventNotFound)
    }

    async fn disable_retry_flag(
        &self,
        id: &EventId,
        reason: TerminalReason,
    ) -> Result<(), WebhooksServiceError> {
        let result = events::Entity::update_many()
            .col_expr(events::Column::Retry, Expr::value(false))
            .col_expr(events::Column::TerminalReason, Expr::value(reason.as_str()))
            .filter(events::Column::EventId.eq(id.as_str()))
            .exec(&self.db)
            .await
            .context("disable retry flag")?;
        if result.rows_affected == 0 {
            return Err(WebhooksServiceError::EventNotFound);
        }
        Ok(())
    }
}

fn stored_event_from_model(model: events::Model) -> Result<StoredEvent, WebhooksServiceError> {
    let payload = RawValue::from_string(model.payload).context("decode stored payload")?;
    Ok(StoredEvent {
        event: Event {
            event_id: EventId(model.event_id),
            destination: model.destination,
            event_type: model.event_type,
            livemode: model.livemode,
            created_at: model.created_at,
            payload,
        },
        received_at: model.received_at,
        delivery: DeliveryState {
            sent: model.sent,
            sent_at: model.sent_at,
            attempts: u32::try_from(model.attempts).unwrap_or(0),
            retry: model.retry,
            last_retry: model.last_retry,
            backoff_until: model.backoff_until,
            terminal_reason: model.terminal_reason.as_deref().and_then(|r| r.parse().ok()),
        },
    })
}
