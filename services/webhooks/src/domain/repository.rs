use std::future::Future;

use chrono::{DateTime, Duration, Utc};

use veganbase_domain::event::Event;
use veganbase_domain::id::{EventId, WebhookId};

use crate::domain::types::{RetryPolicy, StoredEvent, TerminalReason, Webhook};
use crate::error::WebhooksServiceError;

// Futures are declared `Send` so the dispatcher can drive the ports from spawned tasks.

/// Repository for webhook subscriptions.
pub trait WebhookRepository: Send + Sync {
    fn list_by_owner(
        &self,
        owner: &str,
    ) -> impl Future<Output = Result<Vec<Webhook>, WebhooksServiceError>> + Send;

    fn find_by_id(
        &self,
        id: &WebhookId,
    ) -> impl Future<Output = Result<Option<Webhook>, WebhooksServiceError>> + Send;

    fn create(&self, webhook: &Webhook)
    -> impl Future<Output = Result<(), WebhooksServiceError>> + Send;

    /// Persist the mutable fields (`url`, `enabled`, `livemode`, `events`) of `webhook`.
    fn update(&self, webhook: &Webhook)
    -> impl Future<Output = Result<(), WebhooksServiceError>> + Send;

    /// Delete a webhook. Returns `true` if a row was deleted.
    fn delete(&self, id: &WebhookId)
    -> impl Future<Output = Result<bool, WebhooksServiceError>> + Send;

    /// True iff some enabled webhook of `owner` subscribes to `event_type` or to `"*"`.
    fn is_event_handled(
        &self,
        owner: &str,
        event_type: &str,
    ) -> impl Future<Output = Result<bool, WebhooksServiceError>> + Send;

    /// One matching webhook, oldest first when several match.
    fn webhook_by_owner_and_event_type(
        &self,
        owner: &str,
        event_type: &str,
    ) -> impl Future<Output = Result<Option<Webhook>, WebhooksServiceError>> + Send;
}

/// Repository for received events and their delivery state.
pub trait EventRepository: Send + Sync {
    /// Insert a received event. Returns `false` when the event id was already recorded.
    fn add_event(
        &self,
        event: &Event,
        received_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, WebhooksServiceError>> + Send;

    fn find_event(
        &self,
        id: &EventId,
    ) -> impl Future<Output = Result<Option<StoredEvent>, WebhooksServiceError>> + Send;

    /// Most recently received events of `destination`, newest first.
    fn list_by_destination(
        &self,
        destination: &str,
        limit: u64,
    ) -> impl Future<Output = Result<Vec<StoredEvent>, WebhooksServiceError>> + Send;

    /// Events due for another delivery attempt at `now`.
    fn pending_events(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<StoredEvent>, WebhooksServiceError>> + Send;

    /// Take `stored` for one retry attempt, pushing its backoff out by `lease`.
    ///
    /// Succeeds only while the row is still due and unchanged since it was scanned, so of
    /// several replicas scanning the same row exactly one gets `true`.
    fn claim_retry(
        &self,
        stored: &StoredEvent,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> impl Future<Output = Result<bool, WebhooksServiceError>> + Send;

    /// Mark delivered: `sent`, `sent_at = now`, `attempts += 1`, `retry = false`.
    fn set_sent_status(
        &self,
        id: &EventId,
    ) -> impl Future<Output = Result<(), WebhooksServiceError>> + Send;

    /// Record a failed attempt and schedule the next one. Returns the new attempt count.
    fn increase_failed_attempts(
        &self,
        id: &EventId,
        policy: &RetryPolicy,
    ) -> impl Future<Output = Result<u32, WebhooksServiceError>> + Send;

    /// Stop retrying the event, recording why.
    fn disable_retry_flag(
        &self,
        id: &EventId,
        reason: TerminalReason,
    ) -> impl Future<Output = Result<(), WebhooksServiceError>> + Send;
}

/// Outbound HTTP port used to deliver events to subscribers.
pub trait WebhookTransport: Send + Sync {
    /// POST `body` to `url`, returning the response status code.
    fn post(
        &self,
        url: &str,
        headers: http::HeaderMap,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<u16, WebhooksServiceError>> + Send;
}
