//! Event ingestion, matching and signed delivery.
//!
//! ```text
//! receive topic ──▶ receive ──▶ events table ──▶ process topic ──▶ process ──▶ send_event
//!                                    ▲                                            │
//!                                    └──────────── retry_pending ◀── backoff ◀────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue};

use veganbase_domain::event::{Event, WEBHOOK_PROCESS_TOPIC, WEBHOOK_RECEIVE_TOPIC};
use veganbase_pubsub::{PubSub, PubSubExt};

use crate::domain::repository::{EventRepository, WebhookRepository, WebhookTransport};
use crate::domain::types::{RetryPolicy, StoredEvent, TerminalReason, Webhook};
use crate::error::WebhooksServiceError;
use crate::signing::{self, EVENT_TYPE_HEADER, SIGNATURE_HEADER};

/// Delay before a message whose handling failed is put back on its topic.
pub const REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// How long a claimed retry stays invisible to other scans. Outlasts one delivery attempt.
pub const RETRY_LEASE_SECS: i64 = 120;

/// Subscriber responses counted as delivered.
pub fn is_success(status: u16) -> bool {
    (200..=226).contains(&status)
}

/// Result of handling one message from the process topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Delivered,
    /// No enabled webhook of the destination subscribes to the type.
    Unhandled,
    WebhookNotFound,
    /// Already delivered, abandoned, or owned by the retry loop.
    Skipped,
}

/// True when handling a message failed for a reason that may clear up on its own.
///
/// Undecodable messages and rows that do not exist never will. Transport failures are
/// already recorded and owned by the retry loop.
fn is_redeliverable(err: &WebhooksServiceError) -> bool {
    !matches!(
        err,
        WebhooksServiceError::DecodeFailure(_)
            | WebhooksServiceError::TransportFailure(_)
            | WebhooksServiceError::EventNotFound
    )
}

/// Counts from one retry scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub delivered: usize,
    pub failed: usize,
    pub abandoned: usize,
    /// Rows another replica claimed first.
    pub skipped: usize,
}

pub struct Dispatcher<W, E, T> {
    webhooks: W,
    events: E,
    transport: T,
    broker: Arc<dyn PubSub>,
    policy: RetryPolicy,
}

impl<W, E, T> Dispatcher<W, E, T>
where
    W: WebhookRepository,
    E: EventRepository,
    T: WebhookTransport,
{
    pub fn new(
        webhooks: W,
        events: E,
        transport: T,
        broker: Arc<dyn PubSub>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            webhooks,
            events,
            transport,
            broker,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Record a message from the receive topic and hand it to the process topic.
    ///
    /// Duplicates are recorded once and handed on again; processing skips settled rows.
    /// When the event cannot be recorded the raw message is published back onto the
    /// receive topic after [`REDELIVERY_DELAY`].
    pub async fn receive(&self, raw: Bytes) -> Result<(), WebhooksServiceError> {
        let event: Event = serde_json::from_slice(&raw)
            .map_err(|e| WebhooksServiceError::DecodeFailure(e.to_string()))?;

        match self.events.add_event(&event, Utc::now()).await {
            Ok(true) => tracing::debug!(event_id = %event.event_id, event_type = %event.event_type, "event recorded"),
            Ok(false) => tracing::debug!(event_id = %event.event_id, "event already recorded"),
            Err(e) => {
                tracing::error!(
                    event_id = %event.event_id,
                    error = %e,
                    "failed to record event, redelivering"
                );
                tokio::time::sleep(REDELIVERY_DELAY).await;
                self.broker.publish(WEBHOOK_RECEIVE_TOPIC, raw).await?;
                return Err(e);
            }
        }

        self.broker.publish_json(WEBHOOK_PROCESS_TOPIC, &event).await?;
        Ok(())
    }

    /// Handle a message from the process topic, redelivering it on a recoverable failure.
    ///
    /// The broker has already acknowledged the message, and a row whose first attempt never
    /// ran is not due for retry, so the process topic is the only way back in. Redelivered
    /// messages land on the guard in [`Dispatcher::process`] and never double-send a settled
    /// row.
    pub async fn handle_process_message(
        &self,
        raw: Bytes,
    ) -> Result<ProcessOutcome, WebhooksServiceError> {
        let result = self.process_raw(raw.clone()).await;
        if let Err(e) = &result {
            if is_redeliverable(e) {
                tracing::error!(error = %e, "failed to process event, redelivering");
                tokio::time::sleep(REDELIVERY_DELAY).await;
                self.broker.publish(WEBHOOK_PROCESS_TOPIC, raw).await?;
            }
        }
        result
    }

    /// Decode a message from the process topic and deliver it.
    pub async fn process_raw(&self, raw: Bytes) -> Result<ProcessOutcome, WebhooksServiceError> {
        let event: Event = serde_json::from_slice(&raw)
            .map_err(|e| WebhooksServiceError::DecodeFailure(e.to_string()))?;
        self.process(&event).await
    }

    /// Match a recorded event to a webhook and deliver it.
    pub async fn process(&self, event: &Event) -> Result<ProcessOutcome, WebhooksServiceError> {
        let stored = self
            .events
            .find_event(&event.event_id)
            .await?
            .ok_or(WebhooksServiceError::EventNotFound)?;
        let delivery = &stored.delivery;
        // Rows with failed attempts belong to the retry loop.
        if delivery.sent || !delivery.retry || delivery.attempts > 0 {
            tracing::debug!(event_id = %event.event_id, "event already settled, skipping");
            return Ok(ProcessOutcome::Skipped);
        }

        let event = &stored.event;
        if !self
            .webhooks
            .is_event_handled(&event.destination, &event.event_type)
            .await?
        {
            self.events
                .disable_retry_flag(&event.event_id, TerminalReason::Unhandled)
                .await?;
            tracing::info!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "no webhook subscribed to event"
            );
            return Ok(ProcessOutcome::Unhandled);
        }

        let Some(webhook) = self
            .webhooks
            .webhook_by_owner_and_event_type(&event.destination, &event.event_type)
            .await?
        else {
            self.events
                .disable_retry_flag(&event.event_id, TerminalReason::WebhookNotFound)
                .await?;
            tracing::info!(event_id = %event.event_id, "matching webhook vanished");
            return Ok(ProcessOutcome::WebhookNotFound);
        };

        self.send_event(event, &webhook).await?;
        Ok(ProcessOutcome::Delivered)
    }

    /// Attempt every event whose backoff has passed.
    ///
    /// Each row is claimed before it is attempted, so replicas scanning concurrently never
    /// post the same row twice in one backoff window.
    pub async fn retry_pending(&self) -> Result<RetrySummary, WebhooksServiceError> {
        let now = Utc::now();
        let pending = self.events.pending_events(now).await?;
        let lease = chrono::Duration::seconds(RETRY_LEASE_SECS);
        let mut summary = RetrySummary::default();
        for stored in &pending {
            match self.events.claim_retry(stored, now, lease).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(event_id = %stored.event.event_id, "retry claimed elsewhere");
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(event_id = %stored.event.event_id, error = %e, "failed to claim retry");
                    continue;
                }
            }
            match self.retry_one(stored).await {
                Ok(true) => summary.delivered += 1,
                Ok(false) => summary.abandoned += 1,
                Err(WebhooksServiceError::TransportFailure(_)) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(event_id = %stored.event.event_id, error = %e, "retry failed");
                }
            }
        }
        if !pending.is_empty() {
            tracing::info!(
                pending = pending.len(),
                delivered = summary.delivered,
                failed = summary.failed,
                abandoned = summary.abandoned,
                skipped = summary.skipped,
                "retry scan finished"
            );
        }
        Ok(summary)
    }

    async fn retry_one(&self, stored: &StoredEvent) -> Result<bool, WebhooksServiceError> {
        let event = &stored.event;
        match self
            .webhooks
            .webhook_by_owner_and_event_type(&event.destination, &event.event_type)
            .await?
        {
            Some(webhook) => {
                self.send_event(event, &webhook).await?;
                Ok(true)
            }
            None => {
                self.events
                    .disable_retry_flag(&event.event_id, TerminalReason::WebhookNotFound)
                    .await?;
                tracing::info!(event_id = %event.event_id, "webhook removed, abandoning retries");
                Ok(false)
            }
        }
    }

    /// Sign and POST `event` to `webhook`, then record the outcome.
    ///
    /// A 2xx response marks the event sent. Anything else counts a failed attempt,
    /// schedules the next one, and returns [`WebhooksServiceError::TransportFailure`].
    pub async fn send_event(&self, event: &Event, webhook: &Webhook) -> Result<(), WebhooksServiceError> {
        let response = match build_request(event, webhook) {
            Ok((headers, body)) => self.transport.post(&webhook.url, headers, body).await,
            Err(e) => Err(e),
        };

        match response {
            Ok(status) if is_success(status) => {
                self.events.set_sent_status(&event.event_id).await?;
                tracing::info!(
                    event_id = %event.event_id,
                    webhook_id = %webhook.id,
                    status,
                    "event delivered"
                );
                Ok(())
            }
            Ok(status) => {
                self.record_failure(event, webhook, format!("subscriber responded with status {status}"))
                    .await
            }
            Err(e) => self.record_failure(event, webhook, e.to_string()).await,
        }
    }

    async fn record_failure(
        &self,
        event: &Event,
        webhook: &Webhook,
        reason: String,
    ) -> Result<(), WebhooksServiceError> {
        let attempts = self
            .events
            .increase_failed_attempts(&event.event_id, &self.policy)
            .await?;
        if self.policy.is_exhausted(attempts) {
            self.events
                .disable_retry_flag(&event.event_id, TerminalReason::MaxAttempts)
                .await?;
            tracing::warn!(
                event_id = %event.event_id,
                webhook_id = %webhook.id,
                attempts,
                reason = %reason,
                "delivery failed, giving up"
            );
        } else {
            tracing::warn!(
                event_id = %event.event_id,
                webhook_id = %webhook.id,
                attempts,
                backoff_secs = self.policy.backoff(attempts).num_seconds(),
                reason = %reason,
                "delivery failed, retry scheduled"
            );
        }
        Err(WebhooksServiceError::TransportFailure(reason))
    }
}

fn build_request(event: &Event, webhook: &Webhook) -> Result<(HeaderMap, Vec<u8>), WebhooksServiceError> {
    let body = serde_json::to_vec(&event.for_delivery())
        .map_err(|e| WebhooksServiceError::TransportFailure(format!("failed to encode event: {e}")))?;
    let signature = signing::sign(event.payload_bytes(), webhook.secret.as_bytes());
    let event_type = HeaderValue::from_str(&event.event_type).map_err(|_| {
        WebhooksServiceError::TransportFailure("event type is not a valid header value".to_owned())
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static(SIGNATURE_HEADER),
        HeaderValue::from_str(&signature).map_err(|_| {
            WebhooksServiceError::TransportFailure("signature is not a valid header value".to_owned())
        })?,
    );
    headers.insert(HeaderName::from_static(EVENT_TYPE_HEADER), event_type);
    Ok((headers, body))
}
