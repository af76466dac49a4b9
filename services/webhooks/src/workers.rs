//! Long-lived dispatcher tasks: receive, process and retry.
//!
//! Each loop stops when its cancellation token fires or its subscription ends. On
//! cancellation the subscription is cancelled first and every message already handed to it
//! is still handled, so nothing acknowledged by the broker is dropped. The process loop
//! delivers every message on its own task and waits for in-flight deliveries before
//! returning.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use veganbase_pubsub::Subscription;

use crate::dispatcher::Dispatcher;
use crate::domain::repository::{EventRepository, WebhookRepository, WebhookTransport};
use crate::error::WebhooksServiceError;

/// Competing-consumers subscription shared by every dispatcher replica.
pub const DISPATCHER_SUBSCRIPTION: &str = "webhook-dispatcher";

pub async fn run_receive_loop<W, E, T>(
    dispatcher: Arc<Dispatcher<W, E, T>>,
    mut messages: Subscription,
    cancel: CancellationToken,
) where
    W: WebhookRepository + 'static,
    E: EventRepository + 'static,
    T: WebhookTransport + 'static,
{
    tracing::info!(subscription = messages.name(), "receive loop started");
    loop {
        let raw = tokio::select! {
            _ = cancel.cancelled() => break,
            raw = messages.next() => match raw {
                Some(raw) => raw,
                None => break,
            },
        };
        receive_one(&dispatcher, raw).await;
    }
    messages.cancel_handle().cancel();
    let mut drained = 0usize;
    while let Some(raw) = messages.next().await {
        receive_one(&dispatcher, raw).await;
        drained += 1;
    }
    tracing::info!(drained, "receive loop stopped");
}

async fn receive_one<W, E, T>(dispatcher: &Dispatcher<W, E, T>, raw: Bytes)
where
    W: WebhookRepository,
    E: EventRepository,
    T: WebhookTransport,
{
    match dispatcher.receive(raw).await {
        Ok(()) => {}
        Err(WebhooksServiceError::DecodeFailure(e)) => {
            tracing::warn!(error = %e, "discarding undecodable event");
        }
        Err(e) => tracing::warn!(error = %e, "failed to receive event"),
    }
}

pub async fn run_process_loop<W, E, T>(
    dispatcher: Arc<Dispatcher<W, E, T>>,
    mut messages: Subscription,
    cancel: CancellationToken,
) where
    W: WebhookRepository + 'static,
    E: EventRepository + 'static,
    T: WebhookTransport + 'static,
{
    tracing::info!(subscription = messages.name(), "process loop started");
    let mut in_flight = JoinSet::new();
    loop {
        let raw = tokio::select! {
            _ = cancel.cancelled() => break,
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => continue,
            raw = messages.next() => match raw {
                Some(raw) => raw,
                None => break,
            },
        };
        in_flight.spawn(process_one(dispatcher.clone(), raw));
    }
    messages.cancel_handle().cancel();
    while let Some(raw) = messages.next().await {
        in_flight.spawn(process_one(dispatcher.clone(), raw));
    }
    tracing::info!(in_flight = in_flight.len(), "process loop draining");
    while in_flight.join_next().await.is_some() {}
    tracing::info!("process loop stopped");
}

async fn process_one<W, E, T>(dispatcher: Arc<Dispatcher<W, E, T>>, raw: Bytes)
where
    W: WebhookRepository,
    E: EventRepository,
    T: WebhookTransport,
{
    match dispatcher.handle_process_message(raw).await {
        Ok(outcome) => tracing::debug!(?outcome, "event processed"),
        Err(WebhooksServiceError::DecodeFailure(e)) => {
            tracing::warn!(error = %e, "discarding undecodable event");
        }
        Err(WebhooksServiceError::EventNotFound) => {
            tracing::warn!("dropping message for unrecorded event");
        }
        // Already logged and either redelivered or scheduled for retry.
        Err(_) => {}
    }
}

pub async fn run_retry_loop<W, E, T>(
    dispatcher: Arc<Dispatcher<W, E, T>>,
    period: Duration,
    cancel: CancellationToken,
) where
    W: WebhookRepository + 'static,
    E: EventRepository + 'static,
    T: WebhookTransport + 'static,
{
    tracing::info!(period_secs = period.as_secs(), "retry loop started");
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = dispatcher.retry_pending().await {
            tracing::warn!(error = %e, "retry scan failed");
        }
    }
    tracing::info!("retry loop stopped");
}
