use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Number of messages a subscription buffers before the broker reader waits.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 64;

/// Delivery discipline for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Each message goes to exactly one subscriber sharing the subscription name.
    CompetingConsumers,
    /// Each subscriber process receives every message.
    Fanout,
}

/// Lazy sequence of raw JSON messages delivered to one subscriber.
///
/// The stream ends once the subscription is cancelled (after any buffered messages are
/// drained) or the broker client is closed.
pub struct Subscription {
    name: String,
    messages: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
}

impl Subscription {
    pub(crate) fn new(
        name: impl Into<String>,
        messages: mpsc::Receiver<Bytes>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            messages,
            cancel,
        }
    }

    /// The broker-side subscription name. Fan-out subscriptions carry a minted suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }
}

impl Stream for Subscription {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.get_mut().messages.poll_recv(cx)
    }
}

/// Stops a subscription. Observed at the next message boundary.
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}
