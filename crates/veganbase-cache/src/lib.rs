//! Bounded LRU cache invalidated through fan-out broker messages.
//!
//! Every process holding an [`InvalidationCache`] subscribes to the invalidation topic in
//! fan-out mode, so a single [`publish_invalidation`] drops the key from every replica.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use lru::LruCache;
use veganbase_pubsub::{CancelHandle, Discipline, PubSub, PubSubError, PubSubExt, Subscription};

type Entries<V> = Arc<Mutex<LruCache<String, V>>>;

pub struct InvalidationCache<V> {
    entries: Entries<V>,
    invalidator: CancelHandle,
}

impl<V: Clone + Send + 'static> InvalidationCache<V> {
    /// Build a cache holding at most `capacity` entries and start its invalidator.
    ///
    /// Fails when the fan-out subscription cannot be opened; callers treat that as fatal.
    pub async fn new<P: PubSub + ?Sized>(
        capacity: NonZeroUsize,
        broker: &P,
        topic: &str,
        app_name: &str,
    ) -> Result<Self, PubSubError> {
        let subscription = broker
            .subscribe(topic, &format!("{topic}.{app_name}"), Discipline::Fanout)
            .await?;
        let entries: Entries<V> = Arc::new(Mutex::new(LruCache::new(capacity)));
        let invalidator = subscription.cancel_handle();
        tracing::info!(topic, subscription = subscription.name(), "cache invalidator started");
        tokio::spawn(invalidate(entries.clone(), subscription));
        Ok(Self { entries, invalidator })
    }
}

impl<V: Clone> InvalidationCache<V> {
    /// Look up `key`, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Insert or refresh `key`. Evicts the least recently used entry when full.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.lock().put(key.into(), value);
    }

    pub fn delete(&self, key: &str) {
        self.lock().pop(key);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> Drop for InvalidationCache<V> {
    fn drop(&mut self) {
        self.invalidator.cancel();
    }
}

async fn invalidate<V>(entries: Entries<V>, mut messages: Subscription) {
    while let Some(message) = messages.next().await {
        match serde_json::from_slice::<String>(&message) {
            Ok(key) => {
                entries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop(&key);
                tracing::debug!(key = %key, "cache entry invalidated");
            }
            Err(e) => {
                tracing::warn!(
                    subscription = messages.name(),
                    error = %e,
                    "skipping malformed invalidation message"
                );
            }
        }
    }
    tracing::debug!(subscription = messages.name(), "cache invalidator stopped");
}

/// Drop `key` from every cache subscribed to `topic`.
pub async fn publish_invalidation<P: PubSub + ?Sized>(
    broker: &P,
    topic: &str,
    key: &str,
) -> Result<(), PubSubError> {
    broker.publish_json(topic, key).await
}
