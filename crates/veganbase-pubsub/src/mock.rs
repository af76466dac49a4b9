use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{Discipline, PubSub, PubSubError, Subscription};

/// Test double that records every publish per topic.
///
/// Subscriptions are empty streams that end immediately.
#[derive(Debug, Default)]
pub struct MockPubSub {
    published: Mutex<HashMap<String, Vec<Bytes>>>,
    reject_publish: bool,
}

impl MockPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose publishes always fail.
    pub fn rejecting() -> Self {
        Self {
            reject_publish: true,
            ..Self::default()
        }
    }

    pub fn published(&self, topic: &str) -> Vec<Bytes> {
        self.published
            .lock()
            .map(|published| published.get(topic).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Decode every message recorded on `topic`. Undecodable messages are skipped.
    pub fn published_json<T: DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.published(topic)
            .iter()
            .filter_map(|bytes| serde_json::from_slice(bytes).ok())
            .collect()
    }
}

#[async_trait]
impl PubSub for MockPubSub {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PubSubError> {
        if self.reject_publish {
            return Err(PubSubError::Rejected("mock broker rejects publishes".to_owned()));
        }
        let mut published = self
            .published
            .lock()
            .map_err(|_| PubSubError::Connection("mock broker poisoned".to_owned()))?;
        published.entry(topic.to_owned()).or_default().push(payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        _topic: &str,
        sub_name: &str,
        _discipline: Discipline,
    ) -> Result<Subscription, PubSubError> {
        let (_, rx) = mpsc::channel(1);
        Ok(Subscription::new(sub_name, rx, CancellationToken::new()))
    }

    async fn close(&self) -> Result<(), PubSubError> {
        Ok(())
    }
}
