//! In-process broker.
//!
//! [`MemoryBroker`] is the shared hub standing in for the broker server. Each simulated
//! process obtains its own [`MemoryPubSub`] client via [`MemoryBroker::connect`]; closing a
//! client only tears down the fan-out subscriptions that client created.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::subscription::SUBSCRIPTION_BUFFER;
use crate::{Discipline, PubSub, PubSubError, Subscription};

#[derive(Default)]
struct Hub {
    topics: HashMap<String, Vec<Group>>,
}

struct Group {
    name: String,
    members: Vec<Member>,
    next: usize,
}

struct Member {
    id: u64,
    tx: mpsc::Sender<Bytes>,
}

impl Hub {
    /// One live sender per group, round-robin within the group.
    fn targets(&mut self, topic: &str) -> Vec<mpsc::Sender<Bytes>> {
        let Some(groups) = self.topics.get_mut(topic) else {
            return Vec::new();
        };
        let mut targets = Vec::with_capacity(groups.len());
        for group in groups.iter_mut() {
            group.members.retain(|m| !m.tx.is_closed());
            if group.members.is_empty() {
                continue;
            }
            let idx = group.next % group.members.len();
            group.next = group.next.wrapping_add(1);
            targets.push(group.members[idx].tx.clone());
        }
        targets
    }

    fn remove_member(&mut self, topic: &str, group_name: &str, member_id: u64) {
        let group = self
            .topics
            .get_mut(topic)
            .and_then(|groups| groups.iter_mut().find(|g| g.name == group_name));
        if let Some(group) = group {
            group.members.retain(|m| m.id != member_id);
        }
    }

    fn remove_group(&mut self, topic: &str, group_name: &str) {
        if let Some(groups) = self.topics.get_mut(topic) {
            groups.retain(|g| g.name != group_name);
        }
    }
}

/// Shared in-memory broker. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    hub: Arc<Mutex<Hub>>,
    next_member: Arc<AtomicU64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a client, one per simulated process.
    pub fn connect(&self) -> MemoryPubSub {
        MemoryPubSub {
            broker: self.clone(),
            root: CancellationToken::new(),
            fanout_groups: Mutex::new(Vec::new()),
        }
    }

    /// Names of the subscriptions currently registered on `topic`.
    pub fn subscription_names(&self, topic: &str) -> Vec<String> {
        lock(&self.hub)
            .map(|hub| {
                hub.topics
                    .get(topic)
                    .map(|groups| groups.iter().map(|g| g.name.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

fn lock(hub: &Mutex<Hub>) -> Result<MutexGuard<'_, Hub>, PubSubError> {
    hub.lock()
        .map_err(|_| PubSubError::Connection("memory broker poisoned".to_owned()))
}

/// Per-process client of a [`MemoryBroker`].
pub struct MemoryPubSub {
    broker: MemoryBroker,
    root: CancellationToken,
    /// (topic, subscription name) of every fan-out subscription minted by this client.
    fanout_groups: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PubSubError> {
        if self.root.is_cancelled() {
            return Err(PubSubError::Closed);
        }
        let targets = lock(&self.broker.hub)?.targets(topic);
        for tx in targets {
            // A receiver dropped between selection and send loses this message.
            let _ = tx.send(payload.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        sub_name: &str,
        discipline: Discipline,
    ) -> Result<Subscription, PubSubError> {
        if self.root.is_cancelled() {
            return Err(PubSubError::Closed);
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let member_id = self.broker.next_member.fetch_add(1, Ordering::Relaxed);
        let member = Member { id: member_id, tx };

        let name = {
            let mut hub = lock(&self.broker.hub)?;
            let groups = hub.topics.entry(topic.to_owned()).or_default();
            match discipline {
                Discipline::CompetingConsumers => {
                    match groups.iter_mut().find(|g| g.name == sub_name) {
                        Some(group) => group.members.push(member),
                        None => groups.push(Group {
                            name: sub_name.to_owned(),
                            members: vec![member],
                            next: 0,
                        }),
                    }
                    sub_name.to_owned()
                }
                Discipline::Fanout => {
                    let mut n = 1u32;
                    let name = loop {
                        let candidate = format!("{sub_name}-{n:04}");
                        if !groups.iter().any(|g| g.name == candidate) {
                            break candidate;
                        }
                        n += 1;
                    };
                    groups.push(Group {
                        name: name.clone(),
                        members: vec![member],
                        next: 0,
                    });
                    self.fanout_groups
                        .lock()
                        .map_err(|_| PubSubError::Connection("memory broker poisoned".to_owned()))?
                        .push((topic.to_owned(), name.clone()));
                    name
                }
            }
        };

        tracing::debug!(topic, subscription = %name, "memory subscription opened");

        let cancel = self.root.child_token();
        let watch = cancel.clone();
        let hub = self.broker.hub.clone();
        let (topic, group) = (topic.to_owned(), name.clone());
        tokio::spawn(async move {
            watch.cancelled().await;
            if let Ok(mut hub) = lock(&hub) {
                hub.remove_member(&topic, &group, member_id);
            }
        });

        Ok(Subscription::new(name, rx, cancel))
    }

    async fn close(&self) -> Result<(), PubSubError> {
        self.root.cancel();
        let minted = std::mem::take(
            &mut *self
                .fanout_groups
                .lock()
                .map_err(|_| PubSubError::Connection("memory broker poisoned".to_owned()))?,
        );
        let mut hub = lock(&self.broker.hub)?;
        for (topic, group) in &minted {
            hub.remove_group(topic, group);
        }
        tracing::debug!(removed = minted.len(), "memory pubsub client closed");
        Ok(())
    }
}
