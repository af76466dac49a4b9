//! Redis Streams binding.
//!
//! A topic is a stream. A subscription is a consumer group on that stream: competing
//! consumers share one group named after the subscription, fan-out subscribers each get
//! their own minted group (`{sub_name}-0001`, `{sub_name}-0002`, ...). Each subscription runs
//! a reader task that moves entries into the subscription channel and acknowledges them once
//! handed off. A batch that was read is always handed off in full, even after cancellation.
//!
//! Entries left pending by a consumer that died between read and acknowledgement are taken
//! over with `XAUTOCLAIM` (Redis 7 or later) once they have been idle for
//! [`RedisPubSubConfig::claim_idle`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::Pool;
use deadpool_redis::redis::{self, RedisError};
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::subscription::SUBSCRIPTION_BUFFER;
use crate::{Discipline, PubSub, PubSubError, Subscription};

/// Stream entry field holding the message bytes.
const PAYLOAD_FIELD: &str = "payload";

/// Pause after a failed read before polling again.
const READ_RETRY_DELAY: Duration = Duration::from_secs(1);

type Entry = (String, HashMap<String, Vec<u8>>);
type ReadReply = Option<Vec<(String, Vec<Entry>)>>;
/// Next cursor, claimed entries, ids of entries deleted while pending.
type ClaimReply = (String, Vec<Entry>, Vec<String>);

/// Cursor that starts and ends an `XAUTOCLAIM` sweep.
const CLAIM_CURSOR_START: &str = "0-0";

#[derive(Debug, Clone)]
pub struct RedisPubSubConfig {
    /// Prefix of this process's consumer name.
    pub app_name: String,
    /// Approximate cap on stream length applied on publish.
    pub stream_max_len: usize,
    /// Entries fetched per read.
    pub batch_size: usize,
    /// How long a read blocks waiting for entries.
    pub block: Duration,
    /// Idle time after which another consumer's pending entry is reclaimed.
    pub claim_idle: Duration,
}

impl Default for RedisPubSubConfig {
    fn default() -> Self {
        Self {
            app_name: "veganbase".to_owned(),
            stream_max_len: 100_000,
            batch_size: 16,
            block: Duration::from_secs(5),
            claim_idle: Duration::from_secs(60),
        }
    }
}

pub struct RedisPubSub {
    pool: Pool,
    config: RedisPubSubConfig,
    consumer: String,
    root: CancellationToken,
    /// Topics already verified to exist as streams.
    known_topics: Mutex<HashSet<String>>,
    /// (topic, group) of every fan-out group minted by this client.
    fanout_groups: Mutex<Vec<(String, String)>>,
}

impl RedisPubSub {
    pub fn new(pool: Pool, config: RedisPubSubConfig) -> Self {
        let consumer = format!("{}-{}", config.app_name, Uuid::new_v4().simple());
        Self {
            pool,
            config,
            consumer,
            root: CancellationToken::new(),
            known_topics: Mutex::new(HashSet::new()),
            fanout_groups: Mutex::new(Vec::new()),
        }
    }

    /// Consumer name this process registers in every group it reads from.
    pub fn consumer_name(&self) -> &str {
        &self.consumer
    }

    /// Make sure `topic` exists as a stream, creating it empty if absent.
    async fn ensure_topic(&self, topic: &str) -> Result<(), PubSubError> {
        let mut known = self.known_topics.lock().await;
        if known.contains(topic) {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        let kind: String = redis::cmd("TYPE").arg(topic).query_async(&mut conn).await?;
        match kind.as_str() {
            "stream" => {}
            "none" => {
                let _: String = redis::cmd("XADD")
                    .arg(topic)
                    .arg("MAXLEN")
                    .arg(0)
                    .arg("*")
                    .arg("init")
                    .arg(1)
                    .query_async(&mut conn)
                    .await?;
                tracing::info!(topic, "created topic");
            }
            other => {
                tracing::error!(topic, kind = other, "topic key holds a non-stream value");
                return Err(PubSubError::UnknownTopic {
                    topic: topic.to_owned(),
                });
            }
        }
        known.insert(topic.to_owned());
        Ok(())
    }

    /// Create a consumer group. Returns `false` when the group already exists.
    async fn create_group(&self, topic: &str, group: &str, start: &str) -> Result<bool, PubSubError> {
        let mut conn = self.pool.get().await?;
        let created: Result<String, RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg(start)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(_) => Ok(true),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn mint_fanout_group(&self, topic: &str, sub_name: &str) -> Result<String, PubSubError> {
        let mut minted = self.fanout_groups.lock().await;
        let mut n = 1u32;
        loop {
            let candidate = format!("{sub_name}-{n:04}");
            // Fan-out groups only see messages published after they join.
            if self.create_group(topic, &candidate, "$").await? {
                minted.push((topic.to_owned(), candidate.clone()));
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PubSubError> {
        if self.root.is_cancelled() {
            return Err(PubSubError::Closed);
        }
        self.ensure_topic(topic).await?;
        let mut conn = self.pool.get().await?;
        let id: String = redis::cmd("XADD")
            .arg(topic)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.stream_max_len)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload.as_ref())
            .query_async(&mut conn)
            .await?;
        tracing::debug!(topic, id = %id, "published message");
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
        self.ensure_topic(topic).await?;
        let group = match discipline {
            Discipline::CompetingConsumers => {
                // Work queues start from the beginning so backlog published before the
                // first worker joined is still processed.
                self.create_group(topic, sub_name, "0").await?;
                sub_name.to_owned()
            }
            Discipline::Fanout => self.mint_fanout_group(topic, sub_name).await?,
        };

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = self.root.child_token();
        let reader = Reader {
            pool: self.pool.clone(),
            topic: topic.to_owned(),
            group: group.clone(),
            consumer: self.consumer.clone(),
            batch_size: self.config.batch_size,
            block: self.config.block,
            claim_idle: self.config.claim_idle,
        };
        tokio::spawn(reader.run(tx, cancel.clone()));

        tracing::info!(topic, subscription = %group, ?discipline, "subscribed");
        Ok(Subscription::new(group, rx, cancel))
    }

    async fn close(&self) -> Result<(), PubSubError> {
        self.root.cancel();
        let minted = std::mem::take(&mut *self.fanout_groups.lock().await);
        if !minted.is_empty() {
            let mut conn = self.pool.get().await?;
            for (topic, group) in &minted {
                let destroyed: Result<i64, RedisError> = redis::cmd("XGROUP")
                    .arg("DESTROY")
                    .arg(topic)
                    .arg(group)
                    .query_async(&mut conn)
                    .await;
                if let Err(e) = destroyed {
                    tracing::warn!(topic = %topic, group = %group, error = %e, "failed to delete fan-out group");
                }
            }
        }
        // XADD returns only after the server accepted the entry, nothing is buffered client-side.
        tracing::info!(fanout_groups = minted.len(), "pubsub client closed");
        Ok(())
    }
}

struct Reader {
    pool: Pool,
    topic: String,
    group: String,
    consumer: String,
    batch_size: usize,
    block: Duration,
    claim_idle: Duration,
}

fn decode_entries(entries: Vec<Entry>) -> Vec<(String, Option<Bytes>)> {
    entries
        .into_iter()
        .map(|(id, mut fields)| {
            let payload = fields.remove(PAYLOAD_FIELD).map(Bytes::from);
            (id, payload)
        })
        .collect()
}

fn reclaim_due(last: Option<Instant>, now: Instant, idle: Duration) -> bool {
    last.is_none_or(|at| now.duration_since(at) >= idle)
}

impl Reader {
    async fn run(self, tx: mpsc::Sender<Bytes>, cancel: CancellationToken) {
        let mut last_reclaim = None;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let now = Instant::now();
            if reclaim_due(last_reclaim, now, self.claim_idle) {
                last_reclaim = Some(now);
                if !self.reclaim(&tx).await {
                    return;
                }
                continue;
            }
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = self.read_batch() => batch,
            };
            let entries = match batch {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(topic = %self.topic, group = %self.group, error = %e, "stream read failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(READ_RETRY_DELAY) => continue,
                    }
                }
            };
            if !self.hand_off(&tx, entries).await {
                return;
            }
        }
        tracing::debug!(topic = %self.topic, group = %self.group, "subscription reader stopped");
    }

    /// Move `entries` into the subscription channel, acknowledging each one after handoff.
    /// Returns `false` once the subscriber is gone.
    async fn hand_off(&self, tx: &mpsc::Sender<Bytes>, entries: Vec<(String, Option<Bytes>)>) -> bool {
        for (id, payload) in entries {
            if let Some(payload) = payload {
                if tx.send(payload).await.is_err() {
                    tracing::debug!(topic = %self.topic, group = %self.group, "subscriber dropped");
                    return false;
                }
            } else {
                tracing::warn!(topic = %self.topic, id = %id, "stream entry without payload field");
            }
            if let Err(e) = self.ack(&id).await {
                tracing::warn!(topic = %self.topic, id = %id, error = %e, "failed to acknowledge entry");
            }
        }
        true
    }

    /// Take over and hand off every entry of the group that has been pending too long.
    /// Returns `false` once the subscriber is gone.
    async fn reclaim(&self, tx: &mpsc::Sender<Bytes>) -> bool {
        let mut cursor = CLAIM_CURSOR_START.to_owned();
        loop {
            let (next, entries) = match self.claim_batch(&cursor).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::warn!(topic = %self.topic, group = %self.group, error = %e, "failed to reclaim pending entries");
                    return true;
                }
            };
            if !entries.is_empty() {
                tracing::info!(topic = %self.topic, group = %self.group, count = entries.len(), "reclaimed pending entries");
            }
            if !self.hand_off(tx, entries).await {
                return false;
            }
            if next == CLAIM_CURSOR_START {
                return true;
            }
            cursor = next;
        }
    }

    async fn claim_batch(
        &self,
        cursor: &str,
    ) -> Result<(String, Vec<(String, Option<Bytes>)>), PubSubError> {
        let mut conn = self.pool.get().await?;
        let (next, entries, deleted): ClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.topic)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.claim_idle.as_millis() as u64)
            .arg(cursor)
            .arg("COUNT")
            .arg(self.batch_size)
            .query_async(&mut conn)
            .await?;
        if !deleted.is_empty() {
            tracing::warn!(topic = %self.topic, group = %self.group, count = deleted.len(), "pending entries were trimmed before delivery");
        }
        Ok((next, decode_entries(entries)))
    }

    async fn read_batch(&self) -> Result<Vec<(String, Option<Bytes>)>, PubSubError> {
        let mut conn = self.pool.get().await?;
        let reply: ReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(self.batch_size)
            .arg("BLOCK")
            .arg(self.block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.topic)
            .arg(">")
            .query_async(&mut conn)
            .await?;
        let entries = reply
            .into_iter()
            .flatten()
            .flat_map(|(_, entries)| entries)
            .collect();
        Ok(decode_entries(entries))
    }

    async fn ack(&self, id: &str) -> Result<(), PubSubError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = redis::cmd("XACK")
            .arg(&self.topic)
            .arg(&self.group)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
