//! Broker abstraction shared by every Veganbase service.
//!
//! A broker is the capability set `{publish, subscribe, close}`. Subscriptions come in two
//! disciplines: competing consumers (work queues) and fan-out (every process sees every
//! message). Three bindings are provided:
//!
//! - [`RedisPubSub`]: production binding on Redis Streams consumer groups
//! - [`MemoryBroker`]: in-process broker with full semantics, one client per simulated process
//! - [`MockPubSub`]: records publishes, yields empty subscriptions
//!
//! Delivery is at-least-once; consumers must be idempotent.

use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

pub mod error;
pub mod memory;
pub mod mock;
pub mod redis;
pub mod subscription;

pub use error::PubSubError;
pub use memory::{MemoryBroker, MemoryPubSub};
pub use mock::MockPubSub;
pub use redis::{RedisPubSub, RedisPubSubConfig};
pub use subscription::{CancelHandle, Discipline, Subscription};

/// Uniform publish/subscribe contract implemented by every broker binding.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Enqueue raw bytes on `topic`. Returns once the broker accepted the bytes.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PubSubError>;

    /// Open a subscription on `topic`.
    ///
    /// `CompetingConsumers` subscriptions sharing `sub_name` split the messages between them.
    /// `Fanout` subscriptions get a process-unique name derived from `sub_name`, removed again
    /// by [`PubSub::close`].
    async fn subscribe(
        &self,
        topic: &str,
        sub_name: &str,
        discipline: Discipline,
    ) -> Result<Subscription, PubSubError>;

    /// Cancel every subscription, delete the fan-out subscriptions this client created,
    /// then flush outstanding publishes.
    async fn close(&self) -> Result<(), PubSubError>;
}

/// JSON convenience on top of [`PubSub::publish`].
pub trait PubSubExt: PubSub {
    fn publish_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        message: &T,
    ) -> impl Future<Output = Result<(), PubSubError>> + Send {
        let encoded = serde_json::to_vec(message).map(Bytes::from);
        async move { self.publish(topic, encoded?).await }
    }
}

impl<P: PubSub + ?Sized> PubSubExt for P {}
