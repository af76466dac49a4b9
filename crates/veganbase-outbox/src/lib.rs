//! Transactional outbox shared by producing services.
//!
//! Producers call [`Outbox::emit`] (or [`Outbox::trigger_webhook_event`] for webhook
//! events). Local durability is guaranteed; broker delivery is best-effort but auditable
//! from the `events` table, so consumers must be idempotent on `event_id`.

pub mod error;
pub mod events;
pub mod outbox;

pub use error::OutboxError;
pub use outbox::Outbox;
