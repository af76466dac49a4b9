use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::id::EventId;

/// Topic producers emit webhook events onto. Consumed by the webhook dispatcher.
pub const WEBHOOK_RECEIVE_TOPIC: &str = "wh-receive-event-queue";

/// Internal work topic between the dispatcher's receive and process loops.
pub const WEBHOOK_PROCESS_TOPIC: &str = "wh-process-event-queue";

/// An immutable record of something that happened in a producer service.
///
/// `payload` is kept as raw JSON so the bytes a producer emitted are exactly the bytes a
/// subscriber receives (and the bytes the delivery signature covers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    /// Owner tag used for subscription matching. Never sent to subscribers.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub destination: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub livemode: bool,
    pub created_at: DateTime<Utc>,
    pub payload: Box<RawValue>,
}

impl Event {
    /// Build a new event with a fresh `evt_` identity stamped now.
    pub fn new(
        destination: impl Into<String>,
        event_type: impl Into<String>,
        livemode: bool,
        payload: Box<RawValue>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            destination: destination.into(),
            event_type: event_type.into(),
            livemode,
            created_at: Utc::now(),
            payload,
        }
    }

    /// Build a synthetic test event (`evt_test_` identity, `livemode = false`).
    pub fn new_test(
        destination: impl Into<String>,
        event_type: impl Into<String>,
        payload: Box<RawValue>,
    ) -> Self {
        Self {
            event_id: EventId::new_test(),
            ..Self::new(destination, event_type, false, payload)
        }
    }

    /// The exact payload bytes as emitted by the producer.
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.get().as_bytes()
    }

    /// A copy suitable for external delivery: `destination` is cleared.
    pub fn for_delivery(&self) -> Event {
        Event {
            destination: String::new(),
            ..self.clone()
        }
    }
}
