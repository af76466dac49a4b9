use std::sync::Arc;

use serde::Deserialize;
use serde_json::value::RawValue;

use veganbase_domain::event::{Event, WEBHOOK_RECEIVE_TOPIC};
use veganbase_pubsub::{PubSub, PubSubExt};

use crate::error::WebhooksServiceError;

/// Body of `POST /webhooks/send-test-event`.
#[derive(Debug, Deserialize)]
pub struct TestEventTemplate {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
    /// Admin-only override of the target owner.
    #[serde(default)]
    pub destination: Option<String>,
}

/// Who is asking for the test event.
pub struct Caller<'a> {
    pub owner: &'a str,
    pub is_admin: bool,
}

pub struct SendTestEventUseCase {
    pub broker: Arc<dyn PubSub>,
}

impl SendTestEventUseCase {
    /// Publish a synthetic event straight onto the receive topic.
    pub async fn execute(
        &self,
        caller: Caller<'_>,
        template: TestEventTemplate,
    ) -> Result<Event, WebhooksServiceError> {
        let event_type = template.event_type.trim();
        if event_type.is_empty() {
            return Err(WebhooksServiceError::InvalidRequest(
                "type must not be empty".to_owned(),
            ));
        }

        let destination = match template.destination {
            Some(destination) if destination != caller.owner && !caller.is_admin => {
                return Err(WebhooksServiceError::Forbidden);
            }
            Some(destination) => destination,
            None => caller.owner.to_owned(),
        };

        let payload = match template.payload {
            Some(payload) => payload,
            None => RawValue::from_string("{}".to_owned())
                .map_err(|e| WebhooksServiceError::Internal(e.into()))?,
        };

        let event = Event::new_test(destination, event_type, payload);
        self.broker.publish_json(WEBHOOK_RECEIVE_TOPIC, &event).await?;
        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            destination = %event.destination,
            "test event published"
        );
        Ok(event)
    }
}
