use crate::domain::repository::EventRepository;
use crate::domain::types::{DEFAULT_EVENTS_LIMIT, MAX_EVENTS_LIMIT, StoredEvent};
use crate::error::WebhooksServiceError;

pub struct ListEventsUseCase<R: EventRepository> {
    pub repo: R,
}

impl<R: EventRepository> ListEventsUseCase<R> {
    /// Newest events of `destination`. `limit` defaults to 50 and is capped at 200.
    pub async fn execute(
        &self,
        destination: &str,
        limit: Option<u64>,
    ) -> Result<Vec<StoredEvent>, WebhooksServiceError> {
        let limit = limit
            .unwrap_or(DEFAULT_EVENTS_LIMIT)
            .clamp(1, MAX_EVENTS_LIMIT);
        self.repo.list_by_destination(destination, limit).await
    }
}
