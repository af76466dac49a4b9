pub mod events;
pub mod health;
pub mod subscriptions;
pub mod test_event;
