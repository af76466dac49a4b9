pub mod events;
pub mod subscription;
pub mod test_event;
