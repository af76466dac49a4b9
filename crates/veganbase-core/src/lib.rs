//! HTTP plumbing shared by Veganbase services: health probes, request ids,
//! tracing setup, and serde helpers for API responses.

pub mod health;
pub mod middleware;
pub mod serde;
pub mod tracing;
