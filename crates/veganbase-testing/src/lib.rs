//! Test utilities for Veganbase services.
//!
//! Import from `[dev-dependencies]` only.

pub mod auth;
