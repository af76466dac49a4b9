//! Domain types shared across all Veganbase services.
//!
//! This crate contains only pure types with no framework dependencies.

pub mod event;
pub mod id;
