//! Auth types shared across Veganbase services.
//!
//! Provides the `IdentityHeaders` extractor for gateway-injected identity.

pub mod identity;
