//! Prefixed identifiers issued by the platform.
//!
//! Every identifier is a short type prefix followed by a random suffix
//! (`evt_3f0c...`). The suffix is a v4 UUID in simple form, giving 122 bits of entropy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Prefix for production event identifiers.
pub const EVENT_ID_PREFIX: &str = "evt";

/// Prefix for synthetic events published through the test-event endpoint.
pub const TEST_EVENT_ID_PREFIX: &str = "evt_test";

/// Prefix for webhook subscription identifiers.
pub const WEBHOOK_ID_PREFIX: &str = "wh";

fn mint(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Error returned when parsing an identifier with the wrong prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("identifier must start with `{expected_prefix}_`")]
pub struct InvalidId {
    pub expected_prefix: &'static str,
}

/// Identifies an event. Issued at emit time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn new() -> Self {
        Self(mint(EVENT_ID_PREFIX))
    }

    /// Identity for a synthetic event (`evt_test_...`).
    pub fn new_test() -> Self {
        Self(mint(TEST_EVENT_ID_PREFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_test(&self) -> bool {
        self.0.starts_with(TEST_EVENT_ID_PREFIX)
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EventId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("evt_") {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidId {
                expected_prefix: EVENT_ID_PREFIX,
            })
        }
    }
}

/// Identifies a webhook subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookId(pub String);

impl WebhookId {
    pub fn new() -> Self {
        Self(mint(WEBHOOK_ID_PREFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for WebhookId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("wh_") {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidId {
                expected_prefix: WEBHOOK_ID_PREFIX,
            })
        }
    }
}
