use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use veganbase_domain::event::Event;
use veganbase_domain::id::WebhookId;

/// Event type matching every type.
pub const WILDCARD_EVENT_TYPE: &str = "*";

/// Prefix of subscription secrets handed to owners.
pub const SECRET_PREFIX: &str = "whsec";
pub const SECRET_LEN: usize = 32;

pub const DEFAULT_EVENTS_LIMIT: u64 = 50;
pub const MAX_EVENTS_LIMIT: u64 = 200;

/// Backoff unit: attempt N waits N times this long.
pub const BASE_BACKOFF_MINUTES: i64 = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Webhook subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Webhook {
    pub id: WebhookId,
    pub owner: String,
    pub url: String,
    pub enabled: bool,
    pub livemode: bool,
    pub events: Vec<String>,
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

impl Webhook {
    /// True when this webhook is enabled and subscribed to `event_type` (or to every type).
    pub fn handles(&self, event_type: &str) -> bool {
        self.enabled
            && self
                .events
                .iter()
                .any(|e| e == WILDCARD_EVENT_TYPE || e == event_type)
    }
}

/// Fields an owner supplies when registering a webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct NewWebhook {
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub livemode: bool,
    pub events: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Mutable fields of a webhook. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct WebhookPatch {
    pub url: Option<String>,
    pub enabled: Option<bool>,
    pub livemode: Option<bool>,
    pub events: Option<Vec<String>>,
}

/// Why an event stopped being retried without being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// No enabled webhook of the destination subscribes to the type.
    Unhandled,
    /// The matching webhook disappeared before delivery.
    WebhookNotFound,
    /// The attempt ceiling was reached.
    MaxAttempts,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unhandled => "unhandled",
            Self::WebhookNotFound => "webhook_not_found",
            Self::MaxAttempts => "max_attempts",
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerminalReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unhandled" => Ok(Self::Unhandled),
            "webhook_not_found" => Ok(Self::WebhookNotFound),
            "max_attempts" => Ok(Self::MaxAttempts),
            other => Err(format!("unknown terminal reason: {other}")),
        }
    }
}

/// Delivery bookkeeping of a persisted event.
///
/// `sent` implies `sent_at` is set and `retry` is false. A row is due for retry when
/// `retry && attempts > 0` and its backoff window has passed.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryState {
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub retry: bool,
    pub last_retry: Option<DateTime<Utc>>,
    pub backoff_until: Option<DateTime<Utc>>,
    pub terminal_reason: Option<TerminalReason>,
}

impl DeliveryState {
    /// State of a freshly received event.
    pub fn received() -> Self {
        Self {
            sent: false,
            sent_at: None,
            attempts: 0,
            retry: true,
            last_retry: None,
            backoff_until: None,
            terminal_reason: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.retry && self.attempts > 0 && self.backoff_until.is_none_or(|until| now >= until)
    }
}

/// An event as recorded by the dispatcher.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event: Event,
    pub received_at: DateTime<Utc>,
    pub delivery: DeliveryState,
}

/// Linear backoff: attempt N waits `N * base`.
pub fn linear_backoff(attempts: u32, base: Duration) -> Duration {
    base * attempts as i32
}

/// Retry schedule applied after failed deliveries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_backoff: Duration,
    /// `None` retries until delivered.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::minutes(BASE_BACKOFF_MINUTES),
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

impl RetryPolicy {
    /// Policy with a ceiling of `max_attempts`; 0 disables the ceiling.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: (max_attempts > 0).then_some(max_attempts),
            ..Self::default()
        }
    }

    /// How long an event waits after its `attempts`-th failure.
    pub fn backoff(&self, attempts: u32) -> Duration {
        linear_backoff(attempts, self.base_backoff)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}
