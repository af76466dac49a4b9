use chrono::Utc;
use rand::RngExt;

use veganbase_domain::id::WebhookId;

use crate::domain::repository::WebhookRepository;
use crate::domain::types::{NewWebhook, SECRET_LEN, SECRET_PREFIX, Webhook, WebhookPatch};
use crate::error::WebhooksServiceError;

const SECRET_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

fn generate_secret() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SECRET_LEN)
        .map(|_| SECRET_CHARSET[rng.random_range(0..SECRET_CHARSET.len())] as char)
        .collect();
    format!("{SECRET_PREFIX}_{suffix}")
}

fn validate_url(raw: &str) -> Result<(), WebhooksServiceError> {
    let url = url::Url::parse(raw)
        .map_err(|e| WebhooksServiceError::InvalidRequest(format!("invalid url: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(WebhooksServiceError::InvalidRequest(
            "url must be an absolute http(s) url".to_owned(),
        ));
    }
    Ok(())
}

/// Trim, drop empties and duplicates, keep first-seen order.
fn normalize_events(events: Vec<String>) -> Result<Vec<String>, WebhooksServiceError> {
    let mut out: Vec<String> = Vec::with_capacity(events.len());
    for event in events {
        let event = event.trim();
        if !event.is_empty() && !out.iter().any(|e| e == event) {
            out.push(event.to_owned());
        }
    }
    if out.is_empty() {
        return Err(WebhooksServiceError::InvalidRequest(
            "events must name at least one event type".to_owned(),
        ));
    }
    Ok(out)
}

async fn owned_webhook<R: WebhookRepository>(
    repo: &R,
    owner: &str,
    id: &WebhookId,
) -> Result<Webhook, WebhooksServiceError> {
    let webhook = repo
        .find_by_id(id)
        .await?
        .ok_or(WebhooksServiceError::WebhookNotFound)?;
    if webhook.owner != owner {
        return Err(WebhooksServiceError::Forbidden);
    }
    Ok(webhook)
}

// ── ListSubscriptions ────────────────────────────────────────────────────────

pub struct ListSubscriptionsUseCase<R: WebhookRepository> {
    pub repo: R,
}

impl<R: WebhookRepository> ListSubscriptionsUseCase<R> {
    pub async fn execute(&self, owner: &str) -> Result<Vec<Webhook>, WebhooksServiceError> {
        self.repo.list_by_owner(owner).await
    }
}

// ── GetSubscription ──────────────────────────────────────────────────────────

pub struct GetSubscriptionUseCase<R: WebhookRepository> {
    pub repo: R,
}

impl<R: WebhookRepository> GetSubscriptionUseCase<R> {
    pub async fn execute(&self, owner: &str, id: &WebhookId) -> Result<Webhook, WebhooksServiceError> {
        owned_webhook(&self.repo, owner, id).await
    }
}

// ── CreateSubscription ───────────────────────────────────────────────────────

pub struct CreateSubscriptionUseCase<R: WebhookRepository> {
    pub repo: R,
}

impl<R: WebhookRepository> CreateSubscriptionUseCase<R> {
    pub async fn execute(&self, owner: &str, input: NewWebhook) -> Result<Webhook, WebhooksServiceError> {
        validate_url(&input.url)?;
        let webhook = Webhook {
            id: WebhookId::new(),
            owner: owner.to_owned(),
            url: input.url,
            enabled: input.enabled,
            livemode: input.livemode,
            events: normalize_events(input.events)?,
            secret: generate_secret(),
            created_at: Utc::now(),
        };
        self.repo.create(&webhook).await?;
        tracing::info!(webhook_id = %webhook.id, owner, "webhook created");
        Ok(webhook)
    }
}

// ── UpdateSubscription ───────────────────────────────────────────────────────

pub struct UpdateSubscriptionUseCase<R: WebhookRepository> {
    pub repo: R,
}

impl<R: WebhookRepository> UpdateSubscriptionUseCase<R> {
    pub async fn execute(
        &self,
        owner: &str,
        id: &WebhookId,
        patch: WebhookPatch,
    ) -> Result<Webhook, WebhooksServiceError> {
        let mut webhook = owned_webhook(&self.repo, owner, id).await?;
        if let Some(url) = patch.url {
            validate_url(&url)?;
            webhook.url = url;
        }
        if let Some(enabled) = patch.enabled {
            webhook.enabled = enabled;
        }
        if let Some(livemode) = patch.livemode {
            webhook.livemode = livemode;
        }
        if let Some(events) = patch.events {
            webhook.events = normalize_events(events)?;
        }
        self.repo.update(&webhook).await?;
        Ok(webhook)
    }
}

// ── DeleteSubscription ───────────────────────────────────────────────────────

pub struct DeleteSubscriptionUseCase<R: WebhookRepository> {
    pub repo: R,
}

impl<R: WebhookRepository> DeleteSubscriptionUseCase<R> {
    pub async fn execute(&self, owner: &str, id: &WebhookId) -> Result<(), WebhooksServiceError> {
        owned_webhook(&self.repo, owner, id).await?;
        if !self.repo.delete(id).await? {
            return Err(WebhooksServiceError::WebhookNotFound);
        }
        tracing::info!(webhook_id = %id, owner, "webhook deleted");
        Ok(())
    }
}
