use std::time::Duration;

use anyhow::Context as _;
use http::HeaderMap;

use crate::domain::repository::WebhookTransport;
use crate::error::WebhooksServiceError;

/// Delivers events with `reqwest`. Redirects are not followed.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, WebhooksServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build delivery client")?;
        Ok(Self { client })
    }
}

impl WebhookTransport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        headers: HeaderMap,
        body: Vec<u8>,
    ) -> Result<u16, WebhooksServiceError> {
        let resp = self
            .client
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| WebhooksServiceError::TransportFailure(e.to_string()))?;
        Ok(resp.status().as_u16())
    }
}
