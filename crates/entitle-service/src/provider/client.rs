//! HTTP provider gateway client.

use std::time::Duration;

use async_trait::async_trait;

use super::types::{GatewayError, ProviderSubscription, SubscriptionResponse};
use super::ProviderGateway;

/// Reqwest-backed provider gateway.
pub struct HttpProviderGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProviderGateway {
    /// Create a new gateway client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl ProviderGateway for HttpProviderGateway {
    async fn subscription_state(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, GatewayError> {
        let url = format!("{}/subscriptions/{subscription_id}", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(subscription_id.to_string()));
        }
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }

        let body: SubscriptionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(body.into_subscription())
    }
}
