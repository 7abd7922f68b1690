//! Normalized provider response types.
//!
//! Provider SDKs return subscriptions either wrapped in a `data` envelope or
//! as a bare object. Both shapes deserialize here into one internal struct,
//! so nothing downstream branches on provider shape.

use serde::Deserialize;

/// The provider's view of a subscription, normalized.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSubscription {
    /// Provider subscription ID.
    pub id: String,

    /// Raw provider status string ("active", "past_due", ...).
    pub status: String,

    /// Provider customer ID, when included.
    #[serde(default)]
    pub customer_id: Option<String>,
}

/// Raw response shapes accepted from the provider.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum SubscriptionResponse {
    /// Envelope shape: `{ "data": { ... } }`.
    Wrapped {
        /// The enveloped subscription.
        data: ProviderSubscription,
    },

    /// Bare object shape.
    Flat(ProviderSubscription),
}

impl SubscriptionResponse {
    /// Collapse either shape into the normalized struct.
    pub(crate) fn into_subscription(self) -> ProviderSubscription {
        match self {
            Self::Wrapped { data } => data,
            Self::Flat(subscription) => subscription,
        }
    }
}

/// Errors from the provider gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport-level failure.
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("provider returned status {0}")]
    Status(u16),

    /// Subscription not found at the provider.
    #[error("subscription not found: {0}")]
    NotFound(String),

    /// Response body did not match any accepted shape.
    #[error("provider response decode failed: {0}")]
    Decode(String),
}
