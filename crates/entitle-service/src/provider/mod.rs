//! Payment-provider gateway.
//!
//! The reconciliation scanner treats the provider as an external
//! collaborator behind the [`ProviderGateway`] trait; the HTTP
//! implementation lives in [`client`], and [`types`] normalizes the
//! provider's varying response shapes into one internal struct.

pub mod client;
pub mod types;

pub use client::HttpProviderGateway;
pub use types::{GatewayError, ProviderSubscription};

use async_trait::async_trait;

/// Query capability against the payment provider's authoritative state.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Fetch the provider's view of a subscription.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] on transport, status, or decode failures.
    async fn subscription_state(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, GatewayError>;
}
