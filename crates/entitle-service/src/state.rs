//! Application state.

use std::sync::Arc;
use std::time::Duration;

use entitle_store::RocksStore;

use crate::config::ServiceConfig;
use crate::provider::{HttpProviderGateway, ProviderGateway};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<RocksStore>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Provider gateway for reconciliation queries (optional).
    pub gateway: Option<Arc<dyn ProviderGateway>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<RocksStore>, config: ServiceConfig) -> Self {
        let gateway = config
            .provider_api_url
            .as_ref()
            .zip(config.provider_api_key.as_ref())
            .and_then(|(url, key)| {
                let timeout = Duration::from_secs(config.provider_timeout_seconds);
                match HttpProviderGateway::new(url, key, timeout) {
                    Ok(client) => {
                        tracing::info!(provider_url = %url, "Provider gateway enabled");
                        Some(Arc::new(client) as Arc<dyn ProviderGateway>)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to create provider gateway");
                        None
                    }
                }
            });

        if gateway.is_none() {
            tracing::warn!("Provider not configured - reconciliation will be unavailable");
        }

        if config.provider_webhook_secret.is_none() {
            tracing::warn!("Provider webhook secret not configured - webhooks will be rejected");
        }

        Self {
            store,
            config,
            gateway,
        }
    }

    /// Create state with an explicit gateway (used by tests).
    #[must_use]
    pub fn with_gateway(
        store: Arc<RocksStore>,
        config: ServiceConfig,
        gateway: Arc<dyn ProviderGateway>,
    ) -> Self {
        Self {
            store,
            config,
            gateway: Some(gateway),
        }
    }
}
