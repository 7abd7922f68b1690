//! Reconciliation scanner.
//!
//! Out-of-band sweep that compares local subscription state against the
//! provider's authoritative view and repairs drift through the same mutation
//! path as the webhook ingestor, so the two can never diverge in behavior.
//! Each account's repair is its own short write; a failed or timed-out
//! provider query skips that account and the sweep continues.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use entitle_core::{map_provider_status, IngestStatus, ProviderEvent, ProviderEventKind};
use entitle_store::{RocksStore, Store, StoreError};

use crate::provider::ProviderGateway;

/// Summary of one reconciliation sweep.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanReport {
    /// Accounts with a provider subscription reference that were checked.
    pub checked: u64,

    /// Accounts whose local status disagreed with the provider.
    pub drift_detected: u64,

    /// Accounts repaired this sweep.
    pub repaired: u64,

    /// Accounts skipped because the provider query or repair failed.
    pub failed: u64,
}

/// The reconciliation scanner.
pub struct Scanner {
    store: Arc<RocksStore>,
    gateway: Arc<dyn ProviderGateway>,
    query_timeout: Duration,
}

impl Scanner {
    /// Create a scanner over a store and provider gateway.
    #[must_use]
    pub fn new(
        store: Arc<RocksStore>,
        gateway: Arc<dyn ProviderGateway>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            query_timeout,
        }
    }

    /// Sweep all accounts holding a provider subscription reference.
    ///
    /// # Errors
    ///
    /// Returns an error only if the account listing itself fails; per-account
    /// problems are counted in the report and never abort the sweep.
    pub async fn scan(&self) -> Result<ScanReport, StoreError> {
        let accounts = self.store.list_subscribed_accounts()?;
        let mut report = ScanReport::default();

        for account in accounts {
            let Some(subscription_id) = account.provider_subscription_id.clone() else {
                continue;
            };
            report.checked += 1;

            let remote = match tokio::time::timeout(
                self.query_timeout,
                self.gateway.subscription_state(&subscription_id),
            )
            .await
            {
                Ok(Ok(remote)) => remote,
                Ok(Err(e)) => {
                    tracing::warn!(
                        account_id = %account.id,
                        subscription_id = %subscription_id,
                        error = %e,
                        "provider query failed, skipping account"
                    );
                    report.failed += 1;
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        account_id = %account.id,
                        subscription_id = %subscription_id,
                        "provider query timed out, skipping account"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let Some(remote_status) = map_provider_status(&remote.status) else {
                tracing::warn!(
                    account_id = %account.id,
                    status = %remote.status,
                    "provider reported unknown status, skipping account"
                );
                report.failed += 1;
                continue;
            };

            if remote_status == account.status {
                continue;
            }

            report.drift_detected += 1;
            tracing::info!(
                account_id = %account.id,
                subscription_id = %subscription_id,
                before = %account.status.as_str(),
                after = %remote_status.as_str(),
                "provider drift detected, repairing"
            );

            // The synthetic event reuses the webhook mutation path. Its
            // transaction ID folds in the account version, so re-scanning
            // unchanged drift is idempotent while later drift still applies.
            let event = ProviderEvent {
                event_id: format!("recon-{subscription_id}-{}", account.version),
                transaction_id: format!("recon:{subscription_id}:{}", account.version),
                kind: ProviderEventKind::SubscriptionUpdated,
                subscription_id: Some(subscription_id.clone()),
                customer_id: remote.customer_id.clone(),
                status: Some(remote.status.clone()),
                credits: None,
                amount_cents: None,
                occurred_at: Utc::now(),
            };
            let payload = serde_json::json!({
                "source": "reconciliation",
                "subscription_id": subscription_id,
                "status": remote.status,
            });

            match self
                .store
                .apply_provider_event(&event, &payload, Utc::now())
            {
                Ok(outcome) if outcome.status == IngestStatus::Applied => {
                    report.repaired += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        account_id = %account.id,
                        error = %e,
                        "drift repair failed, skipping account"
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            drift_detected = report.drift_detected,
            repaired = report.repaired,
            failed = report.failed,
            "reconciliation sweep finished"
        );

        Ok(report)
    }
}
