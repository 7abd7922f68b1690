//! Payment-provider event normalization and mutation mapping.
//!
//! Provider payloads arrive in varying shapes; the service boundary
//! normalizes every notification into one [`ProviderEvent`] struct, and all
//! internal logic works from that; nothing downstream branches on raw JSON.
//!
//! The mapping from event kind to [`LedgerMutation`] lives here so the
//! webhook ingestor and the reconciliation scanner share one code path and
//! cannot diverge in behavior.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountStatus};
use crate::error::EntitleError;
use crate::AccountId;

/// The fixed set of provider notification kinds this core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderEventKind {
    /// A new subscription started.
    SubscriptionCreated,

    /// Subscription details or status changed.
    SubscriptionUpdated,

    /// Subscription canceled.
    SubscriptionCanceled,

    /// Subscription paused.
    SubscriptionPaused,

    /// Subscription resumed after a pause.
    SubscriptionResumed,

    /// A payment transaction completed (renewal or one-time purchase).
    TransactionCompleted,

    /// A payment transaction failed.
    TransactionFailed,
}

impl ProviderEventKind {
    /// Parse a provider event-type string.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEventType` for anything outside the fixed set.
    pub fn parse(event_type: &str) -> Result<Self, EntitleError> {
        match event_type {
            "subscription_created" => Ok(Self::SubscriptionCreated),
            "subscription_updated" => Ok(Self::SubscriptionUpdated),
            "subscription_canceled" | "subscription_cancelled" => Ok(Self::SubscriptionCanceled),
            "subscription_paused" => Ok(Self::SubscriptionPaused),
            "subscription_resumed" => Ok(Self::SubscriptionResumed),
            "transaction_completed" => Ok(Self::TransactionCompleted),
            "transaction_failed" => Ok(Self::TransactionFailed),
            other => Err(EntitleError::UnknownEventType {
                event_type: other.to_string(),
            }),
        }
    }

    /// Whether this kind concerns a payment transaction entity.
    #[must_use]
    pub const fn is_transaction(self) -> bool {
        matches!(self, Self::TransactionCompleted | Self::TransactionFailed)
    }
}

/// A provider notification, normalized at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEvent {
    /// Provider event ID, unique per notification delivery.
    pub event_id: String,

    /// Provider transaction ID. Distinct from the event ID: one transaction
    /// can generate multiple event kinds, and the idempotency guard keys on
    /// this field.
    pub transaction_id: String,

    /// What happened.
    pub kind: ProviderEventKind,

    /// Provider subscription ID, when the event concerns one.
    pub subscription_id: Option<String>,

    /// Provider customer ID, when present.
    pub customer_id: Option<String>,

    /// Raw provider status string (e.g. "active", "past_due").
    pub status: Option<String>,

    /// Credit grant size for one-time purchase completions.
    pub credits: Option<u64>,

    /// Payment amount in cents, when present.
    pub amount_cents: Option<i64>,

    /// When the provider says the event occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Map a raw provider status string onto the local lifecycle.
///
/// Unlike a permissive default-to-active mapping, unknown statuses return
/// `None` so callers can record and skip them instead of guessing.
#[must_use]
pub fn map_provider_status(status: &str) -> Option<AccountStatus> {
    match status {
        "active" => Some(AccountStatus::Active),
        "trialing" => Some(AccountStatus::Trialing),
        "past_due" => Some(AccountStatus::PastDue),
        "paused" => Some(AccountStatus::Paused),
        "canceled" | "cancelled" => Some(AccountStatus::Canceled),
        _ => None,
    }
}

/// A ledger mutation derived from a provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerMutation {
    /// Attach/refresh the provider subscription reference and status.
    SetSubscription {
        /// The provider subscription ID to record.
        subscription_id: Option<String>,
        /// The mapped lifecycle status.
        status: AccountStatus,
    },

    /// Update only the lifecycle status (webhook updates, drift repair).
    SetSubscriptionStatus {
        /// The mapped lifecycle status.
        status: AccountStatus,
    },

    /// Grant one-time purchased credits. Never touches the subscription
    /// reference, plan, or status: the two are independent and must not
    /// clobber each other.
    GrantPurchasedCredits {
        /// Number of credits to add to the grant.
        amount: u64,
    },

    /// Record a completed subscription payment against the balance.
    RecordPayment {
        /// Payment amount in cents.
        amount_cents: i64,
    },

    /// Record the event without touching the ledger (e.g. failed one-time
    /// purchases).
    RecordOnly,
}

impl LedgerMutation {
    /// Apply this mutation to an account.
    pub fn apply(&self, account: &mut Account, now: DateTime<Utc>) {
        match self {
            Self::SetSubscription {
                subscription_id,
                status,
            } => {
                if let Some(id) = subscription_id {
                    account.provider_subscription_id = Some(id.clone());
                }
                account.status = *status;
            }
            Self::SetSubscriptionStatus { status } => {
                account.status = *status;
            }
            Self::GrantPurchasedCredits { amount } => {
                account.purchased_granted += amount;
            }
            Self::RecordPayment { amount_cents } => {
                account.total_spent_cents += amount_cents;
                if account.balance_cents > 0 {
                    account.balance_cents = (account.balance_cents - amount_cents).max(0);
                }
            }
            Self::RecordOnly => {}
        }
        account.updated_at = now;
    }

    /// Whether applying this mutation writes the account row at all.
    #[must_use]
    pub const fn mutates_ledger(&self) -> bool {
        !matches!(self, Self::RecordOnly)
    }
}

/// Translate a normalized provider event into its ledger mutation.
///
/// Subscription lifecycle kinds become status updates; a completed
/// transaction that carries credits is a one-time purchase and becomes a
/// purchased-credit grant; a completed transaction without credits is a
/// subscription renewal payment; failed transactions are recorded only.
#[must_use]
pub fn map_event(event: &ProviderEvent) -> LedgerMutation {
    let mapped_status = event.status.as_deref().and_then(map_provider_status);

    match event.kind {
        ProviderEventKind::SubscriptionCreated => LedgerMutation::SetSubscription {
            subscription_id: event.subscription_id.clone(),
            status: mapped_status.unwrap_or(AccountStatus::Active),
        },
        ProviderEventKind::SubscriptionUpdated => LedgerMutation::SetSubscriptionStatus {
            status: mapped_status.unwrap_or(AccountStatus::Active),
        },
        ProviderEventKind::SubscriptionCanceled => LedgerMutation::SetSubscriptionStatus {
            status: AccountStatus::Canceled,
        },
        ProviderEventKind::SubscriptionPaused => LedgerMutation::SetSubscriptionStatus {
            status: AccountStatus::Paused,
        },
        ProviderEventKind::SubscriptionResumed => LedgerMutation::SetSubscriptionStatus {
            status: AccountStatus::Active,
        },
        ProviderEventKind::TransactionCompleted => match event.credits {
            Some(credits) if credits > 0 => LedgerMutation::GrantPurchasedCredits {
                amount: credits,
            },
            _ => LedgerMutation::RecordPayment {
                amount_cents: event.amount_cents.unwrap_or(0),
            },
        },
        ProviderEventKind::TransactionFailed => LedgerMutation::RecordOnly,
    }
}

/// Processing status of a stored provider event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderEventStatus {
    /// Received but not yet processed.
    Received,

    /// Mutation applied to the ledger.
    Applied,

    /// Short-circuited by the idempotency guard.
    SkippedDuplicate,

    /// Recorded but not applied (no matching account, or unusable payload).
    Failed,
}

/// Outcome of ingesting one provider event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// The mutation was applied.
    Applied,

    /// The transaction was already applied; no side effects re-ran.
    SkippedDuplicate,

    /// No account matched; recorded for manual review.
    Unmatched,
}

/// Stored record of one provider notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEventRecord {
    /// Provider event ID (unique, the row key).
    pub event_id: String,

    /// Provider transaction ID (the idempotency-guard key).
    pub transaction_id: String,

    /// Normalized event kind.
    pub kind: ProviderEventKind,

    /// Raw payload as received.
    pub payload: serde_json::Value,

    /// Whether the signature verified.
    pub signature_ok: bool,

    /// Processing status.
    pub status: ProviderEventStatus,

    /// The account the event was applied to, if any.
    pub account_id: Option<AccountId>,

    /// When the event was received.
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccountId, OrgId};

    fn event(kind: ProviderEventKind) -> ProviderEvent {
        ProviderEvent {
            event_id: "evt_1".into(),
            transaction_id: "txn_1".into(),
            kind,
            subscription_id: Some("sub_1".into()),
            customer_id: Some("ctm_1".into()),
            status: None,
            credits: None,
            amount_cents: None,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn parse_known_event_types() {
        assert_eq!(
            ProviderEventKind::parse("subscription_created").unwrap(),
            ProviderEventKind::SubscriptionCreated
        );
        assert_eq!(
            ProviderEventKind::parse("subscription_cancelled").unwrap(),
            ProviderEventKind::SubscriptionCanceled
        );
        assert!(matches!(
            ProviderEventKind::parse("invoice_created"),
            Err(EntitleError::UnknownEventType { .. })
        ));
    }

    #[test]
    fn status_map_keeps_paused_distinct() {
        assert_eq!(map_provider_status("active"), Some(AccountStatus::Active));
        assert_eq!(map_provider_status("paused"), Some(AccountStatus::Paused));
        assert_eq!(
            map_provider_status("cancelled"),
            Some(AccountStatus::Canceled)
        );
        assert_eq!(map_provider_status("something_new"), None);
    }

    #[test]
    fn completed_transaction_with_credits_becomes_grant() {
        let mut e = event(ProviderEventKind::TransactionCompleted);
        e.credits = Some(20);

        assert_eq!(
            map_event(&e),
            LedgerMutation::GrantPurchasedCredits { amount: 20 }
        );
    }

    #[test]
    fn completed_transaction_without_credits_is_a_payment() {
        let mut e = event(ProviderEventKind::TransactionCompleted);
        e.amount_cents = Some(999);

        assert_eq!(
            map_event(&e),
            LedgerMutation::RecordPayment { amount_cents: 999 }
        );
    }

    #[test]
    fn failed_transaction_is_record_only() {
        let mutation = map_event(&event(ProviderEventKind::TransactionFailed));
        assert_eq!(mutation, LedgerMutation::RecordOnly);
        assert!(!mutation.mutates_ledger());
    }

    #[test]
    fn grant_never_clobbers_subscription_fields() {
        let mut account = Account::new(AccountId::generate(), OrgId::generate());
        account.provider_subscription_id = Some("sub_live".into());
        account.status = AccountStatus::Active;
        let plan_id = account.plan_id;

        LedgerMutation::GrantPurchasedCredits { amount: 20 }.apply(&mut account, Utc::now());

        assert_eq!(account.purchased_granted, 20);
        assert_eq!(account.provider_subscription_id.as_deref(), Some("sub_live"));
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(account.plan_id, plan_id);
    }

    #[test]
    fn set_subscription_records_reference_and_status() {
        let mut account = Account::new(AccountId::generate(), OrgId::generate());
        let mut e = event(ProviderEventKind::SubscriptionCreated);
        e.status = Some("trialing".into());

        map_event(&e).apply(&mut account, Utc::now());

        assert_eq!(account.provider_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(account.status, AccountStatus::Trialing);
    }

    #[test]
    fn payment_updates_spend_and_draws_down_balance() {
        let mut account = Account::new(AccountId::generate(), OrgId::generate());
        account.balance_cents = 500;

        LedgerMutation::RecordPayment { amount_cents: 999 }.apply(&mut account, Utc::now());

        assert_eq!(account.total_spent_cents, 999);
        assert_eq!(account.balance_cents, 0);
    }
}
