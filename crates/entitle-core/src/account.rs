//! Billing account types.
//!
//! An account carries the four quota counter pairs plus subscription state.
//! Each consumption counter is paired with its grant; `used <= granted` must
//! hold for every pair after every committed mutation. Mutations that would
//! break the invariant are rejected, never clamped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EntitleError;
use crate::plan::{Plan, PlanType};
use crate::{AccountId, OrgId, PlanId};

/// Subscription lifecycle status of an account.
///
/// Transitions are driven only by the usage committer (quota side effects)
/// and by the webhook ingestor / reconciliation scanner (provider-driven
/// transitions). The request-serving read path never mutates status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// In the free-trial phase.
    Trialing,

    /// Subscription is active and paid up.
    Active,

    /// A renewal payment failed.
    PastDue,

    /// Subscription paused at the provider.
    Paused,

    /// Subscription canceled. Purchased credits remain spendable.
    Canceled,
}

impl AccountStatus {
    /// Status name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Paused => "paused",
            Self::Canceled => "canceled",
        }
    }

    /// Whether the trial and period buckets are open in this status.
    ///
    /// Purchased and free credits are not status-gated; they were already
    /// granted and are never forfeited by a subscription change.
    #[must_use]
    pub const fn subscription_buckets_open(self) -> bool {
        matches!(self, Self::Trialing | Self::Active)
    }
}

/// A billing account for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier.
    pub id: AccountId,

    /// Owning organization.
    pub org_id: OrgId,

    /// Current plan, if any. An account with no plan can still spend
    /// purchased credits.
    pub plan_id: Option<PlanId>,

    /// Subscription lifecycle status.
    pub status: AccountStatus,

    /// Running monetary balance in cents (informational only; never gates
    /// entitlement decisions).
    pub balance_cents: i64,

    /// Cumulative spend in cents.
    pub total_spent_cents: i64,

    /// Customer ID at the payment provider.
    pub provider_customer_id: Option<String>,

    /// Subscription ID at the payment provider.
    pub provider_subscription_id: Option<String>,

    /// Purchased credits granted, cumulative. Never resets.
    pub purchased_granted: u64,

    /// Purchased credits consumed, cumulative. Never resets.
    pub purchased_used: u64,

    /// Free-tier requests granted. Copied from the plan at assignment;
    /// resets only on plan change, not on period rollover.
    pub free_granted: u64,

    /// Free-tier requests consumed.
    pub free_used: u64,

    /// Start of the trial window. The window length comes from the plan.
    pub trial_started_at: Option<DateTime<Utc>>,

    /// Request allowance for the current recurring period.
    pub period_allowance: u64,

    /// Requests consumed in the current recurring period.
    pub period_used: u64,

    /// Start of the current recurring period.
    pub period_started_at: Option<DateTime<Utc>>,

    /// Unlimited access flag. Unlimited accounts flow through the same
    /// evaluate/commit path with a distinguished bucket so they stay
    /// observable and auditable.
    pub unlimited: bool,

    /// Optimistic concurrency token, bumped on every committed write.
    pub version: u64,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with no plan and empty counters.
    #[must_use]
    pub fn new(id: AccountId, org_id: OrgId) -> Self {
        let now = Utc::now();
        Self {
            id,
            org_id,
            plan_id: None,
            status: AccountStatus::Trialing,
            balance_cents: 0,
            total_spent_cents: 0,
            provider_customer_id: None,
            provider_subscription_id: None,
            purchased_granted: 0,
            purchased_used: 0,
            free_granted: 0,
            free_used: 0,
            trial_started_at: None,
            period_allowance: 0,
            period_used: 0,
            period_started_at: None,
            unlimited: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Remaining purchased credits.
    #[must_use]
    pub const fn purchased_remaining(&self) -> u64 {
        self.purchased_granted.saturating_sub(self.purchased_used)
    }

    /// Remaining free-tier requests.
    #[must_use]
    pub const fn free_remaining(&self) -> u64 {
        self.free_granted.saturating_sub(self.free_used)
    }

    /// Remaining requests in the current recurring period.
    #[must_use]
    pub const fn period_remaining(&self) -> u64 {
        self.period_allowance.saturating_sub(self.period_used)
    }

    /// Assign a plan to this account, copying its grants.
    ///
    /// The free bucket resets (grant copied from the plan, consumption
    /// zeroed); this is the only event that resets it. The period bucket is
    /// re-initialized to a fresh interval. The purchased bucket is untouched:
    /// those credits were paid for. For plans with a trial, the trial window
    /// opens now unless one was already started.
    pub fn assign_plan(&mut self, plan: &Plan, now: DateTime<Utc>) {
        self.plan_id = Some(plan.id);
        self.free_granted = plan.free_requests;
        self.free_used = 0;
        self.period_allowance = plan.period_requests;
        self.period_used = 0;
        self.period_started_at = Some(now);
        if plan.has_trial() && self.trial_started_at.is_none() {
            self.trial_started_at = Some(now);
        }
        if plan.plan_type == PlanType::Subscription {
            self.status = if plan.has_trial() {
                AccountStatus::Trialing
            } else {
                AccountStatus::Active
            };
        }
        self.updated_at = now;
    }

    /// Validate the `used <= granted` invariant for every counter pair.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` naming the first violated bucket.
    pub fn check_invariants(&self) -> Result<(), EntitleError> {
        if self.purchased_used > self.purchased_granted {
            return Err(EntitleError::InvariantViolation {
                bucket: "purchased",
                used: self.purchased_used,
                granted: self.purchased_granted,
            });
        }
        if self.free_used > self.free_granted {
            return Err(EntitleError::InvariantViolation {
                bucket: "free",
                used: self.free_used,
                granted: self.free_granted,
            });
        }
        if self.period_used > self.period_allowance {
            return Err(EntitleError::InvariantViolation {
                bucket: "period",
                used: self.period_used,
                granted: self.period_allowance,
            });
        }
        Ok(())
    }
}
