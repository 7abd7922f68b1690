//! Quota plan types.
//!
//! A plan describes quota policy: the free-request allowance, the free-trial
//! length, the recurring period allowance and interval, and (for one-time
//! plans) the purchased-credit grant size.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::PlanId;

/// How a plan charges: a recurring subscription or a one-time credit purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    /// Recurring subscription with a per-interval request allowance.
    Subscription,

    /// One-time purchase of a fixed credit grant.
    OneTime,
}

/// The recurring billing/usage interval of a plan.
///
/// Intervals are fixed durations, not calendar arithmetic; period boundaries
/// stay aligned to the interval cadence across rollovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    /// One day.
    Daily,
    /// Seven days.
    Weekly,
    /// Thirty days.
    Monthly,
    /// 365 days.
    Yearly,
}

impl BillingInterval {
    /// The fixed duration of one interval.
    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::weeks(1),
            Self::Monthly => Duration::days(30),
            Self::Yearly => Duration::days(365),
        }
    }

    /// Interval name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

/// A quota plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier.
    pub id: PlanId,

    /// Human-readable plan name.
    pub name: String,

    /// Recurring subscription or one-time credit purchase.
    pub plan_type: PlanType,

    /// Recurring interval (meaningful for subscription plans).
    pub interval: BillingInterval,

    /// Price in cents per interval (or per purchase for one-time plans).
    pub price_cents: i64,

    /// ISO 4217 currency code.
    pub currency: String,

    /// Free-tier request allowance granted at plan assignment.
    pub free_requests: u64,

    /// Free-trial length in days; zero disables the trial window.
    pub trial_days: u32,

    /// Request allowance per recurring period.
    pub period_requests: u64,

    /// Credit grant size for one-time plans.
    pub one_time_credits: u64,

    /// Whether new accounts are assigned this plan. At most one plan may be
    /// the default at any time (enforced by the store).
    pub is_default: bool,

    /// Price identifier at the payment provider.
    pub provider_price_id: Option<String>,

    /// When the plan was created.
    pub created_at: DateTime<Utc>,

    /// When the plan was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    /// Create a new plan with zero allowances.
    #[must_use]
    pub fn new(name: impl Into<String>, plan_type: PlanType, interval: BillingInterval) -> Self {
        let now = Utc::now();
        Self {
            id: PlanId::generate(),
            name: name.into(),
            plan_type,
            interval,
            price_cents: 0,
            currency: "USD".into(),
            free_requests: 0,
            trial_days: 0,
            period_requests: 0,
            one_time_credits: 0,
            is_default: false,
            provider_price_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the free-request allowance.
    #[must_use]
    pub fn with_free_requests(mut self, free_requests: u64) -> Self {
        self.free_requests = free_requests;
        self
    }

    /// Set the trial length in days.
    #[must_use]
    pub fn with_trial_days(mut self, trial_days: u32) -> Self {
        self.trial_days = trial_days;
        self
    }

    /// Set the per-period request allowance.
    #[must_use]
    pub fn with_period_requests(mut self, period_requests: u64) -> Self {
        self.period_requests = period_requests;
        self
    }

    /// Set the one-time credit grant size.
    #[must_use]
    pub fn with_one_time_credits(mut self, credits: u64) -> Self {
        self.one_time_credits = credits;
        self
    }

    /// Set the price in cents.
    #[must_use]
    pub fn with_price_cents(mut self, price_cents: i64) -> Self {
        self.price_cents = price_cents;
        self
    }

    /// Mark this plan as the default for new accounts.
    #[must_use]
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Whether this plan defines a trial window.
    #[must_use]
    pub const fn has_trial(&self) -> bool {
        self.trial_days > 0
    }
}
