//! The entitlement evaluator.
//!
//! `evaluate` is a pure decision function: given current account state, the
//! plan, and the clock, it answers "may this account consume now, and from
//! which bucket" without mutating anything. The usage committer re-runs the
//! same function at commit time so check and commit can never diverge.
//!
//! The bucket order is a product decision, preserved exactly:
//!
//! 1. Purchased credits: paid for, honored regardless of subscription state.
//! 2. Free-tier requests.
//! 3. The free-trial window (time-bound, charges no counter).
//! 4. The recurring period allowance.
//!
//! Unlimited accounts short-circuit to a distinguished `Unlimited` bucket so
//! they flow through the same path and stay auditable.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountStatus};
use crate::plan::Plan;

/// The quota bucket a decision draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// One-time purchased credits.
    Purchased,

    /// Free-tier requests.
    Free,

    /// The free-trial window (no counter charged).
    Trial,

    /// The recurring period allowance.
    Period,

    /// Unlimited-access accounts; audited, never counted.
    Unlimited,
}

impl Bucket {
    /// Bucket name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Purchased => "purchased",
            Self::Free => "free",
            Self::Trial => "trial",
            Self::Period => "period",
            Self::Unlimited => "unlimited",
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Every open bucket is exhausted.
    QuotaExhausted,

    /// The account has no plan and no purchased credits.
    NoPlan,

    /// The subscription status closes the trial/period buckets and the
    /// credit buckets are exhausted.
    SubscriptionInactive {
        /// The blocking status.
        status: AccountStatus,
    },
}

impl DenyReason {
    /// Machine-readable exhaustion code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::QuotaExhausted => "quota_exhausted",
            Self::NoPlan => "no_plan",
            Self::SubscriptionInactive { status } => match status {
                AccountStatus::PastDue => "subscription_past_due",
                AccountStatus::Paused => "subscription_paused",
                AccountStatus::Canceled => "subscription_canceled",
                // Unreachable in practice: open statuses never deny here.
                AccountStatus::Trialing | AccountStatus::Active => "quota_exhausted",
            },
        }
    }
}

/// Remaining balances per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remaining {
    /// Purchased credits remaining.
    pub purchased: u64,

    /// Free-tier requests remaining.
    pub free: u64,

    /// Period requests remaining.
    pub period: u64,

    /// Whole days left in the trial window (zero when not in trial).
    pub trial_days_left: u64,
}

impl Remaining {
    /// Snapshot remaining balances from an account.
    #[must_use]
    pub fn of(account: &Account, plan: Option<&Plan>, now: DateTime<Utc>) -> Self {
        Self {
            purchased: account.purchased_remaining(),
            free: account.free_remaining(),
            period: account.period_remaining(),
            trial_days_left: trial_days_left(account, plan, now),
        }
    }
}

/// The outcome of an entitlement evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,

    /// The bucket to charge (set iff allowed).
    pub bucket: Option<Bucket>,

    /// Remaining balances after the prospective charge: what the account
    /// will have left once the decision's bucket is committed.
    pub remaining: Remaining,

    /// Deny reason (set iff not allowed).
    pub reason: Option<DenyReason>,

    /// Whether the caller should prompt for an upgrade.
    pub should_upgrade: bool,
}

/// Whole days left in the trial window, zero if there is none or it elapsed.
fn trial_days_left(account: &Account, plan: Option<&Plan>, now: DateTime<Utc>) -> u64 {
    let Some(plan) = plan else { return 0 };
    let Some(start) = account.trial_started_at else { return 0 };
    if !plan.has_trial() {
        return 0;
    }
    let end = start + Duration::days(i64::from(plan.trial_days));
    if now >= end {
        return 0;
    }
    u64::try_from((end - now).num_days()).unwrap_or(0)
}

/// Whether `now` falls inside the account's trial window.
fn in_trial_window(account: &Account, plan: &Plan, now: DateTime<Utc>) -> bool {
    if !plan.has_trial() {
        return false;
    }
    match account.trial_started_at {
        Some(start) => now < start + Duration::days(i64::from(plan.trial_days)),
        None => false,
    }
}

/// Decide whether an account may consume `requested` units, and from which
/// bucket.
///
/// Pure with respect to its inputs. Callers must refresh the recurring
/// period (see [`crate::refresh_period`]) before evaluating, or a stale
/// period window may under-grant.
#[must_use]
pub fn evaluate(
    account: &Account,
    plan: Option<&Plan>,
    now: DateTime<Utc>,
    requested: u64,
) -> Decision {
    let remaining = Remaining::of(account, plan, now);

    // Allowed decisions report what will be left once this charge commits.
    let allow = |bucket: Bucket, should_upgrade: bool| {
        let mut remaining = remaining;
        match bucket {
            Bucket::Purchased => remaining.purchased = remaining.purchased.saturating_sub(requested),
            Bucket::Free => remaining.free = remaining.free.saturating_sub(requested),
            Bucket::Period => remaining.period = remaining.period.saturating_sub(requested),
            Bucket::Trial | Bucket::Unlimited => {}
        }
        Decision {
            allowed: true,
            bucket: Some(bucket),
            remaining,
            reason: None,
            should_upgrade,
        }
    };

    if account.unlimited {
        return allow(Bucket::Unlimited, false);
    }

    // 1. Purchased credits: honored regardless of plan type or status.
    if remaining.purchased >= requested && requested > 0 {
        return allow(Bucket::Purchased, false);
    }

    // 2. Free-tier requests.
    if remaining.free >= requested && requested > 0 {
        return allow(Bucket::Free, false);
    }

    // Buckets 3 and 4 require a plan and an open subscription status.
    let deny = |reason: DenyReason| Decision {
        allowed: false,
        bucket: None,
        remaining,
        reason: Some(reason),
        should_upgrade: true,
    };

    let Some(plan) = plan else {
        return deny(DenyReason::NoPlan);
    };

    if !account.status.subscription_buckets_open() {
        return deny(DenyReason::SubscriptionInactive {
            status: account.status,
        });
    }

    // 3. Trial window: time-bound, not count-bound; charges no counter.
    //    An upgrade prompt is still shown during the trial.
    if in_trial_window(account, plan, now) {
        return allow(Bucket::Trial, true);
    }

    // 4. Recurring period allowance.
    if remaining.period >= requested && requested > 0 {
        return allow(Bucket::Period, false);
    }

    deny(DenyReason::QuotaExhausted)
}
