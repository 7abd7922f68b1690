//! Recurring-period rollover.
//!
//! The period manager detects elapsed billing intervals and resets the
//! recurring counter exactly once per elapsed interval. It must run before
//! every evaluate/commit so stale period windows never under- or over-grant.

use chrono::{DateTime, Duration, Utc};

use crate::account::Account;
use crate::plan::Plan;

/// What a period refresh did to the account.
///
/// An explicit result type: callers must decide whether the account needs
/// persisting, and the compiler rejects a missed case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodRefresh {
    /// The current period is still open; nothing changed.
    Unchanged,

    /// The account had no period yet; the window was initialized to `now`.
    Initialized,

    /// One or more intervals elapsed; the counter was reset and the period
    /// start advanced to the latest interval boundary.
    RolledOver,
}

impl PeriodRefresh {
    /// Whether the account was mutated and needs persisting.
    #[must_use]
    pub const fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    /// Whether a full rollover (counter reset) happened.
    #[must_use]
    pub const fn rolled_over(self) -> bool {
        matches!(self, Self::RolledOver)
    }
}

/// Refresh the recurring period of an account against its plan.
///
/// Idempotent: once the window has been advanced past `now`, further calls
/// in the same instant are `Unchanged`. On rollover the period start
/// advances by whole intervals so boundaries stay aligned to the original
/// cadence, never to `now`. Only the recurring bucket resets;
/// the free and purchased buckets are untouched.
pub fn refresh_period(account: &mut Account, plan: &Plan, now: DateTime<Utc>) -> PeriodRefresh {
    let Some(start) = account.period_started_at else {
        account.period_started_at = Some(now);
        account.updated_at = now;
        return PeriodRefresh::Initialized;
    };

    let interval = plan.interval.duration();
    let elapsed = now - start;
    if elapsed < interval {
        return PeriodRefresh::Unchanged;
    }

    // Advance by however many whole intervals have passed, keeping the
    // boundary aligned to the original cadence.
    let intervals = elapsed.num_seconds() / interval.num_seconds();
    account.period_started_at = Some(start + Duration::seconds(intervals * interval.num_seconds()));
    account.period_used = 0;
    account.updated_at = now;
    PeriodRefresh::RolledOver
}
