//! Core types and decision logic for the entitle service.
//!
//! This crate provides the foundational types used throughout the entitlement
//! platform:
//!
//! - **Identifiers**: `AccountId`, `OrgId`, `PlanId`, `UsageEventId`
//! - **Accounts**: `Account`, `AccountStatus`, the four quota counter pairs
//! - **Plans**: `Plan`, `PlanType`, `BillingInterval`
//! - **Decisions**: `evaluate`, `Decision`, `Bucket`, `Remaining`
//! - **Periods**: `refresh_period`, `PeriodRefresh`
//! - **Provider events**: `ProviderEvent`, `LedgerMutation`, status mapping
//!
//! # Quota buckets
//!
//! Every consumption decision draws from exactly one of four buckets, in a
//! fixed order: purchased credits, free-tier requests, the trial window, then
//! the recurring period allowance. Purchased credits were paid for and are
//! honored regardless of subscription state. The evaluation itself is a pure
//! function; all mutation happens in the store layer.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod error;
pub mod evaluate;
pub mod ids;
pub mod period;
pub mod plan;
pub mod provider;
pub mod usage;

pub use account::{Account, AccountStatus};
pub use error::{EntitleError, Result};
pub use evaluate::{evaluate, Bucket, Decision, DenyReason, Remaining};
pub use ids::{AccountId, IdError, OrgId, PlanId, UsageEventId};
pub use period::{refresh_period, PeriodRefresh};
pub use plan::{BillingInterval, Plan, PlanType};
pub use provider::{
    map_event, map_provider_status, IngestStatus, LedgerMutation, ProviderEvent,
    ProviderEventKind, ProviderEventRecord, ProviderEventStatus,
};
pub use usage::UsageEvent;
