//! `RocksDB` ledger store for the entitle service.
//!
//! This crate provides durable storage for accounts, plans, the append-only
//! usage log, and provider events, plus the compound atomic operations the
//! entitlement core is built on:
//!
//! - [`Store::commit_usage`]: the race-safe read-decide-increment that
//!   mirrors the evaluator's bucket choice at commit time;
//! - [`Store::apply_provider_event`]: webhook/reconciliation mutations
//!   committed in the same batch as their idempotency guard;
//! - [`Store::refresh_period`]: exactly-once persisted period rollovers.
//!
//! # Concurrency
//!
//! Mutations to a single account are serialized by an optimistic version
//! check on the account row: every committed write bumps `version`, and a
//! write whose expected version is stale fails with `VersionConflict`. The
//! check-and-write itself is made atomic by striped in-process locks. The
//! idempotency guard for provider transactions is a column-family key
//! written in the same `WriteBatch` as the mutation it guards.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};

use entitle_core::{
    Account, AccountId, Bucket, IngestStatus, Plan, PlanId, ProviderEvent, ProviderEventRecord,
    Remaining, UsageEvent,
};

/// Outcome of a successful usage commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// The bucket that was charged.
    pub bucket: Bucket,

    /// Remaining balances after the charge.
    pub remaining: Remaining,

    /// Whether the recurring period rolled over during this commit.
    pub period_rolled_over: bool,
}

/// Outcome of ingesting one provider event.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// What happened to the event.
    pub status: IngestStatus,

    /// The account the event was applied to, if one matched.
    pub account_id: Option<AccountId>,
}

/// The storage trait defining all ledger operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert or update an account record unconditionally.
    ///
    /// Intended for account creation and administrative writes; concurrent
    /// request paths go through the version-checked compound operations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_account(&self, account: &Account) -> Result<()>;

    /// Get an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Find the account holding a given provider subscription ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_account_by_subscription(&self, subscription_id: &str) -> Result<Option<Account>>;

    /// Find the account holding a given provider customer ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_account_by_customer(&self, customer_id: &str) -> Result<Option<Account>>;

    /// List all accounts carrying an external subscription reference, for
    /// the reconciliation scanner.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_subscribed_accounts(&self) -> Result<Vec<Account>>;

    /// Assign a plan to an account (version-checked), copying its grants and
    /// resetting the free bucket.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist, or
    /// `StateChanged` if the account stays contended across retries.
    fn subscribe_account(
        &self,
        account_id: &AccountId,
        plan: &Plan,
        now: DateTime<Utc>,
    ) -> Result<Account>;

    // =========================================================================
    // Plan Operations
    // =========================================================================

    /// Insert or update a plan.
    ///
    /// If the plan is marked default, any previously-default plan is cleared
    /// in the same batch so at most one default exists at any time.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_plan(&self, plan: &Plan) -> Result<()>;

    /// Get a plan by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_plan(&self, plan_id: &PlanId) -> Result<Option<Plan>>;

    /// List all plans.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_plans(&self) -> Result<Vec<Plan>>;

    /// Get the default plan, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn default_plan(&self) -> Result<Option<Plan>>;

    // =========================================================================
    // Usage Log Operations
    // =========================================================================

    /// List usage events for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_usage_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageEvent>>;

    // =========================================================================
    // Provider Event Operations
    // =========================================================================

    /// Get a stored provider event record by provider event ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_provider_event(&self, event_id: &str) -> Result<Option<ProviderEventRecord>>;

    /// Check whether a provider transaction has already been applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn transaction_applied(&self, transaction_id: &str) -> Result<bool>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Refresh the recurring period of an account, persisting a rollover
    /// exactly once.
    ///
    /// Returns the (possibly refreshed) account, its plan, and whether a
    /// rollover was persisted by this call. A lost version race means
    /// another writer refreshed concurrently; the reloaded account is
    /// returned with `false`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    fn refresh_period(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<(Account, Option<Plan>, bool)>;

    /// Commit one unit of consumption, re-deriving the bucket at commit time.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::StateChanged` if every bucket is exhausted at commit
    ///   time or the account stays contended after one retry; the caller
    ///   must re-run the whole check-then-commit sequence.
    /// - `StoreError::InvariantViolation` if the mutation would break a
    ///   counter invariant.
    fn commit_usage(
        &self,
        account_id: &AccountId,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome>;

    /// Apply a normalized provider event: dedup by transaction ID, resolve
    /// the account, apply the mapped mutation, and persist the event record
    /// plus the idempotency guard in one atomic batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the account stays
    /// contended across retries.
    fn apply_provider_event(
        &self,
        event: &ProviderEvent,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome>;
}
