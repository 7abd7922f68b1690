//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary account records, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Index: accounts by provider subscription ID. Value is the 16-byte
    /// account ID.
    pub const ACCOUNTS_BY_SUBSCRIPTION: &str = "accounts_by_subscription";

    /// Index: accounts by provider customer ID. Value is the 16-byte
    /// account ID.
    pub const ACCOUNTS_BY_CUSTOMER: &str = "accounts_by_customer";

    /// Quota plans, keyed by `plan_id`.
    pub const PLANS: &str = "plans";

    /// Append-only usage log, keyed by `usage_event_id` (ULID).
    pub const USAGE_EVENTS: &str = "usage_events";

    /// Index: usage events by account, keyed by `account_id || usage_event_id`.
    /// Value is empty (index only).
    pub const USAGE_BY_ACCOUNT: &str = "usage_by_account";

    /// Provider notification records, keyed by provider `event_id`.
    pub const PROVIDER_EVENTS: &str = "provider_events";

    /// Idempotency guard: one key per provider `transaction_id`, written in
    /// the same batch as the ledger mutation it guards. Value is the
    /// `event_id` that was applied.
    pub const PROVIDER_TXNS: &str = "provider_txns";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::ACCOUNTS_BY_SUBSCRIPTION,
        cf::ACCOUNTS_BY_CUSTOMER,
        cf::PLANS,
        cf::USAGE_EVENTS,
        cf::USAGE_BY_ACCOUNT,
        cf::PROVIDER_EVENTS,
        cf::PROVIDER_TXNS,
    ]
}
