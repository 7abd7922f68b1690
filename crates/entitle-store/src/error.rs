//! Error types for the entitle store.

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("account", "plan", ...).
        entity: &'static str,
        /// The missing ID.
        id: String,
    },

    /// Every bucket was exhausted at commit time, or the version check
    /// failed twice: the caller must re-run the whole check-then-commit
    /// sequence.
    #[error("account state changed, re-evaluate")]
    StateChanged,

    /// Optimistic version check failed (internal; surfaced as
    /// `StateChanged` after the retry budget is spent).
    #[error("version conflict on account {account_id}")]
    VersionConflict {
        /// The contended account.
        account_id: String,
    },

    /// A mutation would have pushed a counter past its grant.
    #[error("counter invariant violated: {bucket} used {used} > granted {granted}")]
    InvariantViolation {
        /// The violated bucket.
        bucket: &'static str,
        /// Consumed units after the rejected mutation.
        used: u64,
        /// Granted units.
        granted: u64,
    },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}
