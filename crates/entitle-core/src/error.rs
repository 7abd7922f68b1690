//! Error types for the entitle core.

use crate::ids::IdError;

/// Result type for entitlement operations.
pub type Result<T> = std::result::Result<T, EntitleError>;

/// Errors that can occur in entitlement operations.
#[derive(Debug, thiserror::Error)]
pub enum EntitleError {
    /// Every quota bucket is exhausted (normal deny).
    #[error("quota exhausted: {reason}")]
    QuotaExhausted {
        /// Machine-readable exhaustion code.
        reason: String,
        /// Whether the caller should prompt for an upgrade.
        should_upgrade: bool,
    },

    /// Account state changed between check and commit; the caller must
    /// re-run the whole check-then-commit sequence.
    #[error("account state changed, re-evaluate")]
    StateChanged,

    /// Webhook signature did not match the shared secret.
    #[error("invalid webhook signature")]
    SignatureInvalid,

    /// Webhook timestamp fell outside the freshness window.
    #[error("stale webhook event: {age_seconds}s old")]
    EventStale {
        /// Absolute age of the event in seconds.
        age_seconds: i64,
    },

    /// Provider transaction was already applied (expected, low severity).
    #[error("duplicate provider transaction: {transaction_id}")]
    DuplicateEvent {
        /// The provider transaction ID that was duplicated.
        transaction_id: String,
    },

    /// Account not found.
    #[error("account not found: {account_id}")]
    AccountNotFound {
        /// The account ID that was not found.
        account_id: String,
    },

    /// Plan not found.
    #[error("plan not found: {plan_id}")]
    PlanNotFound {
        /// The plan ID that was not found.
        plan_id: String,
    },

    /// A mutation would have pushed a consumption counter past its grant.
    /// Mutations are rejected, never clamped.
    #[error("counter invariant violated: {bucket} used {used} > granted {granted}")]
    InvariantViolation {
        /// The bucket whose invariant was violated.
        bucket: &'static str,
        /// Consumed units after the rejected mutation.
        used: u64,
        /// Granted units.
        granted: u64,
    },

    /// Provider sent an event type outside the fixed mapping set.
    #[error("unrecognized provider event type: {event_type}")]
    UnknownEventType {
        /// The raw event type string.
        event_type: String,
    },

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
