//! Usage event types.
//!
//! Every consumption decision appends one record to an append-only log, used
//! for audit and for reconstructing "why was this denied" without re-deriving
//! state. ULID event IDs keep the log time-ordered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evaluate::Bucket;
use crate::{AccountId, UsageEventId};

/// One committed consumption decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Unique, time-ordered event ID.
    pub id: UsageEventId,

    /// The account that consumed.
    pub account_id: AccountId,

    /// The bucket that was charged.
    pub bucket: Bucket,

    /// Correlation ID of the originating request.
    pub correlation_id: String,

    /// When the consumption was committed.
    pub timestamp: DateTime<Utc>,
}

impl UsageEvent {
    /// Record a consumption at a given instant.
    #[must_use]
    pub fn record(
        account_id: AccountId,
        bucket: Bucket,
        correlation_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: UsageEventId::generate(),
            account_id,
            bucket,
            correlation_id: correlation_id.into(),
            timestamp,
        }
    }
}
