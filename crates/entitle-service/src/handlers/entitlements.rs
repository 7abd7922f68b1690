//! Entitlement check and commit handlers.
//!
//! The resource-serving layer calls `check` before doing metered work and
//! `commit` only after the work succeeds. `commit` re-derives the bucket for
//! the current state, so a race that consumed the last unit between the two
//! calls surfaces as a `state_changed` conflict rather than an over-commit.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use entitle_core::{evaluate, AccountId, Bucket, Remaining};
use entitle_store::{Store, StoreError};

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Entitlement check request body (optional).
#[derive(Debug, Default, Deserialize)]
pub struct CheckRequest {
    /// Units requested; defaults to 1.
    pub units: Option<u64>,
}

/// Entitlement check response.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    /// Whether the request may proceed.
    pub allowed: bool,

    /// The bucket that would be charged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<Bucket>,

    /// Remaining balances per bucket.
    pub remaining: Remaining,

    /// Machine-readable deny code, when denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Whether the caller should prompt for an upgrade.
    pub should_upgrade: bool,

    /// Whether this check rolled the recurring period over.
    pub period_rolled_over: bool,
}

fn parse_account_id(raw: &str) -> Result<AccountId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid account id: {raw}")))
}

/// Check whether an account may consume now, and from which bucket.
///
/// Read path: never mutates lifecycle state. It does persist at most one
/// period rollover, so stale windows cannot under-grant.
pub async fn check(
    State(state): State<Arc<AppState>>,
    auth: OperatorAuth,
    Path(account_id): Path<String>,
    body: Option<Json<CheckRequest>>,
) -> Result<Json<CheckResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let units = body.and_then(|b| b.units).unwrap_or(1);
    let now = Utc::now();

    let (account, plan, period_rolled_over) = state.store.refresh_period(&account_id, now)?;
    let decision = evaluate(&account, plan.as_ref(), now, units);

    tracing::debug!(
        caller = %auth.caller,
        account_id = %account_id,
        allowed = decision.allowed,
        bucket = ?decision.bucket,
        "entitlement checked"
    );

    Ok(Json(CheckResponse {
        allowed: decision.allowed,
        bucket: decision.bucket,
        remaining: decision.remaining,
        reason: decision.reason.map(|r| r.code().to_string()),
        should_upgrade: decision.should_upgrade,
        period_rolled_over,
    }))
}

/// Usage commit request body.
#[derive(Debug, Default, Deserialize)]
pub struct CommitRequest {
    /// Correlation ID of the originating request, recorded in the usage log.
    pub correlation_id: Option<String>,
}

/// Usage commit response.
#[derive(Debug, Serialize)]
pub struct CommitResponse {
    /// The bucket that was charged.
    pub bucket: Bucket,

    /// Remaining balances after the charge.
    pub remaining: Remaining,

    /// Whether the recurring period rolled over during this commit.
    pub period_rolled_over: bool,
}

/// Commit one unit of consumption after the metered work succeeded.
pub async fn commit(
    State(state): State<Arc<AppState>>,
    auth: OperatorAuth,
    Path(account_id): Path<String>,
    body: Option<Json<CommitRequest>>,
) -> Result<Json<CommitResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let correlation_id = body
        .and_then(|b| b.correlation_id.clone())
        .unwrap_or_else(|| format!("commit-{}", entitle_core::UsageEventId::generate()));
    let now = Utc::now();

    let outcome = state
        .store
        .commit_usage(&account_id, &correlation_id, now)
        .map_err(|e| match e {
            StoreError::StateChanged => {
                tracing::debug!(
                    caller = %auth.caller,
                    account_id = %account_id,
                    "commit lost to a concurrent consumer, caller must re-evaluate"
                );
                ApiError::StateChanged
            }
            other => ApiError::from(other),
        })?;

    tracing::info!(
        caller = %auth.caller,
        account_id = %account_id,
        bucket = %outcome.bucket.as_str(),
        correlation_id = %correlation_id,
        "usage committed"
    );

    Ok(Json(CommitResponse {
        bucket: outcome.bucket,
        remaining: outcome.remaining,
        period_rolled_over: outcome.period_rolled_over,
    }))
}
