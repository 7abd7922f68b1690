//! Account administration handlers.
//!
//! The minimal surface needed to operate the entitlement core: create and
//! inspect accounts, assign plans, and read the usage audit log.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entitle_core::{
    Account, AccountId, AccountStatus, OrgId, PlanId, PlanType, UsageEvent,
};
use entitle_store::Store;

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Account creation request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateAccountRequest {
    /// Owning organization; generated when omitted.
    pub org_id: Option<String>,

    /// Customer ID at the payment provider.
    pub provider_customer_id: Option<String>,

    /// Whether the account gets the audited unlimited bucket.
    #[serde(default)]
    pub unlimited: bool,
}

/// One consumption counter pair.
#[derive(Debug, Serialize)]
pub struct CounterPair {
    /// Units granted.
    pub granted: u64,
    /// Units consumed.
    pub used: u64,
}

/// Account response body.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// Account ID.
    pub id: AccountId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Current plan, if any.
    pub plan_id: Option<PlanId>,
    /// Lifecycle status.
    pub status: AccountStatus,
    /// Monetary balance in cents (informational).
    pub balance_cents: i64,
    /// Cumulative spend in cents.
    pub total_spent_cents: i64,
    /// Purchased-credit counters.
    pub purchased: CounterPair,
    /// Free-tier counters.
    pub free: CounterPair,
    /// Period counters.
    pub period: CounterPair,
    /// Start of the current period.
    pub period_started_at: Option<DateTime<Utc>>,
    /// Start of the trial window.
    pub trial_started_at: Option<DateTime<Utc>>,
    /// Unlimited-access flag.
    pub unlimited: bool,
    /// Provider customer reference.
    pub provider_customer_id: Option<String>,
    /// Provider subscription reference.
    pub provider_subscription_id: Option<String>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            org_id: account.org_id,
            plan_id: account.plan_id,
            status: account.status,
            balance_cents: account.balance_cents,
            total_spent_cents: account.total_spent_cents,
            purchased: CounterPair {
                granted: account.purchased_granted,
                used: account.purchased_used,
            },
            free: CounterPair {
                granted: account.free_granted,
                used: account.free_used,
            },
            period: CounterPair {
                granted: account.period_allowance,
                used: account.period_used,
            },
            period_started_at: account.period_started_at,
            trial_started_at: account.trial_started_at,
            unlimited: account.unlimited,
            provider_customer_id: account.provider_customer_id,
            provider_subscription_id: account.provider_subscription_id,
        }
    }
}

fn parse_account_id(raw: &str) -> Result<AccountId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid account id: {raw}")))
}

/// Create a new account, assigning the default plan when one exists.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    _auth: OperatorAuth,
    Json(body): Json<CreateAccountRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let org_id = match body.org_id {
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("invalid org id: {raw}")))?,
        None => OrgId::generate(),
    };

    let mut account = Account::new(AccountId::generate(), org_id);
    account.provider_customer_id = body.provider_customer_id;
    account.unlimited = body.unlimited;

    if let Some(default_plan) = state.store.default_plan()? {
        account.assign_plan(&default_plan, Utc::now());
    }

    state.store.put_account(&account)?;

    tracing::info!(
        account_id = %account.id,
        org_id = %account.org_id,
        plan_id = ?account.plan_id,
        unlimited = account.unlimited,
        "account created"
    );

    Ok(Json(account.into()))
}

/// Get an account by ID.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    _auth: OperatorAuth,
    Path(account_id): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let account = state
        .store
        .get_account(&account_id)?
        .ok_or_else(|| ApiError::NotFound(format!("account not found: {account_id}")))?;

    Ok(Json(account.into()))
}

/// Subscribe request.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    /// The plan to subscribe to or purchase.
    pub plan_id: String,
}

/// Subscribe response.
#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    /// "subscribed" for subscription plans, "pending_purchase" for one-time
    /// plans (the credit grant arrives via the provider webhook).
    pub status: &'static str,

    /// The account after the change.
    pub account: AccountResponse,
}

/// Subscribe an account to a plan, or start a one-time credit purchase.
///
/// One-time purchases are rejected while a recurring subscription is active;
/// that rule lives here, upstream of the evaluator; the evaluator only
/// governs consumption order once credits exist.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    _auth: OperatorAuth,
    Path(account_id): Path<String>,
    Json(body): Json<SubscribeRequest>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let plan_id: PlanId = body
        .plan_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid plan id: {}", body.plan_id)))?;

    let plan = state
        .store
        .get_plan(&plan_id)?
        .ok_or_else(|| ApiError::NotFound(format!("plan not found: {plan_id}")))?;

    let account = state
        .store
        .get_account(&account_id)?
        .ok_or_else(|| ApiError::NotFound(format!("account not found: {account_id}")))?;

    if plan.plan_type == PlanType::OneTime {
        let has_active_subscription = account.status.subscription_buckets_open()
            && match account.plan_id {
                Some(current_id) => state
                    .store
                    .get_plan(&current_id)?
                    .is_some_and(|p| p.plan_type == PlanType::Subscription),
                None => false,
            };
        if has_active_subscription {
            return Err(ApiError::BadRequest(
                "Cannot purchase credits while subscription is active".into(),
            ));
        }

        // The purchase completes via the provider webhook; nothing is
        // granted until the transaction_completed event lands.
        return Ok(Json(SubscribeResponse {
            status: "pending_purchase",
            account: account.into(),
        }));
    }

    let updated = state
        .store
        .subscribe_account(&account_id, &plan, Utc::now())?;

    tracing::info!(
        account_id = %account_id,
        plan_id = %plan.id,
        plan = %plan.name,
        "account subscribed to plan"
    );

    Ok(Json(SubscribeResponse {
        status: "subscribed",
        account: updated.into(),
    }))
}

/// Usage log query parameters.
#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    /// Maximum events to return (default 50).
    pub limit: Option<usize>,
    /// Events to skip (default 0).
    pub offset: Option<usize>,
}

/// Usage log response.
#[derive(Debug, Serialize)]
pub struct UsageLogResponse {
    /// Usage events, newest first.
    pub events: Vec<UsageEvent>,
}

/// List the usage audit log for an account, newest first.
pub async fn list_usage(
    State(state): State<Arc<AppState>>,
    _auth: OperatorAuth,
    Path(account_id): Path<String>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageLogResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let events = state.store.list_usage_by_account(
        &account_id,
        query.limit.unwrap_or(50),
        query.offset.unwrap_or(0),
    )?;

    Ok(Json(UsageLogResponse { events }))
}
