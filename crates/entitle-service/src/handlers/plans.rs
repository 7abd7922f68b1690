//! Plan administration handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use entitle_core::{BillingInterval, Plan, PlanType};
use entitle_store::Store;

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Plan creation request.
#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    /// Plan name.
    pub name: String,

    /// "subscription" or "one_time".
    pub plan_type: PlanType,

    /// "daily" | "weekly" | "monthly" | "yearly".
    pub interval: BillingInterval,

    /// Price in cents.
    #[serde(default)]
    pub price_cents: i64,

    /// Free-tier request allowance.
    #[serde(default)]
    pub free_requests: u64,

    /// Trial length in days.
    #[serde(default)]
    pub trial_days: u32,

    /// Per-period request allowance.
    #[serde(default)]
    pub period_requests: u64,

    /// Credit grant size for one-time plans.
    #[serde(default)]
    pub one_time_credits: u64,

    /// Whether new accounts get this plan.
    #[serde(default)]
    pub is_default: bool,

    /// Price reference at the payment provider.
    pub provider_price_id: Option<String>,
}

/// Create a plan. Setting `is_default` clears any previous default.
pub async fn create_plan(
    State(state): State<Arc<AppState>>,
    _auth: OperatorAuth,
    Json(body): Json<CreatePlanRequest>,
) -> Result<Json<Plan>, ApiError> {
    let mut plan = Plan::new(body.name, body.plan_type, body.interval)
        .with_price_cents(body.price_cents)
        .with_free_requests(body.free_requests)
        .with_trial_days(body.trial_days)
        .with_period_requests(body.period_requests)
        .with_one_time_credits(body.one_time_credits);
    plan.provider_price_id = body.provider_price_id;
    if body.is_default {
        plan = plan.as_default();
    }

    state.store.put_plan(&plan)?;

    tracing::info!(
        plan_id = %plan.id,
        plan = %plan.name,
        plan_type = ?plan.plan_type,
        is_default = plan.is_default,
        "plan created"
    );

    Ok(Json(plan))
}

/// List all plans.
pub async fn list_plans(
    State(state): State<Arc<AppState>>,
    _auth: OperatorAuth,
) -> Result<Json<Vec<Plan>>, ApiError> {
    Ok(Json(state.store.list_plans()?))
}
