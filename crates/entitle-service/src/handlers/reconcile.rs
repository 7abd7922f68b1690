//! Operator-facing reconciliation trigger.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::Json;

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::reconcile::{ScanReport, Scanner};
use crate::state::AppState;

/// Run a reconciliation sweep on demand.
pub async fn run_scan(
    State(state): State<Arc<AppState>>,
    auth: OperatorAuth,
) -> Result<Json<ScanReport>, ApiError> {
    let gateway = state
        .gateway
        .clone()
        .ok_or_else(|| ApiError::ExternalService("provider gateway not configured".into()))?;

    tracing::info!(caller = %auth.caller, "manual reconciliation sweep requested");

    let scanner = Scanner::new(
        state.store.clone(),
        gateway,
        Duration::from_secs(state.config.provider_timeout_seconds),
    );
    let report = scanner.scan().await?;

    Ok(Json(report))
}
