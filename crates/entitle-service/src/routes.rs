//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, entitlements, health, plans, reconcile, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for entitlement check/commit endpoints.
/// These sit on the hot path of every metered request.
const ENTITLEMENT_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for the administrative endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Entitlements (API key auth, rate-limited)
/// - `POST /v1/entitlements/{account_id}/check` - Evaluate
/// - `POST /v1/entitlements/{account_id}/commit` - Commit consumption
///
/// ## Administration (API key auth)
/// - `POST /v1/accounts` - Create account
/// - `GET /v1/accounts/{id}` - Get account
/// - `POST /v1/accounts/{id}/subscribe` - Assign plan / start purchase
/// - `GET /v1/accounts/{id}/usage` - Usage audit log
/// - `POST /v1/plans` - Create plan
/// - `GET /v1/plans` - List plans
/// - `POST /v1/reconcile` - Run a reconciliation sweep
///
/// ## Webhooks (signature verification, no API key)
/// - `POST /webhooks/provider` - Provider notifications
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    // Check/commit sit on every metered request, so they get their own
    // higher concurrency ceiling.
    let entitlement_routes = Router::new()
        .route("/:account_id/check", post(entitlements::check))
        .route("/:account_id/commit", post(entitlements::commit))
        .layer(ConcurrencyLimitLayer::new(
            ENTITLEMENT_MAX_CONCURRENT_REQUESTS,
        ));

    let api_routes = Router::new()
        // Accounts
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/:account_id", get(accounts::get_account))
        .route("/accounts/:account_id/subscribe", post(accounts::subscribe))
        .route("/accounts/:account_id/usage", get(accounts::list_usage))
        // Plans
        .route("/plans", post(plans::create_plan))
        .route("/plans", get(plans::list_plans))
        // Reconciliation
        .route("/reconcile", post(reconcile::run_scan))
        // Entitlements (with their own concurrency limit)
        .nest("/entitlements", entitlement_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by the external provider)
        .route("/webhooks/provider", post(webhooks::provider_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
