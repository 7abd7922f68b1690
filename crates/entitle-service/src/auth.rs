//! Authentication extractors.
//!
//! The operator/service surface authenticates with a shared API key in the
//! `X-API-Key` header, compared in constant time. The webhook endpoint does
//! not use this extractor; it authenticates by payload signature instead.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::crypto::constant_time_eq;
use crate::error::ApiError;
use crate::state::AppState;

/// An authenticated operator or internal service.
#[derive(Debug, Clone)]
pub struct OperatorAuth {
    /// Caller name from the `X-Service-Name` header, for audit logs.
    pub caller: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for OperatorAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let expected = state
            .config
            .api_key
            .as_ref()
            .ok_or(ApiError::Unauthorized)?;

        if !constant_time_eq(api_key, expected) {
            return Err(ApiError::Unauthorized);
        }

        let caller = parts
            .headers
            .get("x-service-name")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self { caller })
    }
}
