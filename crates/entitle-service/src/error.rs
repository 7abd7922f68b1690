//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Every quota bucket is exhausted (normal deny).
    #[error("quota exhausted: {reason}")]
    QuotaExhausted {
        /// Machine-readable exhaustion code.
        reason: String,
        /// Whether the caller should prompt for an upgrade.
        should_upgrade: bool,
    },

    /// Account state changed between check and commit; retry the whole
    /// sequence.
    #[error("account state changed, re-evaluate")]
    StateChanged,

    /// Webhook signature mismatch.
    #[error("invalid webhook signature")]
    SignatureInvalid,

    /// Webhook timestamp outside the freshness window.
    #[error("stale webhook event: {0}s old")]
    EventStale(i64),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error (payment provider).
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::QuotaExhausted {
                reason,
                should_upgrade,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "quota_exhausted",
                format!("quota exhausted: {reason}"),
                Some(serde_json::json!({
                    "reason": reason,
                    "should_upgrade": should_upgrade
                })),
            ),
            Self::StateChanged => (
                StatusCode::CONFLICT,
                "state_changed",
                "account state changed, re-run check-then-commit".to_string(),
                None,
            ),
            Self::SignatureInvalid => (
                StatusCode::UNAUTHORIZED,
                "signature_invalid",
                self.to_string(),
                None,
            ),
            Self::EventStale(age) => (
                StatusCode::UNAUTHORIZED,
                "event_stale",
                self.to_string(),
                Some(serde_json::json!({ "age_seconds": age })),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<entitle_store::StoreError> for ApiError {
    fn from(err: entitle_store::StoreError) -> Self {
        match err {
            entitle_store::StoreError::NotFound { entity, id } => {
                Self::NotFound(format!("{entity} not found: {id}"))
            }
            entitle_store::StoreError::StateChanged
            | entitle_store::StoreError::VersionConflict { .. } => Self::StateChanged,
            entitle_store::StoreError::InvariantViolation { .. } => Self::Internal(err.to_string()),
            entitle_store::StoreError::Database(msg)
            | entitle_store::StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}
