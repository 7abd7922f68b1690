//! Provider webhook ingestion.
//!
//! Each inbound notification passes a series of hard gates: signature
//! verification, freshness, payload normalization, then the store's
//! idempotent apply. Signature and freshness failures are the only 4xx
//! outcomes; duplicates and unmatched accounts return success so the
//! provider does not retry events we have already recorded.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use entitle_core::{IngestStatus, ProviderEvent, ProviderEventKind};
use entitle_store::Store;

use crate::crypto::{parse_signature_header, verify_signature};
use crate::error::ApiError;
use crate::state::AppState;

/// Signature header name.
const SIGNATURE_HEADER: &str = "provider-signature";

/// Webhook response body.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was received.
    pub received: bool,

    /// Processing outcome: "applied", "skipped_duplicate", "unmatched", or
    /// "ignored" for event types outside the mapping set.
    pub status: &'static str,
}

/// Handle a signed provider webhook.
pub async fn provider_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let secret = state
        .config
        .provider_webhook_secret
        .as_ref()
        .ok_or_else(|| ApiError::Internal("provider webhook secret not configured".into()))?;

    // Gate 1: signature, constant-time.
    let header_value = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::SignatureInvalid)?;
    let signature = parse_signature_header(header_value).ok_or(ApiError::SignatureInvalid)?;

    if !verify_signature(secret, signature.timestamp, &body, &signature.signature) {
        tracing::warn!("provider webhook signature mismatch");
        return Err(ApiError::SignatureInvalid);
    }

    // Gate 2: freshness, bounding replay exposure while tolerating skew.
    let now = Utc::now();
    let age_seconds = (now.timestamp() - signature.timestamp).abs();
    if age_seconds > state.config.webhook_tolerance_seconds {
        tracing::warn!(age_seconds, "provider webhook outside freshness window");
        return Err(ApiError::EventStale(age_seconds));
    }

    // Gate 3: parse and normalize into the one internal event shape.
    let payload: serde_json::Value =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let event = match normalize_event(&payload) {
        Ok(event) => event,
        Err(NormalizeError::UnknownEventType(event_type)) => {
            tracing::debug!(event_type = %event_type, "unhandled provider event type");
            return Ok(Json(WebhookResponse {
                received: true,
                status: "ignored",
            }));
        }
        Err(NormalizeError::Malformed(msg)) => {
            return Err(ApiError::BadRequest(msg));
        }
    };

    tracing::info!(
        event_id = %event.event_id,
        transaction_id = %event.transaction_id,
        kind = ?event.kind,
        "provider webhook received"
    );

    // Gates 4-5: idempotency and the atomic mutation+guard commit live in
    // the store so a crash cannot apply one without the other.
    let outcome = state.store.apply_provider_event(&event, &payload, now)?;

    let status = match outcome.status {
        IngestStatus::Applied => "applied",
        IngestStatus::SkippedDuplicate => "skipped_duplicate",
        IngestStatus::Unmatched => "unmatched",
    };

    Ok(Json(WebhookResponse {
        received: true,
        status,
    }))
}

/// Normalization failures.
enum NormalizeError {
    /// Event type outside the fixed mapping set.
    UnknownEventType(String),

    /// Payload missing required fields.
    Malformed(String),
}

/// Normalize a raw provider payload into a [`ProviderEvent`].
///
/// Providers vary between `{"event_type": ..., "data": {...}}` envelopes and
/// flat objects; both are accepted here and nothing downstream sees raw JSON.
fn normalize_event(payload: &serde_json::Value) -> Result<ProviderEvent, NormalizeError> {
    let event_type = payload
        .get("event_type")
        .or_else(|| payload.get("type"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| NormalizeError::Malformed("missing event_type".into()))?;

    let kind = ProviderEventKind::parse(event_type)
        .map_err(|_| NormalizeError::UnknownEventType(event_type.to_string()))?;

    let event_id = payload
        .get("event_id")
        .or_else(|| payload.get("id"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| NormalizeError::Malformed("missing event_id".into()))?
        .to_string();

    let data = payload.get("data").unwrap_or(payload);
    let data_id = data.get("id").and_then(|v| v.as_str());

    // Transaction events carry the transaction entity as `data.id`;
    // subscription events may reference a transaction explicitly. The
    // per-delivery event ID is the last resort so distinct lifecycle events
    // never collapse onto one guard key.
    let transaction_id = data
        .get("transaction_id")
        .and_then(|v| v.as_str())
        .or_else(|| if kind.is_transaction() { data_id } else { None })
        .unwrap_or(&event_id)
        .to_string();

    let subscription_id = data
        .get("subscription_id")
        .and_then(|v| v.as_str())
        .or_else(|| if kind.is_transaction() { None } else { data_id })
        .map(String::from);

    let customer_id = data
        .get("customer_id")
        .and_then(|v| v.as_str())
        .map(String::from);

    let status = data
        .get("status")
        .and_then(|v| v.as_str())
        .map(String::from);

    let credits = data.get("credits").and_then(serde_json::Value::as_u64);
    let amount_cents = data.get("amount_cents").and_then(serde_json::Value::as_i64);

    let occurred_at = payload
        .get("occurred_at")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc));

    Ok(ProviderEvent {
        event_id,
        transaction_id,
        kind,
        subscription_id,
        customer_id,
        status,
        credits,
        amount_cents,
        occurred_at,
    })
}
