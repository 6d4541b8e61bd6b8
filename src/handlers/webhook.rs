use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

use crate::services::payments::{self, PaymentEventKind, PaymentOutcome};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct PaymentWebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payment_id: String,
    pub amount: i64,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub metadata: PaymentMetadata,
}

#[derive(Deserialize)]
pub struct PaymentMetadata {
    pub booking_reference: String,
}

fn validate_webhook_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
    let mut mac = match Hmac::<Sha1>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
    expected == signature
}

/// Payment provider webhook. Delivery is at-least-once, so the reconciler
/// underneath is idempotent; an unknown booking reference is acknowledged
/// with 200 (the provider retrying will never make it known), while a store
/// failure returns 500 so the provider does retry.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Signature check skipped when the secret is unconfigured — dev mode.
    if !state.config.payment_webhook_secret.is_empty() {
        let signature = headers
            .get("x-payment-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if signature.is_empty()
            || !validate_webhook_signature(
                &state.config.payment_webhook_secret,
                signature,
                &body,
            )
        {
            tracing::warn!("payment webhook signature missing or invalid");
            return (StatusCode::FORBIDDEN, "Invalid signature").into_response();
        }
    }

    let event: PaymentWebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "malformed payment webhook payload");
            return (StatusCode::BAD_REQUEST, "Malformed payload").into_response();
        }
    };

    let kind = match event.event_type.as_str() {
        "payment.succeeded" => PaymentEventKind::Succeeded,
        "payment.failed" => PaymentEventKind::Failed,
        "payment.cancelled" => PaymentEventKind::Cancelled,
        other => {
            tracing::info!(event_type = other, "ignoring unhandled payment event type");
            return StatusCode::OK.into_response();
        }
    };

    let reference = event.metadata.booking_reference.clone();
    tracing::info!(
        reference = %reference,
        event_type = %event.event_type,
        payment_id = %event.payment_id,
        "incoming payment webhook"
    );

    let result = {
        let conn = state.db.lock().unwrap();
        payments::apply_payment_event(
            &conn,
            &reference,
            kind,
            event.amount,
            &event.payment_id,
            event.failure_reason.as_deref(),
        )
    };

    match result {
        Ok(PaymentOutcome::Applied(_)) | Ok(PaymentOutcome::Duplicate) => {
            StatusCode::OK.into_response()
        }
        Ok(PaymentOutcome::UnknownBooking) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::error!(reference = %reference, error = %e, "payment event failed to apply");
            (StatusCode::INTERNAL_SERVER_ERROR, "Store unavailable").into_response()
        }
    }
}
