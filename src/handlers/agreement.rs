use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{AgreementMeta, AuditActor};
use crate::services::reconciliation::{self, Actor, ConfirmOutcome};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SignAgreementRequest {
    pub signer_name: String,
}

/// POST /api/bookings/:reference/agreement — customer signs the hire
/// agreement, which confirms the booking and puts it on the calendar.
/// Signing an already-confirmed booking succeeds without duplicating
/// anything.
pub async fn sign_agreement(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(reference): Path<String>,
    Json(request): Json<SignAgreementRequest>,
) -> Result<Json<serde_json::Value>, Response> {
    if request.signer_name.trim().is_empty() {
        return Err(AppError::BadRequest("signer name is required".to_string()).into_response());
    }

    let booking = {
        let conn = state.db.lock().unwrap();
        queries::get_booking_by_reference(&conn, &reference)
            .map_err(|e| AppError::Database(e).into_response())?
            .ok_or_else(|| AppError::NotFound(format!("booking {reference}")).into_response())?
    };

    let ip_address = client_ip(&headers);
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let actor = Actor {
        kind: AuditActor::Customer,
        details: request.signer_name.clone(),
        method: "online_form".to_string(),
        ip_address: ip_address.clone(),
        user_agent: user_agent.clone(),
    };
    let agreement = AgreementMeta {
        signer_name: request.signer_name,
        method: "online_form".to_string(),
        ip_address,
        user_agent,
    };

    let outcome = reconciliation::confirm_booking(&state, booking.id, agreement, actor)
        .await
        .map_err(IntoResponse::into_response)?;

    let already = matches!(outcome, ConfirmOutcome::AlreadyConfirmed);
    Ok(Json(serde_json::json!({
        "reference": reference,
        "status": "confirmed",
        "already_confirmed": already,
    })))
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
