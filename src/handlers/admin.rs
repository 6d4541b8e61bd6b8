use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{AgreementMeta, AuditActor, BookingStatus};
use crate::services::reconciliation::{self, Actor, ConfirmOutcome};
use crate::services::sweeper;
use crate::state::AppState;

#[allow(clippy::result_large_err)]
fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), Response> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token != expected_token {
        return Err(AppError::Unauthorized.into_response());
    }
    Ok(())
}

/// Actor identity for admin operations. The auth layer vouches for the
/// token; the optional `x-admin-email` header names the person for the
/// audit trail, checked against the configured directory.
fn admin_actor(state: &AppState, headers: &HeaderMap) -> Actor {
    let email = headers
        .get("x-admin-email")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let details = if !email.is_empty() && state.config.admin_directory.is_admin(email) {
        email.to_string()
    } else {
        "unattributed admin".to_string()
    };
    Actor {
        kind: AuditActor::Admin,
        details,
        method: "admin_api".to_string(),
        ip_address: None,
        user_agent: None,
    }
}

// GET /api/admin/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct BookingResponse {
    id: i64,
    reference: String,
    customer_name: String,
    castle_name: String,
    event_date: String,
    status: String,
    payment_status: String,
    agreement_signed: bool,
    calendar_event_id: Option<String>,
}

pub async fn get_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<BookingResponse>>, Response> {
    check_auth(&headers, &state.config.admin_token)?;

    let status = query.status.as_deref().map(BookingStatus::from_str);
    let bookings = {
        let conn = state.db.lock().unwrap();
        queries::get_bookings_by_status(&conn, status)
            .map_err(|e| AppError::Database(e).into_response())?
    };

    let response = bookings
        .into_iter()
        .map(|b| BookingResponse {
            id: b.id,
            reference: b.reference,
            customer_name: b.customer_name,
            castle_name: b.castle_name,
            event_date: b.event_date.format("%Y-%m-%d").to_string(),
            status: b.status.as_str().to_string(),
            payment_status: b.payment_status.as_str().to_string(),
            agreement_signed: b.agreement_signed,
            calendar_event_id: b.calendar_event_id,
        })
        .collect();
    Ok(Json(response))
}

// GET /api/admin/bookings/:reference/audit
pub async fn get_audit_trail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> Result<Json<serde_json::Value>, Response> {
    check_auth(&headers, &state.config.admin_token)?;

    let trail = {
        let conn = state.db.lock().unwrap();
        queries::get_audit_trail(&conn, &reference)
            .map_err(|e| AppError::Database(e).into_response())?
    };

    let entries: Vec<serde_json::Value> = trail
        .iter()
        .map(|e| {
            serde_json::json!({
                "timestamp": e.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
                "action": e.action,
                "actor": e.actor.as_str(),
                "actorDetails": e.actor_details,
                "method": e.method,
                "ipAddress": e.ip_address,
                "userAgent": e.user_agent,
                "details": e.details,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "reference": reference, "entries": entries })))
}

// POST /api/admin/bookings/:id/confirm
#[derive(Deserialize)]
pub struct ConfirmRequest {
    pub signer_name: Option<String>,
}

pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<serde_json::Value>, Response> {
    check_auth(&headers, &state.config.admin_token)?;
    let actor = admin_actor(&state, &headers);

    let agreement = AgreementMeta {
        signer_name: request
            .signer_name
            .unwrap_or_else(|| actor.details.clone()),
        method: "manual_admin".to_string(),
        ip_address: None,
        user_agent: None,
    };

    let outcome = reconciliation::confirm_booking(&state, id, agreement, actor)
        .await
        .map_err(IntoResponse::into_response)?;

    let body = match outcome {
        ConfirmOutcome::Confirmed { calendar_event_id } => serde_json::json!({
            "status": "confirmed",
            "calendar_event_id": calendar_event_id,
        }),
        ConfirmOutcome::AlreadyConfirmed => serde_json::json!({
            "status": "confirmed",
            "already_confirmed": true,
        }),
    };
    Ok(Json(body))
}

// POST /api/admin/bookings/:id/decline
#[derive(Deserialize)]
pub struct DeclineRequest {
    pub reason_key: Option<String>,
    #[serde(default)]
    pub remove_row: bool,
}

pub async fn decline_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(request): Json<DeclineRequest>,
) -> Result<StatusCode, Response> {
    check_auth(&headers, &state.config.admin_token)?;
    let actor = admin_actor(&state, &headers);

    reconciliation::decline_booking(
        &state,
        id,
        request.reason_key.as_deref(),
        request.remove_row,
        actor,
    )
    .await
    .map_err(IntoResponse::into_response)?;

    Ok(StatusCode::OK)
}

// POST /api/admin/bookings/:id/complete
#[derive(Deserialize)]
pub struct CompleteRequest {
    pub reason: Option<String>,
}

pub async fn complete_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(request): Json<CompleteRequest>,
) -> Result<StatusCode, Response> {
    check_auth(&headers, &state.config.admin_token)?;
    let actor = admin_actor(&state, &headers);

    let reason = request
        .reason
        .unwrap_or_else(|| "manually completed".to_string());
    reconciliation::complete_booking(&state, id, &reason, actor)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(StatusCode::OK)
}

// POST /api/admin/bookings/:id/expire
pub async fn expire_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode, Response> {
    check_auth(&headers, &state.config.admin_token)?;
    let actor = admin_actor(&state, &headers);

    reconciliation::expire_booking(&state, id, "expired by admin", actor)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(StatusCode::OK)
}

// POST /api/admin/sweep
pub async fn run_sweep(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<sweeper::SweepSummary>, Response> {
    check_auth(&headers, &state.config.admin_token)?;

    let summary = sweeper::run_completion_sweep(&state, Utc::now().naive_utc()).await;
    Ok(Json(summary))
}

// GET /api/admin/drift
pub async fn drift_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<sweeper::DriftReport>, Response> {
    check_auth(&headers, &state.config.admin_token)?;

    let report = sweeper::run_drift_check(&state, Utc::now().naive_utc())
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(report))
}
