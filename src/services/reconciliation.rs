use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    AgreementMeta, AuditActor, AuditEntry, Booking, BookingStatus, CalendarEventPayload,
    CorrelationKey,
};
use crate::services::calendar::{DEFAULT_EVENT_END_HOUR, DEFAULT_EVENT_START_HOUR};
use crate::services::state_machine::{self, LifecycleEvent, Transition};
use crate::state::AppState;

#[derive(Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed { calendar_event_id: String },
    /// Duplicate signing request: the booking was already confirmed, nothing
    /// was written and no second calendar event exists.
    AlreadyConfirmed,
}

/// Who triggered a lifecycle operation, for the audit trail.
#[derive(Debug, Clone)]
pub struct Actor {
    pub kind: AuditActor,
    pub details: String,
    pub method: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Actor {
    pub fn system(method: &str) -> Self {
        Self {
            kind: AuditActor::System,
            details: "castledesk".to_string(),
            method: method.to_string(),
            ip_address: None,
            user_agent: None,
        }
    }

    fn audit_entry(&self, action: &str) -> AuditEntry {
        AuditEntry::new(action, self.kind, &self.details, &self.method)
            .with_request_meta(self.ip_address.clone(), self.user_agent.clone())
    }
}

/// The time window a booking occupies on the calendar: explicit start/end
/// when recorded, otherwise the standard hire window on the event day.
pub fn event_window(booking: &Booking) -> (NaiveDateTime, NaiveDateTime) {
    match (booking.start_time, booking.end_time) {
        (Some(start), Some(end)) => (start, end),
        _ => (
            booking
                .event_date
                .and_hms_opt(DEFAULT_EVENT_START_HOUR, 0, 0)
                .expect("valid hour"),
            booking
                .event_date
                .and_hms_opt(DEFAULT_EVENT_END_HOUR, 0, 0)
                .expect("valid hour"),
        ),
    }
}

fn event_payload(booking: &Booking, business_name: &str) -> CalendarEventPayload {
    let (start, end) = event_window(booking);
    let key = CorrelationKey::for_reference(&booking.reference);
    let balance = booking.total_cost_pence - booking.deposit_pence;

    CalendarEventPayload {
        summary: format!("{} hire: {}", booking.castle_name, booking.customer_name),
        description: format!(
            "{key}\nCustomer: {}\nTotal: £{:.2}\nDeposit: £{:.2}\nBalance due: £{:.2}\n{business_name}",
            booking.customer_name,
            booking.total_cost_pence as f64 / 100.0,
            booking.deposit_pence as f64 / 100.0,
            balance as f64 / 100.0,
        ),
        start,
        end,
    }
}

/// Confirm a booking: gate the transition, create the calendar event, then
/// persist status, agreement fields and calendar linkage, and append an
/// audit entry.
///
/// The calendar write goes first and the store write is only attempted after
/// it succeeds. A calendar failure therefore leaves the store untouched and
/// the operation fails whole. A store failure after calendar success is the
/// one partial outcome we cannot avoid; it is logged and audited as a known
/// inconsistency for the drift check to report.
pub async fn confirm_booking(
    state: &Arc<AppState>,
    booking_id: i64,
    agreement: AgreementMeta,
    actor: Actor,
) -> Result<ConfirmOutcome, AppError> {
    // Check-then-act under the db lock; the lock is released before any
    // network call.
    let booking = {
        let conn = state.db.lock().unwrap();
        queries::get_booking(&conn, booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?
    };

    match state_machine::transition(booking.status, LifecycleEvent::Confirm)? {
        Transition::AlreadyDone => {
            tracing::info!(reference = %booking.reference, "booking already confirmed, no-op");
            return Ok(ConfirmOutcome::AlreadyConfirmed);
        }
        Transition::Apply(_) => {}
    }

    let payload = event_payload(&booking, &state.config.business_name);
    let event_id = state
        .calendar
        .create_booking_event(&payload)
        .await
        .map_err(|e| {
            tracing::error!(reference = %booking.reference, error = %e, "calendar create failed, booking left pending");
            AppError::from(e)
        })?;

    enum Persisted {
        Done,
        LostRace,
    }

    let signed_at = Utc::now().naive_utc();
    let persist = || -> anyhow::Result<Persisted> {
        let conn = state.db.lock().unwrap();

        // A concurrent confirm may have won while we were on the network.
        // The second writer backs off; its calendar event is removed below.
        let current = queries::get_booking(&conn, booking_id)?
            .ok_or_else(|| anyhow::anyhow!("booking {booking_id} deleted mid-confirm"))?;
        if current.status == BookingStatus::Confirmed {
            return Ok(Persisted::LostRace);
        }

        queries::update_booking_status(&conn, booking_id, BookingStatus::Confirmed)?;
        queries::update_booking_agreement(
            &conn,
            booking_id,
            &signed_at,
            &agreement.signer_name,
            &agreement.method,
            agreement.ip_address.as_deref(),
            agreement.user_agent.as_deref(),
        )?;
        queries::set_calendar_event_id(&conn, booking_id, Some(&event_id))?;

        let entry = actor
            .audit_entry("confirmed")
            .with_details(serde_json::json!({
                "calendar_event_id": &event_id,
                "signer_name": &agreement.signer_name,
                "signing_method": &agreement.method,
            }));
        queries::append_audit_entry(&conn, &booking.reference, &entry)?;
        Ok(Persisted::Done)
    };

    match persist() {
        Ok(Persisted::Done) => {}
        Ok(Persisted::LostRace) => {
            // Remove only the event this call created. The winner's event is
            // already linked on the booking and must survive.
            if let Err(e) = state.calendar.delete_event(&event_id).await {
                tracing::warn!(
                    reference = %booking.reference,
                    calendar_event_id = %event_id,
                    error = %e,
                    "duplicate event cleanup failed"
                );
            }
            tracing::info!(reference = %booking.reference, "concurrent confirm won, treated as already confirmed");
            return Ok(ConfirmOutcome::AlreadyConfirmed);
        }
        Err(store_err) => {
            // Calendar has the event, the store does not know about it.
            // Record the drift; the reconciliation sweep will surface it.
            tracing::error!(
                reference = %booking.reference,
                calendar_event_id = %event_id,
                error = %store_err,
                "store write failed after calendar create, orphaned calendar event"
            );
            let conn = state.db.lock().unwrap();
            let entry = Actor::system("reconciliation")
                .audit_entry("calendar_store_mismatch")
                .with_details(serde_json::json!({
                    "calendar_event_id": &event_id,
                    "error": store_err.to_string(),
                }));
            let _ = queries::append_audit_entry(&conn, &booking.reference, &entry);
            return Err(AppError::Database(store_err));
        }
    }

    tracing::info!(
        reference = %booking.reference,
        calendar_event_id = %event_id,
        "booking confirmed"
    );
    Ok(ConfirmOutcome::Confirmed {
        calendar_event_id: event_id,
    })
}

/// Decline a booking from pending or confirmed. The audit entry is written
/// before the row may be removed, and the trail is keyed by reference so it
/// survives the deletion. With a reason key the customer is notified
/// best-effort; notification failure never fails the decline.
pub async fn decline_booking(
    state: &Arc<AppState>,
    booking_id: i64,
    reason_key: Option<&str>,
    remove_row: bool,
    actor: Actor,
) -> Result<(), AppError> {
    let booking = {
        let conn = state.db.lock().unwrap();
        queries::get_booking(&conn, booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?
    };

    let new_status = match state_machine::transition(booking.status, LifecycleEvent::Decline)? {
        Transition::Apply(status) => status,
        Transition::AlreadyDone => unreachable!("decline has no idempotent edge"),
    };

    if let Some(reason) = reason_key {
        let subject = format!("Your booking {} could not be accepted", booking.reference);
        let body = format!(
            "Hi {},\n\nUnfortunately we are unable to go ahead with booking {} ({}).\nReason: {}\n\nAny payment taken will be refunded.",
            booking.customer_name,
            booking.reference,
            booking.castle_name,
            reason.replace('_', " "),
        );
        if let Err(e) = state
            .notifier
            .send_email(&booking.customer_email, &subject, &body)
            .await
        {
            tracing::warn!(reference = %booking.reference, error = %e, "decline notification failed");
        }
    }

    // Confirmed bookings already occupy the calendar; clear matching events.
    if booking.status == BookingStatus::Confirmed {
        remove_calendar_events(state, &booking).await;
    }

    {
        let conn = state.db.lock().unwrap();
        queries::update_booking_status(&conn, booking_id, new_status)?;

        let entry = actor
            .audit_entry("declined")
            .with_details(serde_json::json!({
                "reason_key": reason_key,
                "previous_status": booking.status.as_str(),
            }));
        queries::append_audit_entry(&conn, &booking.reference, &entry)?;

        if remove_row {
            queries::delete_booking(&conn, booking_id)?;
            tracing::info!(reference = %booking.reference, "declined booking row removed");
        }
    }

    tracing::info!(reference = %booking.reference, reason = ?reason_key, "booking declined");
    Ok(())
}

/// Complete a confirmed booking. Only legal from confirmed; an
/// already-completed booking is rejected with that reason.
pub async fn complete_booking(
    state: &Arc<AppState>,
    booking_id: i64,
    reason: &str,
    actor: Actor,
) -> Result<(), AppError> {
    let conn = state.db.lock().unwrap();
    let booking = queries::get_booking(&conn, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;

    let new_status = match state_machine::transition(booking.status, LifecycleEvent::Complete)? {
        Transition::Apply(status) => status,
        Transition::AlreadyDone => unreachable!("complete has no idempotent edge"),
    };

    queries::update_booking_status(&conn, booking_id, new_status)?;
    let entry = actor
        .audit_entry("completed")
        .with_details(serde_json::json!({ "reason": reason }));
    queries::append_audit_entry(&conn, &booking.reference, &entry)?;

    tracing::info!(reference = %booking.reference, reason, "booking completed");
    Ok(())
}

/// Expire a pending booking that was never confirmed.
pub async fn expire_booking(
    state: &Arc<AppState>,
    booking_id: i64,
    reason: &str,
    actor: Actor,
) -> Result<(), AppError> {
    let conn = state.db.lock().unwrap();
    let booking = queries::get_booking(&conn, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;

    let new_status = match state_machine::transition(booking.status, LifecycleEvent::Expire)? {
        Transition::Apply(status) => status,
        Transition::AlreadyDone => unreachable!("expire has no idempotent edge"),
    };

    queries::update_booking_status(&conn, booking_id, new_status)?;
    let entry = actor
        .audit_entry("expired")
        .with_details(serde_json::json!({ "reason": reason }));
    queries::append_audit_entry(&conn, &booking.reference, &entry)?;

    tracing::info!(reference = %booking.reference, reason, "booking expired");
    Ok(())
}

/// Best-effort removal of every calendar event correlated with the booking,
/// searched over the event day plus a day either side. Failures are logged
/// and swallowed; the drift check reports anything left behind.
async fn remove_calendar_events(state: &Arc<AppState>, booking: &Booking) {
    let key = CorrelationKey::for_reference(&booking.reference);
    let (start, end) = event_window(booking);
    let window_start = start - Duration::days(1);
    let window_end = end + Duration::days(1);

    if let Err(e) = state
        .calendar
        .delete_events_matching(&key, window_start, window_end)
        .await
    {
        tracing::warn!(reference = %booking.reference, error = %e, "calendar cleanup failed");
    }
}
