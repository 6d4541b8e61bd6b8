use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::db::queries;
use crate::models::{Booking, BookingStatus, CorrelationKey};
use crate::services::calendar::DEFAULT_EVENT_END_HOUR;
use crate::services::reconciliation::{self, Actor};
use crate::state::AppState;

/// How far the drift check looks around "now" for calendar events. Bounded
/// so a sweep never scans the whole calendar.
const DRIFT_WINDOW_PAST_DAYS: i64 = 30;
const DRIFT_WINDOW_FUTURE_DAYS: i64 = 90;

#[derive(Debug, Serialize)]
pub struct SweepSummary {
    pub examined: usize,
    pub completed: usize,
    pub skipped: usize,
    pub errors: Vec<SweepItemError>,
}

#[derive(Debug, Serialize)]
pub struct SweepItemError {
    pub reference: String,
    pub message: String,
}

/// Which source supplied the end instant used for a completion decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndSource {
    ExplicitEnd,
    CalendarEvent,
    DefaultFallback,
}

impl EndSource {
    fn reason(&self) -> &'static str {
        match self {
            EndSource::ExplicitEnd => "event ended (explicit end date)",
            EndSource::CalendarEvent => "event ended (calendar event end)",
            EndSource::DefaultFallback => "event ended (default 17:00 fallback)",
        }
    }
}

/// Scan confirmed bookings and complete those whose event has ended.
///
/// End-instant priority: the booking's explicit end time, else the end of a
/// calendar event matching the correlation key near the event day, else
/// 17:00 on the event day. A calendar lookup failure falls through to the
/// fallback, and one booking's failure never stops the sweep; failures are
/// collected into the summary.
pub async fn run_completion_sweep(state: &Arc<AppState>, now: NaiveDateTime) -> SweepSummary {
    let confirmed = {
        let conn = state.db.lock().unwrap();
        match queries::get_bookings_by_status(&conn, Some(BookingStatus::Confirmed)) {
            Ok(bookings) => bookings,
            Err(e) => {
                tracing::error!(error = %e, "completion sweep could not list bookings");
                return SweepSummary {
                    examined: 0,
                    completed: 0,
                    skipped: 0,
                    errors: vec![SweepItemError {
                        reference: "*".to_string(),
                        message: e.to_string(),
                    }],
                };
            }
        }
    };

    let mut summary = SweepSummary {
        examined: confirmed.len(),
        completed: 0,
        skipped: 0,
        errors: Vec::new(),
    };

    for booking in confirmed {
        let (end, source) = resolve_end_instant(state, &booking).await;
        if end >= now {
            summary.skipped += 1;
            continue;
        }

        let result = reconciliation::complete_booking(
            state,
            booking.id,
            source.reason(),
            Actor::system("completion_sweep"),
        )
        .await;

        match result {
            Ok(()) => summary.completed += 1,
            Err(e) => {
                tracing::error!(reference = %booking.reference, error = %e, "sweep completion failed");
                summary.errors.push(SweepItemError {
                    reference: booking.reference.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        examined = summary.examined,
        completed = summary.completed,
        skipped = summary.skipped,
        errors = summary.errors.len(),
        "completion sweep finished"
    );
    summary
}

async fn resolve_end_instant(state: &Arc<AppState>, booking: &Booking) -> (NaiveDateTime, EndSource) {
    if let Some(end) = booking.end_time {
        return (end, EndSource::ExplicitEnd);
    }

    // Search one day either side of the event day, not the whole calendar.
    let day_start = booking
        .event_date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid");
    let window_start = day_start - Duration::days(1);
    let window_end = day_start + Duration::days(2);
    let key = CorrelationKey::for_reference(&booking.reference);

    match state.calendar.get_events_in_range(window_start, window_end).await {
        Ok(events) => {
            if let Some(event) = events.iter().find(|e| key.matches(&e.description)) {
                return (event.end, EndSource::CalendarEvent);
            }
        }
        Err(e) => {
            tracing::warn!(
                reference = %booking.reference,
                error = %e,
                "calendar lookup failed, using default end time"
            );
        }
    }

    let fallback = booking
        .event_date
        .and_hms_opt(DEFAULT_EVENT_END_HOUR, 0, 0)
        .expect("17:00 is valid");
    (fallback, EndSource::DefaultFallback)
}

// ── Drift check ──

#[derive(Debug, Serialize)]
pub struct DriftReport {
    /// Calendar events carrying a booking reference that no confirmed
    /// booking claims.
    pub orphaned_events: Vec<OrphanedEvent>,
    /// Confirmed bookings whose recorded calendar event cannot be found.
    pub missing_events: Vec<MissingEvent>,
    pub events_scanned: usize,
}

#[derive(Debug, Serialize)]
pub struct OrphanedEvent {
    pub event_id: String,
    pub summary: String,
    pub reference: String,
}

#[derive(Debug, Serialize)]
pub struct MissingEvent {
    pub reference: String,
    pub calendar_event_id: Option<String>,
}

/// Detect and report calendar/store drift. Reports only — auto-deleting an
/// orphaned event or re-creating a missing one could paper over a real
/// data-entry mistake, so the fix stays a human decision.
pub async fn run_drift_check(
    state: &Arc<AppState>,
    now: NaiveDateTime,
) -> Result<DriftReport, crate::errors::AppError> {
    let window_start = now - Duration::days(DRIFT_WINDOW_PAST_DAYS);
    let window_end = now + Duration::days(DRIFT_WINDOW_FUTURE_DAYS);

    let events = state
        .calendar
        .get_events_in_range(window_start, window_end)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "drift check could not list calendar events");
            crate::errors::AppError::from(e)
        })?;

    let confirmed = {
        let conn = state.db.lock().unwrap();
        queries::get_bookings_by_status(&conn, Some(BookingStatus::Confirmed))?
    };

    let mut report = DriftReport {
        orphaned_events: Vec::new(),
        missing_events: Vec::new(),
        events_scanned: events.len(),
    };

    for event in &events {
        let Some(reference) = CorrelationKey::extract_reference(&event.description) else {
            // Not one of ours (maintenance blocks, personal entries).
            continue;
        };
        let claimed = confirmed.iter().any(|b| b.reference == reference);
        if !claimed {
            report.orphaned_events.push(OrphanedEvent {
                event_id: event.id.clone(),
                summary: event.summary.clone(),
                reference,
            });
        }
    }

    for booking in &confirmed {
        let in_window =
            booking.event_date >= window_start.date() && booking.event_date <= window_end.date();
        if !in_window {
            continue;
        }
        let key = CorrelationKey::for_reference(&booking.reference);
        let found = events.iter().any(|e| {
            booking.calendar_event_id.as_deref() == Some(e.id.as_str())
                || key.matches(&e.description)
        });
        if !found {
            report.missing_events.push(MissingEvent {
                reference: booking.reference.clone(),
                calendar_event_id: booking.calendar_event_id.clone(),
            });
        }
    }

    if !report.orphaned_events.is_empty() || !report.missing_events.is_empty() {
        tracing::warn!(
            orphaned = report.orphaned_events.len(),
            missing = report.missing_events.len(),
            "calendar/store drift detected"
        );
    }
    Ok(report)
}
