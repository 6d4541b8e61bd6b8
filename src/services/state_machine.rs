use crate::models::BookingStatus;

/// Events that can drive a booking's lifecycle forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Confirm,
    Decline,
    Expire,
    Complete,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Confirm => "confirm",
            LifecycleEvent::Decline => "decline",
            LifecycleEvent::Expire => "expire",
            LifecycleEvent::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The event is legal; write the new status.
    Apply(BookingStatus),
    /// The booking is already in the requested state. Duplicate signing
    /// requests land here; callers treat it as success without side effects.
    AlreadyDone,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct TransitionError {
    pub reason: String,
}

impl TransitionError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Pure transition table for the booking lifecycle. No storage, no network:
/// given the current status and a requested event, returns the status to
/// write or rejects with a reason.
///
/// Allowed edges: pending→confirmed, pending→cancelled, pending→expired,
/// confirmed→completed, confirmed→cancelled. Terminal states reject
/// everything; confirming an already-confirmed booking is an idempotent
/// no-op rather than an error.
pub fn transition(
    current: BookingStatus,
    event: LifecycleEvent,
) -> Result<Transition, TransitionError> {
    use BookingStatus::*;
    use LifecycleEvent::*;

    match (current, event) {
        (Pending, Confirm) => Ok(Transition::Apply(Confirmed)),
        (Pending, Decline) => Ok(Transition::Apply(Cancelled)),
        (Pending, Expire) => Ok(Transition::Apply(Expired)),
        (Confirmed, Complete) => Ok(Transition::Apply(Completed)),
        (Confirmed, Decline) => Ok(Transition::Apply(Cancelled)),
        (Confirmed, Confirm) => Ok(Transition::AlreadyDone),
        (Completed, _) => Err(TransitionError::new("booking already completed")),
        (Cancelled, _) => Err(TransitionError::new("booking already cancelled")),
        (Expired, _) => Err(TransitionError::new("booking has expired")),
        (current, event) => Err(TransitionError::new(format!(
            "cannot {} a {} booking",
            event.as_str(),
            current.as_str()
        ))),
    }
}
