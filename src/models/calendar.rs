use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The string that ties a calendar event back to a booking. The external
/// calendar offers no foreign keys, so correlation is by substring match on
/// the event description: an event belongs to booking `TS005` iff its
/// description contains `Booking Ref: TS005`. This type is the single
/// definition of that matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn for_reference(reference: &str) -> Self {
        Self(format!("Booking Ref: {reference}"))
    }

    pub fn matches(&self, description: &str) -> bool {
        description.contains(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Pull the booking reference out of an event description, if the
    /// description carries one. Inverse of [`CorrelationKey::for_reference`].
    pub fn extract_reference(description: &str) -> Option<String> {
        let rest = description.split("Booking Ref: ").nth(1)?;
        let reference: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        if reference.is_empty() {
            None
        } else {
            Some(reference)
        }
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event as read back from the external calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default)]
    pub status: String,
}

/// Payload for creating a booking's calendar event.
#[derive(Debug, Clone, Serialize)]
pub struct CalendarEventPayload {
    pub summary: String,
    pub description: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}
