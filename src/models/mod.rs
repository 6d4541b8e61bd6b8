pub mod audit;
pub mod booking;
pub mod calendar;

pub use audit::{AuditActor, AuditEntry};
pub use booking::{AgreementMeta, Booking, BookingStatus, PaymentStatus};
pub use calendar::{CalendarEvent, CalendarEventPayload, CorrelationKey};
