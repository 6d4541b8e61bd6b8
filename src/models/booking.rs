use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    /// Human-friendly reference (`TS###`), immutable once assigned. This is
    /// the key that correlates the booking across store, calendar and
    /// payment provider.
    pub reference: String,
    pub customer_name: String,
    pub customer_email: String,
    pub castle_name: String,
    pub event_date: NaiveDate,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub duration_hours: i32,
    pub total_cost_pence: i64,
    pub deposit_pence: i64,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub payment_failure_reason: Option<String>,
    pub amount_paid_pence: i64,
    pub agreement_signed: bool,
    pub agreement_signed_at: Option<NaiveDateTime>,
    pub agreement_signer_name: Option<String>,
    pub agreement_method: Option<String>,
    pub agreement_ip: Option<String>,
    pub agreement_user_agent: Option<String>,
    pub calendar_event_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "confirmed" => BookingStatus::Confirmed,
            "completed" => BookingStatus::Completed,
            "cancelled" => BookingStatus::Cancelled,
            "expired" => BookingStatus::Expired,
            _ => BookingStatus::Pending,
        }
    }

    /// Completed, cancelled and expired bookings never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Expired
        )
    }
}

/// Payment sub-state, owned by the payment reconciler. Orthogonal to the
/// lifecycle status: a paid-in-full booking can still be pending until the
/// hire agreement is signed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    DepositPaid,
    PaidFull,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::DepositPaid => "deposit_paid",
            PaymentStatus::PaidFull => "paid_full",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "deposit_paid" => PaymentStatus::DepositPaid,
            "paid_full" => PaymentStatus::PaidFull,
            "failed" => PaymentStatus::Failed,
            "cancelled" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Pending,
        }
    }
}

/// Evidentiary fields captured when the hire agreement is signed. Written
/// once at signing time and never overwritten afterwards.
#[derive(Debug, Clone)]
pub struct AgreementMeta {
    pub signer_name: String,
    pub method: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
