use rusqlite::Connection;

use crate::db::queries::{self, PaymentUpdate};
use crate::models::{AuditActor, AuditEntry, PaymentStatus};

/// Payment webhook event kinds, delivered at-least-once by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEventKind {
    Succeeded,
    Failed,
    Cancelled,
}

impl PaymentEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventKind::Succeeded => "succeeded",
            PaymentEventKind::Failed => "failed",
            PaymentEventKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    Applied(PaymentStatus),
    /// Same provider payment id, same resulting state: redelivered webhook,
    /// nothing written.
    Duplicate,
    /// No booking carries this reference. Logged and acknowledged so the
    /// provider stops retrying a delivery that can never succeed.
    UnknownBooking,
}

/// Map a provider event onto the booking's payment sub-state.
///
/// Idempotent under webhook redelivery: the provider payment id is the
/// external idempotency key, and a write is skipped when the stored id
/// matches and the state would not change. Payment sub-state never drives
/// the lifecycle status, in either direction.
pub fn apply_payment_event(
    conn: &Connection,
    reference: &str,
    kind: PaymentEventKind,
    amount_pence: i64,
    provider_payment_id: &str,
    failure_reason: Option<&str>,
) -> anyhow::Result<PaymentOutcome> {
    let booking = match queries::get_booking_by_reference(conn, reference)? {
        Some(b) => b,
        None => {
            tracing::warn!(
                reference,
                provider_payment_id,
                "payment event for unknown booking reference, ignoring"
            );
            return Ok(PaymentOutcome::UnknownBooking);
        }
    };

    let new_status = match kind {
        // A payment covering the full price settles the booking; anything
        // less is the deposit.
        PaymentEventKind::Succeeded => {
            if amount_pence >= booking.total_cost_pence {
                PaymentStatus::PaidFull
            } else {
                PaymentStatus::DepositPaid
            }
        }
        PaymentEventKind::Failed => PaymentStatus::Failed,
        PaymentEventKind::Cancelled => PaymentStatus::Cancelled,
    };

    let same_intent = booking.payment_intent_id.as_deref() == Some(provider_payment_id);
    if same_intent && booking.payment_status == new_status {
        tracing::info!(
            reference,
            provider_payment_id,
            "payment event already applied, no-op"
        );
        return Ok(PaymentOutcome::Duplicate);
    }

    queries::update_booking_payment_status(
        conn,
        reference,
        &PaymentUpdate {
            status: new_status,
            payment_intent_id: provider_payment_id.to_string(),
            amount_pence,
            failure_reason: failure_reason.map(str::to_string),
        },
    )?;

    let entry = AuditEntry::new(
        &format!("payment_{}", kind.as_str()),
        AuditActor::System,
        "payment-provider",
        "webhook",
    )
    .with_details(serde_json::json!({
        "provider_payment_id": provider_payment_id,
        "amount_pence": amount_pence,
        "payment_status": new_status.as_str(),
        "failure_reason": failure_reason,
    }));
    queries::append_audit_entry(conn, reference, &entry)?;

    tracing::info!(
        reference,
        provider_payment_id,
        payment_status = new_status.as_str(),
        "payment event applied"
    );
    Ok(PaymentOutcome::Applied(new_status))
}
