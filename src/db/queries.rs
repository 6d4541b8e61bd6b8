use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::models::{AuditActor, AuditEntry, Booking, BookingStatus, PaymentStatus};

const DT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

fn format_dt(dt: &NaiveDateTime) -> String {
    dt.format(DT_FORMAT).to_string()
}

fn parse_dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, DT_FORMAT).unwrap_or_else(|_| Utc::now().naive_utc())
}

fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .unwrap_or_else(|_| Utc::now().date_naive())
}

// ── Bookings ──

/// Fields supplied by the public booking flow; everything else (reference,
/// statuses, timestamps) is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub customer_name: String,
    pub customer_email: String,
    pub castle_name: String,
    pub event_date: NaiveDate,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub duration_hours: i32,
    pub total_cost_pence: i64,
    pub deposit_pence: i64,
}

const BOOKING_COLUMNS: &str = "id, reference, customer_name, customer_email, castle_name, \
     event_date, start_time, end_time, duration_hours, total_cost_pence, deposit_pence, \
     status, payment_status, payment_intent_id, payment_failure_reason, amount_paid_pence, \
     agreement_signed, agreement_signed_at, agreement_signer_name, agreement_method, \
     agreement_ip, agreement_user_agent, calendar_event_id, created_at, updated_at";

fn row_to_booking(row: &Row) -> rusqlite::Result<Booking> {
    let status: String = row.get(11)?;
    let payment_status: String = row.get(12)?;
    Ok(Booking {
        id: row.get(0)?,
        reference: row.get(1)?,
        customer_name: row.get(2)?,
        customer_email: row.get(3)?,
        castle_name: row.get(4)?,
        event_date: parse_date(&row.get::<_, String>(5)?),
        start_time: row.get::<_, Option<String>>(6)?.map(|s| parse_dt(&s)),
        end_time: row.get::<_, Option<String>>(7)?.map(|s| parse_dt(&s)),
        duration_hours: row.get(8)?,
        total_cost_pence: row.get(9)?,
        deposit_pence: row.get(10)?,
        status: BookingStatus::from_str(&status),
        payment_status: PaymentStatus::from_str(&payment_status),
        payment_intent_id: row.get(13)?,
        payment_failure_reason: row.get(14)?,
        amount_paid_pence: row.get(15)?,
        agreement_signed: row.get::<_, i64>(16)? != 0,
        agreement_signed_at: row.get::<_, Option<String>>(17)?.map(|s| parse_dt(&s)),
        agreement_signer_name: row.get(18)?,
        agreement_method: row.get(19)?,
        agreement_ip: row.get(20)?,
        agreement_user_agent: row.get(21)?,
        calendar_event_id: row.get(22)?,
        created_at: parse_dt(&row.get::<_, String>(23)?),
        updated_at: parse_dt(&row.get::<_, String>(24)?),
    })
}

/// Mint the next `TS###` reference. A reference is never reused, even after
/// its booking row is deleted — the audit log still holds entries under it,
/// so the high-water mark considers both tables.
pub fn next_reference(conn: &Connection) -> anyhow::Result<String> {
    let max_suffix: i64 = conn.query_row(
        "SELECT COALESCE(MAX(n), 0) FROM (
            SELECT CAST(SUBSTR(reference, 3) AS INTEGER) AS n FROM bookings
            UNION ALL
            SELECT CAST(SUBSTR(booking_reference, 3) AS INTEGER) FROM audit_log
         )",
        [],
        |row| row.get(0),
    )?;
    Ok(format!("TS{:03}", max_suffix + 1))
}

pub fn create_booking(conn: &Connection, new: &NewBooking) -> anyhow::Result<Booking> {
    let reference = next_reference(conn)?;
    let now = format_dt(&Utc::now().naive_utc());

    conn.execute(
        "INSERT INTO bookings (reference, customer_name, customer_email, castle_name,
            event_date, start_time, end_time, duration_hours, total_cost_pence,
            deposit_pence, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            reference,
            new.customer_name,
            new.customer_email,
            new.castle_name,
            new.event_date.format(DATE_FORMAT).to_string(),
            new.start_time.as_ref().map(format_dt),
            new.end_time.as_ref().map(format_dt),
            new.duration_hours,
            new.total_cost_pence,
            new.deposit_pence,
            now,
        ],
    )?;

    let id = conn.last_insert_rowid();
    get_booking(conn, id)?.ok_or_else(|| anyhow::anyhow!("booking {id} vanished after insert"))
}

pub fn get_booking(conn: &Connection, id: i64) -> anyhow::Result<Option<Booking>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"))?;
    match stmt.query_row(params![id], row_to_booking) {
        Ok(booking) => Ok(Some(booking)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_booking_by_reference(
    conn: &Connection,
    reference: &str,
) -> anyhow::Result<Option<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE reference = ?1"
    ))?;
    match stmt.query_row(params![reference], row_to_booking) {
        Ok(booking) => Ok(Some(booking)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_bookings_by_status(
    conn: &Connection,
    status: Option<BookingStatus>,
) -> anyhow::Result<Vec<Booking>> {
    let (sql, filter) = match status {
        Some(s) => (
            format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE status = ?1 ORDER BY event_date ASC"
            ),
            Some(s.as_str().to_string()),
        ),
        None => (
            format!("SELECT {BOOKING_COLUMNS} FROM bookings ORDER BY event_date ASC"),
            None,
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let rows = match filter {
        Some(f) => stmt.query_map(params![f], row_to_booking)?.collect::<Result<Vec<_>, _>>()?,
        None => stmt.query_map([], row_to_booking)?.collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

pub fn update_booking_status(
    conn: &Connection,
    id: i64,
    status: BookingStatus,
) -> anyhow::Result<()> {
    let now = format_dt(&Utc::now().naive_utc());
    conn.execute(
        "UPDATE bookings SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now, id],
    )?;
    Ok(())
}

/// Record agreement signing. Evidentiary fields are write-once: a second
/// call for an already-signed booking changes nothing and reports false.
pub fn update_booking_agreement(
    conn: &Connection,
    id: i64,
    signed_at: &NaiveDateTime,
    signer_name: &str,
    method: &str,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> anyhow::Result<bool> {
    let now = format_dt(&Utc::now().naive_utc());
    let changed = conn.execute(
        "UPDATE bookings SET agreement_signed = 1, agreement_signed_at = ?1,
            agreement_signer_name = ?2, agreement_method = ?3, agreement_ip = ?4,
            agreement_user_agent = ?5, updated_at = ?6
         WHERE id = ?7 AND agreement_signed = 0",
        params![
            format_dt(signed_at),
            signer_name,
            method,
            ip_address,
            user_agent,
            now,
            id
        ],
    )?;
    Ok(changed > 0)
}

pub fn set_calendar_event_id(
    conn: &Connection,
    id: i64,
    event_id: Option<&str>,
) -> anyhow::Result<()> {
    let now = format_dt(&Utc::now().naive_utc());
    conn.execute(
        "UPDATE bookings SET calendar_event_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![event_id, now, id],
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub status: PaymentStatus,
    pub payment_intent_id: String,
    pub amount_pence: i64,
    pub failure_reason: Option<String>,
}

pub fn update_booking_payment_status(
    conn: &Connection,
    reference: &str,
    update: &PaymentUpdate,
) -> anyhow::Result<()> {
    let now = format_dt(&Utc::now().naive_utc());
    conn.execute(
        "UPDATE bookings SET payment_status = ?1, payment_intent_id = ?2,
            payment_failure_reason = ?3, amount_paid_pence = ?4, updated_at = ?5
         WHERE reference = ?6",
        params![
            update.status.as_str(),
            update.payment_intent_id,
            update.failure_reason,
            update.amount_pence,
            now,
            reference
        ],
    )?;
    Ok(())
}

/// Remove the booking row. The audit trail is keyed by reference in its own
/// table and is untouched.
pub fn delete_booking(conn: &Connection, id: i64) -> anyhow::Result<bool> {
    let deleted = conn.execute("DELETE FROM bookings WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

// ── Audit trail ──

pub fn append_audit_entry(
    conn: &Connection,
    reference: &str,
    entry: &AuditEntry,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO audit_log (booking_reference, timestamp, action, actor,
            actor_details, method, ip_address, user_agent, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            reference,
            format_dt(&entry.timestamp),
            entry.action,
            entry.actor.as_str(),
            entry.actor_details,
            entry.method,
            entry.ip_address,
            entry.user_agent,
            serde_json::to_string(&entry.details)?,
        ],
    )?;
    Ok(())
}

pub fn get_audit_trail(conn: &Connection, reference: &str) -> anyhow::Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, action, actor, actor_details, method, ip_address, user_agent, details
         FROM audit_log WHERE booking_reference = ?1 ORDER BY id ASC",
    )?;

    let entries = stmt
        .query_map(params![reference], |row| {
            let actor: String = row.get(2)?;
            let details: String = row.get(7)?;
            Ok(AuditEntry {
                timestamp: parse_dt(&row.get::<_, String>(0)?),
                action: row.get(1)?,
                actor: AuditActor::from_str(&actor),
                actor_details: row.get(3)?,
                method: row.get(4)?,
                ip_address: row.get(5)?,
                user_agent: row.get(6)?,
                details: serde_json::from_str(&details)
                    .unwrap_or(serde_json::Value::Object(Default::default())),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}
