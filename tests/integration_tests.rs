use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tower::ServiceExt;

use castledesk::config::{AdminDirectory, AppConfig};
use castledesk::db::{self, queries};
use castledesk::handlers;
use castledesk::models::{
    AgreementMeta, BookingStatus, CalendarEvent, CalendarEventPayload, PaymentStatus,
};
use castledesk::services::calendar::{CalendarApi, CalendarError, GuardedCalendar};
use castledesk::services::notify::Notifier;
use castledesk::services::reconciliation::{self, Actor, ConfirmOutcome};
use castledesk::services::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimiter, RetryPolicy,
};
use castledesk::services::sweeper;
use castledesk::state::AppState;

// ── Mock providers ──

struct MockCalendar {
    events: Mutex<Vec<CalendarEvent>>,
    create_calls: AtomicU32,
    /// Fail this many create calls with a 503 before succeeding.
    fail_creates: AtomicU32,
    /// When set, every list call fails with a 500.
    fail_lists: AtomicU32,
    /// Park this many create calls on `gate` before they write the event,
    /// for interleaving two in-flight confirms.
    hold_creates: AtomicU32,
    held_creates: AtomicU32,
    gate: tokio::sync::Semaphore,
}

impl Default for MockCalendar {
    fn default() -> Self {
        Self {
            events: Mutex::default(),
            create_calls: AtomicU32::new(0),
            fail_creates: AtomicU32::new(0),
            fail_lists: AtomicU32::new(0),
            hold_creates: AtomicU32::new(0),
            held_creates: AtomicU32::new(0),
            gate: tokio::sync::Semaphore::new(0),
        }
    }
}

impl MockCalendar {
    fn created(&self) -> Vec<CalendarEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl CalendarApi for MockCalendar {
    async fn create_event(&self, payload: &CalendarEventPayload) -> Result<String, CalendarError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates.load(Ordering::SeqCst) > 0 {
            self.fail_creates.fetch_sub(1, Ordering::SeqCst);
            return Err(CalendarError::Server(503));
        }
        if self
            .hold_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |h| h.checked_sub(1))
            .is_ok()
        {
            self.held_creates.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.acquire().await;
        }
        let id = format!("evt-{}", n + 1);
        self.events.lock().unwrap().push(CalendarEvent {
            id: id.clone(),
            summary: payload.summary.clone(),
            description: payload.description.clone(),
            start: payload.start,
            end: payload.end,
            status: "confirmed".to_string(),
        });
        Ok(id)
    }

    async fn list_events(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        if self.fail_lists.load(Ordering::SeqCst) > 0 {
            return Err(CalendarError::Server(500));
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.start < end && e.end > start)
            .cloned()
            .collect())
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError> {
        self.events.lock().unwrap().retain(|e| e.id != event_id);
        Ok(())
    }
}

#[derive(Default)]
struct MockNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_email(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: "test-token".to_string(),
        business_name: "Towering Castles".to_string(),
        calendar_api_url: "http://localhost:8080".to_string(),
        calendar_id: "primary".to_string(),
        calendar_api_key: String::new(),
        payment_webhook_secret: String::new(), // empty = skip signature validation
        mail_api_url: String::new(),
        mail_api_key: String::new(),
        mail_from_address: "bookings@example.com".to_string(),
        admin_directory: AdminDirectory::from_list("owner@example.com"),
    }
}

struct TestHarness {
    state: Arc<AppState>,
    calendar: Arc<MockCalendar>,
    notifier: Arc<MockNotifier>,
}

fn test_harness() -> TestHarness {
    test_harness_with_config(test_config())
}

fn test_harness_with_config(config: AppConfig) -> TestHarness {
    let conn = db::init_db(":memory:").unwrap();
    let calendar = Arc::new(MockCalendar::default());
    let notifier = Arc::new(MockNotifier::default());

    struct SharedCalendar(Arc<MockCalendar>);

    #[async_trait]
    impl CalendarApi for SharedCalendar {
        async fn create_event(
            &self,
            payload: &CalendarEventPayload,
        ) -> Result<String, CalendarError> {
            self.0.create_event(payload).await
        }
        async fn list_events(
            &self,
            start: NaiveDateTime,
            end: NaiveDateTime,
        ) -> Result<Vec<CalendarEvent>, CalendarError> {
            self.0.list_events(start, end).await
        }
        async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError> {
            self.0.delete_event(event_id).await
        }
    }

    struct SharedNotifier(Arc<MockNotifier>);

    #[async_trait]
    impl Notifier for SharedNotifier {
        async fn send_email(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
            self.0.send_email(to, subject, body).await
        }
    }

    let guarded = GuardedCalendar::new(
        Box::new(SharedCalendar(calendar.clone())),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        },
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(60),
        })),
        Arc::new(RateLimiter::new(100, Duration::from_secs(60))),
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config,
        calendar: guarded,
        notifier: Box::new(SharedNotifier(notifier.clone())),
    });

    TestHarness {
        state,
        calendar,
        notifier,
    }
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/webhook/payments", post(handlers::webhook::payment_webhook))
        .route(
            "/api/bookings/:reference/agreement",
            post(handlers::agreement::sign_agreement),
        )
        .route("/api/admin/bookings", get(handlers::admin::get_bookings))
        .route(
            "/api/admin/bookings/:reference/audit",
            get(handlers::admin::get_audit_trail),
        )
        .route(
            "/api/admin/bookings/:id/confirm",
            post(handlers::admin::confirm_booking),
        )
        .route(
            "/api/admin/bookings/:id/decline",
            post(handlers::admin::decline_booking),
        )
        .route(
            "/api/admin/bookings/:id/complete",
            post(handlers::admin::complete_booking),
        )
        .route("/api/admin/sweep", post(handlers::admin::run_sweep))
        .route("/api/admin/drift", get(handlers::admin::drift_report))
        .with_state(state)
}

fn insert_booking(state: &Arc<AppState>, event_date: NaiveDate) -> castledesk::models::Booking {
    let conn = state.db.lock().unwrap();
    queries::create_booking(
        &conn,
        &queries::NewBooking {
            customer_name: "Sarah Jones".to_string(),
            customer_email: "sarah@example.com".to_string(),
            castle_name: "Princess Palace".to_string(),
            event_date,
            start_time: None,
            end_time: None,
            duration_hours: 8,
            total_cost_pence: 12000,
            deposit_pence: 3000,
        },
    )
    .unwrap()
}

fn admin_post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", "Bearer test-token")
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin_get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("Authorization", "Bearer test-token")
        .body(Body::empty())
        .unwrap()
}

fn webhook_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook/payments")
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn booking_status(state: &Arc<AppState>, id: i64) -> Option<BookingStatus> {
    let conn = state.db.lock().unwrap();
    queries::get_booking(&conn, id).unwrap().map(|b| b.status)
}

// ── Confirm flow ──

#[tokio::test]
async fn admin_confirm_creates_calendar_event_and_audit_entry() {
    let h = test_harness();
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());

    let response = app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/confirm", booking.id),
            serde_json::json!({ "signer_name": "Office" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "confirmed");
    let event_id = body["calendar_event_id"].as_str().unwrap().to_string();

    // Store reflects the confirmation and the calendar linkage.
    let stored = {
        let conn = h.state.db.lock().unwrap();
        queries::get_booking(&conn, booking.id).unwrap().unwrap()
    };
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert_eq!(stored.calendar_event_id.as_deref(), Some(event_id.as_str()));
    assert!(stored.agreement_signed);

    // The event description carries the correlation key.
    let events = h.calendar.created();
    assert_eq!(events.len(), 1);
    assert!(events[0]
        .description
        .contains(&format!("Booking Ref: {}", booking.reference)));

    let trail = {
        let conn = h.state.db.lock().unwrap();
        queries::get_audit_trail(&conn, &booking.reference).unwrap()
    };
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, "confirmed");
}

#[tokio::test]
async fn confirming_twice_is_idempotent() {
    let h = test_harness();
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());

    let first = app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/confirm", booking.id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/confirm", booking.id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let body = body_json(second).await;
    assert_eq!(body["already_confirmed"], true);

    // Exactly one calendar event and one audit entry.
    assert_eq!(h.calendar.created().len(), 1);
    let trail = {
        let conn = h.state.db.lock().unwrap();
        queries::get_audit_trail(&conn, &booking.reference).unwrap()
    };
    assert_eq!(trail.len(), 1);
}

#[tokio::test]
async fn losing_a_concurrent_confirm_keeps_the_winning_calendar_event() {
    let h = test_harness();
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());

    fn agreement() -> AgreementMeta {
        AgreementMeta {
            signer_name: "Office".to_string(),
            method: "manual_admin".to_string(),
            ip_address: None,
            user_agent: None,
        }
    }

    // The first confirm parks inside its calendar create, past the status
    // gate but before anything is persisted.
    h.calendar.hold_creates.store(1, Ordering::SeqCst);
    let state = h.state.clone();
    let booking_id = booking.id;
    let loser = tokio::spawn(async move {
        reconciliation::confirm_booking(
            &state,
            booking_id,
            agreement(),
            Actor::system("manual_admin"),
        )
        .await
    });
    while h.calendar.held_creates.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // A second confirm runs to completion while the first is in flight.
    let outcome = reconciliation::confirm_booking(
        &h.state,
        booking.id,
        agreement(),
        Actor::system("manual_admin"),
    )
    .await
    .unwrap();
    let winner_event_id = match outcome {
        ConfirmOutcome::Confirmed { calendar_event_id } => calendar_event_id,
        other => panic!("expected a fresh confirmation, got {other:?}"),
    };

    h.calendar.gate.add_permits(1);
    let lost = loser.await.unwrap().unwrap();
    assert_eq!(lost, ConfirmOutcome::AlreadyConfirmed);

    // The winning event survives on the calendar and stays linked; only the
    // loser's duplicate was removed.
    let events = h.calendar.created();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, winner_event_id);

    let stored = {
        let conn = h.state.db.lock().unwrap();
        queries::get_booking(&conn, booking.id).unwrap().unwrap()
    };
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert_eq!(
        stored.calendar_event_id.as_deref(),
        Some(winner_event_id.as_str())
    );

    // One confirmation, one audit entry.
    let trail = {
        let conn = h.state.db.lock().unwrap();
        queries::get_audit_trail(&conn, &booking.reference).unwrap()
    };
    assert_eq!(trail.len(), 1);
}

#[tokio::test]
async fn customer_agreement_signing_confirms_with_evidentiary_fields() {
    let h = test_harness();
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/bookings/{}/agreement", booking.reference))
        .header("Content-Type", "application/json")
        .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
        .header("user-agent", "Mozilla/5.0")
        .body(Body::from(
            serde_json::json!({ "signer_name": "Sarah Jones" }).to_string(),
        ))
        .unwrap();

    let response = app(h.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = {
        let conn = h.state.db.lock().unwrap();
        queries::get_booking(&conn, booking.id).unwrap().unwrap()
    };
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert_eq!(stored.agreement_signer_name.as_deref(), Some("Sarah Jones"));
    assert_eq!(stored.agreement_ip.as_deref(), Some("203.0.113.9"));
    assert_eq!(stored.agreement_method.as_deref(), Some("online_form"));

    let trail = {
        let conn = h.state.db.lock().unwrap();
        queries::get_audit_trail(&conn, &booking.reference).unwrap()
    };
    assert_eq!(trail[0].actor.as_str(), "customer");
    assert_eq!(trail[0].ip_address.as_deref(), Some("203.0.113.9"));
}

#[tokio::test]
async fn calendar_failure_leaves_booking_pending() {
    let h = test_harness();
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());
    h.calendar.fail_creates.store(10, Ordering::SeqCst);

    let response = app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/confirm", booking.id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"], "calendar service unavailable after retries");

    // Three attempts (retry policy), store untouched.
    assert_eq!(h.calendar.create_calls.load(Ordering::SeqCst), 3);
    assert_eq!(booking_status(&h.state, booking.id), Some(BookingStatus::Pending));
}

#[tokio::test]
async fn transient_calendar_failures_are_retried_through() {
    let h = test_harness();
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());
    h.calendar.fail_creates.store(2, Ordering::SeqCst);

    let response = app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/confirm", booking.id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.calendar.create_calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        booking_status(&h.state, booking.id),
        Some(BookingStatus::Confirmed)
    );
}

// ── Decline ──

#[tokio::test]
async fn decline_with_reason_cancels_audits_and_notifies() {
    let h = test_harness();
    // Mint TS001..TS005 so the declined booking is TS005.
    for _ in 0..4 {
        insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());
    }
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());
    assert_eq!(booking.reference, "TS005");

    let response = app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/decline", booking.id),
            serde_json::json!({ "reason_key": "distance_too_far" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(
        booking_status(&h.state, booking.id),
        Some(BookingStatus::Cancelled)
    );

    let trail = {
        let conn = h.state.db.lock().unwrap();
        queries::get_audit_trail(&conn, "TS005").unwrap()
    };
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, "declined");
    assert_eq!(trail[0].details["reason_key"], "distance_too_far");

    // No calendar event was ever created for a declined pending booking.
    assert!(h.calendar.created().is_empty());

    let sent = h.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "sarah@example.com");
}

#[tokio::test]
async fn decline_can_remove_the_row_but_audit_survives() {
    let h = test_harness();
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());

    let response = app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/decline", booking.id),
            serde_json::json!({ "reason_key": "double_booked", "remove_row": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(booking_status(&h.state, booking.id), None);
    let trail = {
        let conn = h.state.db.lock().unwrap();
        queries::get_audit_trail(&conn, &booking.reference).unwrap()
    };
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, "declined");
}

#[tokio::test]
async fn declining_a_confirmed_booking_clears_its_calendar_event() {
    let h = test_harness();
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());

    app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/confirm", booking.id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(h.calendar.created().len(), 1);

    let response = app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/decline", booking.id),
            serde_json::json!({ "reason_key": "customer_cancelled" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.calendar.created().is_empty());
}

// ── Complete ──

#[tokio::test]
async fn completing_a_pending_booking_is_rejected_with_reason() {
    let h = test_harness();
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());

    let response = app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/complete", booking.id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"], "cannot complete a pending booking");
}

#[tokio::test]
async fn completing_twice_reports_already_completed() {
    let h = test_harness();
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());

    app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/confirm", booking.id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/complete", booking.id),
            serde_json::json!({ "reason": "collected" }),
        ))
        .await
        .unwrap();

    let response = app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/complete", booking.id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"], "booking already completed");
}

// ── Payment webhook ──

#[tokio::test]
async fn payment_webhook_applies_and_replay_is_noop() {
    let h = test_harness();
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());

    let payload = serde_json::json!({
        "type": "payment.succeeded",
        "payment_id": "pi_abc123",
        "amount": 3000,
        "metadata": { "booking_reference": booking.reference },
    });

    let first = app(h.state.clone())
        .oneshot(webhook_request(payload.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let stored = {
        let conn = h.state.db.lock().unwrap();
        queries::get_booking(&conn, booking.id).unwrap().unwrap()
    };
    assert_eq!(stored.payment_status, PaymentStatus::DepositPaid);
    // Lifecycle untouched by the payment.
    assert_eq!(stored.status, BookingStatus::Pending);

    let second = app(h.state.clone())
        .oneshot(webhook_request(payload))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);

    let trail = {
        let conn = h.state.db.lock().unwrap();
        queries::get_audit_trail(&conn, &booking.reference).unwrap()
    };
    // One applied payment, no audit entry for the replay.
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, "payment_succeeded");
}

#[tokio::test]
async fn payment_webhook_unknown_reference_is_acknowledged() {
    let h = test_harness();

    let response = app(h.state.clone())
        .oneshot(webhook_request(serde_json::json!({
            "type": "payment.succeeded",
            "payment_id": "pi_lost",
            "amount": 3000,
            "metadata": { "booking_reference": "TS999" },
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn payment_webhook_rejects_a_bad_signature() {
    let mut config = test_config();
    config.payment_webhook_secret = "whsec_test".to_string();
    let h = test_harness_with_config(config);

    let body = serde_json::json!({
        "type": "payment.succeeded",
        "payment_id": "pi_1",
        "amount": 3000,
        "metadata": { "booking_reference": "TS001" },
    })
    .to_string();

    let request = Request::builder()
        .method("POST")
        .uri("/webhook/payments")
        .header("Content-Type", "application/json")
        .header("x-payment-signature", "not-a-real-signature")
        .body(Body::from(body))
        .unwrap();

    let response = app(h.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn payment_webhook_accepts_a_valid_signature() {
    let mut config = test_config();
    config.payment_webhook_secret = "whsec_test".to_string();
    let h = test_harness_with_config(config);
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());

    let body = serde_json::json!({
        "type": "payment.succeeded",
        "payment_id": "pi_1",
        "amount": 12000,
        "metadata": { "booking_reference": booking.reference },
    })
    .to_string();

    let mut mac = Hmac::<Sha1>::new_from_slice(b"whsec_test").unwrap();
    mac.update(body.as_bytes());
    let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/webhook/payments")
        .header("Content-Type", "application/json")
        .header("x-payment-signature", signature)
        .body(Body::from(body))
        .unwrap();

    let response = app(h.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = {
        let conn = h.state.db.lock().unwrap();
        queries::get_booking(&conn, booking.id).unwrap().unwrap()
    };
    assert_eq!(stored.payment_status, PaymentStatus::PaidFull);
}

// ── Completion sweep ──

fn confirm_directly(h: &TestHarness, id: i64) {
    let conn = h.state.db.lock().unwrap();
    queries::update_booking_status(&conn, id, BookingStatus::Confirmed).unwrap();
}

#[tokio::test]
async fn sweep_completes_past_bookings_and_leaves_future_ones() {
    let h = test_harness();
    let now = Utc::now().naive_utc();
    let yesterday = now.date() - ChronoDuration::days(1);
    let tomorrow = now.date() + ChronoDuration::days(1);

    // Explicit end time in the past.
    let explicit = {
        let conn = h.state.db.lock().unwrap();
        queries::create_booking(
            &conn,
            &queries::NewBooking {
                customer_name: "Amy".to_string(),
                customer_email: "amy@example.com".to_string(),
                castle_name: "Jungle Run".to_string(),
                event_date: yesterday,
                start_time: yesterday.and_hms_opt(10, 0, 0),
                end_time: yesterday.and_hms_opt(16, 0, 0),
                duration_hours: 6,
                total_cost_pence: 9000,
                deposit_pence: 2000,
            },
        )
        .unwrap()
    };
    // Yesterday, no explicit end, no calendar event: 17:00 fallback.
    let fallback = insert_booking(&h.state, yesterday);
    // Tomorrow: untouched.
    let future = insert_booking(&h.state, tomorrow);

    confirm_directly(&h, explicit.id);
    confirm_directly(&h, fallback.id);
    confirm_directly(&h, future.id);

    let summary = sweeper::run_completion_sweep(&h.state, now).await;
    assert_eq!(summary.examined, 3);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.skipped, 1);
    assert!(summary.errors.is_empty());

    assert_eq!(
        booking_status(&h.state, explicit.id),
        Some(BookingStatus::Completed)
    );
    assert_eq!(
        booking_status(&h.state, fallback.id),
        Some(BookingStatus::Completed)
    );
    assert_eq!(
        booking_status(&h.state, future.id),
        Some(BookingStatus::Confirmed)
    );

    // The audit reason names the strategy that supplied the end instant.
    let conn = h.state.db.lock().unwrap();
    let explicit_trail = queries::get_audit_trail(&conn, &explicit.reference).unwrap();
    assert!(explicit_trail[0].details["reason"]
        .as_str()
        .unwrap()
        .contains("explicit end date"));
    let fallback_trail = queries::get_audit_trail(&conn, &fallback.reference).unwrap();
    assert!(fallback_trail[0].details["reason"]
        .as_str()
        .unwrap()
        .contains("default 17:00 fallback"));
    assert_eq!(explicit_trail[0].actor.as_str(), "system");
}

#[tokio::test]
async fn sweep_uses_calendar_event_end_when_present() {
    let h = test_harness();
    let now = Utc::now().naive_utc();
    let yesterday = now.date() - ChronoDuration::days(1);

    let booking = insert_booking(&h.state, yesterday);
    app(h.state.clone())
        .oneshot(admin_post(
            &format!("/api/admin/bookings/{}/confirm", booking.id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();

    let summary = sweeper::run_completion_sweep(&h.state, now).await;
    assert_eq!(summary.completed, 1);

    let conn = h.state.db.lock().unwrap();
    let trail = queries::get_audit_trail(&conn, &booking.reference).unwrap();
    let completion = trail.iter().find(|e| e.action == "completed").unwrap();
    assert!(completion.details["reason"]
        .as_str()
        .unwrap()
        .contains("calendar event end"));
}

#[tokio::test]
async fn sweep_survives_calendar_outage_via_fallback() {
    let h = test_harness();
    let now = Utc::now().naive_utc();
    let yesterday = now.date() - ChronoDuration::days(1);

    let booking = insert_booking(&h.state, yesterday);
    confirm_directly(&h, booking.id);
    h.calendar.fail_lists.store(1, Ordering::SeqCst);

    let summary = sweeper::run_completion_sweep(&h.state, now).await;
    assert_eq!(summary.completed, 1);
    assert!(summary.errors.is_empty());
    assert_eq!(
        booking_status(&h.state, booking.id),
        Some(BookingStatus::Completed)
    );
}

// ── Drift check ──

#[tokio::test]
async fn drift_check_reports_orphans_and_missing_events() {
    let h = test_harness();
    let now = Utc::now().naive_utc();
    let next_week = now.date() + ChronoDuration::days(7);

    // A confirmed booking with no calendar event (orphaned row).
    let missing = insert_booking(&h.state, next_week);
    confirm_directly(&h, missing.id);

    // A calendar event whose booking was never confirmed (orphaned event).
    h.calendar.events.lock().unwrap().push(CalendarEvent {
        id: "evt-stray".to_string(),
        summary: "Princess Palace hire: Someone".to_string(),
        description: "Booking Ref: TS900".to_string(),
        start: next_week.and_hms_opt(9, 0, 0).unwrap(),
        end: next_week.and_hms_opt(17, 0, 0).unwrap(),
        status: "confirmed".to_string(),
    });

    let report = sweeper::run_drift_check(&h.state, now).await.unwrap();
    assert_eq!(report.orphaned_events.len(), 1);
    assert_eq!(report.orphaned_events[0].reference, "TS900");
    assert_eq!(report.missing_events.len(), 1);
    assert_eq!(report.missing_events[0].reference, missing.reference);

    // Report only: nothing was deleted or created.
    assert_eq!(h.calendar.created().len(), 1);
    assert_eq!(
        booking_status(&h.state, missing.id),
        Some(BookingStatus::Confirmed)
    );
}

// ── Auth ──

#[tokio::test]
async fn admin_routes_require_the_token() {
    let h = test_harness();

    let request = Request::builder()
        .method("GET")
        .uri("/api/admin/bookings")
        .body(Body::empty())
        .unwrap();
    let response = app(h.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app(h.state.clone())
        .oneshot(admin_get("/api/admin/bookings"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_actor_is_attributed_through_the_directory() {
    let h = test_harness();
    let booking = insert_booking(&h.state, NaiveDate::from_ymd_opt(2026, 9, 12).unwrap());

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/admin/bookings/{}/confirm", booking.id))
        .header("Authorization", "Bearer test-token")
        .header("x-admin-email", "owner@example.com")
        .header("Content-Type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app(h.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = h.state.db.lock().unwrap();
    let trail = queries::get_audit_trail(&conn, &booking.reference).unwrap();
    assert_eq!(trail[0].actor_details, "owner@example.com");
}

// ── Misc ──

#[tokio::test]
async fn health_endpoint_responds() {
    let h = test_harness();
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app(h.state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn event_dates_appear_in_the_admin_listing() {
    let h = test_harness();
    let date = NaiveDate::from_ymd_opt(2026, 9, 12).unwrap();
    insert_booking(&h.state, date);

    let response = app(h.state.clone())
        .oneshot(admin_get("/api/admin/bookings?status=pending"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body[0]["reference"], "TS001");
    assert_eq!(
        body[0]["event_date"],
        format!("{}-{:02}-{:02}", date.year(), date.month(), date.day())
    );
}
