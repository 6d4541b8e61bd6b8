use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use castledesk::config::AppConfig;
use castledesk::db;
use castledesk::handlers;
use castledesk::services::calendar::{GuardedCalendar, HttpCalendarApi};
use castledesk::services::notify::MailApiNotifier;
use castledesk::services::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimiter, RetryPolicy,
};
use castledesk::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    // One breaker and one limiter for the calendar dependency, shared by
    // every operation in the process.
    let calendar_api = HttpCalendarApi::new(
        config.calendar_api_url.clone(),
        config.calendar_id.clone(),
        config.calendar_api_key.clone(),
    );
    let calendar = GuardedCalendar::new(
        Box::new(calendar_api),
        RetryPolicy::default(),
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        Arc::new(RateLimiter::new(30, Duration::from_secs(60))),
    );

    let notifier = MailApiNotifier::new(
        config.mail_api_url.clone(),
        config.mail_api_key.clone(),
        config.mail_from_address.clone(),
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        calendar,
        notifier: Box::new(notifier),
    });

    let app = router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
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
        .route(
            "/api/admin/bookings/:id/expire",
            post(handlers::admin::expire_booking),
        )
        .route("/api/admin/sweep", post(handlers::admin::run_sweep))
        .route("/api/admin/drift", get(handlers::admin::drift_report))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
