use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::services::calendar::GuardedCalendar;
use crate::services::notify::Notifier;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    /// Calendar capability with its own breaker and limiter; one instance
    /// per process so every caller shares the same backoff state.
    pub calendar: GuardedCalendar,
    pub notifier: Box<dyn Notifier>,
}
