use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::models::{CalendarEvent, CalendarEventPayload, CorrelationKey};
use crate::services::resilience::{
    retry_with_backoff, CircuitBreaker, RateLimiter, Retryable, RetryPolicy,
};

/// Hire events default to a 09:00–17:00 window on the event day when the
/// booking carries no explicit start/end instants.
pub const DEFAULT_EVENT_START_HOUR: u32 = 9;
pub const DEFAULT_EVENT_END_HOUR: u32 = 17;

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("calendar network error: {0}")]
    Network(String),

    #[error("calendar rate limited")]
    RateLimited,

    #[error("calendar server error (status {0})")]
    Server(u16),

    #[error("calendar rejected request (status {0})")]
    Client(u16),

    #[error("calendar service unavailable")]
    CircuitOpen,

    #[error("unexpected calendar response: {0}")]
    BadResponse(String),
}

impl Retryable for CalendarError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CalendarError::Network(_) | CalendarError::RateLimited | CalendarError::Server(_)
        )
    }
}

/// Raw provider operations. Implementations talk straight to the external
/// calendar; resilience wrapping lives in [`GuardedCalendar`].
#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn create_event(&self, payload: &CalendarEventPayload) -> Result<String, CalendarError>;
    async fn list_events(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<CalendarEvent>, CalendarError>;
    async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError>;
}

/// REST calendar provider.
pub struct HttpCalendarApi {
    base_url: String,
    calendar_id: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CreateEventResponse {
    id: String,
}

#[derive(Deserialize)]
struct ListEventsResponse {
    #[serde(default)]
    items: Vec<CalendarEvent>,
}

impl HttpCalendarApi {
    pub fn new(base_url: String, calendar_id: String, api_key: String) -> Self {
        Self {
            base_url,
            calendar_id,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn map_status(status: reqwest::StatusCode) -> Option<CalendarError> {
        if status.is_success() {
            None
        } else if status.as_u16() == 429 {
            Some(CalendarError::RateLimited)
        } else if status.is_server_error() {
            Some(CalendarError::Server(status.as_u16()))
        } else {
            Some(CalendarError::Client(status.as_u16()))
        }
    }
}

#[async_trait]
impl CalendarApi for HttpCalendarApi {
    async fn create_event(&self, payload: &CalendarEventPayload) -> Result<String, CalendarError> {
        let url = format!("{}/calendars/{}/events", self.base_url, self.calendar_id);
        // Idempotency key lets the provider dedupe a retried create.
        let idempotency_key = uuid::Uuid::new_v4().to_string();

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("idempotency-key", idempotency_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;

        if let Some(err) = Self::map_status(response.status()) {
            return Err(err);
        }

        let body: CreateEventResponse = response
            .json()
            .await
            .map_err(|e| CalendarError::BadResponse(e.to_string()))?;
        Ok(body.id)
    }

    async fn list_events(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let url = format!("{}/calendars/{}/events", self.base_url, self.calendar_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[
                ("timeMin", start.format("%Y-%m-%dT%H:%M:%S").to_string()),
                ("timeMax", end.format("%Y-%m-%dT%H:%M:%S").to_string()),
            ])
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;

        if let Some(err) = Self::map_status(response.status()) {
            return Err(err);
        }

        let body: ListEventsResponse = response
            .json()
            .await
            .map_err(|e| CalendarError::BadResponse(e.to_string()))?;
        Ok(body.items)
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError> {
        let url = format!(
            "{}/calendars/{}/events/{}",
            self.base_url, self.calendar_id, event_id
        );
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;

        // Deleting an already-deleted event is success.
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        if let Some(err) = Self::map_status(response.status()) {
            return Err(err);
        }
        Ok(())
    }
}

/// The calendar capability the rest of the engine consumes. Every call runs
/// through the retry executor and the process-wide circuit breaker; listing
/// is additionally throttled because the completion sweeper calls it in a
/// loop.
pub struct GuardedCalendar {
    api: Box<dyn CalendarApi>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
}

impl GuardedCalendar {
    pub fn new(
        api: Box<dyn CalendarApi>,
        retry: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            api,
            retry,
            breaker,
            limiter,
        }
    }

    async fn guarded<T, F, Fut>(&self, mut call: F) -> Result<T, CalendarError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, CalendarError>>,
    {
        retry_with_backoff(&self.retry, || {
            let fut = call();
            async move {
                if !self.breaker.try_acquire() {
                    return Err(CalendarError::CircuitOpen);
                }
                match fut.await {
                    Ok(value) => {
                        self.breaker.record_success();
                        Ok(value)
                    }
                    Err(err) => {
                        self.breaker.record_failure();
                        Err(err)
                    }
                }
            }
        })
        .await
    }

    pub async fn create_booking_event(
        &self,
        payload: &CalendarEventPayload,
    ) -> Result<String, CalendarError> {
        self.guarded(|| self.api.create_event(payload)).await
    }

    pub async fn get_events_in_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        self.limiter.acquire().await;
        self.guarded(|| self.api.list_events(start, end)).await
    }

    /// Delete a single event by its provider id.
    pub async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError> {
        self.guarded(|| self.api.delete_event(event_id)).await
    }

    /// Delete every event in the window whose description matches the
    /// correlation key. Defined over the key rather than a stored event id
    /// because the id may never have been durably recorded if an earlier
    /// write partially failed.
    pub async fn delete_events_matching(
        &self,
        key: &CorrelationKey,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<usize, CalendarError> {
        let events = self.get_events_in_range(start, end).await?;
        let mut deleted = 0;
        for event in events.iter().filter(|e| key.matches(&e.description)) {
            self.guarded(|| self.api.delete_event(&event.id)).await?;
            deleted += 1;
        }
        if deleted > 0 {
            tracing::info!(key = %key, deleted, "removed matching calendar events");
        }
        Ok(deleted)
    }
}
