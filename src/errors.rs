use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::services::calendar::CalendarError;
use crate::services::state_machine::TransitionError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] anyhow::Error),

    #[error("{0}")]
    InvalidTransition(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("calendar service unavailable after retries")]
    CalendarUnavailable,

    #[error("calendar rejected the request")]
    CalendarRejected,

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        AppError::InvalidTransition(err.reason)
    }
}

impl From<CalendarError> for AppError {
    fn from(err: CalendarError) -> Self {
        // Callers get the explanatory minimum, not provider internals; the
        // full error has already been logged at the call site.
        match err {
            CalendarError::Client(_) | CalendarError::BadResponse(_) => AppError::CalendarRejected,
            _ => AppError::CalendarUnavailable,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidTransition(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::CalendarUnavailable => StatusCode::BAD_GATEWAY,
            AppError::CalendarRejected => StatusCode::BAD_GATEWAY,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        let message = match &self {
            // Internal failure details stay in the logs.
            AppError::Database(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
