// =============================================================================
// API Errors — typed failures rendered as JSON
// =============================================================================
//
// Every handler error becomes `{"error": "..."}` with a matching status:
// validation 422, unknown resource 404, refused trigger 409, shut down 503.
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::refresh::TriggerError;
use crate::runtime_config::ConfigError;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    ServiceUnavailable(String),
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<TriggerError> for ApiError {
    fn from(e: TriggerError) -> Self {
        match e {
            TriggerError::AutoRefreshEnabled => Self::Conflict(e.to_string()),
            TriggerError::ShutDown => Self::ServiceUnavailable(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
