// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Candidate channel ids on ambiguous-room conflicts.
    pub candidates: Option<Vec<String>>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            candidates: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn ambiguous(message: impl Into<String>, candidates: Vec<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
            candidates: Some(candidates),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidates: Option<Vec<String>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            candidates: self.candidates,
        });
        (self.status, body).into_response()
    }
}

impl AppError {
    /// Map a shared core error (e.g. out of a single-flight join) without
    /// taking ownership.
    pub fn from_core_ref(err: &conclave_core::Error) -> Self {
        use conclave_core::Error;

        match err {
            Error::Ambiguous {
                message,
                candidates,
            } => Self::ambiguous(message.clone(), candidates.clone()),
            Error::Unauthorized(msg) => Self::unauthorized(msg.clone()),
            Error::Forbidden(msg) => Self::forbidden(msg.clone()),
            Error::NotFound(msg) => Self::not_found(msg.clone()),
            Error::InvalidInput(msg) => Self::bad_request(msg.clone()),
            Error::Conflict(msg) => Self::conflict(msg.clone()),
            Error::UpstreamUnavailable(msg) | Error::Transient(msg) => {
                Self::service_unavailable(msg.clone())
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                Self::internal("Data processing error")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::internal("Internal server error")
            }
        }
    }
}

/// Convert `conclave_core` errors to HTTP errors
impl From<conclave_core::Error> for AppError {
    fn from(err: conclave_core::Error) -> Self {
        use conclave_core::Error;

        match err {
            Error::Unauthorized(msg) => Self::unauthorized(msg),
            Error::Forbidden(msg) => Self::forbidden(msg),
            Error::NotFound(msg) => Self::not_found(msg),
            Error::Ambiguous {
                message,
                candidates,
            } => Self::ambiguous(message, candidates),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::Conflict(msg) => Self::conflict(msg),
            Error::UpstreamUnavailable(msg) => Self::service_unavailable(msg),
            Error::Transient(msg) => Self::service_unavailable(msg),
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                Self::internal("Data processing error")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::internal("Internal server error")
            }
        }
    }
}

/// Convert `serde_json` errors to HTTP errors
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization/deserialization error: {}", err);
        Self::bad_request("Invalid request data format")
    }
}
