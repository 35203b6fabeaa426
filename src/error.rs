// =============================================================================
// ERROR MODULE
// =============================================================================
// Error taxonomy for the synchronization engine and its HTTP response mapping.
//
// NOTES:
// - Validation errors are raised before any network call and never retried
// - HTTP 5xx and network failures are transient: the retry wrapper retries them
// - "Cannot complete yet" is NOT an error; complete_work_order returns false
// - SyncError is Clone so a single in-flight refresh can hand the same result
//   to every caller awaiting it
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// =============================================================================
// ENGINE ERROR TYPE
// =============================================================================
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    // -------------------------------------------------------------------------
    // CLIENT-SIDE ERRORS
    // -------------------------------------------------------------------------
    /// Input rejected before reaching the backend (user-correctable)
    #[error("Validation failed: {0}")]
    Validation(String),

    // -------------------------------------------------------------------------
    // TRANSPORT ERRORS
    // -------------------------------------------------------------------------
    /// Backend answered with a non-2xx status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Connection refused, DNS failure, timeout...
    #[error("Network error: {0}")]
    Network(String),

    /// 2xx response carrying an `{error}` body
    #[error("Rejected by backend: {0}")]
    Rejected(String),

    /// 2xx response whose body is not the expected shape
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Transient failures persisted through every attempt
    #[error("Request failed after {attempts} attempts: {message}")]
    RetryExhausted { attempts: u32, message: String },
}

impl SyncError {
    /// Shorthand for `SyncError::Validation`.
    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }

    /// Whether the retry wrapper may try the call again.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Http { status, .. } => *status >= 500,
            SyncError::Network(_) => true,
            _ => false,
        }
    }

    /// Human-readable reason without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            SyncError::Validation(msg)
            | SyncError::Network(msg)
            | SyncError::Rejected(msg)
            | SyncError::Decode(msg) => msg.clone(),
            SyncError::Http { message, .. } | SyncError::RetryExhausted { message, .. } => {
                message.clone()
            }
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

// =============================================================================
// HTTP RESPONSE CONVERSION
// =============================================================================
// Used by the dashboard API so handlers can return SyncResult<Json<T>>.
impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            // 400: the operator can fix the input
            SyncError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),

            // 4xx from the backend is passed through verbatim
            SyncError::Http { status, .. } if *status < 500 => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST),
                "BACKEND_REJECTED",
            ),

            SyncError::Rejected(_) => (StatusCode::UNPROCESSABLE_ENTITY, "BACKEND_REJECTED"),

            // Everything else means the backend could not be reached or misbehaved
            SyncError::Http { .. } | SyncError::RetryExhausted { .. } => {
                (StatusCode::BAD_GATEWAY, "BACKEND_UNAVAILABLE")
            }
            SyncError::Network(_) => (StatusCode::BAD_GATEWAY, "NETWORK_ERROR"),
            SyncError::Decode(_) => (StatusCode::BAD_GATEWAY, "BAD_BACKEND_RESPONSE"),
        };

        tracing::error!(
            error_code = error_code,
            message = %self,
            "Request failed"
        );

        let body = ErrorResponse::new(error_code, self.message());
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// RESULT TYPE ALIAS
// =============================================================================
pub type SyncResult<T> = Result<T, SyncError>;
