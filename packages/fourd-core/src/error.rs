//! Centralized error types for the 4D@Home core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the 4D@Home services.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum FourdError {
    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A timeline payload failed validation; any previously loaded
    /// timeline stays intact.
    #[error("Invalid timeline: {0}")]
    InvalidTimeline(String),

    /// Session id is unknown to the session catalog.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Bulk payload exceeds the wire size limit.
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Local bus publish or lifecycle failure (logged, never fatal).
    #[error("Bus error: {0}")]
    Bus(String),

    /// Configuration error surfaced at startup (missing required vars).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FourdError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidTimeline(_) => "invalid_timeline",
            Self::SessionNotFound(_) => "session_not_found",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Bus(_) => "bus_error",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) | Self::InvalidTimeline(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorCode for FourdError {
    fn code(&self) -> &'static str {
        FourdError::code(self)
    }
}

/// Convenient Result alias for application-wide operations.
pub type FourdResult<T> = Result<T, FourdError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for FourdError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_maps_to_404() {
        let err = FourdError::SessionNotFound("abc".into());
        assert_eq!(err.code(), "session_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_timeline_maps_to_400() {
        let err = FourdError::InvalidTimeline("negative t".into());
        assert_eq!(err.code(), "invalid_timeline");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn oversize_maps_to_413() {
        let err = FourdError::PayloadTooLarge(17 * 1024 * 1024);
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
