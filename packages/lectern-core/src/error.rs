//! Error types shared across Lectern.
//!
//! Component errors (library, engine, artwork) live next to their modules and
//! convert into [`LecternError`], which the API layer turns into a JSON body
//! with a stable `error` code and an HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::artwork::ArtworkError;
use crate::engine::EngineError;
use crate::library::LibraryError;

/// Stable, machine-readable code for a component error.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for LibraryError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "library_unavailable",
            Self::Io(_) => "library_io_failed",
            Self::Parse(_) => "library_parse_error",
        }
    }
}

impl ErrorCode for EngineError {
    fn code(&self) -> &'static str {
        match self {
            Self::SourceMissing(_) => "engine_source_missing",
            Self::NotLoaded => "engine_not_loaded",
        }
    }
}

impl ErrorCode for ArtworkError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "artwork_io_failed",
            Self::Fetch(_) => "artwork_fetch_failed",
            Self::TooLarge(_) => "artwork_too_large",
            Self::Decode(_) => "artwork_decode_failed",
            Self::Unsupported(_) => "artwork_unsupported",
            Self::Encode(_) => "artwork_encode_failed",
        }
    }
}

/// Application-wide error type for the Lectern server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum LecternError {
    /// Caller identity is not on the allow-list.
    ///
    /// Deliberately carries no detail: rejected callers learn nothing
    /// beyond the rejection itself.
    #[error("Unauthorized")]
    Unauthorized,

    /// Node or item id does not resolve.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Library repository failed.
    #[error("Library error: {0}")]
    Library(String),

    /// Playback engine failed.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error (missing or invalid settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LecternError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Library(_) => "library_error",
            Self::Engine(_) => "engine_error",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Library(_) | Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

pub use crate::artwork::ArtworkResult;
pub use crate::engine::EngineResult;
pub use crate::library::LibraryResult;

/// Result alias used by services and handlers.
pub type LecternResult<T> = Result<T, LecternError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for LecternError {
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

impl From<LibraryError> for LecternError {
    fn from(err: LibraryError) -> Self {
        Self::Library(err.to_string())
    }
}

impl From<EngineError> for LecternError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err.to_string())
    }
}
