//! Error types for the Shelfie engine
//!
//! This module provides the crate-wide error hierarchy:
//! - `thiserror` for ergonomic error definitions
//! - Queue-engine variants matching the refill/illustration failure taxonomy
//! - Proper error context and source chaining
//! - HTTP status code mapping for API responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::borrow::Cow;
use thiserror::Error;

/// Result type alias for Shelfie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Shelfie engine
#[derive(Debug, Error)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    #[error("Configuration error: {message}")]
    Config {
        message: Cow<'static, str>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: &'static str },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig {
        key: &'static str,
        message: Cow<'static, str>,
    },

    // ========================================================================
    // Queue Engine Errors
    // ========================================================================
    #[error("Recommendation source unavailable: {message}")]
    SourceUnavailable {
        message: Cow<'static, str>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Every candidate in a batch was already shown in the current epoch.
    #[error("All recommended books have already been shown")]
    AllShown,

    #[error("No cover available for \"{title}\"")]
    CoverUnavailable { title: String },

    #[error("Image fetch failed for {locator}: {message}")]
    ImageFetchFailed {
        locator: String,
        message: Cow<'static, str>,
    },

    #[error("No book is currently queued")]
    EmptyQueue,

    #[error("Queue engine has been shut down")]
    EngineClosed,

    // ========================================================================
    // Database Errors
    // ========================================================================
    #[error("Database error: {message}")]
    Database {
        message: Cow<'static, str>,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Migration error: {0}")]
    Migration(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    #[error("HTTP error: {message}")]
    Http {
        message: Cow<'static, str>,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Upstream {service} returned status {status}")]
    UpstreamStatus { service: &'static str, status: u16 },

    // ========================================================================
    // API Errors
    // ========================================================================
    #[error("Bad request: {message}")]
    BadRequest { message: Cow<'static, str> },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: Cow<'static, str> },

    // ========================================================================
    // Generic Errors
    // ========================================================================
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    // ========================================================================
    // Constructors for common error patterns
    // ========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a source-unavailable error without an underlying cause
    pub fn source_unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a collaborator failure as a source-unavailable error
    pub fn source_unavailable_from(err: Error) -> Self {
        match err {
            already @ Error::SourceUnavailable { .. } => already,
            other => Self::SourceUnavailable {
                message: other.to_string().into(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Create an image fetch error
    pub fn image_fetch(locator: impl Into<String>, message: impl Into<Cow<'static, str>>) -> Self {
        Self::ImageFetchFailed {
            locator: locator.into(),
            message: message.into(),
        }
    }

    /// Create a bad request error
    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    // ========================================================================
    // Error Classification
    // ========================================================================

    /// Returns true if the consumer may reasonably retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable { .. }
                | Error::Database { .. }
                | Error::Http { .. }
                | Error::UpstreamStatus { .. }
        )
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } | Error::InvalidFormat { .. } | Error::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::EmptyQueue => StatusCode::CONFLICT,
            Error::SourceUnavailable { .. } | Error::EngineClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::CoverUnavailable { .. }
            | Error::ImageFetchFailed { .. }
            | Error::UpstreamStatus { .. }
            | Error::Http { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } | Error::MissingEnvVar { .. } | Error::InvalidConfig { .. } => {
                "CONFIG_ERROR"
            }
            Error::SourceUnavailable { .. } => "SOURCE_UNAVAILABLE",
            Error::AllShown => "ALL_SHOWN",
            Error::CoverUnavailable { .. } => "COVER_UNAVAILABLE",
            Error::ImageFetchFailed { .. } => "IMAGE_FETCH_FAILED",
            Error::EmptyQueue => "QUEUE_EMPTY",
            Error::EngineClosed => "ENGINE_CLOSED",
            Error::Database { .. } | Error::Migration(_) => "DATABASE_ERROR",
            Error::Http { .. } | Error::UpstreamStatus { .. } => "UPSTREAM_ERROR",
            Error::BadRequest { .. } => "BAD_REQUEST",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::Json(_) | Error::InvalidFormat { .. } => "SERIALIZATION_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}

// ============================================================================
// Error Response for API
// ============================================================================

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        // Don't expose internal error details
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code,
                message,
                retryable: self.is_retryable(),
            },
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::NotFound {
                entity_type: "record",
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(db_err) => Error::Database {
                message: db_err.message().to_string().into(),
                source: Some(err),
            },
            _ => Error::Database {
                message: err.to_string().into(),
                source: Some(err),
            },
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Migration(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Error::InvalidFormat {
                message: err.to_string().into(),
            };
        }
        Error::Http {
            message: err.to_string().into(),
            source: Some(err),
        }
    }
}
