//! Error handling module for the Root-Me mirror.
//!
//! Provides the application error type with mapping to HTTP status codes and the
//! JSON error envelope used by the admin API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rootme::ClientError;
use crate::sync::SyncError;

/// Machine-readable codes carried in the error envelope.
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const REMOTE_ERROR: &str = "REMOTE_ERROR";
}

/// Errors surfaced by the store and the admin API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Authentication required
    #[error("{0}")]
    Unauthorized(String),
    /// Resource not found
    #[error("{0}")]
    NotFound(String),
    /// Validation error
    #[error("{0}")]
    Validation(String),
    /// Invalid configuration value
    #[error("{0}")]
    Config(String),
    /// Database error
    #[error("{0}")]
    Database(String),
    /// The remote platform could not be queried or answered garbage
    #[error("{0}")]
    Remote(String),
    /// Internal server error
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Remote(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => codes::UNAUTHORIZED,
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::Config(_) => codes::CONFIG_ERROR,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::Remote(_) => codes::REMOTE_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::Database(format!("Database error: {}", err))
    }
}

impl From<ClientError> for AppError {
    fn from(err: ClientError) -> Self {
        tracing::warn!("Remote error: {}", err);
        AppError::Remote(err.to_string())
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Store(inner) => inner,
            SyncError::Remote(inner) => inner.into(),
        }
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
}

impl ErrorResponse {
    pub fn new(error: &AppError) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ErrorResponse::new(&self))).into_response()
    }
}
