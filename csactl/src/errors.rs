use crate::db::errors::DbError;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// One or more request fields failed validation
    #[error("Validation failed: {}", summarize(errors))]
    Validation { errors: Vec<FieldError> },

    /// Missing, unknown or inactive API key
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Token bucket for this credential is empty
    #[error("Rate limit exceeded for {bucket} requests")]
    RateLimited { bucket: &'static str, retry_after_secs: u64 },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Storage operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    AuthenticationError,
    RateLimitError,
    NotFound,
    InternalError,
}

/// Either a message or, for validation errors, the list of rejected fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum ErrorDetail {
    Fields(Vec<FieldError>),
    Message(String),
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub detail: ErrorDetail,
    pub error_code: ErrorCode,
    pub timestamp: DateTime<Utc>,
}

impl Error {
    /// Shorthand for a validation error on a single field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            errors: vec![FieldError::new(field, message)],
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            Error::Validation { .. } => ErrorCode::ValidationError,
            Error::Unauthenticated { .. } => ErrorCode::AuthenticationError,
            Error::RateLimited { .. } => ErrorCode::RateLimitError,
            Error::NotFound { .. } | Error::Database(DbError::NotFound) => ErrorCode::NotFound,
            Error::Internal { .. } | Error::Database(_) | Error::Other(_) => ErrorCode::InternalError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.error_code() {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::AuthenticationError => StatusCode::UNAUTHORIZED,
            ErrorCode::RateLimitError => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error detail, without leaking internal implementation details
    pub fn detail(&self) -> ErrorDetail {
        match self {
            Error::Validation { errors } => ErrorDetail::Fields(errors.clone()),
            Error::Unauthenticated { message } => {
                ErrorDetail::Message(message.clone().unwrap_or_else(|| "Invalid or missing API key".to_string()))
            }
            Error::RateLimited { bucket, .. } => ErrorDetail::Message(format!("Rate limit exceeded for {bucket} requests")),
            Error::NotFound { resource, id } => ErrorDetail::Message(format!("{resource} with ID {id} not found")),
            Error::Database(DbError::NotFound) => ErrorDetail::Message("Resource not found".to_string()),
            Error::Internal { .. } | Error::Database(_) | Error::Other(_) => {
                ErrorDetail::Message("Internal server error".to_string())
            }
        }
    }

    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            detail: self.detail(),
            error_code: self.error_code(),
            timestamp: Utc::now(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Internal { .. } | Error::Other(_) | Error::Database(DbError::Other(_)) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Storage error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::RateLimited { .. } => {
                tracing::info!("Request rejected: {}", self);
            }
            Error::Validation { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let mut response = (self.status_code(), Json(self.to_response_body())).into_response();
        if let Error::RateLimited { retry_after_secs, .. } = &self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }
        response
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
