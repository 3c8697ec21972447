//! API error handling

use crate::auth::{LifecycleError, PasswordError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use warden_core::WardenError;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new("NOT_FOUND", format!("{resource} not found"))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn unauthorized() -> Self {
        Self::new("UNAUTHORIZED", "Authentication required")
    }

    pub fn service_unavailable() -> Self {
        Self::new("SERVICE_UNAVAILABLE", "Service temporarily unavailable")
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Unauthorized,
    /// Wrong login credentials; kept apart from `Unauthorized` for its message
    InvalidCredentials,
    Conflict(String),
    ServiceUnavailable,
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ApiError::not_found(&msg)),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiError::bad_request(msg)),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, ApiError::unauthorized()),
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                ApiError::new("INVALID_CREDENTIALS", "Incorrect email or password"),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ApiError::new("CONFLICT", msg)),
            AppError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiError::service_unavailable(),
            ),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal_error())
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<WardenError> for AppError {
    fn from(err: WardenError) -> Self {
        match err {
            WardenError::NotFound(msg) => AppError::NotFound(msg),
            WardenError::Conflict(msg) => AppError::Conflict(msg),
            WardenError::ValidationError(msg) => AppError::BadRequest(msg),
            WardenError::DatabaseError(msg) => {
                tracing::warn!(error = %msg, "Credential store error");
                AppError::ServiceUnavailable
            }
            WardenError::Timeout(ms) => {
                tracing::warn!(timeout_ms = ms, "Credential store timed out");
                AppError::ServiceUnavailable
            }
            WardenError::ConfigError(msg) => AppError::Internal(format!("Configuration error: {msg}")),
            WardenError::Other(err) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::UserNotFound | LifecycleError::Unauthenticated { .. } => {
                AppError::Unauthorized
            }
            LifecycleError::StoreUnavailable(source) => {
                tracing::warn!(error = %source, "Credential store unavailable");
                AppError::ServiceUnavailable
            }
            LifecycleError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("{field} is invalid"),
                })
            })
            .collect();
        messages.sort();
        AppError::BadRequest(messages.join("; "))
    }
}
