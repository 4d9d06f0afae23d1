//! Application Error Types
//!
//! Centralized error handling with Axum integration. Queue workers use
//! [`AppError::is_transient`] to decide whether a failure is worth retrying;
//! the gateway turns errors into socket `error` events via
//! [`AppError::client_message`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::error::ErrorKind;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Fan-out bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Store hiccups that may succeed on a later attempt. Constraint
    /// violations fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Database(_) if self.is_constraint_violation() => false,
            AppError::Database(e) => !matches!(e, sqlx::Error::RowNotFound | sqlx::Error::ColumnDecode { .. }),
            AppError::Redis(_) | AppError::BusUnavailable(_) => true,
            _ => false,
        }
    }

    fn is_constraint_violation(&self) -> bool {
        match self {
            AppError::Database(sqlx::Error::Database(db)) => matches!(
                db.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            ),
            _ => false,
        }
    }

    /// Text safe to send to a client.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Database(_) if self.is_constraint_violation() => {
                "Request conflicts with stored data".into()
            }
            AppError::NotFound(msg) | AppError::AccessDenied(msg) | AppError::Validation(msg) => msg.clone(),
            AppError::Unauthenticated => "Not authenticated".into(),
            AppError::Database(_) | AppError::Redis(_) | AppError::BusUnavailable(_) => {
                "Service temporarily unavailable".into()
            }
            AppError::Serialization(_) | AppError::Internal(_) => "Internal server error".into(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

/// Field-level validation error
#[derive(Debug, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, 10001),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, 10002),
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, 10003),
            AppError::AccessDenied(_) => (StatusCode::FORBIDDEN, 10004),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, 10005)
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, 10005)
            }
            AppError::BusUnavailable(msg) => {
                tracing::error!("Bus unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, 10005)
            }
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 10000)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 10000)
            }
        };

        let body = ErrorResponse {
            code,
            message: self.client_message(),
            errors: None,
        };

        (status, Json(body)).into_response()
    }
}
