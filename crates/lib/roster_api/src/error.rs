//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{debug, error};

use roster_core::auth::AuthError;
use roster_core::storage::StorageError;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str()),
            AppError::StorageUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
                "Storage unavailable",
            ),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::Internal(m) => {
                error!(error = %m, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        if e.is_unavailable() {
            return AppError::StorageUnavailable(e.to_string());
        }
        match e {
            StorageError::NotFound { .. } => AppError::NotFound("not found".into()),
            StorageError::NothingToUpdate => AppError::Validation("nothing to update".into()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingToken => AppError::Unauthorized("missing token".into()),
            AuthError::InvalidToken(kind) => {
                debug!(%kind, "token rejected");
                AppError::Unauthorized("invalid token".into())
            }
            AuthError::CredentialError => AppError::Unauthorized("invalid credentials".into()),
            AuthError::Unauthorized => AppError::Unauthorized("not authenticated".into()),
            AuthError::InsufficientPermissions => {
                AppError::Forbidden("insufficient permissions".into())
            }
            AuthError::Forbidden => AppError::Forbidden("not owner, not authorized".into()),
            AuthError::AlreadyExists(msg) => AppError::Conflict(msg),
            AuthError::ValidationError(msg) => AppError::Validation(msg),
            AuthError::Storage(e) => AppError::from(e),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use roster_core::auth::TokenError;

    use super::*;

    fn status_of(e: impl Into<AppError>) -> StatusCode {
        e.into().into_response().status()
    }

    #[test]
    fn auth_errors_map_to_statuses() {
        assert_eq!(status_of(AuthError::MissingToken), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(AuthError::InvalidToken(TokenError::Expired)),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(AuthError::InsufficientPermissions),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status_of(AuthError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(AuthError::AlreadyExists("username already in use".into())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn storage_errors_map_to_statuses() {
        assert_eq!(
            status_of(StorageError::NotFound {
                bucket: "users".into(),
                key: "k".into()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_of(StorageError::NothingToUpdate), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(StorageError::Timeout(Duration::from_secs(5))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(StorageError::InvalidBucketName("X".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
