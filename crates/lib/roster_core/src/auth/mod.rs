//! Authentication and authorization logic.
//!
//! Provides password hashing, the token codec and the role/ownership gates
//! shared by the HTTP layer and the background tasks.

pub mod gate;
pub mod jwt;
pub mod password;

use thiserror::Error;

use crate::storage::StorageError;

pub use gate::{Identity, OwnershipGate, RoleGate};
pub use jwt::Claims;

/// Why a token failed verification.
///
/// Kept for logging only; callers outside this crate see a single
/// "invalid token" outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("signature mismatch")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("malformed token")]
    Malformed,
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("Invalid credentials")]
    CredentialError,

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Forbidden")]
    Forbidden,

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::Storage(StorageError::Serialization(e))
    }
}
