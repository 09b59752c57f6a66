//! Authorization middleware: role and ownership gates.
//!
//! Both run after `require_auth`. The ownership gate re-verifies the token
//! itself instead of trusting the identity left in the request.

use std::collections::HashMap;

use axum::{
    extract::{Path, Request, State},
    middleware::Next,
    response::Response,
};

use roster_core::auth::{AuthError, OwnershipGate, RoleGate};

use super::auth::{AuthenticatedUser, extract_token};
use crate::error::AppError;

/// Rejects callers that hold none of the gate's roles.
pub async fn enforce_roles(
    State(gate): State<RoleGate>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|AuthenticatedUser(identity)| identity);
    gate.check(identity)?;
    Ok(next.run(request).await)
}

/// State for [`enforce_ownership`].
#[derive(Clone)]
pub struct OwnershipGuard {
    gate: OwnershipGate,
    jwt_secret: String,
}

impl OwnershipGuard {
    pub fn new(gate: OwnershipGate, jwt_secret: impl Into<String>) -> Self {
        Self {
            gate,
            jwt_secret: jwt_secret.into(),
        }
    }
}

/// Rejects callers that neither own the addressed resource nor are admin.
pub async fn enforce_ownership(
    State(guard): State<OwnershipGuard>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(request.headers()).ok_or(AuthError::MissingToken)?;
    guard
        .gate
        .authorize(&token, guard.jwt_secret.as_bytes(), &params)?;
    Ok(next.run(request).await)
}
