//! Admin-only handlers.

use axum::Json;
use axum::extract::{Path, State};

use roster_core::loadgen::BatchReport;
use roster_core::models::user::PublicUser;

use super::users::not_found_as_user;
use crate::AppState;
use crate::error::AppResult;
use crate::models::{BatchRequest, SetRolesRequest};

/// `PUT /admin/users/{id}/roles`: replace a user's roles.
pub async fn set_roles_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SetRolesRequest>,
) -> AppResult<Json<PublicUser>> {
    let roles = body.roles.into_iter().map(|r| r.trim().to_string()).collect();
    let user = state
        .users
        .set_roles(&id, roles)
        .await
        .map_err(not_found_as_user)?;
    Ok(Json(user.to_public()))
}

/// `POST /admin/users/generate`: create a batch of dummy users.
pub async fn generate_users_handler(
    State(state): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> AppResult<Json<BatchReport>> {
    Ok(Json(state.loadgen.create_dummies(body.count).await?))
}

/// `POST /admin/users/purge`: delete a batch of dummy users.
pub async fn purge_users_handler(
    State(state): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> AppResult<Json<BatchReport>> {
    Ok(Json(state.loadgen.purge_dummies(body.count).await?))
}
