//! User profile handlers.

use axum::Json;
use axum::extract::{Path, State};

use roster_core::models::user::{ProfilePatch, PublicUser};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::StatusResponse;

/// `GET /users`: every user (admin).
pub async fn list_users_handler(State(state): State<AppState>) -> AppResult<Json<Vec<PublicUser>>> {
    let users = state.users.list().await?;
    Ok(Json(users.iter().map(|u| u.to_public()).collect()))
}

/// `GET /users/{username}`
pub async fn get_user_handler(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> AppResult<Json<PublicUser>> {
    let user = state
        .users
        .find_by_username(&username)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    Ok(Json(user.to_public()))
}

/// `GET /users/id/{id}`
pub async fn get_user_by_id_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<PublicUser>> {
    let user = state.users.get(&id).await.map_err(not_found_as_user)?;
    Ok(Json(user.to_public()))
}

/// `PATCH /users/id/{id}`: self-service profile edit. Roles are not editable here.
pub async fn update_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ProfilePatch>,
) -> AppResult<Json<PublicUser>> {
    let user = state
        .users
        .patch_profile(&id, patch)
        .await
        .map_err(not_found_as_user)?;
    Ok(Json(user.to_public()))
}

/// `DELETE /users/id/{id}`
pub async fn delete_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    state.users.delete(&id).await?;
    Ok(Json(StatusResponse::with_message(
        "ok",
        "user deleted successfully",
    )))
}

pub(crate) fn not_found_as_user(e: roster_core::auth::AuthError) -> AppError {
    match AppError::from(e) {
        AppError::NotFound(_) => AppError::NotFound("user not found".into()),
        other => other,
    }
}
