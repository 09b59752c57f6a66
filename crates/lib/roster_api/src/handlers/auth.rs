//! Authentication request handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum_extra::extract::cookie::CookieJar;

use crate::AppState;
use crate::error::AppResult;
use crate::models::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, StatusResponse};
use crate::services::{auth, cookies};

/// `POST /auth/login`: authenticate with username + password.
pub async fn login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    let session = auth::login(
        &state.users,
        &body.username,
        &body.password,
        state.config.jwt_secret.as_bytes(),
    )
    .await?;

    let secure = state.config.cookie_secure;
    let jar = jar
        .add(cookies::token_cookie(&session.token, secure))
        .add(cookies::username_cookie(&session.user.username, secure));
    Ok((
        jar,
        Json(LoginResponse {
            message: "login successful".into(),
            username: session.user.username,
        }),
    ))
}

/// `POST /auth/register`: create an account and sign it in.
pub async fn register_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, CookieJar, Json<RegisterResponse>)> {
    let session = auth::register(&state.users, body, state.config.jwt_secret.as_bytes()).await?;

    let secure = state.config.cookie_secure;
    let jar = jar
        .add(cookies::token_cookie(&session.token, secure))
        .add(cookies::username_cookie(&session.user.username, secure));
    Ok((
        StatusCode::CREATED,
        jar,
        Json(RegisterResponse {
            status: "ok".into(),
            username: session.user.username,
        }),
    ))
}

/// `POST /auth/logout`: expire the auth cookies. Tokens stay valid until
/// their own expiry.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<StatusResponse>) {
    let secure = state.config.cookie_secure;
    let jar = jar
        .add(cookies::clear_token_cookie(secure))
        .add(cookies::clear_username_cookie(secure));
    (jar, Json(StatusResponse::new("logged out")))
}
