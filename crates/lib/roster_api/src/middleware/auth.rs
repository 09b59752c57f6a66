//! Authentication middleware: token extraction and verification.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use roster_core::auth::{AuthError, Identity, jwt};

use crate::AppState;
use crate::error::AppError;
use crate::services::cookies::TOKEN_COOKIE;

/// Verified identity stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Identity);

/// Token from the `jwt` cookie, falling back to `Authorization: Bearer`.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(TOKEN_COOKIE)
        && !cookie.value().is_empty()
    {
        return Some(cookie.value().to_string());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Axum middleware: verifies the caller's token and injects
/// `AuthenticatedUser` into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(request.headers()).ok_or(AuthError::MissingToken)?;
    let claims = jwt::verify(&token, state.config.jwt_secret.as_bytes())
        .map_err(AuthError::InvalidToken)?;

    request
        .extensions_mut()
        .insert(AuthenticatedUser(Identity::from(claims)));

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use axum::http::header::COOKIE;

    use super::*;

    #[test]
    fn cookie_wins_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("jwt=from-cookie; username=alice"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(extract_token(&headers).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn bearer_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn other_schemes_and_empty_values_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        headers.insert(COOKIE, HeaderValue::from_static("jwt="));
        assert_eq!(extract_token(&headers), None);
    }
}
