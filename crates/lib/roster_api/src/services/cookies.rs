//! Auth cookies.
//!
//! `jwt` carries the token and is httpOnly. `username` is readable by
//! scripts and used for display only; it grants nothing.

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use roster_core::auth::jwt::TOKEN_TTL_SECS;

/// Cookie name for the signed token.
pub const TOKEN_COOKIE: &str = "jwt";
/// Cookie name for the display username.
pub const USERNAME_COOKIE: &str = "username";

fn build(name: &str, value: String, http_only: bool, secure: bool, max_age: Duration) -> Cookie<'static> {
    Cookie::build((name.to_string(), value))
        .http_only(http_only)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(max_age)
        .build()
}

/// httpOnly cookie holding the token, valid as long as the token.
pub fn token_cookie(token: &str, secure: bool) -> Cookie<'static> {
    build(TOKEN_COOKIE, token.to_string(), true, secure, Duration::seconds(TOKEN_TTL_SECS))
}

pub fn username_cookie(username: &str, secure: bool) -> Cookie<'static> {
    build(USERNAME_COOKIE, username.to_string(), false, secure, Duration::seconds(TOKEN_TTL_SECS))
}

/// Already-expired token cookie.
pub fn clear_token_cookie(secure: bool) -> Cookie<'static> {
    build(TOKEN_COOKIE, String::new(), true, secure, Duration::ZERO)
}

pub fn clear_username_cookie(secure: bool) -> Cookie<'static> {
    build(USERNAME_COOKIE, String::new(), false, secure, Duration::ZERO)
}
