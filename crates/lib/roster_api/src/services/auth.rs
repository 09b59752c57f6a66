//! Authentication service: login and registration flows over the user store.

use tracing::info;

use roster_core::auth::{AuthError, jwt, password};
use roster_core::models::user::{NewUser, UserRecord};
use roster_core::users::UserStore;

use crate::error::{AppError, AppResult};
use crate::models::RegisterRequest;

const MIN_PASSWORD_LEN: usize = 6;
const MAX_USERNAME_LEN: usize = 64;

/// A signed token together with the user it was issued for.
#[derive(Debug)]
pub struct Session {
    pub token: String,
    pub user: UserRecord,
}

/// Authenticate with username + password.
///
/// Unknown user and wrong password produce the same error.
pub async fn login(
    users: &UserStore,
    username: &str,
    password: &str,
    jwt_secret: &[u8],
) -> AppResult<Session> {
    let user = users
        .find_by_username(username)
        .await?
        .ok_or(AuthError::CredentialError)?;

    if !password::verify_password(password, &user.password_hash)? {
        return Err(AuthError::CredentialError.into());
    }

    let token = jwt::issue(&user, jwt_secret)?;
    info!(user_id = %user.id, "user logged in");
    Ok(Session { token, user })
}

/// Create an account holding the default role and sign it in.
pub async fn register(
    users: &UserStore,
    req: RegisterRequest,
    jwt_secret: &[u8],
) -> AppResult<Session> {
    validate_registration(&req)?;

    let password_hash = password::hash_password(&req.password)?;
    let user = users
        .create(NewUser::new(req.username.trim(), req.email.trim(), password_hash))
        .await?;

    let token = jwt::issue(&user, jwt_secret)?;
    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(Session { token, user })
}

fn validate_registration(req: &RegisterRequest) -> AppResult<()> {
    let username = req.username.trim();
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(AppError::Validation("invalid username".into()));
    }
    if !req.email.contains('@') {
        return Err(AppError::Validation("invalid email".into()));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if req.password != req.confirm_password {
        return Err(AppError::Validation("passwords do not match".into()));
    }
    Ok(())
}
