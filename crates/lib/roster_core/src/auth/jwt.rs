//! Signed identity tokens (HS256 JWT).
//!
//! The algorithm is pinned: a token whose header names anything other than
//! HS256 is rejected before its signature is considered.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{AuthError, TokenError};
use crate::models::user::UserRecord;

/// Token lifetime: 24 hours.
pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// The only accepted signing algorithm.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Identity claims embedded in a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: user id.
    pub sub: String,
    pub username: String,
    pub roles: BTreeSet<String>,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

impl Claims {
    /// Claims for `user`, valid for `ttl` from now.
    pub fn for_user(user: &UserRecord, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user.id.clone(),
            username: user.username.clone(),
            roles: user.roles.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }
}

/// Issue a signed token for `user` with the standard 24h lifetime.
pub fn issue(user: &UserRecord, secret: &[u8]) -> Result<String, AuthError> {
    sign(&Claims::for_user(user, Duration::seconds(TOKEN_TTL_SECS)), secret)
}

/// Sign an explicit set of claims.
pub fn sign(claims: &Claims, secret: &[u8]) -> Result<String, AuthError> {
    if claims.exp <= claims.iat {
        return Err(AuthError::Internal("token expiry must follow issuance".into()));
    }
    encode(
        &Header::new(ALGORITHM),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
}

/// Verify a token and decode its claims.
pub fn verify(token: &str, secret: &[u8]) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(ALGORITHM);
    validation.leeway = 0;
    validation.validate_exp = true;
    validation.set_required_spec_claims(&["exp", "sub"]);

    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                TokenError::InvalidSignature
            }
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Malformed,
        })
}

/// Resolve the JWT secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    if let Ok(secret) = std::env::var("AUTH_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    load_or_generate_secret(&jwt_secret_path())
}

/// Read the secret at `path`, generating and persisting a new one if absent.
pub fn load_or_generate_secret(path: &std::path::Path) -> String {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(path, &secret);
    info!(path = %path.display(), "generated new JWT secret");
    secret
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("roster")
        .join("jwt-secret")
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::*;
    use crate::models::user::{NewUser, UserRecord};

    const SECRET: &[u8] = b"test-secret";

    fn alice() -> UserRecord {
        UserRecord::from_new(
            "u-1".into(),
            NewUser::new("alice", "alice@x.com", "hash").with_roles(["user", "dev"]),
        )
    }

    #[test]
    fn round_trip_preserves_identity() {
        let user = alice();
        let token = issue(&user, SECRET).unwrap();
        let claims = verify(&token, SECRET).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, user.username);
        assert_eq!(claims.roles, user.roles);
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL_SECS);
    }

    #[test]
    fn other_secret_is_rejected() {
        let token = issue(&alice(), SECRET).unwrap();
        assert_eq!(
            verify(&token, b"other-secret"),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "u-1".into(),
            username: "alice".into(),
            roles: BTreeSet::from(["user".to_string()]),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = sign(&claims, SECRET).unwrap();
        assert_eq!(verify(&token, SECRET), Err(TokenError::Expired));
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(verify("not-a-token", SECRET), Err(TokenError::Malformed));
        assert_eq!(verify("", SECRET), Err(TokenError::Malformed));
    }

    #[test]
    fn unsigned_algorithm_is_not_negotiated() {
        let claims = Claims::for_user(&alice(), Duration::seconds(60));
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(&serde_json::to_vec(&claims).unwrap());
        let forged = format!("{header}.{payload}.");
        assert!(verify(&forged, SECRET).is_err());
    }

    #[test]
    fn other_hmac_algorithm_is_rejected() {
        let claims = Claims::for_user(&alice(), Duration::seconds(60));
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert!(verify(&token, SECRET).is_err());
    }

    #[test]
    fn signing_requires_positive_lifetime() {
        let claims = Claims::for_user(&alice(), Duration::seconds(0));
        assert!(matches!(sign(&claims, SECRET), Err(AuthError::Internal(_))));
    }

    #[test]
    fn secret_file_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jwt-secret");
        let first = load_or_generate_secret(&path);
        assert_eq!(first.len(), 64);
        assert_eq!(load_or_generate_secret(&path), first);
    }
}
