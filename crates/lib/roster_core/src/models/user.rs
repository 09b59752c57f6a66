//! User account models.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default role for every registered user.
pub const ROLE_USER: &str = "user";
/// Grants admin views and bypasses ownership checks.
pub const ROLE_ADMIN: &str = "admin";
/// Marks synthetic users created by the load generator.
pub const ROLE_DUMMY: &str = "dummy";

/// User as persisted in the `users` bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn from_new(id: String, new: NewUser) -> Self {
        let now = Utc::now();
        Self {
            id,
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            roles: new.roles,
            bio: new.bio,
            avatar_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Outward view; drops the password hash.
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            roles: self.roles.clone(),
            bio: self.bio.clone(),
            avatar_url: self.avatar_url.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// User as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub roles: BTreeSet<String>,
    pub bio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub roles: BTreeSet<String>,
    pub bio: String,
}

impl NewUser {
    /// A new user holding only the default `user` role.
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            roles: BTreeSet::from([ROLE_USER.to_string()]),
            bio: String::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

/// Self-service profile edit. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub email: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.bio.is_none() && self.avatar_url.is_none()
    }
}
