//! User accounts on top of the `users` bucket.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::AuthError;
use crate::ids::new_user_id;
use crate::models::user::{NewUser, ProfilePatch, UserRecord};
use crate::storage::{Bucket, BucketExt, StorageClient, StorageError};

/// Bucket holding user records, keyed by user id.
pub const USERS_BUCKET: &str = "users";

const MAX_ROLE_LEN: usize = 32;

/// Typed access to user records.
///
/// Clones share one write lock, held across every uniqueness check and the
/// write it guards.
#[derive(Clone)]
pub struct UserStore {
    bucket: Arc<dyn Bucket>,
    unique_lock: Arc<Mutex<()>>,
}

impl UserStore {
    pub fn new(bucket: Arc<dyn Bucket>) -> Self {
        Self {
            bucket,
            unique_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Open (creating if needed) the `users` bucket on `client`.
    pub async fn open(client: &StorageClient) -> Result<Self, AuthError> {
        Ok(Self::new(client.connect_or_create_bucket(USERS_BUCKET).await?))
    }

    /// Create a user with a fresh id. Username and email must both be unused.
    pub async fn create(&self, new: NewUser) -> Result<UserRecord, AuthError> {
        if new.roles.is_empty() {
            return Err(AuthError::ValidationError(
                "roles must contain at least one entry".into(),
            ));
        }

        let _guard = self.unique_lock.lock().await;
        if self.find_by_username(&new.username).await?.is_some() {
            return Err(AuthError::AlreadyExists("username already in use".into()));
        }
        if self.find_by_email(&new.email).await?.is_some() {
            return Err(AuthError::AlreadyExists("email already in use".into()));
        }

        let user = UserRecord::from_new(new_user_id(), new);
        self.bucket
            .store(&user.id, serde_json::to_value(&user)?)
            .await?;
        debug!(user_id = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    pub async fn get(&self, id: &str) -> Result<UserRecord, AuthError> {
        decode(self.bucket.retrieve(id).await?)
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, AuthError> {
        self.find_one(json!({ "username": username })).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        self.find_one(json!({ "email": email })).await
    }

    async fn find_one(&self, filter: Value) -> Result<Option<UserRecord>, AuthError> {
        match self.bucket.lookup(&filter).await {
            Ok(value) => decode(value).map(Some),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All users, ordered by id. Records that fail to decode are skipped.
    pub async fn list(&self) -> Result<Vec<UserRecord>, AuthError> {
        let items = self.bucket.list_items().await?;
        let mut users = Vec::with_capacity(items.len());
        for doc in items {
            match serde_json::from_value::<UserRecord>(doc.value) {
                Ok(user) => users.push(user),
                Err(e) => warn!(key = %doc.key, error = %e, "skipping malformed user record"),
            }
        }
        Ok(users)
    }

    pub async fn count(&self) -> Result<u64, AuthError> {
        Ok(self.bucket.count().await?)
    }

    /// Apply a self-service profile edit and return the updated record.
    pub async fn patch_profile(&self, id: &str, patch: ProfilePatch) -> Result<UserRecord, AuthError> {
        if patch.is_empty() {
            return Err(StorageError::NothingToUpdate.into());
        }

        let mut fields = Map::new();
        let _guard = if patch.email.is_some() {
            Some(self.unique_lock.lock().await)
        } else {
            None
        };
        if let Some(email) = patch.email {
            if email.trim().is_empty() || !email.contains('@') {
                return Err(AuthError::ValidationError("invalid email".into()));
            }
            if let Some(other) = self.find_by_email(&email).await?
                && other.id != id
            {
                return Err(AuthError::AlreadyExists("email already in use".into()));
            }
            fields.insert("email".into(), Value::String(email));
        }
        if let Some(bio) = patch.bio {
            fields.insert("bio".into(), Value::String(bio));
        }
        if let Some(avatar_url) = patch.avatar_url {
            fields.insert("avatar_url".into(), Value::String(avatar_url));
        }
        fields.insert("updated_at".into(), serde_json::to_value(Utc::now())?);

        self.bucket.patch(id, fields).await?;
        self.get(id).await
    }

    /// Replace a user's roles. The set must be non-empty and every name valid.
    pub async fn set_roles(&self, id: &str, roles: BTreeSet<String>) -> Result<UserRecord, AuthError> {
        validate_roles(&roles)?;

        let mut fields = Map::new();
        fields.insert("roles".into(), serde_json::to_value(&roles)?);
        fields.insert("updated_at".into(), serde_json::to_value(Utc::now())?);
        self.bucket.patch(id, fields).await?;
        info!(user_id = id, ?roles, "roles replaced");
        self.get(id).await
    }

    /// Add `role` to the user called `username`. No-op if already held.
    pub async fn grant_role(&self, username: &str, role: &str) -> Result<UserRecord, AuthError> {
        let user = self
            .find_by_username(username)
            .await?
            .ok_or_else(|| StorageError::not_found(self.bucket.name(), username))?;
        if user.has_role(role) {
            return Ok(user);
        }
        let mut roles = user.roles.clone();
        roles.insert(role.to_string());
        self.set_roles(&user.id, roles).await
    }

    /// Delete a user. Deleting an absent id succeeds.
    pub async fn delete(&self, id: &str) -> Result<(), AuthError> {
        self.bucket.delete(id).await?;
        debug!(user_id = id, "user deleted");
        Ok(())
    }

    /// Number of users holding each role.
    pub async fn role_counts(&self) -> Result<BTreeMap<String, u64>, AuthError> {
        let mut counts = BTreeMap::new();
        for value in self.bucket.list_values().await? {
            let Some(roles) = value.get("roles").and_then(Value::as_array) else {
                warn!("user record without roles array");
                continue;
            };
            for role in roles.iter().filter_map(Value::as_str) {
                *counts.entry(role.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

fn decode(value: Value) -> Result<UserRecord, AuthError> {
    Ok(serde_json::from_value(value)?)
}

fn validate_roles(roles: &BTreeSet<String>) -> Result<(), AuthError> {
    if roles.is_empty() {
        return Err(AuthError::ValidationError(
            "roles must contain at least one entry".into(),
        ));
    }
    for role in roles {
        let valid = !role.is_empty()
            && role.len() <= MAX_ROLE_LEN
            && role
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
        if !valid {
            return Err(AuthError::ValidationError(format!("invalid role name: {role:?}")));
        }
    }
    Ok(())
}
