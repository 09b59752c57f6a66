//! Generic key-value document storage.
//!
//! A [`Bucket`] is a named collection of `key → value` documents where the
//! value is an arbitrary JSON payload. Buckets are handed out by the
//! [`StorageClient`], which owns a registry of them and delegates creation to
//! a pluggable [`Backend`] (in-memory or PostgreSQL).

pub mod client;
pub mod filter;
pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use client::StorageClient;
pub use filter::{Condition, FieldWhitelist, SanitizedFilter, Target};
pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No document with key {key:?} in bucket {bucket:?}")]
    NotFound { bucket: String, key: String },

    #[error("Nothing to update")]
    NothingToUpdate,

    #[error("Document {key:?} in bucket {bucket:?} is not an object")]
    NotADocument { bucket: String, key: String },

    #[error("Invalid bucket name: {0:?}")]
    InvalidBucketName(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    pub(crate) fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    /// Whether this error means the backing store could not be reached.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) => true,
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A stored record: caller-chosen key plus opaque JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    pub value: Value,
}

/// A named collection of documents.
///
/// Implementations delegate concurrency control to the backing store; no
/// record-level locking happens at this layer.
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Bucket name.
    fn name(&self) -> &str;

    /// Upsert: create the record, or fully replace the value under `key`.
    async fn store(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Fetch the value stored under `key`.
    async fn retrieve(&self, key: &str) -> StorageResult<Value>;

    /// Full replace of an existing record. Fails with `NotFound` if absent.
    async fn update(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Set only the named top-level fields of the stored value, atomically.
    async fn patch(&self, key: &str, fields: Map<String, Value>) -> StorageResult<()>;

    /// Remove a record. Absent keys are not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// First record matching an already-sanitized filter.
    ///
    /// An empty filter never matches anything.
    async fn find_one(&self, filter: &SanitizedFilter) -> StorageResult<Option<Document>>;

    /// All stored values, ordered by key.
    async fn list_values(&self) -> StorageResult<Vec<Value>>;

    /// All stored records, ordered by key.
    async fn list_items(&self) -> StorageResult<Vec<Document>>;

    /// Number of records.
    async fn count(&self) -> StorageResult<u64>;
}

/// Extension methods shared by every bucket implementation.
#[async_trait]
pub trait BucketExt: Bucket {
    /// Filtered single-result lookup over a caller-supplied filter, using the
    /// default Allowed-Fields whitelist.
    async fn lookup(&self, filter: &Value) -> StorageResult<Value> {
        self.lookup_with(&FieldWhitelist::default(), filter).await
    }

    /// Filtered single-result lookup with an explicit whitelist.
    ///
    /// Fields outside the whitelist are dropped; if nothing survives the
    /// lookup reports `NotFound` instead of matching every record.
    async fn lookup_with(&self, whitelist: &FieldWhitelist, filter: &Value) -> StorageResult<Value> {
        let sanitized = whitelist.sanitize(filter);
        if sanitized.is_empty() {
            return Err(StorageError::not_found(self.name(), "<filter>"));
        }
        match self.find_one(&sanitized).await? {
            Some(doc) => Ok(doc.value),
            None => Err(StorageError::not_found(self.name(), "<filter>")),
        }
    }
}

impl<B: Bucket + ?Sized> BucketExt for B {}

/// A storage engine capable of opening buckets.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short engine identifier, e.g. `"memory"` or `"postgres"`.
    fn kind(&self) -> &'static str;

    /// Check that the engine is reachable.
    async fn ping(&self) -> StorageResult<()>;

    /// Open (creating if needed) the bucket with the given, validated name.
    async fn open_bucket(&self, name: &str) -> StorageResult<Arc<dyn Bucket>>;
}

/// Maximum bucket name length (PostgreSQL identifiers are capped at 63 bytes).
const MAX_BUCKET_NAME_LEN: usize = 48;

/// Validate a bucket name: lowercase ASCII letters, digits and `_`,
/// starting with a letter.
pub fn validate_bucket_name(name: &str) -> StorageResult<()> {
    let mut chars = name.chars();
    let valid = name.len() <= MAX_BUCKET_NAME_LEN
        && chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidBucketName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names_are_validated() {
        assert!(validate_bucket_name("users").is_ok());
        assert!(validate_bucket_name("users_v1").is_ok());
        assert!(validate_bucket_name("").is_err());
        assert!(validate_bucket_name("1users").is_err());
        assert!(validate_bucket_name("Users").is_err());
        assert!(validate_bucket_name("users; DROP TABLE x").is_err());
        assert!(validate_bucket_name(&"a".repeat(49)).is_err());
    }

    #[test]
    fn unavailable_classification() {
        assert!(StorageError::Unavailable("down".into()).is_unavailable());
        assert!(StorageError::Database(sqlx::Error::PoolTimedOut).is_unavailable());
        assert!(!StorageError::NothingToUpdate.is_unavailable());
        assert!(!StorageError::not_found("users", "k").is_unavailable());
    }
}
