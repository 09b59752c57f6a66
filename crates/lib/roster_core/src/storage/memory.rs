//! In-memory storage backend.
//!
//! Each bucket is an ordered map behind an async `RwLock`. Used for tests and
//! for running the server without a database.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use super::{Backend, Bucket, Document, SanitizedFilter, StorageError, StorageResult};

/// Backend keeping every bucket in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend;

impl MemoryBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn open_bucket(&self, name: &str) -> StorageResult<Arc<dyn Bucket>> {
        debug!(bucket = name, "opening in-memory bucket");
        Ok(Arc::new(MemoryBucket::new(name)))
    }
}

/// A bucket stored in process memory.
#[derive(Debug)]
pub struct MemoryBucket {
    name: String,
    records: RwLock<BTreeMap<String, Value>>,
}

impl MemoryBucket {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn store(&self, key: &str, value: Value) -> StorageResult<()> {
        self.records.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> StorageResult<Value> {
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(&self.name, key))
    }

    async fn update(&self, key: &str, value: Value) -> StorageResult<()> {
        let mut records = self.records.write().await;
        match records.get_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(StorageError::not_found(&self.name, key)),
        }
    }

    async fn patch(&self, key: &str, fields: Map<String, Value>) -> StorageResult<()> {
        if fields.is_empty() {
            return Err(StorageError::NothingToUpdate);
        }
        let mut records = self.records.write().await;
        let slot = records
            .get_mut(key)
            .ok_or_else(|| StorageError::not_found(&self.name, key))?;
        let Value::Object(doc) = slot else {
            return Err(StorageError::NotADocument {
                bucket: self.name.clone(),
                key: key.to_string(),
            });
        };
        doc.extend(fields);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn find_one(&self, filter: &SanitizedFilter) -> StorageResult<Option<Document>> {
        if filter.is_empty() {
            return Ok(None);
        }
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|(key, value)| filter.matches(key, value))
            .map(|(key, value)| Document {
                key: key.clone(),
                value: value.clone(),
            }))
    }

    async fn list_values(&self) -> StorageResult<Vec<Value>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn list_items(&self) -> StorageResult<Vec<Document>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .map(|(key, value)| Document {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn count(&self) -> StorageResult<u64> {
        Ok(self.records.read().await.len() as u64)
    }
}
