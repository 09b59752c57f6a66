//! Storage client: the registry of open buckets.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Backend, Bucket, BucketExt, Document, StorageResult, validate_bucket_name};

/// Owns the bucket registry and the backend that creates buckets.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct StorageClient {
    name: String,
    backend: Arc<dyn Backend>,
    buckets: Arc<DashMap<String, Arc<dyn Bucket>>>,
    create_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("name", &self.name)
            .field("kind", &self.backend.kind())
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

impl StorageClient {
    pub fn new(name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: name.into(),
            backend,
            buckets: Arc::new(DashMap::new()),
            create_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Client over a fresh in-memory backend.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(name, Arc::new(super::MemoryBackend::new()))
    }

    /// Database name this client serves.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend kind, e.g. `"memory"` or `"postgres"`.
    pub fn kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub async fn ping(&self) -> StorageResult<()> {
        self.backend.ping().await
    }

    /// Get the bucket called `name`, creating it on first access.
    ///
    /// Concurrent first access creates at most one bucket per name: the
    /// registry is checked, then re-checked under the creation lock.
    pub async fn connect_or_create_bucket(&self, name: &str) -> StorageResult<Arc<dyn Bucket>> {
        if let Some(bucket) = self.cached(name) {
            return Ok(bucket);
        }
        validate_bucket_name(name)?;

        let _guard = self.create_lock.lock().await;
        if let Some(bucket) = self.cached(name) {
            debug!(bucket = name, "bucket created by concurrent caller");
            return Ok(bucket);
        }
        info!(bucket = name, kind = self.kind(), "creating bucket");
        let bucket = self.backend.open_bucket(name).await?;
        self.buckets.insert(name.to_string(), bucket.clone());
        Ok(bucket)
    }

    fn cached(&self, name: &str) -> Option<Arc<dyn Bucket>> {
        self.buckets.get(name).map(|entry| entry.value().clone())
    }

    pub async fn store(&self, bucket: &str, key: &str, value: Value) -> StorageResult<()> {
        debug!(bucket, key, "store");
        self.connect_or_create_bucket(bucket).await?.store(key, value).await
    }

    pub async fn retrieve(&self, bucket: &str, key: &str) -> StorageResult<Value> {
        debug!(bucket, key, "retrieve");
        self.connect_or_create_bucket(bucket).await?.retrieve(key).await
    }

    pub async fn update(&self, bucket: &str, key: &str, value: Value) -> StorageResult<()> {
        debug!(bucket, key, "update");
        self.connect_or_create_bucket(bucket).await?.update(key, value).await
    }

    pub async fn patch(
        &self,
        bucket: &str,
        key: &str,
        fields: Map<String, Value>,
    ) -> StorageResult<()> {
        debug!(bucket, key, fields = fields.len(), "patch");
        self.connect_or_create_bucket(bucket).await?.patch(key, fields).await
    }

    pub async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        debug!(bucket, key, "delete");
        self.connect_or_create_bucket(bucket).await?.delete(key).await
    }

    pub async fn lookup(&self, bucket: &str, filter: &Value) -> StorageResult<Value> {
        self.connect_or_create_bucket(bucket).await?.lookup(filter).await
    }

    pub async fn list_values(&self, bucket: &str) -> StorageResult<Vec<Value>> {
        self.connect_or_create_bucket(bucket).await?.list_values().await
    }

    pub async fn list_items(&self, bucket: &str) -> StorageResult<Vec<Document>> {
        self.connect_or_create_bucket(bucket).await?.list_items().await
    }

    pub async fn count(&self, bucket: &str) -> StorageResult<u64> {
        self.connect_or_create_bucket(bucket).await?.count().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::storage::memory::MemoryBucket;
    use crate::storage::StorageError;

    /// Backend that counts bucket creations and yields mid-creation so racing
    /// callers interleave.
    struct CountingBackend {
        opened: AtomicU32,
    }

    #[async_trait]
    impl Backend for CountingBackend {
        fn kind(&self) -> &'static str {
            "counting"
        }

        async fn ping(&self) -> StorageResult<()> {
            Ok(())
        }

        async fn open_bucket(&self, name: &str) -> StorageResult<Arc<dyn Bucket>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Arc::new(MemoryBucket::new(name)))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_access_creates_one_bucket() {
        let backend = Arc::new(CountingBackend {
            opened: AtomicU32::new(0),
        });
        let client = StorageClient::new("test", backend.clone());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.connect_or_create_bucket("x").await.unwrap() })
            })
            .collect();

        let mut buckets = Vec::new();
        for h in handles {
            buckets.push(h.await.unwrap());
        }

        assert_eq!(backend.opened.load(Ordering::SeqCst), 1);
        assert!(buckets.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn invalid_bucket_names_are_rejected() {
        let client = StorageClient::in_memory("test");
        assert!(matches!(
            client.connect_or_create_bucket("Robert'); DROP").await,
            Err(StorageError::InvalidBucketName(_))
        ));
    }

    #[tokio::test]
    async fn forwarding_helpers_share_the_bucket() {
        let client = StorageClient::in_memory("test");
        client.store("users", "k", json!({"username": "bob"})).await.unwrap();
        assert_eq!(client.count("users").await.unwrap(), 1);
        let found = client.lookup("users", &json!({"username": "bob"})).await.unwrap();
        assert_eq!(found, json!({"username": "bob"}));
        assert_eq!(client.kind(), "memory");
        client.ping().await.unwrap();
    }
}
