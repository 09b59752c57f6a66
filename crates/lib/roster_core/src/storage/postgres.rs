//! PostgreSQL storage backend.
//!
//! Every bucket maps to its own table `bucket_<name> (key TEXT PRIMARY KEY,
//! value JSONB NOT NULL)`, created on first open. Statements are bounded by an
//! operation timeout so a stalled database surfaces as an error instead of a
//! hung request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use super::{
    Backend, Bucket, Document, SanitizedFilter, StorageError, StorageResult, Target,
    validate_bucket_name,
};

/// Default per-statement timeout.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed to acquire a pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend storing buckets as PostgreSQL tables.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    op_timeout: Duration,
}

impl PostgresBackend {
    pub fn new(pool: PgPool, op_timeout: Duration) -> Self {
        Self { pool, op_timeout }
    }

    /// Connect a pool to `url` and wrap it.
    pub async fn connect(url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;
        info!(max_connections, "connected to PostgreSQL");
        Ok(Self::new(pool, DEFAULT_OP_TIMEOUT))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StorageResult<()> {
        timed(self.op_timeout, sqlx::query("SELECT 1").execute(&self.pool)).await?;
        Ok(())
    }

    async fn open_bucket(&self, name: &str) -> StorageResult<Arc<dyn Bucket>> {
        validate_bucket_name(name)?;
        let table = table_ident(name);
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (key TEXT PRIMARY KEY, value JSONB NOT NULL)"
        );
        timed(self.op_timeout, sqlx::query(&ddl).execute(&self.pool)).await?;
        debug!(bucket = name, %table, "opened PostgreSQL bucket");
        Ok(Arc::new(PostgresBucket {
            name: name.to_string(),
            table,
            pool: self.pool.clone(),
            op_timeout: self.op_timeout,
        }))
    }
}

/// A bucket backed by a single PostgreSQL table.
#[derive(Debug)]
pub struct PostgresBucket {
    name: String,
    table: String,
    pool: PgPool,
    op_timeout: Duration,
}

#[async_trait]
impl Bucket for PostgresBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn store(&self, key: &str, value: Value) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO {} (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            self.table
        );
        let query = sqlx::query(&sql).bind(key).bind(Json(value));
        timed(self.op_timeout, query.execute(&self.pool)).await?;
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> StorageResult<Value> {
        let sql = format!("SELECT value FROM {} WHERE key = $1", self.table);
        let query = sqlx::query_scalar::<_, Json<Value>>(&sql).bind(key);
        timed(self.op_timeout, query.fetch_optional(&self.pool))
            .await?
            .map(|Json(v)| v)
            .ok_or_else(|| StorageError::not_found(&self.name, key))
    }

    async fn update(&self, key: &str, value: Value) -> StorageResult<()> {
        let sql = format!("UPDATE {} SET value = $2 WHERE key = $1", self.table);
        let query = sqlx::query(&sql).bind(key).bind(Json(value));
        let result = timed(self.op_timeout, query.execute(&self.pool)).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(&self.name, key));
        }
        Ok(())
    }

    async fn patch(&self, key: &str, fields: Map<String, Value>) -> StorageResult<()> {
        if fields.is_empty() {
            return Err(StorageError::NothingToUpdate);
        }
        // `||` merges top-level fields in one statement, so concurrent patches
        // to different fields never lose each other's writes.
        let sql = format!(
            "UPDATE {} SET value = value || $2 \
             WHERE key = $1 AND jsonb_typeof(value) = 'object'",
            self.table
        );
        let query = sqlx::query(&sql).bind(key).bind(Json(Value::Object(fields)));
        let result = timed(self.op_timeout, query.execute(&self.pool)).await?;
        if result.rows_affected() > 0 {
            return Ok(());
        }

        let sql = format!("SELECT jsonb_typeof(value) FROM {} WHERE key = $1", self.table);
        let query = sqlx::query_scalar::<_, String>(&sql).bind(key);
        match timed(self.op_timeout, query.fetch_optional(&self.pool)).await? {
            None => Err(StorageError::not_found(&self.name, key)),
            Some(_) => Err(StorageError::NotADocument {
                bucket: self.name.clone(),
                key: key.to_string(),
            }),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let sql = format!("DELETE FROM {} WHERE key = $1", self.table);
        timed(self.op_timeout, sqlx::query(&sql).bind(key).execute(&self.pool)).await?;
        Ok(())
    }

    async fn find_one(&self, filter: &SanitizedFilter) -> StorageResult<Option<Document>> {
        let Some(mut qb) = lookup_query(&self.table, filter) else {
            return Ok(None);
        };
        let row = timed(self.op_timeout, qb.build().fetch_optional(&self.pool)).await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let key: String = row.try_get("key")?;
                let Json(value): Json<Value> = row.try_get("value")?;
                Ok(Some(Document { key, value }))
            }
        }
    }

    async fn list_values(&self) -> StorageResult<Vec<Value>> {
        let sql = format!("SELECT value FROM {} ORDER BY key", self.table);
        let rows = timed(
            self.op_timeout,
            sqlx::query_scalar::<_, Json<Value>>(&sql).fetch_all(&self.pool),
        )
        .await?;
        Ok(rows.into_iter().map(|Json(v)| v).collect())
    }

    async fn list_items(&self) -> StorageResult<Vec<Document>> {
        let sql = format!("SELECT key, value FROM {} ORDER BY key", self.table);
        let rows = timed(
            self.op_timeout,
            sqlx::query_as::<_, (String, Json<Value>)>(&sql).fetch_all(&self.pool),
        )
        .await?;
        Ok(rows
            .into_iter()
            .map(|(key, Json(value))| Document { key, value })
            .collect())
    }

    async fn count(&self) -> StorageResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let n = timed(
            self.op_timeout,
            sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool),
        )
        .await?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

/// Quoted table identifier for a validated bucket name.
fn table_ident(name: &str) -> String {
    format!("\"bucket_{name}\"")
}

/// Compile a sanitized filter to a parameterised `SELECT`.
///
/// Field names and expected values are always bound, never spliced into the
/// SQL text. Returns `None` for an empty filter.
fn lookup_query(table: &str, filter: &SanitizedFilter) -> Option<QueryBuilder<'static, Postgres>> {
    if filter.is_empty() {
        return None;
    }
    let mut qb = QueryBuilder::new(format!("SELECT key, value FROM {table} WHERE "));
    for (i, cond) in filter.conditions().iter().enumerate() {
        if i > 0 {
            qb.push(" AND ");
        }
        match &cond.target {
            Target::Key => {
                let key = cond.expected.as_str()?.to_string();
                qb.push("key = ").push_bind(key);
            }
            Target::Value(field) => {
                qb.push("((value -> ")
                    .push_bind(field.clone())
                    .push("::text) = ")
                    .push_bind(Json(cond.expected.clone()));
                if !cond.expected.is_array() {
                    qb.push(" OR (jsonb_typeof(value -> ")
                        .push_bind(field.clone())
                        .push("::text) = 'array' AND (value -> ")
                        .push_bind(field.clone())
                        .push("::text) @> jsonb_build_array(")
                        .push_bind(Json(cond.expected.clone()))
                        .push(")))");
                } else {
                    qb.push(")");
                }
            }
        }
    }
    qb.push(" ORDER BY key LIMIT 1");
    Some(qb)
}

async fn timed<T, F>(limit: Duration, fut: F) -> StorageResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(StorageError::from),
        Err(_) => Err(StorageError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::{BucketExt, FieldWhitelist};

    #[test]
    fn table_identifier_is_prefixed_and_quoted() {
        assert_eq!(table_ident("users"), "\"bucket_users\"");
    }

    #[test]
    fn empty_filter_compiles_to_nothing() {
        assert!(lookup_query("\"bucket_users\"", &SanitizedFilter::default()).is_none());
    }

    #[test]
    fn lookup_query_binds_fields_and_values() {
        let filter = FieldWhitelist::default()
            .sanitize(&json!({"key": "k1", "username": "bob'; DROP TABLE x; --"}));
        let qb = lookup_query("\"bucket_users\"", &filter).unwrap();
        let sql = qb.sql();
        assert!(sql.starts_with("SELECT key, value FROM \"bucket_users\" WHERE "));
        assert!(sql.contains("key = $1"));
        assert!(sql.contains("(value -> $2::text) = $3"));
        assert!(sql.contains("jsonb_build_array($6)"));
        assert!(sql.ends_with(" ORDER BY key LIMIT 1"));
        assert!(!sql.contains("bob"));
        assert!(!sql.contains("username"));
    }

    #[test]
    fn array_expected_value_uses_equality_only() {
        let filter = FieldWhitelist::default().sanitize(&json!({"roles": ["user"]}));
        let qb = lookup_query("\"bucket_users\"", &filter).unwrap();
        assert!(!qb.sql().contains("jsonb_build_array"));
    }

    async fn test_backend() -> Option<PostgresBackend> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        PostgresBackend::connect(&url, 2).await.ok()
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL"]
    async fn postgres_bucket_semantics() {
        let backend = test_backend().await.expect("TEST_DATABASE_URL reachable");
        let name = format!("t_{}", crate::ids::uuidv7().simple());
        let bucket = backend.open_bucket(&name).await.unwrap();

        bucket
            .store("u1", json!({"username": "bob", "bio": "a", "roles": ["user"]}))
            .await
            .unwrap();
        assert!(matches!(
            bucket.update("nope", json!({})).await,
            Err(StorageError::NotFound { .. })
        ));

        let mut fields = Map::new();
        fields.insert("bio".into(), json!("b"));
        bucket.patch("u1", fields).await.unwrap();
        let stored = bucket.retrieve("u1").await.unwrap();
        assert_eq!(stored["bio"], "b");
        assert_eq!(stored["username"], "bob");

        assert!(matches!(
            bucket.patch("u1", Map::new()).await,
            Err(StorageError::NothingToUpdate)
        ));

        let found = bucket.lookup(&json!({"roles": "user"})).await.unwrap();
        assert_eq!(found["username"], "bob");
        assert!(bucket.lookup(&json!({"bio": "b"})).await.is_err());

        bucket.delete("u1").await.unwrap();
        bucket.delete("u1").await.unwrap();
        assert_eq!(bucket.count().await.unwrap(), 0);

        let drop = format!("DROP TABLE {}", table_ident(&name));
        sqlx::query(&drop).execute(backend.pool()).await.unwrap();
    }
}
