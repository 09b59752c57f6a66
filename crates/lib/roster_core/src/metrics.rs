//! Periodic user metrics.
//!
//! Each tick counts users, computes the role distribution and appends one
//! `(timestamp, count)` point to the history. Only the new point is written
//! to the metrics bucket, so a tick costs one write regardless of history
//! length. History is capped at a fixed number of points; older points are
//! evicted from both the snapshot and the bucket.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::AuthError;
use crate::storage::{Bucket, StorageClient};
use crate::users::UserStore;

/// Bucket holding `timestamp → user count` history points.
pub const METRICS_BUCKET: &str = "metrics_users";

/// Default interval between metric ticks.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(12);

/// Default number of retained history points (a day at the default interval).
pub const DEFAULT_MAX_POINTS: usize = 7200;

/// One history point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Point {
    pub timestamp: String,
    pub count: u64,
}

/// Latest computed metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_users: u64,
    pub total_roles: BTreeMap<String, u64>,
    /// Keyed by RFC 3339 UTC timestamp, which sorts chronologically.
    pub users_over_time: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// History points in chronological order.
    pub fn points(&self) -> Vec<Point> {
        self.users_over_time
            .iter()
            .map(|(timestamp, count)| Point {
                timestamp: timestamp.clone(),
                count: *count,
            })
            .collect()
    }
}

/// Computes and caches user metrics on a fixed interval.
#[derive(Clone)]
pub struct MetricsAggregator {
    users: UserStore,
    history: Arc<dyn Bucket>,
    snapshot: Arc<RwLock<MetricsSnapshot>>,
    interval: Duration,
    max_points: usize,
}

impl MetricsAggregator {
    pub fn new(users: UserStore, history: Arc<dyn Bucket>, interval: Duration) -> Self {
        Self {
            users,
            history,
            snapshot: Arc::new(RwLock::new(MetricsSnapshot::default())),
            interval,
            max_points: DEFAULT_MAX_POINTS,
        }
    }

    /// Retain at most `max_points` history points (at least one).
    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points.max(1);
        self
    }

    /// Aggregator over the standard buckets of `client`.
    pub async fn open(client: &StorageClient, interval: Duration) -> Result<Self, AuthError> {
        let users = UserStore::open(client).await?;
        let history = client.connect_or_create_bucket(METRICS_BUCKET).await?;
        Ok(Self::new(users, history, interval))
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Load persisted history into the snapshot. Returns the number of
    /// retained points.
    pub async fn restore(&self) -> Result<usize, AuthError> {
        let mut restored = BTreeMap::new();
        for doc in self.history.list_items().await? {
            match doc.value.as_u64() {
                Some(count) => {
                    restored.insert(doc.key, count);
                }
                None => warn!(key = %doc.key, "skipping malformed metrics point"),
            }
        }
        let evicted = {
            let mut snapshot = self.snapshot.write().await;
            for (timestamp, count) in restored {
                snapshot.users_over_time.entry(timestamp).or_insert(count);
            }
            evict_oldest(&mut snapshot.users_over_time, self.max_points)
        };
        self.forget(&evicted).await;
        Ok(self.snapshot.read().await.users_over_time.len())
    }

    /// Compute one round of metrics and persist the new history point.
    pub async fn tick(&self) -> Result<Point, AuthError> {
        let total_users = self.users.count().await?;
        let total_roles = self.users.role_counts().await?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let evicted = {
            let mut snapshot = self.snapshot.write().await;
            snapshot.total_users = total_users;
            snapshot.total_roles = total_roles;
            snapshot
                .users_over_time
                .insert(timestamp.clone(), total_users);
            evict_oldest(&mut snapshot.users_over_time, self.max_points)
        };

        self.history
            .store(&timestamp, Value::from(total_users))
            .await?;
        self.forget(&evicted).await;

        Ok(Point {
            timestamp,
            count: total_users,
        })
    }

    /// Delete evicted points from the bucket. Failures are logged only.
    async fn forget(&self, timestamps: &[String]) {
        for timestamp in timestamps {
            if let Err(e) = self.history.delete(timestamp).await {
                warn!(timestamp = %timestamp, error = %e, "failed to evict metrics point");
            }
        }
    }

    /// Tick until `cancel` fires. Errors are logged and retried next tick.
    pub async fn run(self, cancel: CancellationToken) {
        match self.restore().await {
            Ok(n) => debug!(points = n, "metrics history restored"),
            Err(e) => warn!(error = %e, "failed to restore metrics history"),
        }
        info!(interval = ?self.interval, "metrics aggregator started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.tick().await {
                Ok(point) => debug!(timestamp = %point.timestamp, count = point.count, "metrics tick"),
                Err(e) => error!(error = %e, "metrics tick failed"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("metrics aggregator stopped");
    }
}

/// Drop the oldest entries until at most `max` remain; returns their keys.
fn evict_oldest(points: &mut BTreeMap<String, u64>, max: usize) -> Vec<String> {
    let mut evicted = Vec::new();
    while points.len() > max {
        match points.pop_first() {
            Some((timestamp, _)) => evicted.push(timestamp),
            None => break,
        }
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::NewUser;

    async fn setup() -> (StorageClient, MetricsAggregator) {
        let client = StorageClient::in_memory("test");
        let metrics = MetricsAggregator::open(&client, Duration::from_millis(10))
            .await
            .unwrap();
        (client, metrics)
    }

    #[tokio::test]
    async fn tick_counts_users_and_roles() {
        let (client, metrics) = setup().await;
        let users = UserStore::open(&client).await.unwrap();
        users
            .create(NewUser::new("a", "a@x.com", "h"))
            .await
            .unwrap();
        users
            .create(NewUser::new("b", "b@x.com", "h").with_roles(["user", "admin"]))
            .await
            .unwrap();

        let point = metrics.tick().await.unwrap();
        assert_eq!(point.count, 2);

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.total_users, 2);
        assert_eq!(snapshot.total_roles.get("user"), Some(&2));
        assert_eq!(snapshot.total_roles.get("admin"), Some(&1));
        assert_eq!(snapshot.points(), vec![point.clone()]);

        let stored = client
            .retrieve(METRICS_BUCKET, &point.timestamp)
            .await
            .unwrap();
        assert_eq!(stored, Value::from(2u64));
    }

    #[tokio::test]
    async fn restore_loads_persisted_history() {
        let (client, metrics) = setup().await;
        client
            .store(METRICS_BUCKET, "2024-01-01T00:00:00Z", Value::from(3u64))
            .await
            .unwrap();
        client
            .store(METRICS_BUCKET, "2024-01-01T00:00:12Z", Value::from("junk"))
            .await
            .unwrap();

        assert_eq!(metrics.restore().await.unwrap(), 1);
        let points = metrics.snapshot().await.points();
        assert_eq!(
            points,
            vec![Point {
                timestamp: "2024-01-01T00:00:00Z".into(),
                count: 3
            }]
        );
    }

    #[tokio::test]
    async fn history_is_capped() {
        let (client, metrics) = setup().await;
        let metrics = metrics.with_max_points(2);
        for ts in ["2024-01-01T00:00:00Z", "2024-01-01T00:00:12Z", "2024-01-01T00:00:24Z"] {
            client
                .store(METRICS_BUCKET, ts, Value::from(1u64))
                .await
                .unwrap();
        }

        assert_eq!(metrics.restore().await.unwrap(), 2);
        let point = metrics.tick().await.unwrap();

        let kept: Vec<String> = metrics
            .snapshot()
            .await
            .points()
            .into_iter()
            .map(|p| p.timestamp)
            .collect();
        assert_eq!(kept, vec!["2024-01-01T00:00:24Z".to_string(), point.timestamp]);
        assert_eq!(client.count(METRICS_BUCKET).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (_client, metrics) = setup().await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(metrics.clone().run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(!metrics.snapshot().await.users_over_time.is_empty());
    }
}
