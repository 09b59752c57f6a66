//! Synthetic user churn.
//!
//! Creates and deletes batches of users carrying the `dummy` role so the
//! metrics history has something to show. Batches run through a bounded
//! worker pool; per-item failures are counted and reported once per batch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthError, password};
use crate::models::user::{NewUser, ROLE_DUMMY, ROLE_USER};
use crate::users::UserStore;

/// Default interval between load generator ticks.
pub const DEFAULT_LOADGEN_INTERVAL: Duration = Duration::from_secs(36);

/// Concurrent storage operations per batch.
pub const DEFAULT_WORKERS: usize = 8;

/// Upper bound on a single batch.
pub const MAX_BATCH: usize = 5000;

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create(usize),
    Delete(usize),
}

/// Pick this tick's actions. Mostly small mixed churn, occasionally a spike.
fn plan_tick<R: Rng>(rng: &mut R) -> Vec<Action> {
    let n = rng.random_range(250..1000).clamp(25, 669);
    match rng.random_range(0..18) {
        0 => vec![Action::Create(n)],
        1 => vec![Action::Delete(n)],
        2 => vec![Action::Create(n + 750)],
        3 => vec![Action::Delete(n + 550)],
        4 => vec![Action::Create(n + 2000)],
        5 => vec![Action::Delete(n + 1500)],
        _ => vec![
            Action::Create(n.saturating_sub(500)),
            Action::Delete(n.saturating_sub(350)),
        ],
    }
}

fn random_token<R: Rng>(rng: &mut R, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Creates and purges `dummy` users.
#[derive(Clone)]
pub struct LoadGenerator {
    users: UserStore,
    interval: Duration,
    workers: usize,
}

impl LoadGenerator {
    pub fn new(users: UserStore, interval: Duration, workers: usize) -> Self {
        Self {
            users,
            interval,
            workers: workers.max(1),
        }
    }

    /// Create up to `count` dummy users.
    pub async fn create_dummies(&self, count: usize) -> Result<BatchReport, AuthError> {
        let count = count.min(MAX_BATCH);
        if count == 0 {
            return Ok(BatchReport::default());
        }

        // One hash per batch; nobody logs in as a dummy.
        let password_hash = {
            let mut rng = rng();
            password::hash_password(&random_token(&mut rng, 16))?
        };
        let plans: Vec<NewUser> = {
            let mut rng = rng();
            (0..count)
                .map(|_| {
                    let name = format!("dummy_{}", random_token(&mut rng, 12));
                    let email = format!("{name}@example.invalid");
                    NewUser::new(name, email, password_hash.clone())
                        .with_roles([ROLE_USER, ROLE_DUMMY])
                })
                .collect()
        };

        let succeeded = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        stream::iter(plans)
            .for_each_concurrent(self.workers, |new| {
                let (succeeded, failed) = (&succeeded, &failed);
                async move {
                    match self.users.create(new).await {
                        Ok(_) => succeeded.fetch_add(1, Ordering::Relaxed),
                        Err(e) => {
                            debug!(error = %e, "dummy create failed");
                            failed.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
            })
            .await;

        let report = BatchReport {
            requested: count,
            succeeded: succeeded.into_inner(),
            failed: failed.into_inner(),
        };
        log_report("create", &report);
        Ok(report)
    }

    /// Delete up to `count` existing dummy users.
    pub async fn purge_dummies(&self, count: usize) -> Result<BatchReport, AuthError> {
        let count = count.min(MAX_BATCH);
        let ids: Vec<String> = self
            .users
            .list()
            .await?
            .into_iter()
            .filter(|u| u.has_role(ROLE_DUMMY))
            .take(count)
            .map(|u| u.id)
            .collect();

        let succeeded = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        stream::iter(ids)
            .for_each_concurrent(self.workers, |id| {
                let (succeeded, failed) = (&succeeded, &failed);
                async move {
                    match self.users.delete(&id).await {
                        Ok(()) => succeeded.fetch_add(1, Ordering::Relaxed),
                        Err(e) => {
                            debug!(user_id = %id, error = %e, "dummy delete failed");
                            failed.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
            })
            .await;

        let report = BatchReport {
            requested: count,
            succeeded: succeeded.into_inner(),
            failed: failed.into_inner(),
        };
        log_report("purge", &report);
        Ok(report)
    }

    /// Churn users every interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval = ?self.interval, workers = self.workers, "load generator started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let actions = plan_tick(&mut rng());
            for action in actions {
                if cancel.is_cancelled() {
                    break;
                }
                let result = match action {
                    Action::Create(n) => self.create_dummies(n).await,
                    Action::Delete(n) => self.purge_dummies(n).await,
                };
                if let Err(e) = result {
                    warn!(?action, error = %e, "load generator batch aborted");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("load generator stopped");
    }
}

fn log_report(op: &str, report: &BatchReport) {
    if report.failed > 0 {
        warn!(
            op,
            requested = report.requested,
            succeeded = report.succeeded,
            failed = report.failed,
            "dummy batch finished with failures"
        );
    } else {
        info!(op, requested = report.requested, succeeded = report.succeeded, "dummy batch finished");
    }
}
