//! API server configuration.

use std::time::Duration;

use roster_core::auth::jwt::resolve_jwt_secret;
use roster_core::loadgen::{DEFAULT_LOADGEN_INTERVAL, DEFAULT_WORKERS};
use roster_core::metrics::DEFAULT_METRICS_INTERVAL;

/// Configuration for the API server.
#[derive(Clone)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL. `None` selects the in-memory backend.
    pub database_url: Option<String>,
    /// JWT signing secret.
    pub jwt_secret: String,
    /// Mark auth cookies `Secure`.
    pub cookie_secure: bool,
    /// Single allowed CORS origin; credentials are allowed only when set.
    pub cors_origin: Option<String>,
    pub metrics_interval: Duration,
    pub loadgen_interval: Duration,
    /// Concurrent storage operations per synthetic-user batch.
    pub batch_workers: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3100".into(),
            database_url: None,
            jwt_secret: String::new(),
            cookie_secure: false,
            cors_origin: None,
            metrics_interval: DEFAULT_METRICS_INTERVAL,
            loadgen_interval: DEFAULT_LOADGEN_INTERVAL,
            batch_workers: DEFAULT_WORKERS,
        }
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("jwt_secret", &"<redacted>")
            .field("cookie_secure", &self.cookie_secure)
            .field("cors_origin", &self.cors_origin)
            .field("metrics_interval", &self.metrics_interval)
            .field("loadgen_interval", &self.loadgen_interval)
            .field("batch_workers", &self.batch_workers)
            .finish()
    }
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable           | Default                                     |
    /// |--------------------|---------------------------------------------|
    /// | `BIND_ADDR`        | `127.0.0.1:3100`                            |
    /// | `DATABASE_URL`     | unset (in-memory storage)                   |
    /// | `JWT_SECRET` / `AUTH_SECRET` | generated & persisted to file     |
    /// | `COOKIE_SECURE`    | `false`                                     |
    /// | `CORS_ORIGIN`      | unset (any origin, no credentials)          |
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3100".into()),
            database_url: non_empty_var("DATABASE_URL"),
            jwt_secret: resolve_jwt_secret(),
            cookie_secure: std::env::var("COOKIE_SECURE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
            cors_origin: non_empty_var("CORS_ORIGIN"),
            ..Self::default()
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
