//! Roster API server binary.
//!
//! Serves the HTTP API and runs the metrics aggregator (and optionally the
//! load generator) until interrupted.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use roster_core::auth::AuthError;
use roster_core::models::user::ROLE_ADMIN;
use roster_core::storage::{PostgresBackend, StorageClient, StorageError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Database name reported by the storage client.
const DATABASE_NAME: &str = "roster";

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "roster_api_server", about = "Roster API server")]
struct Args {
    /// Port to listen on; overrides the port in `BIND_ADDR`.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// PostgreSQL connection URL. Without it, data lives in memory.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Seconds between metrics ticks.
    #[arg(long, default_value_t = 12)]
    metrics_interval_secs: u64,

    /// Run the synthetic user load generator.
    #[arg(long, default_value_t = false)]
    loadgen: bool,

    /// Seconds between load generator ticks.
    #[arg(long, default_value_t = 36)]
    loadgen_interval_secs: u64,

    /// Grant `admin` to this existing user at startup. Repeatable.
    #[arg(long = "bootstrap-admin", value_name = "USERNAME")]
    bootstrap_admin: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,roster_api=debug,roster_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = roster_api::config::ApiConfig::from_env();
    if let Some(port) = args.port {
        config.bind_addr = with_port(&config.bind_addr, port);
    }
    if args.database_url.is_some() {
        config.database_url = args.database_url.clone();
    }
    config.metrics_interval = Duration::from_secs(args.metrics_interval_secs.max(1));
    config.loadgen_interval = Duration::from_secs(args.loadgen_interval_secs.max(1));

    let storage = match config.database_url.as_deref() {
        Some(url) => {
            info!(max_connections = args.max_connections, "connecting to PostgreSQL");
            let backend = PostgresBackend::connect(url, args.max_connections).await?;
            StorageClient::new(DATABASE_NAME, Arc::new(backend))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory storage (data is lost on exit)");
            StorageClient::in_memory(DATABASE_NAME)
        }
    };
    storage.ping().await?;
    info!(kind = storage.kind(), "storage ready");

    let state = roster_api::AppState::new(config.clone(), storage).await?;

    for username in &args.bootstrap_admin {
        match state.users.grant_role(username, ROLE_ADMIN).await {
            Ok(user) => info!(user_id = %user.id, username = %user.username, "bootstrap admin granted"),
            Err(AuthError::Storage(StorageError::NotFound { .. })) => {
                warn!(username = %username, "bootstrap admin skipped: no such user")
            }
            Err(e) => return Err(e.into()),
        }
    }

    let cancel = CancellationToken::new();
    let metrics_handle = tokio::spawn(state.metrics.clone().run(cancel.child_token()));
    let loadgen_handle = args
        .loadgen
        .then(|| tokio::spawn(state.loadgen.clone().run(cancel.child_token())));

    let app = roster_api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let shutdown = cancel.clone();
    let api_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
                _ = shutdown.cancelled() => {}
            }
        })
        .await;

    // Stop background tasks once the API exits.
    cancel.cancel();
    let _ = metrics_handle.await;
    if let Some(handle) = loadgen_handle {
        let _ = handle.await;
    }

    api_result?;

    Ok(())
}

/// Replace the port of `addr`, keeping its host.
fn with_port(addr: &str, port: u16) -> String {
    let host = match addr.rsplit_once(':') {
        Some((host, _)) => host,
        None => addr,
    };
    format!("{host}:{port}")
}
