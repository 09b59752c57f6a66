//! # roster_api
//!
//! HTTP API library for Roster.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use roster_core::auth::{AuthError, OwnershipGate, RoleGate};
use roster_core::loadgen::LoadGenerator;
use roster_core::metrics::MetricsAggregator;
use roster_core::models::user::{ROLE_ADMIN, ROLE_USER};
use roster_core::storage::StorageClient;
use roster_core::users::UserStore;

use crate::config::ApiConfig;
use crate::handlers::{admin, auth, health, metrics, users};
use crate::middleware::authorize::{OwnershipGuard, enforce_ownership, enforce_roles};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// API configuration.
    pub config: ApiConfig,
    /// Storage client owning the bucket registry.
    pub storage: StorageClient,
    pub users: UserStore,
    pub metrics: MetricsAggregator,
    pub loadgen: LoadGenerator,
}

impl AppState {
    /// Open the standard buckets on `storage` and wire the services.
    pub async fn new(config: ApiConfig, storage: StorageClient) -> Result<Self, AuthError> {
        let users = UserStore::open(&storage).await?;
        let metrics = MetricsAggregator::open(&storage, config.metrics_interval).await?;
        let loadgen = LoadGenerator::new(users.clone(), config.loadgen_interval, config.batch_workers);
        Ok(Self {
            config,
            storage,
            users,
            metrics,
            loadgen,
        })
    }
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    let permissive = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let Some(origin) = config.cors_origin.as_deref() else {
        return permissive;
    };
    match origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]),
        Err(e) => {
            warn!(origin, error = %e, "invalid CORS_ORIGIN; allowing any origin without credentials");
            permissive
        }
    }
}

/// Builds the Axum router with all routes and shared state.
///
/// Gates run outermost-first: authentication, then role, then ownership.
pub fn router(state: AppState) -> Router {
    let require_auth = from_fn_with_state(state.clone(), middleware::auth::require_auth);
    let ownership = from_fn_with_state(
        OwnershipGuard::new(OwnershipGate::default(), state.config.jwt_secret.clone()),
        enforce_ownership,
    );

    // Public routes (no auth required)
    let public = Router::new()
        .route("/health", get(health::health_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/logout", post(auth::logout_handler));

    // Admin routes
    let admin = Router::new()
        .route("/users", get(users::list_users_handler))
        .route("/admin/users/{id}/roles", put(admin::set_roles_handler))
        .route("/admin/users/generate", post(admin::generate_users_handler))
        .route("/admin/users/purge", post(admin::purge_users_handler))
        .route("/metrics/users", get(metrics::user_metrics_handler))
        .route_layer(from_fn_with_state(
            RoleGate::any_of([ROLE_ADMIN]),
            enforce_roles,
        ))
        .route_layer(require_auth.clone());

    // Profile by username: role + ownership
    let profile = Router::new()
        .route("/users/{username}", get(users::get_user_handler))
        .route_layer(ownership.clone())
        .route_layer(from_fn_with_state(
            RoleGate::any_of([ROLE_USER, ROLE_ADMIN]),
            enforce_roles,
        ))
        .route_layer(require_auth.clone());

    // Account by id: ownership only
    let account = Router::new()
        .route(
            "/users/id/{id}",
            get(users::get_user_by_id_handler)
                .patch(users::update_user_handler)
                .delete(users::delete_user_handler),
        )
        .route_layer(ownership)
        .route_layer(require_auth);

    Router::new()
        .merge(public)
        .merge(admin)
        .merge(profile)
        .merge(account)
        .layer(cors_layer(&state.config))
        .with_state(state)
}
