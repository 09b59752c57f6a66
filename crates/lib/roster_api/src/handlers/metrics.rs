//! Metrics handlers.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::models::UserMetricsResponse;

/// `GET /metrics/users`: latest snapshot from the aggregator.
pub async fn user_metrics_handler(State(state): State<AppState>) -> Json<UserMetricsResponse> {
    Json(state.metrics.snapshot().await.into())
}
