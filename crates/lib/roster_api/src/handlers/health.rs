use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use tracing::warn;

use crate::AppState;
use crate::models::HealthResponse;

/// `GET /health`: liveness plus a storage ping.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.storage.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".into(),
                storage: state.storage.kind().into(),
            }),
        ),
        Err(e) => {
            warn!(error = %e, "storage ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded".into(),
                    storage: state.storage.kind().into(),
                }),
            )
        }
    }
}
