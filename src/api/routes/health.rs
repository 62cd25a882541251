//! Health check endpoint

use axum::{Json, extract::State};
use tracing::warn;

use crate::api::{state::ApiState, types::HealthResponse};

/// GET /api/v1/health
///
/// Always answers; storage problems are reported in the body
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let (storage_healthy, storage) = match state.store.backend().health_check().await {
        Ok(health) => (health.healthy, health.message),
        Err(e) => {
            warn!("storage health check failed: {}", e);
            (false, e.to_string())
        }
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        storage_healthy,
        storage,
    })
}
