//! Snapshot status endpoint

use axum::{Json, extract::State};

use crate::api::{error::ApiResult, state::ApiState, types::StatusResponse};

/// GET /api/v1/status
pub async fn get_status(State(state): State<ApiState>) -> ApiResult<Json<StatusResponse>> {
    let status = state.query.status()?;

    Ok(Json(StatusResponse {
        status,
        scanning: state.is_scanning(),
    }))
}
