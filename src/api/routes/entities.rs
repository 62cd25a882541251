//! Eligibility listings

use axum::{
    Json,
    extract::{Query, State},
};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{EligibleQuery, EntitiesResponse, TopQuery},
};
use crate::query::FilterExpr;
use crate::util::parse_duration;

const DEFAULT_TOP_N: usize = 10;

fn parse_filter(filter: Option<&str>) -> ApiResult<Option<FilterExpr>> {
    filter
        .map(str::parse::<FilterExpr>)
        .transpose()
        .map_err(ApiError::from)
}

/// GET /api/v1/eligible?min_idle=10d&filter=size>=20
pub async fn list_eligible(
    State(state): State<ApiState>,
    Query(params): Query<EligibleQuery>,
) -> ApiResult<Json<EntitiesResponse>> {
    let min_idle = match params.min_idle.as_deref() {
        Some(text) => parse_duration(text)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid min_idle: {e}")))?,
        None => state.query.cutoff(),
    };
    let filter = parse_filter(params.filter.as_deref())?;

    let entities = state.query.list_eligible(min_idle, filter.as_ref())?;
    Ok(Json(entities.into()))
}

/// GET /api/v1/top?n=3
pub async fn top_n(
    State(state): State<ApiState>,
    Query(params): Query<TopQuery>,
) -> ApiResult<Json<EntitiesResponse>> {
    let filter = parse_filter(params.filter.as_deref())?;

    let entities = state
        .query
        .top_n(params.n.unwrap_or(DEFAULT_TOP_N), filter.as_ref())?;
    Ok(Json(entities.into()))
}
