//! API error types and conversions

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::query::{FilterParseError, QueryError};

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// No snapshot has been committed yet
    NotYetAvailable,

    /// Invalid request parameters
    InvalidRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::NotYetAvailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                QueryError::NotYetAvailable.to_string(),
            ),
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::NotYetAvailable => ApiError::NotYetAvailable,
        }
    }
}

impl From<FilterParseError> for ApiError {
    fn from(err: FilterParseError) -> Self {
        ApiError::InvalidRequest(format!("invalid filter: {err}"))
    }
}
