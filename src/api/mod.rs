//! Read-only HTTP query API
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **QueryEngine** for every read; handlers never touch the scanner
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Liveness plus storage health
//! - `GET /api/v1/status` - Counts over the committed snapshot
//! - `GET /api/v1/eligible?min_idle=10d&filter=size>=20` - Eligible entities, most idle first
//! - `GET /api/v1/top?n=3&filter=...` - The n most idle entities
//!
//! Before the first scan has been committed, data endpoints answer
//! `503 Service Unavailable`.

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod middleware;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;
#[cfg(feature = "api")]
pub use types::{EntitiesResponse, HealthResponse, StatusResponse};

#[cfg(feature = "api")]
use axum::{Router, routing::get};
#[cfg(feature = "api")]
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tracing::info;

#[cfg(feature = "api")]
use crate::config::ApiSettings;

/// Build the router with all routes and configured middleware
#[cfg(feature = "api")]
pub fn router(settings: &ApiSettings, state: ApiState) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/status", get(routes::status::get_status))
        .route("/api/v1/eligible", get(routes::entities::list_eligible))
        .route("/api/v1/top", get(routes::entities::top_n))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if settings.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    if let Some(token) = settings.token.clone() {
        app = app.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::require_bearer_token,
        ));
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(settings: &ApiSettings, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", settings.bind);

    let app = router(settings, state);

    let listener = tokio::net::TcpListener::bind(settings.bind).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
