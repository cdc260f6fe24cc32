//! Router configuration for the trigger server.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Run triggers (bearer-token gated)
        .route("/api/runs/:source", post(handlers::trigger_manual))
        .route(
            "/api/runs/:source/trigger",
            get(handlers::trigger_scheduled),
        )
        // Read-only status
        .route("/api/runs/:source/latest", get(handlers::latest_run))
        .route("/api/status", get(handlers::api_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
