//! Route definitions

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Tool routes
        .route("/tools", get(handlers::list_tools))
        .route("/tools/call", post(handlers::call_tool))
        .route("/tools/search_enterprises", post(handlers::search_enterprises))
        .route(
            "/tools/get_enterprise_details",
            post(handlers::get_enterprise_details),
        )
        .route(
            "/tools/get_api_status",
            get(handlers::get_api_status).post(handlers::get_api_status),
        )
        // Service routes
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Add state
        .with_state(state)
}
