//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let service_routes = Router::new()
        .route("/spec", put(handlers::put_spec))
        .route("/status", get(handlers::service_status))
        .route("/releases", get(handlers::list_releases))
        .route("/releases/:id", get(handlers::get_release))
        .route("/abort", post(handlers::abort_release))
        .route("/rollback", post(handlers::rollback_release))
        .route("/samples", post(handlers::ingest_samples));

    let api_routes = Router::new()
        // Health and status
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::daemon_status))
        // Services
        .route("/services", get(handlers::list_services))
        .nest("/services/:project/:environment/:service", service_routes)
        // Build pipeline
        .route("/artifacts", post(handlers::register_artifact))
        .route("/artifacts/ready", post(handlers::mark_artifact_ready))
        // Events
        .route("/events", get(handlers::get_events))
        .route("/events/stream", get(handlers::stream_events));

    // Build router with middleware
    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
