use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Create the combined WS + HTTP router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Ingress audio socket
        .route("/ws", get(handlers::ws_upgrade))
        // Control plane
        .route("/webhooks/:platform", post(handlers::webhook))
        // Observability
        .route("/health", get(handlers::health_check))
        .route("/session", get(handlers::session_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
