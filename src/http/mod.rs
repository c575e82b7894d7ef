//! Combined WS + HTTP server surface
//!
//! One listener serves four routes:
//! - GET  /ws                 - ingress audio socket (WebSocket upgrade)
//! - POST /webhooks/:platform - control events from the platform
//! - GET  /health             - health check
//! - GET  /session            - session statistics

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
