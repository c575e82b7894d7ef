use std::sync::Arc;

use crate::control::ControlDispatcher;
use crate::session::SessionOrchestrator;

/// Shared application state for HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    /// The one session this process serves
    pub session: Arc<SessionOrchestrator>,

    /// Control-plane handler table
    pub dispatcher: Arc<ControlDispatcher>,

    /// Reported by the health endpoint
    pub service_name: String,
}

impl AppState {
    pub fn new(session: Arc<SessionOrchestrator>, dispatcher: Arc<ControlDispatcher>) -> Self {
        Self {
            session,
            dispatcher,
            service_name: "scribe-relay".to_string(),
        }
    }
}
