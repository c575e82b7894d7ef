use axum::{
    body::Bytes,
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{error, info};

use super::state::AppState;
use crate::control;
use crate::ingress;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub status: &'static str,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// GET /session
/// Point-in-time session statistics
pub async fn session_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.stats())
}

/// GET /ws
/// Upgrade an ingress connection
pub async fn ws_upgrade(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| ingress::handle_socket(state.session, socket))
}

/// POST /webhooks/:platform
/// Control events from the conferencing platform
pub async fn webhook(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    // Parsed by hand so malformed input gets the structured 400 body.
    let envelope: control::WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Malformed webhook body".to_string(),
                    details: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    let event = match control::decode(envelope) {
        Ok(event) => event,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Unrecognized webhook event".to_string(),
                    details: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    info!("Webhook received: {} ({})", event.kind.as_str(), platform);

    // Response is held until dispatch completes; this back-pressures
    // the platform and keeps events applied in arrival order.
    match state.dispatcher.dispatch(event).await {
        Ok(()) => (StatusCode::OK, Json(AckResponse { status: "ok" })).into_response(),
        Err(e) => {
            error!("Webhook handler failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Webhook handler failed".to_string(),
                    details: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}
