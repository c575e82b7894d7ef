use axum::extract::ws::{Message, WebSocket};
use futures::stream::StreamExt;
use futures::SinkExt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::frame::{classify, IngressFrame};
use crate::session::SessionOrchestrator;
use crate::sink::TranscriptEnvelope;

/// Outbound queue depth for one connection.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Serve one ingress connection until it closes or the session drains.
///
/// Binary and text frames are classified identically; a connection only
/// receives outbound transcript envelopes after it registers as a bot
/// subscriber. The session's cancellation signal is observed alongside
/// the socket: when teardown begins, a close frame is sent and the
/// connection is shut down from our side. Closing the last connection
/// drains the session.
pub async fn handle_socket(session: Arc<SessionOrchestrator>, socket: WebSocket) {
    session.ingress_opened();
    info!("Ingress connection accepted");

    let mut shutdown = session.shutdown_signal();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Single writer for the socket: the transcript forwarder and the
    // teardown path both queue through it.
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_DEPTH);
    let send_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let is_close = matches!(message, Message::Close(_));
            if ws_tx.send(message).await.is_err() || is_close {
                break;
            }
        }
    });

    let mut forward_task: Option<JoinHandle<()>> = None;
    let mut registered = false;

    loop {
        tokio::select! {
            // wait_for observes a signal raised before this connection
            // subscribed; a dropped sender also means the session is gone.
            result = async { shutdown.wait_for(|draining| *draining).await.map(|r| *r) } => {
                let _ = result;
                debug!("Session draining, closing ingress connection");
                let _ = out_tx.send(Message::Close(None)).await;
                break;
            }
            maybe_message = ws_rx.next() => {
                let Some(Ok(message)) = maybe_message else { break };
                let payload = match message {
                    Message::Binary(data) => data,
                    Message::Text(text) => text.into_bytes(),
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                match classify(&payload) {
                    IngressFrame::Pcm => session.ingest_pcm(payload),
                    IngressFrame::Speaker(info) => session.observe_speaker(info),
                    IngressFrame::Register(registration) => {
                        if !registration.is_bot() {
                            debug!(
                                "Ignoring registration for client kind: {}",
                                registration.client
                            );
                        } else if registered {
                            debug!("Duplicate bot registration, ignoring");
                        } else {
                            info!("Bot subscriber registered");
                            registered = true;
                            let rx = session.sink().subscribe_bots();
                            forward_task =
                                Some(tokio::spawn(forward_transcripts(rx, out_tx.clone())));
                        }
                    }
                }
            }
        }
    }

    if let Some(task) = forward_task {
        task.abort();
    }
    drop(out_tx);
    // Let a queued close frame flush before the write half drops.
    let _ = send_task.await;

    info!("Ingress connection closed");
    session.ingress_closed();
}

/// Push transcript envelopes to one registered bot connection.
///
/// A lagging connection skips the oldest envelopes rather than stalling
/// the sink; a failed send ends the forwarder but never the session.
async fn forward_transcripts(
    mut rx: broadcast::Receiver<TranscriptEnvelope>,
    out_tx: mpsc::Sender<Message>,
) {
    loop {
        let envelope = match rx.recv().await {
            Ok(envelope) => envelope,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Bot subscriber lagging, skipped {} envelopes", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize transcript envelope: {}", e);
                continue;
            }
        };

        if out_tx.send(Message::Text(json)).await.is_err() {
            break;
        }
    }
}
