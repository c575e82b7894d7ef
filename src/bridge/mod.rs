//! Provider bridge.
//!
//! Owns the live provider stream for one session: opens the adapter
//! exactly once, forwards gated audio frames in arrival order, and
//! relays transcript events upward without reordering.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::provider::{
    ProviderAdapter, ProviderEvent, ProviderOptions, ProviderTranscript,
};
use crate::session::SessionCounters;

/// Queue depth between the ingress hot path and the provider send loop.
/// A full queue behaves like a transport error: the frame is dropped.
pub const AUDIO_QUEUE_DEPTH: usize = 256;

/// Events the bridge reports to the session orchestrator.
#[derive(Debug)]
pub enum BridgeEvent {
    /// Adapter handle is open; audio may now be forwarded
    Opened,
    /// One transcript message, in provider emission order
    Transcript(ProviderTranscript),
    /// Non-fatal provider-side error
    ProviderError(String),
    /// Adapter init failed; message already truncated for display
    Fatal(String),
    /// Provider stream ended. `clean` when we initiated the close and
    /// the provider acknowledged within the deadline.
    Closed { clean: bool },
}

pub struct ProviderBridge {
    adapter: Box<dyn ProviderAdapter>,
    opts: ProviderOptions,
    close_timeout: Duration,
    counters: Arc<SessionCounters>,
}

impl ProviderBridge {
    pub fn new(
        adapter: Box<dyn ProviderAdapter>,
        opts: ProviderOptions,
        close_timeout: Duration,
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            adapter,
            opts,
            close_timeout,
            counters,
        }
    }

    /// Run the bridge until the provider closes or shutdown is signalled.
    ///
    /// Audio frames arriving on `audio_rx` are forwarded in order; a send
    /// failure drops the frame without retry. Events are pushed to
    /// `events` as they occur.
    pub async fn run(
        self,
        mut audio_rx: mpsc::Receiver<Vec<u8>>,
        events: mpsc::Sender<BridgeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let provider_id = self.adapter.id().to_string();
        info!("Opening provider stream: {}", provider_id);

        let stream = match self.adapter.open(self.opts.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                let message = truncate_for_display(&e.to_string(), 128);
                warn!("Provider init failed: {}", message);
                let _ = events.send(BridgeEvent::Fatal(message)).await;
                return;
            }
        };

        info!("Provider stream open: {}", provider_id);
        if events.send(BridgeEvent::Opened).await.is_err() {
            return;
        }

        let mut audio = stream.audio;
        let mut provider_rx = stream.events;

        loop {
            tokio::select! {
                result = async { shutdown.wait_for(|stop| *stop).await.map(|r| *r) } => {
                    let _ = result;
                    debug!("Bridge shutdown requested");
                    break;
                }
                maybe_frame = audio_rx.recv() => {
                    match maybe_frame {
                        Some(frame) => {
                            use std::sync::atomic::Ordering;
                            if let Err(e) = audio.send(&frame).await {
                                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                                warn!("Audio send failed, dropping frame ({} bytes): {}", frame.len(), e);
                            } else {
                                self.counters.frames_forwarded.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        // Audio channel closed by the orchestrator: drain.
                        None => break,
                    }
                }
                maybe_event = provider_rx.recv() => {
                    match maybe_event {
                        Some(ProviderEvent::Transcript(t)) => {
                            if events.send(BridgeEvent::Transcript(t)).await.is_err() {
                                return;
                            }
                        }
                        Some(ProviderEvent::Error(msg)) => {
                            warn!("Provider error: {}", msg);
                            if events.send(BridgeEvent::ProviderError(msg)).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            // Provider closed before we asked it to.
                            let _ = events.send(BridgeEvent::Closed { clean: false }).await;
                            return;
                        }
                    }
                }
            }
        }

        // Graceful close: half-close the audio side, then drain any
        // remaining transcript events until the provider acknowledges by
        // closing its side, bounded by the close timeout.
        let drain = async {
            if let Err(e) = audio.close().await {
                debug!("Provider close: {}", e);
            }
            while let Some(event) = provider_rx.recv().await {
                match event {
                    ProviderEvent::Transcript(t) => {
                        if events.send(BridgeEvent::Transcript(t)).await.is_err() {
                            break;
                        }
                    }
                    ProviderEvent::Error(msg) => {
                        warn!("Provider error during drain: {}", msg);
                    }
                }
            }
        };

        let clean = timeout(self.close_timeout, drain).await.is_ok();
        if !clean {
            warn!(
                "Provider close timed out after {:?}; abandoning handle",
                self.close_timeout
            );
        }
        let _ = events.send(BridgeEvent::Closed { clean }).await;
    }
}

/// Truncate an error message for display, respecting char boundaries.
pub fn truncate_for_display(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    message.chars().take(max_chars).collect()
}
