//! Transcript sink and router.
//!
//! Receives transcript events from the provider bridge, persists them to
//! the session journal, and fans them out to subscribers: bot-registered
//! ingress connections and the local observer. Subscribers are
//! independent; network subscribers that lag lose the oldest events
//! rather than stalling the journal or each other.

pub mod journal;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use crate::session::{SpeakerInfo, TranscriptEvent};
pub use journal::{JournalHandle, SessionSummary};

/// Mailbox depth for network subscribers. Lagging receivers skip the
/// oldest events (real-time: lateness is worse than loss).
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// JSON envelope delivered to bot-registered connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: TranscriptPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptPayload {
    pub text: String,
    pub is_final: bool,
    /// Milliseconds relative to audio start
    pub start_time: u64,
    pub end_time: u64,
}

impl TranscriptEnvelope {
    pub fn from_event(event: &TranscriptEvent) -> Self {
        Self {
            kind: "transcription".to_string(),
            data: TranscriptPayload {
                text: event.text.clone(),
                is_final: event.is_final,
                start_time: event.start_ms,
                end_time: event.end_ms,
            },
        }
    }
}

/// Events delivered to the local observer (the UI/log pipeline).
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    Transcript(TranscriptEvent),
    SpeakerChange { name: String, id: i64 },
    FatalError(String),
}

pub struct TranscriptSink {
    bot_tx: broadcast::Sender<TranscriptEnvelope>,
    observer_tx: broadcast::Sender<ObserverEvent>,
    journal: Option<JournalHandle>,
    finals: AtomicU64,
    interims: AtomicU64,
}

impl TranscriptSink {
    /// `journal_root` of `None` disables transcript persistence.
    pub fn new(journal_root: Option<PathBuf>, session_id: uuid::Uuid) -> Self {
        let (bot_tx, _) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let (observer_tx, _) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let journal = journal_root.map(|root| journal::spawn(root, session_id));

        Self {
            bot_tx,
            observer_tx,
            journal,
            finals: AtomicU64::new(0),
            interims: AtomicU64::new(0),
        }
    }

    /// Subscribe a bot-registered connection to transcript envelopes.
    pub fn subscribe_bots(&self) -> broadcast::Receiver<TranscriptEnvelope> {
        self.bot_tx.subscribe()
    }

    /// Number of live bot subscribers.
    pub fn bot_subscriber_count(&self) -> usize {
        self.bot_tx.receiver_count()
    }

    /// Subscribe the local observer.
    pub fn subscribe_observer(&self) -> broadcast::Receiver<ObserverEvent> {
        self.observer_tx.subscribe()
    }

    /// Route one transcript event.
    ///
    /// The journal append is enqueued before any subscriber delivery; a
    /// subscriber with no live receivers is simply skipped.
    pub fn dispatch(&self, event: TranscriptEvent) {
        if event.is_final {
            self.finals.fetch_add(1, Ordering::Relaxed);
        } else {
            self.interims.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(journal) = &self.journal {
            journal.append(event.clone());
        }

        if self.bot_tx.send(TranscriptEnvelope::from_event(&event)).is_err() {
            debug!("No bot subscribers for transcript event");
        }
        let _ = self.observer_tx.send(ObserverEvent::Transcript(event));
    }

    /// Surface a rising speaker edge to the observer.
    pub fn notify_speaker_change(&self, info: &SpeakerInfo) {
        let _ = self.observer_tx.send(ObserverEvent::SpeakerChange {
            name: info.name.clone(),
            id: info.id,
        });
    }

    /// Surface a fatal provider error to the observer.
    pub fn notify_fatal(&self, message: String) {
        let _ = self.observer_tx.send(ObserverEvent::FatalError(message));
    }

    pub fn final_count(&self) -> u64 {
        self.finals.load(Ordering::Relaxed)
    }

    pub fn interim_count(&self) -> u64 {
        self.interims.load(Ordering::Relaxed)
    }

    /// Flush the journal and write close-time artifacts. Safe to call
    /// when persistence is disabled.
    pub async fn finalize(&self, summary: SessionSummary) -> anyhow::Result<Option<PathBuf>> {
        match &self.journal {
            Some(journal) => journal.finalize(summary).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(text: &str, is_final: bool) -> TranscriptEvent {
        TranscriptEvent {
            text: text.to_string(),
            is_final,
            timestamp: Utc::now(),
            speaker: None,
            confidence: None,
            start_ms: 0,
            end_ms: 100,
        }
    }

    #[tokio::test]
    async fn dispatch_reaches_bot_and_observer() {
        let sink = TranscriptSink::new(None, uuid::Uuid::new_v4());
        let mut bots = sink.subscribe_bots();
        let mut observer = sink.subscribe_observer();

        sink.dispatch(event("hello", true));

        let envelope = bots.recv().await.unwrap();
        assert_eq!(envelope.kind, "transcription");
        assert_eq!(envelope.data.text, "hello");
        assert!(envelope.data.is_final);

        assert!(matches!(
            observer.recv().await.unwrap(),
            ObserverEvent::Transcript(e) if e.text == "hello"
        ));
    }

    #[tokio::test]
    async fn dispatch_without_subscribers_does_not_fail() {
        let sink = TranscriptSink::new(None, uuid::Uuid::new_v4());
        sink.dispatch(event("nobody listening", false));
        assert_eq!(sink.interim_count(), 1);
        assert_eq!(sink.final_count(), 0);
    }

    #[test]
    fn envelope_wire_shape() {
        let envelope = TranscriptEnvelope::from_event(&TranscriptEvent {
            text: "hi".to_string(),
            is_final: true,
            timestamp: Utc::now(),
            speaker: Some("A".to_string()),
            confidence: Some(0.9),
            start_ms: 120,
            end_ms: 450,
        });
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "transcription");
        assert_eq!(json["data"]["text"], "hi");
        assert_eq!(json["data"]["isFinal"], true);
        assert_eq!(json["data"]["startTime"], 120);
        assert_eq!(json["data"]["endTime"], 450);
    }
}
