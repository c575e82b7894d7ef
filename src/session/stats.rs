use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::state::SessionState;

/// Speaker metadata derived from an ingress frame.
///
/// `current_speaker` on the session changes only on a rising speaking
/// edge: `is_speaking` true and a name different from the previous one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpeakerInfo {
    pub name: String,

    /// Numeric participant id assigned by the conferencing platform
    pub id: i64,

    /// Platform timestamp in milliseconds
    pub timestamp: f64,

    #[serde(rename = "isSpeaking")]
    pub is_speaking: bool,
}

/// A single transcript event produced by the provider bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEvent {
    /// Transcribed text
    pub text: String,

    /// Whether this is a final result (interims are superseded later)
    pub is_final: bool,

    /// When the event was received from the provider
    pub timestamp: DateTime<Utc>,

    /// Snapshot of the session's current speaker at arrival
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,

    /// Confidence score (0.0 to 1.0), if the provider reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    /// Start offset in milliseconds relative to audio start
    pub start_ms: u64,

    /// End offset in milliseconds relative to audio start
    pub end_ms: u64,
}

/// Per-session frame counters.
///
/// Single-writer/multi-reader atomics shared between the ingress hot
/// path, the provider bridge, and the stats endpoint.
#[derive(Debug, Default)]
pub struct SessionCounters {
    /// Frames received on the ingress socket
    pub frames_in: AtomicU64,

    /// Frames handed to the provider bridge
    pub frames_forwarded: AtomicU64,

    /// Frames dropped because the startup gate was closed
    pub dropped_gated: AtomicU64,

    /// Frames dropped because the provider handle was not yet open
    pub dropped_unready: AtomicU64,

    /// Frames dropped on a transport error or full send queue
    pub send_failures: AtomicU64,
}

impl SessionCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            dropped_gated: self.dropped_gated.load(Ordering::Relaxed),
            dropped_unready: self.dropped_unready.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub frames_in: u64,
    pub frames_forwarded: u64,
    pub dropped_gated: u64,
    pub dropped_unready: u64,
    pub send_failures: u64,
}

/// Point-in-time view of a session, served by `GET /session`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: uuid::Uuid,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub uptime_secs: f64,
    pub gate_open: bool,
    pub bridge_open: bool,
    pub provider_id: String,
    pub current_speaker: Option<String>,
    pub ingress_connections: usize,
    pub transcripts_final: u64,
    pub transcripts_interim: u64,
    pub counters: CounterSnapshot,
}
