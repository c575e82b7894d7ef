//! Streaming STT provider adapters.
//!
//! Providers differ in wire details but present identical semantics to
//! the core: open a session, push PCM audio, receive an ordered stream of
//! transcript events, half-close. New providers are added by implementing
//! [`ProviderAdapter`], not by editing the bridge.

pub mod wire;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::ProviderConfig;

/// Session options asserted to the provider at open.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderOptions {
    /// Wire encoding; the only supported input format
    pub encoding: AudioEncoding,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub language: String,
    pub interim_results: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    PcmS16le,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            encoding: AudioEncoding::PcmS16le,
            sample_rate_hz: 16000,
            channels: 1,
            language: "en".to_string(),
            interim_results: true,
        }
    }
}

/// Failure to establish a provider session. Fatal for the session.
#[derive(Debug, Error)]
pub enum ProviderInitError {
    #[error("failed to connect to provider at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("provider rejected session configuration: {message}")]
    Rejected { message: String },

    #[error("unknown provider id: {id}")]
    UnknownProvider { id: String },
}

/// Mid-stream transport failure. Transient: the affected frame is
/// dropped, the session continues.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("provider socket write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider stream closed")]
    Closed,
}

/// A transcript message as parsed off the provider's wire format.
#[derive(Debug, Clone)]
pub struct ProviderTranscript {
    pub text: String,
    pub is_final: bool,
    pub speaker: Option<String>,
    pub confidence: Option<f32>,
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
}

/// Events surfaced by a live provider stream, in provider emission
/// order. The stream ending (channel close) means the provider closed.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    Transcript(ProviderTranscript),
    Error(String),
}

/// Write half of an open provider session.
#[async_trait]
pub trait ProviderAudioTx: Send {
    /// Forward one PCM frame. Frames may be coalesced internally.
    async fn send(&mut self, pcm: &[u8]) -> Result<(), TransportError>;

    /// Half-close: signal end of audio and let the provider finish.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A live provider session: an audio sink plus the ordered event stream.
pub struct ProviderStream {
    pub audio: Box<dyn ProviderAudioTx>,
    pub events: mpsc::Receiver<ProviderEvent>,
}

/// Capability set every STT provider implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> &str;

    /// Establish the streaming session. Called exactly once per session.
    async fn open(&self, opts: ProviderOptions) -> Result<ProviderStream, ProviderInitError>;
}

/// Instantiate the adapter selected by configuration.
pub fn create_adapter(config: &ProviderConfig) -> Result<Box<dyn ProviderAdapter>, ProviderInitError> {
    match config.id.as_str() {
        "wire" => Ok(Box::new(wire::WireAdapter::new(config.endpoint.clone()))),
        other => Err(ProviderInitError::UnknownProvider {
            id: other.to_string(),
        }),
    }
}

/// Used by config validation to fail fast on a bad provider id.
pub fn is_known_provider(id: &str) -> bool {
    matches!(id, "wire")
}
