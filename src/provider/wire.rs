//! TCP wire adapter.
//!
//! Speaks the plain socket profile: one JSON configuration line at open,
//! raw little-endian PCM bytes thereafter, newline-delimited JSON
//! transcript messages back.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    ProviderAdapter, ProviderAudioTx, ProviderEvent, ProviderInitError, ProviderOptions,
    ProviderStream, ProviderTranscript, TransportError,
};

const EVENT_CHANNEL_CAPACITY: usize = 128;

pub struct WireAdapter {
    endpoint: String,
}

impl WireAdapter {
    pub fn new(endpoint: String) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl ProviderAdapter for WireAdapter {
    fn id(&self) -> &str {
        "wire"
    }

    async fn open(&self, opts: ProviderOptions) -> Result<ProviderStream, ProviderInitError> {
        let stream =
            TcpStream::connect(&self.endpoint)
                .await
                .map_err(|source| ProviderInitError::Connect {
                    endpoint: self.endpoint.clone(),
                    source,
                })?;

        stream
            .set_nodelay(true)
            .map_err(|source| ProviderInitError::Connect {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        let (read_half, mut write_half) = stream.into_split();

        // One configuration message, then the socket carries audio only.
        let mut config_line =
            serde_json::to_vec(&opts).map_err(|e| ProviderInitError::Rejected {
                message: format!("configuration encode failed: {}", e),
            })?;
        config_line.push(b'\n');
        write_half
            .write_all(&config_line)
            .await
            .map_err(|e| ProviderInitError::Rejected {
                message: format!("configuration write failed: {}", e),
            })?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(read_events(read_half, event_tx));

        Ok(ProviderStream {
            audio: Box::new(WireAudioTx { write_half }),
            events: event_rx,
        })
    }
}

struct WireAudioTx {
    write_half: OwnedWriteHalf,
}

#[async_trait]
impl ProviderAudioTx for WireAudioTx {
    async fn send(&mut self, pcm: &[u8]) -> Result<(), TransportError> {
        self.write_half.write_all(pcm).await?;
        self.write_half.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Half-close signals end of audio; the reader keeps draining
        // transcript events until the provider closes its side.
        self.write_half.shutdown().await?;
        Ok(())
    }
}

/// Wire shape of one transcript message.
#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "final", default)]
    is_final: bool,
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    start_ms: Option<u64>,
    #[serde(default)]
    end_ms: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

async fn read_events(read_half: OwnedReadHalf, tx: mpsc::Sender<ProviderEvent>) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Provider connection closed (EOF)");
                break;
            }
            Ok(_) => {
                let Some(event) = parse_line(&line) else {
                    warn!("Unparseable provider message: {}", line.trim());
                    continue;
                };
                if tx.send(event).await.is_err() {
                    debug!("Provider event receiver dropped, stopping reader");
                    break;
                }
            }
            Err(e) => {
                warn!("Error reading from provider: {}", e);
                break;
            }
        }
    }
}

fn parse_line(line: &str) -> Option<ProviderEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let msg: WireMessage = serde_json::from_str(trimmed).ok()?;

    if let Some(error) = msg.error {
        return Some(ProviderEvent::Error(error));
    }

    let text = msg.text?;
    Some(ProviderEvent::Transcript(ProviderTranscript {
        text,
        is_final: msg.is_final,
        speaker: msg.speaker,
        confidence: msg.confidence,
        start_ms: msg.start_ms,
        end_ms: msg.end_ms,
    }))
}
