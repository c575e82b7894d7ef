// Integration tests driving the real ingress WebSocket.
//
// These spin up the actual router on an ephemeral port and connect with
// a WebSocket client, so frames travel through `handle_socket` exactly
// as a meeting bot's would: registration, speaker metadata, PCM, and
// the close handshake in both directions.

use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use scribe_relay::config::{Config, SessionMode};
use scribe_relay::control::{decode, ControlDispatcher, WebhookEnvelope};
use scribe_relay::provider::{
    ProviderAdapter, ProviderAudioTx, ProviderEvent, ProviderInitError, ProviderOptions,
    ProviderStream, ProviderTranscript, TransportError,
};
use scribe_relay::session::{SessionOrchestrator, SessionState};
use scribe_relay::{create_router, AppState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

// ============================================================================
// Fake adapter (test side holds what the provider heard and says back)
// ============================================================================

#[derive(Default)]
struct FakeState {
    opened: AtomicBool,
}

struct FakeAdapter {
    state: Arc<FakeState>,
    audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    events: Mutex<Option<mpsc::Receiver<ProviderEvent>>>,
}

struct FakeHarness {
    state: Arc<FakeState>,
    audio_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    event_tx: mpsc::Sender<ProviderEvent>,
}

impl FakeAdapter {
    fn new() -> (Box<dyn ProviderAdapter>, FakeHarness) {
        let state = Arc::new(FakeState::default());
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);

        let adapter = FakeAdapter {
            state: Arc::clone(&state),
            audio_tx,
            events: Mutex::new(Some(event_rx)),
        };

        let harness = FakeHarness {
            state,
            audio_rx,
            event_tx,
        };

        (Box::new(adapter), harness)
    }
}

#[async_trait]
impl ProviderAdapter for FakeAdapter {
    fn id(&self) -> &str {
        "fake"
    }

    async fn open(&self, _opts: ProviderOptions) -> Result<ProviderStream, ProviderInitError> {
        self.state.opened.store(true, Ordering::SeqCst);
        let events = self
            .events
            .lock()
            .unwrap()
            .take()
            .expect("open called twice");

        Ok(ProviderStream {
            audio: Box::new(FakeAudioTx {
                tx: self.audio_tx.clone(),
            }),
            events,
        })
    }
}

struct FakeAudioTx {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl ProviderAudioTx for FakeAudioTx {
    async fn send(&mut self, pcm: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(pcm.to_vec())
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config(mode: SessionMode, transcript_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.session.mode = mode;
    config.transcripts.dir = transcript_dir.path().to_path_buf();
    config.timeouts.fatal_grace_ms = 50;
    config.timeouts.provider_close_ms = 300;
    config.timeouts.teardown_ms = 1000;
    config
}

/// Serve the real router on an ephemeral port, with the same graceful
/// shutdown wiring as the binary. Returns the ingress URL.
async fn start_server(session: &Arc<SessionOrchestrator>) -> Result<String> {
    let dispatcher = Arc::new(ControlDispatcher::new());
    let app = create_router(AppState::new(Arc::clone(session), dispatcher));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let mut shutdown = session.shutdown_signal();
    tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|draining| *draining).await;
        });
        let _ = serve.await;
    });

    session.server_started();
    Ok(format!("ws://{}/ws", addr))
}

fn gate_webhook() -> scribe_relay::control::ControlEvent {
    decode(WebhookEnvelope {
        event: "bot.status_change".to_string(),
        data: serde_json::json!({"status": "in_call_not_recording"}),
        timestamp: None,
    })
    .unwrap()
}

fn meeting_ended_webhook() -> scribe_relay::control::ControlEvent {
    decode(WebhookEnvelope {
        event: "meeting.ended".to_string(),
        data: serde_json::Value::Null,
        timestamp: None,
    })
    .unwrap()
}

async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for: {}", what);
}

/// Read from the client until a close frame or end of stream, skipping
/// anything else. Panics if the server keeps the socket open.
async fn expect_close<S>(client: &mut S, what: &str)
where
    S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let deadline = Duration::from_secs(2);
    loop {
        match tokio::time::timeout(deadline, client.next()).await {
            Ok(None) => return,
            Ok(Some(Ok(WsMessage::Close(_)))) => return,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) => return,
            Err(_) => panic!("Timed out waiting for server-side close: {}", what),
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn local_session_over_a_real_socket() -> Result<()> {
    let transcript_dir = TempDir::new()?;
    let (adapter, mut harness) = FakeAdapter::new();
    let session = SessionOrchestrator::new_with_adapter(
        test_config(SessionMode::Local, &transcript_dir),
        adapter,
    );

    let url = start_server(&session).await?;
    let (mut client, _) = connect_async(&url).await?;

    wait_until(|| session.stats().bridge_open, "bridge open").await;
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(session.stats().ingress_connections, 1);

    // Register as a bot subscriber, then announce a speaker.
    client
        .send(WsMessage::Text(
            r#"{"type":"register","client":"bot"}"#.to_string(),
        ))
        .await?;
    wait_until(
        || session.sink().bot_subscriber_count() == 1,
        "bot registration",
    )
    .await;

    client
        .send(WsMessage::Text(
            r#"[{"name":"Ada","id":7,"timestamp":1700000000000.0,"isSpeaking":true}]"#.to_string(),
        ))
        .await?;
    wait_until(
        || session.current_speaker_name().as_deref() == Some("Ada"),
        "speaker change",
    )
    .await;

    // Three 20ms frames of 16kHz mono 16-bit audio, distinct leads.
    for lead in [1u8, 2, 3] {
        let mut frame = vec![0u8; 640];
        frame[0] = lead;
        client.send(WsMessage::Binary(frame)).await?;
    }

    for expected_lead in [1u8, 2, 3] {
        let frame = harness.audio_rx.recv().await.expect("provider frame");
        assert_eq!(frame.len(), 640);
        assert_eq!(frame[0], expected_lead, "frames must arrive in order");
    }

    // The provider answers; the registered client gets the envelope.
    harness
        .event_tx
        .send(ProviderEvent::Transcript(ProviderTranscript {
            text: "hello world".to_string(),
            is_final: true,
            speaker: None,
            confidence: Some(0.95),
            start_ms: Some(0),
            end_ms: Some(1200),
        }))
        .await?;

    let received = loop {
        match tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("transcript envelope")
        {
            Some(Ok(WsMessage::Text(text))) => break text,
            Some(Ok(_)) => continue,
            other => panic!("unexpected socket event: {:?}", other),
        }
    };
    let envelope: serde_json::Value = serde_json::from_str(&received)?;
    assert_eq!(envelope["type"], "transcription");
    assert_eq!(envelope["data"]["text"], "hello world");
    assert_eq!(envelope["data"]["isFinal"], true);
    assert_eq!(envelope["data"]["startTime"], 0);
    assert_eq!(envelope["data"]["endTime"], 1200);

    // Transcripts carry the speaker snapshot taken at arrival.
    assert_eq!(session.stats().current_speaker.as_deref(), Some("Ada"));

    // Client hangs up; the last ingress close drains the session.
    client.close(None).await?;

    let exit = session.wait_exit().await;
    assert_eq!(exit, 0);
    assert_eq!(session.state(), SessionState::Terminated);

    let dir: Vec<_> = std::fs::read_dir(transcript_dir.path())?
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(dir.len(), 1);
    assert_eq!(
        std::fs::read_to_string(dir[0].join("transcript.txt"))?,
        "hello world"
    );

    Ok(())
}

#[tokio::test]
async fn teardown_closes_ingress_from_our_side() -> Result<()> {
    let transcript_dir = TempDir::new()?;
    let (adapter, harness) = FakeAdapter::new();
    let session = SessionOrchestrator::new_with_adapter(
        test_config(SessionMode::Local, &transcript_dir),
        adapter,
    );

    let url = start_server(&session).await?;
    let (mut client, _) = connect_async(&url).await?;

    wait_until(|| session.stats().ingress_connections == 1, "connection").await;
    wait_until(|| session.stats().bridge_open, "bridge open").await;

    // The client never closes; shutdown must come from the session.
    session.interrupt();

    expect_close(&mut client, "interrupt").await;

    let exit = session.wait_exit().await;
    assert_eq!(exit, 0);
    assert_eq!(session.state(), SessionState::Terminated);
    drop(harness);

    Ok(())
}

#[tokio::test]
async fn meeting_ended_closes_registered_clients() -> Result<()> {
    let transcript_dir = TempDir::new()?;
    let (adapter, harness) = FakeAdapter::new();
    let session = SessionOrchestrator::new_with_adapter(
        test_config(SessionMode::Remote, &transcript_dir),
        adapter,
    );

    let url = start_server(&session).await?;
    let (mut client, _) = connect_async(&url).await?;

    wait_until(
        || session.state() == SessionState::AwaitingGate,
        "awaiting gate",
    )
    .await;

    client
        .send(WsMessage::Text(
            r#"{"type":"register","client":"bot"}"#.to_string(),
        ))
        .await?;
    wait_until(
        || session.sink().bot_subscriber_count() == 1,
        "bot registration",
    )
    .await;

    session.apply_control(&gate_webhook());
    wait_until(|| session.stats().bridge_open, "bridge open").await;

    session.apply_control(&meeting_ended_webhook());

    // Registered or not, the connection is closed from our side.
    expect_close(&mut client, "meeting.ended").await;

    let exit = session.wait_exit().await;
    assert_eq!(exit, 0);
    assert_eq!(session.state(), SessionState::Terminated);
    drop(harness);

    Ok(())
}

#[tokio::test]
async fn gated_frames_over_the_socket_are_dropped_with_counter() -> Result<()> {
    let transcript_dir = TempDir::new()?;
    let (adapter, harness) = FakeAdapter::new();
    let session = SessionOrchestrator::new_with_adapter(
        test_config(SessionMode::Remote, &transcript_dir),
        adapter,
    );

    let url = start_server(&session).await?;
    let (mut client, _) = connect_async(&url).await?;

    wait_until(|| session.stats().ingress_connections == 1, "connection").await;

    for _ in 0..5 {
        client.send(WsMessage::Binary(vec![0u8; 640])).await?;
    }

    wait_until(|| session.stats().counters.dropped_gated == 5, "gated drops").await;
    assert!(
        !harness.state.opened.load(Ordering::SeqCst),
        "provider must not be opened before the gate"
    );

    client.close(None).await?;
    let exit = session.wait_exit().await;
    assert_eq!(exit, 0);

    Ok(())
}
