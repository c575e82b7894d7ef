use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::state::SessionState;
use super::stats::{SessionCounters, SessionStats, SpeakerInfo, TranscriptEvent};
use crate::bridge::{BridgeEvent, ProviderBridge, AUDIO_QUEUE_DEPTH};
use crate::config::{Config, SessionMode};
use crate::control::ControlEvent;
use crate::provider::{self, ProviderAdapter, ProviderOptions, ProviderTranscript};
use crate::recording::WavRecorder;
use crate::sink::{SessionSummary, TranscriptSink};

/// Owns the lifecycle of one meeting session.
///
/// Wires ingress, the provider bridge, and the transcript sink together;
/// gates transcription startup on control events; converges every
/// teardown trigger onto a single drain path.
pub struct SessionOrchestrator {
    /// Back-reference for handing owned clones to spawned tasks
    self_ref: Weak<SessionOrchestrator>,

    config: Config,
    session_id: Uuid,
    created_at: DateTime<Utc>,
    started: Instant,

    state: Mutex<SessionState>,

    /// Read per audio frame by ingress; written only by the orchestrator
    gate: AtomicBool,

    /// Set once the adapter handle reports open
    bridge_open: AtomicBool,
    bridge_started: AtomicBool,
    bridge_closed_tx: watch::Sender<bool>,

    /// Wall-clock and monotonic base for transcript time offsets
    audio_started: Mutex<Option<(DateTime<Utc>, Instant)>>,

    /// Single-writer (orchestrator), multi-reader
    current_speaker: RwLock<Option<SpeakerInfo>>,

    connections: AtomicUsize,
    counters: Arc<SessionCounters>,

    sink: Arc<TranscriptSink>,
    recorder: Option<WavRecorder>,

    audio_tx: OnceLock<mpsc::Sender<Vec<u8>>>,
    adapter_override: Mutex<Option<Box<dyn ProviderAdapter>>>,

    shutdown_tx: watch::Sender<bool>,
    teardown_started: AtomicBool,
    /// A fatal provider error forces a non-zero exit no matter which
    /// trigger completes teardown
    fatal: AtomicBool,
    exit_tx: watch::Sender<Option<i32>>,
}

impl SessionOrchestrator {
    pub fn new(config: Config) -> Arc<Self> {
        Self::build(config, None)
    }

    /// Use a caller-supplied adapter instead of the configured registry
    /// entry. The seam the end-to-end tests drive.
    pub fn new_with_adapter(config: Config, adapter: Box<dyn ProviderAdapter>) -> Arc<Self> {
        Self::build(config, Some(adapter))
    }

    fn build(config: Config, adapter: Option<Box<dyn ProviderAdapter>>) -> Arc<Self> {
        let session_id = Uuid::new_v4();
        let journal_root = config
            .transcripts
            .enabled
            .then(|| config.transcripts.dir.clone());
        let sink = Arc::new(TranscriptSink::new(journal_root, session_id));

        let recorder = config.recording.enabled.then(|| {
            WavRecorder::new(
                config.recording.dir.clone(),
                config.audio.sample_rate,
                config.audio.channels,
            )
        });

        // Local mode: the caller is the audio source, the gate is open
        // from the start.
        let gate_open = config.session.mode == SessionMode::Local;

        let (shutdown_tx, _) = watch::channel(false);
        let (bridge_closed_tx, _) = watch::channel(false);
        let (exit_tx, _) = watch::channel(None);

        info!(
            "Session created: {} (mode={:?}, provider={})",
            session_id, config.session.mode, config.provider.id
        );

        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            config,
            session_id,
            created_at: Utc::now(),
            started: Instant::now(),
            state: Mutex::new(SessionState::Idle),
            gate: AtomicBool::new(gate_open),
            bridge_open: AtomicBool::new(false),
            bridge_started: AtomicBool::new(false),
            bridge_closed_tx,
            audio_started: Mutex::new(None),
            current_speaker: RwLock::new(None),
            connections: AtomicUsize::new(0),
            counters: Arc::new(SessionCounters::default()),
            sink,
            recorder,
            audio_tx: OnceLock::new(),
            adapter_override: Mutex::new(adapter),
            shutdown_tx,
            teardown_started: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            exit_tx,
        })
    }

    fn handle(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("session still referenced")
    }

    pub fn id(&self) -> Uuid {
        self.session_id
    }

    pub fn sink(&self) -> &Arc<TranscriptSink> {
        &self.sink
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("state lock")
    }

    pub fn gate_open(&self) -> bool {
        self.gate.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// Cancellation signal observed by per-session tasks. Flips to
    /// `true` when teardown begins; tasks unwind at their next
    /// suspension point.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Move from `Idle` once the server is listening.
    pub fn server_started(&self) {
        self.transition(SessionState::AwaitingIngress);
    }

    /// An ingress connection was accepted. The first connection starts
    /// the session; later ones only add subscribers.
    pub fn ingress_opened(&self) {
        let previous = self.connections.fetch_add(1, Ordering::SeqCst);
        if previous > 0 {
            debug!("Additional ingress connection (now {})", previous + 1);
            return;
        }

        match self.config.session.mode {
            SessionMode::Local => {
                if self.transition(SessionState::Streaming) {
                    self.mark_audio_started();
                    self.start_bridge();
                }
            }
            SessionMode::Remote => {
                self.transition(SessionState::AwaitingGate);
            }
        }
    }

    /// An ingress connection closed. Closing the last one drains the
    /// session.
    pub fn ingress_closed(&self) {
        let previous = self.connections.fetch_sub(1, Ordering::SeqCst);
        if previous != 1 {
            return;
        }

        let state = self.state();
        if matches!(state, SessionState::AwaitingGate | SessionState::Streaming) {
            info!("Last ingress connection closed, draining session");
            self.begin_teardown("last ingress closed", 0);
        }
    }

    /// One PCM frame off the ingress socket. Zero-length frames are
    /// legal and forwarded as-is.
    pub fn ingest_pcm(&self, payload: Vec<u8>) {
        self.counters.frames_in.fetch_add(1, Ordering::Relaxed);

        if !self.gate.load(Ordering::Acquire) {
            self.counters.dropped_gated.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if let Some(recorder) = &self.recorder {
            recorder.append(&payload);
        }

        if !self.bridge_open.load(Ordering::Acquire) {
            self.counters.dropped_unready.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let Some(audio_tx) = self.audio_tx.get() else {
            self.counters.dropped_unready.fetch_add(1, Ordering::Relaxed);
            return;
        };

        match audio_tx.try_send(payload) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // No retry: re-delivered audio is worse than a gap.
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Audio queue full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped_unready.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Apply a speaker-metadata frame. Only a rising speaking edge with
    /// a new name changes the current speaker.
    pub fn observe_speaker(&self, info: SpeakerInfo) {
        if !info.is_speaking {
            return;
        }

        {
            let current = self.current_speaker.read().expect("speaker lock");
            if current.as_ref().map(|s| s.name.as_str()) == Some(info.name.as_str()) {
                return;
            }
        }

        info!("Speaker changed: {} (id={})", info.name, info.id);
        self.sink.notify_speaker_change(&info);
        *self.current_speaker.write().expect("speaker lock") = Some(info);
    }

    pub fn current_speaker_name(&self) -> Option<String> {
        self.current_speaker
            .read()
            .expect("speaker lock")
            .as_ref()
            .map(|s| s.name.clone())
    }

    /// Apply one control event to the state machine. Only the gate
    /// opener and the session enders mutate state; everything else is
    /// observational.
    pub fn apply_control(&self, event: &ControlEvent) {
        if event.opens_gate() {
            self.open_gate();
            return;
        }

        if event.ends_session() {
            if !self.state().is_terminal() {
                info!("Session ended by control event: {}", event.kind.as_str());
                self.begin_teardown(event.kind.as_str(), 0);
            }
            return;
        }

        info!(
            "Control event observed: {} (status={:?})",
            event.kind.as_str(),
            event.status_code
        );
    }

    fn open_gate(&self) {
        let state = self.state();
        match state {
            SessionState::AwaitingGate => {
                if self.transition(SessionState::Streaming) {
                    info!("Startup gate opened, requesting provider bridge");
                    self.gate.store(true, Ordering::Release);
                    self.mark_audio_started();
                    self.start_bridge();
                }
            }
            SessionState::Streaming => {
                // Duplicate webhook; the gate is already open.
                debug!("Gate-open event while already streaming, ignoring");
            }
            other => {
                debug!("Gate-open event in state {}, ignoring", other);
            }
        }
    }

    fn mark_audio_started(&self) {
        let mut audio_started = self.audio_started.lock().expect("audio start lock");
        if audio_started.is_none() {
            *audio_started = Some((Utc::now(), Instant::now()));
        }
    }

    /// Spawn the provider bridge and its event pump. Runs exactly once
    /// per session.
    fn start_bridge(&self) {
        if self.bridge_started.swap(true, Ordering::SeqCst) {
            warn!("Bridge start requested twice, ignoring");
            return;
        }

        let adapter = {
            let mut slot = self.adapter_override.lock().expect("adapter lock");
            match slot.take() {
                Some(adapter) => Ok(adapter),
                None => provider::create_adapter(&self.config.provider),
            }
        };

        let adapter = match adapter {
            Ok(adapter) => adapter,
            Err(e) => {
                // Validated at startup; reaching this means the registry
                // and the config disagree.
                self.on_bridge_fatal(crate::bridge::truncate_for_display(&e.to_string(), 128));
                return;
            }
        };

        let opts = ProviderOptions {
            encoding: provider::AudioEncoding::PcmS16le,
            sample_rate_hz: self.config.audio.sample_rate,
            channels: self.config.audio.channels,
            language: self.config.provider.language.clone(),
            interim_results: self.config.provider.interim_results,
        };

        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_DEPTH);
        let (event_tx, mut event_rx) = mpsc::channel(64);

        if self.audio_tx.set(audio_tx).is_err() {
            warn!("Audio channel already wired");
        }

        let bridge = ProviderBridge::new(
            adapter,
            opts,
            self.config.timeouts.provider_close(),
            Arc::clone(&self.counters),
        );
        tokio::spawn(bridge.run(audio_rx, event_tx, self.shutdown_tx.subscribe()));

        let session = self.handle();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    BridgeEvent::Opened => {
                        session.bridge_open.store(true, Ordering::Release);
                        info!("Provider bridge open");
                    }
                    BridgeEvent::Transcript(t) => {
                        let event = session.stamp_transcript(t);
                        session.sink.dispatch(event);
                    }
                    BridgeEvent::ProviderError(msg) => {
                        debug!("Provider error event: {}", msg);
                    }
                    BridgeEvent::Fatal(message) => {
                        session.on_bridge_fatal(message);
                    }
                    BridgeEvent::Closed { clean } => {
                        session.bridge_open.store(false, Ordering::Release);
                        let _ = session.bridge_closed_tx.send(true);
                        if !session.teardown_started.load(Ordering::SeqCst) {
                            info!("Provider closed before drain (clean={})", clean);
                            session.begin_teardown("provider closed", 0);
                        }
                    }
                }
            }
        });
    }

    /// Convert a provider transcript into a session transcript event,
    /// stamping arrival time, time offsets, and the speaker snapshot.
    fn stamp_transcript(&self, t: ProviderTranscript) -> TranscriptEvent {
        let elapsed_ms = {
            let audio_started = self.audio_started.lock().expect("audio start lock");
            audio_started
                .map(|(_, instant)| instant.elapsed().as_millis() as u64)
                .unwrap_or_else(|| self.started.elapsed().as_millis() as u64)
        };

        TranscriptEvent {
            speaker: t.speaker.or_else(|| self.current_speaker_name()),
            text: t.text,
            is_final: t.is_final,
            timestamp: Utc::now(),
            confidence: t.confidence,
            start_ms: t.start_ms.unwrap_or(elapsed_ms),
            end_ms: t.end_ms.unwrap_or(elapsed_ms),
        }
    }

    fn on_bridge_fatal(&self, message: String) {
        error!("Provider init failed: {}", message);
        self.fatal.store(true, Ordering::SeqCst);
        let _ = self.bridge_closed_tx.send(true);
        self.transition(SessionState::FatalError);
        self.sink.notify_fatal(message);

        // Grace window so observers can display the error before exit.
        let session = self.handle();
        let grace = self.config.timeouts.fatal_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            session.begin_teardown("fatal provider error", 1);
        });
    }

    /// External interrupt (Ctrl-C or supervisor signal).
    pub fn interrupt(&self) {
        info!("External interrupt received, draining session");
        self.begin_teardown("external interrupt", 0);
    }

    /// Converge every teardown trigger onto one drain path, exactly
    /// once.
    pub fn begin_teardown(&self, reason: &str, exit_code: i32) {
        if self.teardown_started.swap(true, Ordering::SeqCst) {
            debug!("Teardown already in progress ({})", reason);
            return;
        }

        info!("Session teardown: {}", reason);
        let session = self.handle();
        let reason = reason.to_string();
        tokio::spawn(async move {
            session.run_teardown(&reason, exit_code).await;
        });
    }

    async fn run_teardown(&self, reason: &str, exit_code: i32) {
        self.transition(SessionState::Draining);

        // Stop forwarding and tell the bridge to close.
        self.gate.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        let deadline = self.config.timeouts.teardown();

        if self.bridge_started.load(Ordering::SeqCst) {
            let mut closed_rx = self.bridge_closed_tx.subscribe();
            let wait = closed_rx.wait_for(|closed| *closed);
            if timeout(deadline, wait).await.is_err() {
                warn!("Bridge close wait expired after {:?}, abandoning", deadline);
            }
        }

        let ended_at = Utc::now();
        let summary = SessionSummary {
            session_id: self.session_id,
            provider_id: self.config.provider.id.clone(),
            started_at: self.created_at,
            ended_at,
            counters: self.counters.snapshot(),
        };

        match timeout(deadline, self.sink.finalize(summary)).await {
            Ok(Ok(Some(dir))) => info!("Transcripts persisted to {:?}", dir),
            Ok(Ok(None)) => debug!("No transcripts to persist"),
            Ok(Err(e)) => error!("Journal finalize failed: {:#}", e),
            Err(_) => error!("Journal finalize expired after {:?}", deadline),
        }

        if let Some(recorder) = &self.recorder {
            match recorder.finalize(ended_at) {
                Ok(Some(path)) => info!("Recording persisted to {:?}", path),
                Ok(None) => debug!("No audio captured, skipping recording"),
                Err(e) => error!("Recording finalize failed: {:#}", e),
            }
        }

        let exit_code = if self.fatal.load(Ordering::SeqCst) {
            1
        } else {
            exit_code
        };

        self.transition(SessionState::Terminated);
        info!("Session terminated ({}), exit code {}", reason, exit_code);
        let _ = self.exit_tx.send(Some(exit_code));
    }

    /// Resolve once teardown completes, yielding the process exit code.
    pub async fn wait_exit(&self) -> i32 {
        let mut rx = self.exit_tx.subscribe();
        loop {
            if let Some(code) = *rx.borrow() {
                return code;
            }
            if rx.changed().await.is_err() {
                return 0;
            }
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session_id,
            state: self.state(),
            created_at: self.created_at,
            uptime_secs: self.started.elapsed().as_secs_f64(),
            gate_open: self.gate_open(),
            bridge_open: self.bridge_open.load(Ordering::Acquire),
            provider_id: self.config.provider.id.clone(),
            current_speaker: self.current_speaker_name(),
            ingress_connections: self.connections.load(Ordering::SeqCst),
            transcripts_final: self.sink.final_count(),
            transcripts_interim: self.sink.interim_count(),
            counters: self.counters.snapshot(),
        }
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock().expect("state lock");
        if !state.can_transition(next) {
            if *state != next {
                warn!("Illegal state transition {} -> {}, ignoring", state, next);
            }
            return false;
        }
        info!("Session state: {} -> {}", state, next);
        *state = next;
        true
    }
}
