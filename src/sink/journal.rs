//! Per-session transcript journal.
//!
//! The journal directory is created on the first transcript event and
//! finalized on session close. Four artifacts are kept: a structured
//! record (`transcript.json`), a plain-text render of final entries only
//! (`transcript.txt`), a raw stream log of everything observed in real
//! time (`raw_logs.txt`), and a close-time summary (`session_info.txt`).
//! Partial files indicate an unclean exit.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::session::{CounterSnapshot, TranscriptEvent};

/// Close-time facts recorded in `session_info.txt` and the structured
/// record's header.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub provider_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub counters: CounterSnapshot,
}

enum JournalCmd {
    Append(TranscriptEvent),
    Finalize {
        summary: SessionSummary,
        ack: oneshot::Sender<Result<Option<PathBuf>>>,
    },
}

/// Handle to the journal writer task. Appends are ordered; `finalize`
/// resolves only after all pending appends are durable.
pub struct JournalHandle {
    tx: mpsc::UnboundedSender<JournalCmd>,
    _task: JoinHandle<()>,
}

impl JournalHandle {
    /// Enqueue one event. Never blocks the caller.
    pub fn append(&self, event: TranscriptEvent) {
        if self.tx.send(JournalCmd::Append(event)).is_err() {
            warn!("Journal writer gone, dropping transcript append");
        }
    }

    /// Flush and write the close-time artifacts. Returns the session
    /// directory, or `None` when no event ever arrived.
    pub async fn finalize(&self, summary: SessionSummary) -> Result<Option<PathBuf>> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(JournalCmd::Finalize { summary, ack })
            .map_err(|_| anyhow::anyhow!("Journal writer gone"))?;
        done.await.context("Journal writer dropped finalize ack")?
    }
}

/// Spawn the journal writer task for one session.
pub fn spawn(root: PathBuf, session_id: Uuid) -> JournalHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_writer(root, session_id, rx));
    JournalHandle { tx, _task: task }
}

struct WriterState {
    root: PathBuf,
    session_id: Uuid,
    dir: Option<PathBuf>,
    raw_log: Option<File>,
    entries: Vec<TranscriptEvent>,
}

async fn run_writer(root: PathBuf, session_id: Uuid, mut rx: mpsc::UnboundedReceiver<JournalCmd>) {
    let mut state = WriterState {
        root,
        session_id,
        dir: None,
        raw_log: None,
        entries: Vec::new(),
    };

    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCmd::Append(event) => {
                if let Err(e) = state.append(event) {
                    error!("Journal append failed: {:#}", e);
                }
            }
            JournalCmd::Finalize { summary, ack } => {
                let result = state.finalize(&summary);
                let _ = ack.send(result);
                break;
            }
        }
    }
}

impl WriterState {
    fn append(&mut self, event: TranscriptEvent) -> Result<()> {
        if self.dir.is_none() {
            let dir = self.root.join(format!(
                "{}_{}",
                event.timestamp.format("%Y%m%d_%H%M%S"),
                self.session_id
            ));
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create session directory {:?}", dir))?;
            info!("Session journal directory created: {:?}", dir);

            let raw_path = dir.join("raw_logs.txt");
            let raw_log = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&raw_path)
                .with_context(|| format!("Failed to open {:?}", raw_path))?;

            self.dir = Some(dir);
            self.raw_log = Some(raw_log);
        }

        if let Some(raw_log) = &mut self.raw_log {
            let marker = if event.is_final { "final" } else { "interim" };
            let speaker = event
                .speaker
                .as_deref()
                .map(|s| format!(" ({})", s))
                .unwrap_or_default();
            writeln!(
                raw_log,
                "[{}] [{}]{} {}",
                event.timestamp.to_rfc3339(),
                marker,
                speaker,
                event.text
            )
            .context("Failed to append raw log line")?;
        }

        self.entries.push(event);
        Ok(())
    }

    fn finalize(&mut self, summary: &SessionSummary) -> Result<Option<PathBuf>> {
        let Some(dir) = self.dir.clone() else {
            // No transcript ever arrived; nothing was created.
            return Ok(None);
        };

        if let Some(raw_log) = &mut self.raw_log {
            raw_log.flush().context("Failed to flush raw log")?;
        }

        let finals: Vec<&TranscriptEvent> =
            self.entries.iter().filter(|e| e.is_final).collect();
        let interim_count = self.entries.len() - finals.len();

        // Human-readable artifact: final entries only, single-spaced.
        let plain: String = finals
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        fs::write(dir.join("transcript.txt"), &plain)
            .context("Failed to write transcript.txt")?;

        #[derive(Serialize)]
        struct StructuredRecord<'a> {
            session_id: Uuid,
            provider: &'a str,
            started_at: DateTime<Utc>,
            ended_at: DateTime<Utc>,
            duration_secs: f64,
            total_events: usize,
            final_count: usize,
            interim_count: usize,
            total_final_chars: usize,
            entries: &'a [TranscriptEvent],
        }

        let duration = summary.ended_at.signed_duration_since(summary.started_at);
        let record = StructuredRecord {
            session_id: summary.session_id,
            provider: &summary.provider_id,
            started_at: summary.started_at,
            ended_at: summary.ended_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            total_events: self.entries.len(),
            final_count: finals.len(),
            interim_count,
            total_final_chars: plain.chars().count(),
            entries: &self.entries,
        };
        let json =
            serde_json::to_string_pretty(&record).context("Failed to serialize transcript")?;
        fs::write(dir.join("transcript.json"), json)
            .context("Failed to write transcript.json")?;

        let info = format!(
            "Session ID: {}\n\
             Provider: {}\n\
             Started: {}\n\
             Ended: {}\n\
             Duration: {:.1}s\n\
             Transcript events: {} ({} final, {} interim)\n\
             Frames received: {}\n\
             Frames forwarded: {}\n\
             Frames dropped (gate closed): {}\n\
             Frames dropped (provider not ready): {}\n\
             Send failures: {}\n",
            summary.session_id,
            summary.provider_id,
            summary.started_at.to_rfc3339(),
            summary.ended_at.to_rfc3339(),
            duration.num_milliseconds() as f64 / 1000.0,
            self.entries.len(),
            finals.len(),
            interim_count,
            summary.counters.frames_in,
            summary.counters.frames_forwarded,
            summary.counters.dropped_gated,
            summary.counters.dropped_unready,
            summary.counters.send_failures,
        );
        fs::write(dir.join("session_info.txt"), info)
            .context("Failed to write session_info.txt")?;

        info!("Session journal finalized: {:?}", dir);
        Ok(Some(dir))
    }
}
