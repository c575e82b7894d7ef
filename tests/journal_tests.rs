// Integration tests for the session journal
//
// These tests verify the on-disk artifacts: the final-only plain text,
// the structured record, the raw stream log, and the close summary.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use scribe_relay::session::{CounterSnapshot, TranscriptEvent};
use scribe_relay::sink::{journal, SessionSummary, TranscriptSink};
use std::fs;
use tempfile::TempDir;
use uuid::Uuid;

fn event(text: &str, is_final: bool, speaker: Option<&str>) -> TranscriptEvent {
    TranscriptEvent {
        text: text.to_string(),
        is_final,
        timestamp: Utc::now(),
        speaker: speaker.map(str::to_string),
        confidence: Some(0.9),
        start_ms: 0,
        end_ms: 500,
    }
}

fn summary(session_id: Uuid) -> SessionSummary {
    SessionSummary {
        session_id,
        provider_id: "wire".to_string(),
        started_at: Utc.with_ymd_and_hms(2026, 8, 2, 10, 0, 0).unwrap(),
        ended_at: Utc.with_ymd_and_hms(2026, 8, 2, 10, 5, 30).unwrap(),
        counters: CounterSnapshot {
            frames_in: 100,
            frames_forwarded: 95,
            dropped_gated: 5,
            dropped_unready: 0,
            send_failures: 0,
        },
    }
}

#[tokio::test]
async fn plain_text_is_finals_joined_by_single_spaces() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let session_id = Uuid::new_v4();
    let handle = journal::spawn(temp_dir.path().to_path_buf(), session_id);

    handle.append(event("hel", false, None));
    handle.append(event("hello", true, None));
    handle.append(event("wor", false, None));
    handle.append(event("world", true, None));

    let dir = handle
        .finalize(summary(session_id))
        .await?
        .expect("directory should exist");

    let plain = fs::read_to_string(dir.join("transcript.txt"))?;
    assert_eq!(plain, "hello world");

    Ok(())
}

#[tokio::test]
async fn raw_log_interleaves_interim_and_final() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let session_id = Uuid::new_v4();
    let handle = journal::spawn(temp_dir.path().to_path_buf(), session_id);

    handle.append(event("partial", false, Some("Ada")));
    handle.append(event("full sentence", true, Some("Ada")));

    let dir = handle
        .finalize(summary(session_id))
        .await?
        .expect("directory should exist");

    let raw = fs::read_to_string(dir.join("raw_logs.txt"))?;
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("[interim]"));
    assert!(lines[0].contains("(Ada)"));
    assert!(lines[0].ends_with("partial"));
    assert!(lines[1].contains("[final]"));
    assert!(lines[1].ends_with("full sentence"));

    Ok(())
}

#[tokio::test]
async fn structured_record_carries_stats_and_entries() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let session_id = Uuid::new_v4();
    let handle = journal::spawn(temp_dir.path().to_path_buf(), session_id);

    handle.append(event("one", false, None));
    handle.append(event("two", true, Some("Bo")));

    let dir = handle
        .finalize(summary(session_id))
        .await?
        .expect("directory should exist");

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.join("transcript.json"))?)?;

    assert_eq!(json["session_id"], session_id.to_string());
    assert_eq!(json["provider"], "wire");
    assert_eq!(json["total_events"], 2);
    assert_eq!(json["final_count"], 1);
    assert_eq!(json["interim_count"], 1);
    assert_eq!(json["duration_secs"], 330.0);

    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["text"], "one");
    assert_eq!(entries[0]["is_final"], false);
    assert_eq!(entries[1]["speaker"], "Bo");

    Ok(())
}

#[tokio::test]
async fn session_info_written_on_close() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let session_id = Uuid::new_v4();
    let handle = journal::spawn(temp_dir.path().to_path_buf(), session_id);

    handle.append(event("text", true, None));

    let dir = handle
        .finalize(summary(session_id))
        .await?
        .expect("directory should exist");

    let info = fs::read_to_string(dir.join("session_info.txt"))?;
    assert!(info.contains(&format!("Session ID: {}", session_id)));
    assert!(info.contains("Provider: wire"));
    assert!(info.contains("Duration: 330.0s"));
    assert!(info.contains("Transcript events: 1 (1 final, 0 interim)"));
    assert!(info.contains("Frames dropped (gate closed): 5"));

    Ok(())
}

#[tokio::test]
async fn no_events_means_no_directory() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let session_id = Uuid::new_v4();
    let handle = journal::spawn(temp_dir.path().to_path_buf(), session_id);

    let dir = handle.finalize(summary(session_id)).await?;
    assert!(dir.is_none(), "No events should create no directory");
    assert_eq!(fs::read_dir(temp_dir.path())?.count(), 0);

    Ok(())
}

#[tokio::test]
async fn directory_name_carries_timestamp_and_session_id() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let session_id = Uuid::new_v4();
    let handle = journal::spawn(temp_dir.path().to_path_buf(), session_id);

    handle.append(event("x", true, None));

    let dir = handle
        .finalize(summary(session_id))
        .await?
        .expect("directory should exist");

    let name = dir.file_name().unwrap().to_string_lossy().to_string();
    assert!(
        name.ends_with(&session_id.to_string()),
        "directory {} should end with session id",
        name
    );
    // <YYYYMMDD_HHMMSS>_<uuid>
    let timestamp_part = &name[..15];
    assert_eq!(timestamp_part.len(), 15);
    assert_eq!(&timestamp_part[8..9], "_");

    Ok(())
}

#[tokio::test]
async fn sink_finalize_is_safe_without_persistence() -> Result<()> {
    let sink = TranscriptSink::new(None, Uuid::new_v4());
    sink.dispatch(event("unpersisted", true, None));
    let dir = sink.finalize(summary(Uuid::new_v4())).await?;
    assert!(dir.is_none());
    Ok(())
}
