use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;

/// Optional per-session WAV capture.
///
/// Raw PCM frames are appended to an in-memory buffer while the session
/// streams; the WAV file (44-byte RIFF header + data) is produced once,
/// on session close. An empty buffer produces no file.
pub struct WavRecorder {
    dir: PathBuf,
    sample_rate: u32,
    channels: u16,
    buffer: Mutex<Vec<u8>>,
}

impl WavRecorder {
    pub fn new(dir: PathBuf, sample_rate: u32, channels: u16) -> Self {
        Self {
            dir,
            sample_rate,
            channels,
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Append one PCM frame (S16LE bytes).
    pub fn append(&self, pcm: &[u8]) {
        let mut buffer = self.buffer.lock().expect("recorder lock");
        buffer.extend_from_slice(pcm);
    }

    pub fn captured_bytes(&self) -> usize {
        self.buffer.lock().expect("recorder lock").len()
    }

    /// Write the WAV file. Returns the path, or `None` when no PCM was
    /// captured.
    pub fn finalize(&self, ended_at: DateTime<Utc>) -> Result<Option<PathBuf>> {
        let pcm = {
            let mut buffer = self.buffer.lock().expect("recorder lock");
            std::mem::take(&mut *buffer)
        };

        if pcm.is_empty() {
            return Ok(None);
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create recording directory {:?}", self.dir))?;

        let path = self.dir.join(recording_file_name(ended_at));

        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create WAV file {:?}", path))?;

        // Trailing odd byte cannot form a 16-bit sample; chunks_exact
        // drops it, matching the asserted input format.
        for sample in pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
        {
            writer.write_sample(sample).context("Failed to write sample")?;
        }

        writer.finalize().context("Failed to finalize WAV file")?;

        info!("Recording written: {:?} ({} PCM bytes)", path, pcm.len());
        Ok(Some(path))
    }
}

/// `recording_<ISO8601>.wav` with ':' and '.' replaced so the name is
/// filesystem-safe everywhere.
fn recording_file_name(timestamp: DateTime<Utc>) -> String {
    let iso = timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    format!("recording_{}.wav", iso.replace([':', '.'], "-"))
}
