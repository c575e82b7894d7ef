use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Operating mode for a session.
///
/// In `Local` mode the audio source is the caller itself, so transcription
/// starts as soon as audio arrives. In `Remote` mode the session waits for
/// the conferencing platform to grant recording permission (delivered as a
/// webhook) before any audio is forwarded to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Local,
    Remote,
}

impl Default for SessionMode {
    fn default() -> Self {
        SessionMode::Remote
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the combined WS + HTTP server
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4040,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: SessionMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Which adapter to instantiate ("wire" is the built-in TCP adapter)
    pub id: String,
    /// Endpoint for socket-based adapters, "host:port"
    pub endpoint: String,
    pub language: String,
    pub interim_results: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: "wire".to_string(),
            endpoint: "127.0.0.1:43007".to_string(),
            language: "en".to_string(),
            interim_results: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate asserted to the provider and used for the WAV header
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            bit_depth: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("recordings"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("transcripts"),
        }
    }
}

/// Recognized but handled by an external collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub enabled: bool,
}

/// Timeouts governing session teardown.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Grace window after a fatal provider error, so observers can
    /// display the error before the process exits
    pub fatal_grace_ms: u64,
    /// Cap on waiting for the provider to acknowledge a close
    pub provider_close_ms: u64,
    /// Overall teardown deadline; expired tasks are abandoned
    pub teardown_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fatal_grace_ms: 3000,
            provider_close_ms: 5000,
            teardown_ms: 5000,
        }
    }
}

impl TimeoutConfig {
    pub fn fatal_grace(&self) -> Duration {
        Duration::from_millis(self.fatal_grace_ms)
    }

    pub fn provider_close(&self) -> Duration {
        Duration::from_millis(self.provider_close_ms)
    }

    pub fn teardown(&self) -> Duration {
        Duration::from_millis(self.teardown_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub provider: ProviderConfig,
    pub audio: AudioConfig,
    pub recording: RecordingConfig,
    pub transcripts: TranscriptConfig,
    pub playback: PlaybackConfig,
    pub timeouts: TimeoutConfig,
}

impl Config {
    /// Load configuration from an optional file plus `SCRIBE_RELAY_*`
    /// environment variables (e.g. `SCRIBE_RELAY_SERVER__PORT=5050`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(p) => {
                builder = builder.add_source(config::File::with_name(p));
            }
            None => {
                builder =
                    builder.add_source(config::File::with_name("scribe-relay").required(false));
            }
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("SCRIBE_RELAY").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Fail fast on configuration that cannot produce a working session.
    pub fn validate(&self) -> Result<()> {
        if !crate::provider::is_known_provider(&self.provider.id) {
            bail!("Unknown provider id: {}", self.provider.id);
        }

        if self.audio.bit_depth != 16 {
            bail!(
                "Unsupported bit depth: {} (input format is fixed at 16-bit PCM)",
                self.audio.bit_depth
            );
        }

        if self.audio.channels == 0 || self.audio.channels > 2 {
            bail!("Unsupported channel count: {}", self.audio.channels);
        }

        if self.audio.sample_rate == 0 {
            bail!("Sample rate must be positive");
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
