//! Optional audio persistence
//!
//! When recording is enabled, gated PCM frames are buffered in memory
//! and written out as a single WAV file when the session closes.

mod wav;

pub use wav::WavRecorder;
