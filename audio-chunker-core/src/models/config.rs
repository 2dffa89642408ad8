use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::models::error::ChunkerError;
use crate::stages::callback_sink::CallbackSink;
use crate::stages::writer;

/// String token selecting live capture, as accepted by [`ChunkerInput::parse`].
pub const INPUT_CAPTURE: &str = "mic";

/// Where the audio stream comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkerInput {
    /// The capture device (microphone).
    Capture,
    /// A container file decoded at the configured path.
    File(PathBuf),
}

impl ChunkerInput {
    /// Map the conventional string form: `"mic"` selects live capture,
    /// anything else is a file path.
    pub fn parse(value: &str) -> Self {
        if value == INPUT_CAPTURE {
            Self::Capture
        } else {
            Self::File(PathBuf::from(value))
        }
    }

    pub fn is_capture(&self) -> bool {
        matches!(self, Self::Capture)
    }
}

/// Configuration for a chunker session. Immutable once the session is built.
///
/// Exactly one of `output` and `sink` must be set: chunks either go to
/// per-chunk container files or to an in-process [`CallbackSink`].
#[derive(Clone)]
pub struct ChunkerConfig {
    /// Audio source: the capture device or a container file.
    pub input: ChunkerInput,

    /// Chunk file pattern with a `%d`/`%0Nd` index placeholder,
    /// e.g. `out/%02d.wav`.
    pub output: Option<String>,

    /// In-process sink receiving buffers instead of file writes.
    pub sink: Option<Arc<CallbackSink>>,

    /// Muxer id for chunk output (`"wav"` or `"raw"`).
    pub muxer: String,

    /// Sample rate of chunked audio in Hz.
    pub sample_rate: u32,

    /// Hard cap on a single chunk; the writer splits when it is reached
    /// even without silence.
    pub max_chunk_duration: Duration,

    /// Silence shorter than this does not trigger a split.
    pub min_silence_duration: Duration,

    /// Analysis window of the silence detector, in frames.
    pub silence_hysteresis: u64,

    /// Level below which a window counts as silent, in dB.
    pub silence_threshold_db: i32,

    /// Write a `manifest.json` with per-chunk records next to the chunks.
    pub write_manifest: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            input: ChunkerInput::Capture,
            output: None,
            sink: None,
            muxer: "wav".into(),
            sample_rate: 44_100,
            max_chunk_duration: Duration::from_secs(7),
            min_silence_duration: Duration::from_millis(500),
            silence_hysteresis: 480,
            silence_threshold_db: -60,
            write_manifest: false,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), ChunkerError> {
        match (&self.output, &self.sink) {
            (None, None) => {
                return Err(ChunkerError::MissingConfiguration(
                    "either an output pattern or a sink is required".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(ChunkerError::InvalidConfiguration(
                    "output pattern and sink are mutually exclusive".into(),
                ))
            }
            _ => {}
        }

        if let Some(pattern) = &self.output {
            if !writer::has_index_placeholder(pattern) {
                return Err(ChunkerError::InvalidConfiguration(format!(
                    "output pattern '{pattern}' has no %d-style chunk index placeholder"
                )));
            }
        }

        if self.muxer.is_empty() {
            return Err(ChunkerError::MissingConfiguration("muxer id".into()));
        }
        if self.sample_rate == 0 {
            return Err(ChunkerError::InvalidConfiguration(
                "sample rate must be positive".into(),
            ));
        }
        if self.silence_hysteresis == 0 {
            return Err(ChunkerError::InvalidConfiguration(
                "silence hysteresis must be at least one frame".into(),
            ));
        }

        Ok(())
    }
}
