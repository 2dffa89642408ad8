//! # audio-chunker-core
//!
//! Platform-agnostic silence chunker core library.
//!
//! Splits a continuous audio stream into chunks at detected silence,
//! writing each chunk through a muxer to per-chunk container files or to an
//! in-process callback sink. Capture backends implement the
//! [`SourceProvider`] trait and plug into the generic session (see the
//! companion `audio-chunker-cpal` crate).
//!
//! ## Architecture
//!
//! ```text
//! audio-chunker-core (this crate)
//! ├── models/     ← ChunkerError, PlaybackState, ChunkerConfig, AudioBuffer, ChunkInfo
//! ├── traits/     ← SourceProvider, ChunkerDelegate
//! ├── pipeline/   ← Bus, StageParams, Pipeline, PipelineBuilder
//! ├── stages/     ← SilenceDetector, Resampler, SegmentWriter, Decoder,
//! │                 FileSource, CallbackSink
//! └── session/    ← ChunkerSession (orchestrator)
//! ```
//!
//! Data flow:
//!
//! ```text
//! [Source] → [SilenceDetector] → [Resampler] → [SegmentWriter] → files / sink
//!     │            │ silence events                 ↑ split-now
//!     └────────────┴──── bus ──→ [ChunkerSession] ──┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use audio_chunker_core::{ChunkerConfig, ChunkerInput, ChunkerSession};
//!
//! let config = ChunkerConfig {
//!     input: ChunkerInput::parse("speech.wav"),
//!     output: Some("out/%02d.wav".into()),
//!     ..Default::default()
//! };
//! let session = ChunkerSession::new(config).unwrap();
//! session.play().unwrap();
//! while session.is_playing() {
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! for chunk in session.chunks() {
//!     println!("chunk {}: {:.2}s", chunk.index, chunk.duration_secs);
//! }
//! ```

pub mod models;
pub mod pipeline;
pub mod session;
pub mod stages;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::audio::{AudioBuffer, AudioFormat};
pub use models::chunk::{ChunkInfo, ChunkManifest};
pub use models::config::{ChunkerConfig, ChunkerInput, INPUT_CAPTURE};
pub use models::error::ChunkerError;
pub use models::state::PlaybackState;
pub use pipeline::builder::PipelineBuilder;
pub use pipeline::bus::{Bus, MessageKind, StageMessage};
pub use pipeline::params::{ParamValue, StageParams};
pub use session::chunker::ChunkerSession;
pub use stages::callback_sink::CallbackSink;
pub use stages::file_source::FileSource;
pub use traits::delegate::ChunkerDelegate;
pub use traits::source::{SampleCallback, SourceProvider};
