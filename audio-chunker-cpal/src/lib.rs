//! # audio-chunker-cpal
//!
//! cpal capture backend for audio-chunker.
//!
//! Provides:
//! - [`MicSource`] — live capture from an input device, implementing the
//!   core's `SourceProvider` trait
//! - [`create_session`] — builds a `ChunkerSession`, injecting a
//!   `MicSource` when the configured input selects live capture
//!
//! ## Usage
//! ```no_run
//! use audio_chunker_core::ChunkerConfig;
//! use audio_chunker_cpal::create_session;
//!
//! let config = ChunkerConfig {
//!     output: Some("out/%02d.wav".into()),
//!     ..Default::default()
//! };
//! let session = create_session(config).unwrap();
//! session.play().unwrap();
//! ```

mod mic;

pub use mic::MicSource;

use audio_chunker_core::{ChunkerConfig, ChunkerError, ChunkerSession};

/// Build a session, supplying a [`MicSource`] for live-capture input.
/// File input goes straight through the core.
pub fn create_session(config: ChunkerConfig) -> Result<ChunkerSession, ChunkerError> {
    if config.input.is_capture() {
        ChunkerSession::with_source(config, Box::new(MicSource::default_device()))
    } else {
        ChunkerSession::new(config)
    }
}
