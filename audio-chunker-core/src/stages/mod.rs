pub mod callback_sink;
pub mod decoder;
pub mod file_source;
pub mod resample;
pub mod silence;
pub mod writer;

use std::path::Path;

use crate::models::audio::AudioFormat;
use crate::models::error::ChunkerError;
use self::writer::{Muxer, RawMuxer, WavMuxer};

/// Muxers known to the stage registry, resolved by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerKind {
    /// 16-bit PCM WAV container.
    Wav,
    /// Headerless little-endian 16-bit frames.
    Raw,
}

impl MuxerKind {
    /// Resolve a muxer id; an unknown id is a construction error.
    pub fn resolve(id: &str) -> Result<Self, ChunkerError> {
        match id {
            "wav" => Ok(Self::Wav),
            "raw" => Ok(Self::Raw),
            other => Err(ChunkerError::UnknownElement(other.into())),
        }
    }

    /// Open a muxer for one chunk file.
    pub(crate) fn open(
        &self,
        path: &Path,
        format: AudioFormat,
    ) -> Result<Box<dyn Muxer>, ChunkerError> {
        match self {
            Self::Wav => Ok(Box::new(WavMuxer::create(path, format)?)),
            Self::Raw => Ok(Box::new(RawMuxer::create(path)?)),
        }
    }
}
