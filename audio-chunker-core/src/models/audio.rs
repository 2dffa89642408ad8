use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sample layout of a buffer: interleaved f32 frames at a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn mono(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1)
    }

    /// Number of frames covered by `duration` at this rate.
    pub fn frames_in(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as u64
    }
}

/// One block of interleaved f32 audio flowing through the pipeline.
///
/// Sample storage is shared: cloning a buffer takes a new reference to the
/// same data. Consumers that need a buffer past the delivering call must
/// keep their own clone.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    format: AudioFormat,
    samples: Arc<[f32]>,
}

impl AudioBuffer {
    pub fn new(format: AudioFormat, samples: Vec<f32>) -> Self {
        Self {
            format,
            samples: samples.into(),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of frames (interleaved sample groups) in the buffer.
    pub fn frames(&self) -> u64 {
        (self.samples.len() / usize::from(self.format.channels.max(1))) as u64
    }

    pub fn duration(&self) -> Duration {
        if self.format.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.format.sample_rate as f64)
    }
}
