use crate::models::audio::{AudioBuffer, AudioFormat};

/// Stage name used on the bus.
pub const RESAMPLE_STAGE: &str = "resampler";

/// Streaming linear-interpolation resampler normalizing the stream to the
/// configured output rate.
///
/// The interpolation phase and the last input frame are carried across
/// buffers, so a stream fed in arbitrary block sizes resamples the same as
/// one fed whole. Buffers already at the target rate pass through
/// untouched.
pub struct Resampler {
    target_rate: u32,
    channels: u16,
    /// Last frame of the previous buffer; interpolation anchor at index 0.
    prev_frame: Option<Vec<f32>>,
    /// Position of the next output frame, in input-frame units, relative to
    /// `prev_frame`.
    position: f64,
}

impl Resampler {
    pub fn new(target_rate: u32) -> Self {
        Self {
            target_rate,
            channels: 0,
            prev_frame: None,
            position: 0.0,
        }
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Resample one buffer to the target rate.
    pub fn process(&mut self, buffer: AudioBuffer) -> AudioBuffer {
        let format = buffer.format();
        if format.sample_rate == self.target_rate {
            return buffer;
        }
        if buffer.is_empty() {
            return AudioBuffer::new(AudioFormat::new(self.target_rate, format.channels), Vec::new());
        }

        let channels = format.channels.max(1);
        if channels != self.channels {
            // Channel layout change restarts interpolation.
            self.prev_frame = None;
            self.position = 0.0;
            self.channels = channels;
        }

        let channels = usize::from(channels);
        let step = f64::from(format.sample_rate) / f64::from(self.target_rate);
        let samples = buffer.samples();
        let incoming_frames = samples.len() / channels;
        if incoming_frames == 0 {
            return AudioBuffer::new(
                AudioFormat::new(self.target_rate, format.channels),
                Vec::new(),
            );
        }

        // Virtual frame sequence: prev_frame (if any) at index 0, then the
        // incoming frames.
        let prev_frame = self.prev_frame.take();
        let has_prev = prev_frame.is_some();
        let total_frames = incoming_frames + usize::from(has_prev);
        let last_index = (total_frames - 1) as f64;

        let frame_at = |index: usize, ch: usize| -> f32 {
            if has_prev {
                if index == 0 {
                    return prev_frame.as_ref().map(|f| f[ch]).unwrap_or(0.0);
                }
                samples[(index - 1) * channels + ch]
            } else {
                samples[index * channels + ch]
            }
        };

        let mut position = self.position;
        let estimated = ((last_index - position) / step).max(0.0) as usize + 1;
        let mut output = Vec::with_capacity(estimated * channels);

        while position <= last_index {
            let base = position.floor() as usize;
            let frac = (position - base as f64) as f32;
            for ch in 0..channels {
                let a = frame_at(base, ch);
                let sample = if base + 1 < total_frames {
                    a + (frame_at(base + 1, ch) - a) * frac
                } else {
                    a
                };
                output.push(sample);
            }
            position += step;
        }

        // Keep the last frame as the next buffer's anchor and rebase the
        // position onto it.
        self.prev_frame = Some(samples[(incoming_frames - 1) * channels..].to_vec());
        self.position = position - last_index;

        AudioBuffer::new(AudioFormat::new(self.target_rate, format.channels), output)
    }

    /// Rewind to the initial state for a fresh run.
    pub fn reset(&mut self) {
        self.prev_frame = None;
        self.position = 0.0;
        self.channels = 0;
    }
}
