use std::io::Read;

use crate::models::audio::{AudioBuffer, AudioFormat};
use crate::models::error::ChunkerError;
use crate::traits::source::SampleCallback;

/// Stage name used on the bus.
pub const DECODER_STAGE: &str = "decoder";

/// Handler invoked once the decoder has negotiated its output format.
///
/// Returns the downstream entry point to push decoded audio into, or a
/// link error that surfaces on the stream error channel. Called once per
/// stream start, after the container header has been inspected.
pub type OutputReadyHandler =
    Box<dyn Fn(AudioFormat) -> Result<SampleCallback, ChunkerError> + Send + Sync>;

/// Container decoder for file input.
///
/// The output format is unknown until the stream header has been read at
/// runtime, so the downstream link cannot happen at construction: it is
/// deferred to the registered output-ready handler. A stream whose format
/// the downstream refuses fails there, through the same channel as other
/// stream errors.
pub struct Decoder {
    on_output_ready: Option<OutputReadyHandler>,
    block_frames: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            on_output_ready: None,
            block_frames: 4096,
        }
    }

    /// Register the deferred link handler.
    pub fn set_output_ready(&mut self, handler: OutputReadyHandler) {
        self.on_output_ready = Some(handler);
    }

    /// Decode `reader` to f32 buffers, pushing each block into the
    /// downstream obtained from the output-ready handler.
    ///
    /// `control` is polled between blocks; it blocks while the stream is
    /// paused and returns `false` to abort. Returns `true` when the stream
    /// ended naturally.
    pub fn run<R: Read>(
        &self,
        reader: R,
        control: &dyn Fn() -> bool,
    ) -> Result<bool, ChunkerError> {
        let mut wav = hound::WavReader::new(reader).map_err(|e| ChunkerError::Stream {
            stage: DECODER_STAGE.into(),
            message: format!("unrecognized or corrupt container: {e}"),
        })?;

        let spec = wav.spec();
        let format = AudioFormat::new(spec.sample_rate, spec.channels);

        let handler = self
            .on_output_ready
            .as_ref()
            .ok_or_else(|| ChunkerError::LinkFailed {
                upstream: DECODER_STAGE.into(),
                downstream: "(unlinked)".into(),
                reason: "no output-ready handler registered".into(),
            })?;
        let downstream = handler(format)?;

        log::debug!(
            "decoder negotiated {} Hz, {} channel(s), {:?} {}-bit",
            format.sample_rate,
            format.channels,
            spec.sample_format,
            spec.bits_per_sample
        );

        let block_len = self.block_frames * usize::from(format.channels.max(1));
        match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Float, _) => {
                let mut samples = wav.samples::<f32>();
                pump(&mut samples, format, block_len, &downstream, control)
            }
            (hound::SampleFormat::Int, bits) if bits <= 16 => {
                let mut samples = wav
                    .samples::<i16>()
                    .map(|r| r.map(|s| f32::from(s) / 32_768.0));
                pump(&mut samples, format, block_len, &downstream, control)
            }
            (hound::SampleFormat::Int, bits) if bits <= 32 => {
                let scale = (1i64 << (bits - 1)) as f32;
                let mut samples = wav
                    .samples::<i32>()
                    .map(move |r| r.map(|s| s as f32 / scale));
                pump(&mut samples, format, block_len, &downstream, control)
            }
            (hound::SampleFormat::Int, bits) => Err(ChunkerError::Stream {
                stage: DECODER_STAGE.into(),
                message: format!("unsupported sample width: {bits} bits"),
            }),
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive the converted sample iterator into the downstream in blocks.
fn pump(
    samples: &mut dyn Iterator<Item = Result<f32, hound::Error>>,
    format: AudioFormat,
    block_len: usize,
    downstream: &SampleCallback,
    control: &dyn Fn() -> bool,
) -> Result<bool, ChunkerError> {
    loop {
        if !control() {
            return Ok(false);
        }

        let mut block = Vec::with_capacity(block_len);
        for sample in (&mut *samples).take(block_len) {
            block.push(sample.map_err(|e| ChunkerError::Stream {
                stage: DECODER_STAGE.into(),
                message: format!("decode failed: {e}"),
            })?);
        }

        if block.is_empty() {
            return Ok(true);
        }
        downstream(AudioBuffer::new(format, block));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::fs::File;
    use std::io::BufReader;
    use std::sync::Arc;

    fn write_wav(path: &std::path::Path, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn collecting_decoder() -> (Decoder, Arc<Mutex<Vec<AudioBuffer>>>, Arc<Mutex<Option<AudioFormat>>>) {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let negotiated = Arc::new(Mutex::new(None));

        let mut decoder = Decoder::new();
        let sink = collected.clone();
        let seen = negotiated.clone();
        decoder.set_output_ready(Box::new(move |format| {
            *seen.lock() = Some(format);
            let sink = sink.clone();
            Ok(Arc::new(move |buffer: AudioBuffer| {
                sink.lock().push(buffer);
            }) as SampleCallback)
        }));

        (decoder, collected, negotiated)
    }

    #[test]
    fn decodes_after_negotiating_the_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        let samples: Vec<i16> = (0..10_000).map(|i| (i % 128) as i16 * 64).collect();
        write_wav(&path, &samples);

        let (decoder, collected, negotiated) = collecting_decoder();
        let finished = decoder
            .run(BufReader::new(File::open(&path).unwrap()), &|| true)
            .unwrap();

        assert!(finished);
        assert_eq!(*negotiated.lock(), Some(AudioFormat::mono(8_000)));

        let buffers = collected.lock();
        let total: u64 = buffers.iter().map(AudioBuffer::frames).sum();
        assert_eq!(total, 10_000);
        // Blocks come out in 4096-frame slices.
        assert_eq!(buffers[0].frames(), 4_096);
    }

    #[test]
    fn control_false_aborts_early() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        write_wav(&path, &vec![0i16; 10_000]);

        let (decoder, collected, _) = collecting_decoder();
        let finished = decoder
            .run(BufReader::new(File::open(&path).unwrap()), &|| false)
            .unwrap();

        assert!(!finished);
        assert!(collected.lock().is_empty());
    }

    #[test]
    fn corrupt_container_is_a_stream_error() {
        let (decoder, _, _) = collecting_decoder();
        let result = decoder.run(&b"not a wav file at all"[..], &|| true);
        assert!(matches!(
            result,
            Err(ChunkerError::Stream { ref stage, .. }) if stage == DECODER_STAGE
        ));
    }

    #[test]
    fn unregistered_handler_is_a_link_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        write_wav(&path, &[0i16; 16]);

        let decoder = Decoder::new();
        let result = decoder.run(BufReader::new(File::open(&path).unwrap()), &|| true);
        assert!(matches!(result, Err(ChunkerError::LinkFailed { .. })));
    }

    #[test]
    fn refused_link_propagates_the_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        write_wav(&path, &[0i16; 16]);

        let mut decoder = Decoder::new();
        decoder.set_output_ready(Box::new(|format| {
            Err(ChunkerError::LinkFailed {
                upstream: DECODER_STAGE.into(),
                downstream: "silence-detector".into(),
                reason: format!("unsupported format: {} Hz", format.sample_rate),
            })
        }));

        let result = decoder.run(BufReader::new(File::open(&path).unwrap()), &|| true);
        assert!(matches!(result, Err(ChunkerError::LinkFailed { .. })));
    }

    #[test]
    fn sample_values_scale_to_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        write_wav(&path, &[16_384, -16_384]);

        let (decoder, collected, _) = collecting_decoder();
        decoder
            .run(BufReader::new(File::open(&path).unwrap()), &|| true)
            .unwrap();

        let buffers = collected.lock();
        let samples = buffers[0].samples();
        assert!((samples[0] - 0.5).abs() < 1e-4);
        assert!((samples[1] + 0.5).abs() < 1e-4);
    }
}
