use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::models::audio::{AudioBuffer, AudioFormat};
use crate::models::chunk::{self, ChunkInfo, ChunkManifest};
use crate::models::error::ChunkerError;
use crate::pipeline::params::StageParams;
use crate::stages::callback_sink::CallbackSink;
use crate::stages::MuxerKind;

/// Stage name used on the bus.
pub const WRITER_STAGE: &str = "segment-writer";

/// Muxes one chunk's audio into a container file.
pub trait Muxer: Send {
    fn write(&mut self, buffer: &AudioBuffer) -> Result<(), ChunkerError>;
    fn finalize(self: Box<Self>) -> Result<(), ChunkerError>;
}

/// WAV muxer over `hound`, 16-bit PCM.
pub struct WavMuxer {
    writer: hound::WavWriter<BufWriter<File>>,
}

impl WavMuxer {
    pub fn create(path: &Path, format: AudioFormat) -> Result<Self, ChunkerError> {
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec).map_err(|e| {
            ChunkerError::Storage(format!("failed to create {}: {e}", path.display()))
        })?;
        Ok(Self { writer })
    }
}

impl Muxer for WavMuxer {
    fn write(&mut self, buffer: &AudioBuffer) -> Result<(), ChunkerError> {
        for &sample in buffer.samples() {
            let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            self.writer
                .write_sample(value)
                .map_err(|e| ChunkerError::Storage(format!("wav write failed: {e}")))?;
        }
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<(), ChunkerError> {
        self.writer
            .finalize()
            .map_err(|e| ChunkerError::Storage(format!("wav finalize failed: {e}")))
    }
}

/// Headerless muxer: raw little-endian 16-bit frames.
pub struct RawMuxer {
    out: BufWriter<File>,
}

impl RawMuxer {
    pub fn create(path: &Path) -> Result<Self, ChunkerError> {
        let file = File::create(path).map_err(|e| {
            ChunkerError::Storage(format!("failed to create {}: {e}", path.display()))
        })?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }
}

impl Muxer for RawMuxer {
    fn write(&mut self, buffer: &AudioBuffer) -> Result<(), ChunkerError> {
        for &sample in buffer.samples() {
            let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            self.out
                .write_all(&value.to_le_bytes())
                .map_err(|e| ChunkerError::Storage(format!("raw write failed: {e}")))?;
        }
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<(), ChunkerError> {
        self.out
            .flush()
            .map_err(|e| ChunkerError::Storage(format!("raw flush failed: {e}")))
    }
}

enum SinkKind {
    Files {
        pattern: String,
        muxer: MuxerKind,
        current: Option<(Box<dyn Muxer>, PathBuf)>,
    },
    Capture(Arc<CallbackSink>),
}

struct WriterInner {
    sink: SinkKind,
    max_chunk: Duration,
    write_manifest: bool,
    chunk_format: Option<AudioFormat>,
    frames_in_chunk: u64,
    next_index: u32,
    chunks: Vec<ChunkInfo>,
    run_finished: bool,
}

/// Terminal stage writing chunked output.
///
/// One internal lock serializes buffer writes with `split_now`, so a split
/// issued from the event path lands between buffers and never corrupts the
/// in-progress chunk; at most one chunk is open at a time. Chunks open
/// lazily on the first buffer after a boundary, so splitting an empty chunk
/// produces no file.
pub struct SegmentWriter {
    inner: Mutex<WriterInner>,
}

impl SegmentWriter {
    /// Build from stage parameters: `location` (chunk file pattern,
    /// required unless a sink is given), `max-chunk-ns` (uint, 0 =
    /// unlimited), `manifest` (bool).
    pub fn from_params(
        params: &StageParams,
        sink: Option<Arc<CallbackSink>>,
        muxer: MuxerKind,
    ) -> Result<Self, ChunkerError> {
        let sink = match sink {
            Some(sink) => SinkKind::Capture(sink),
            None => {
                let pattern = params.get_str("location").ok_or_else(|| {
                    ChunkerError::MissingConfiguration("segment writer location".into())
                })?;
                SinkKind::Files {
                    pattern: pattern.to_string(),
                    muxer,
                    current: None,
                }
            }
        };

        Ok(Self {
            inner: Mutex::new(WriterInner {
                sink,
                max_chunk: Duration::from_nanos(params.get_uint("max-chunk-ns").unwrap_or(0)),
                write_manifest: params.get_bool("manifest").unwrap_or(false),
                chunk_format: None,
                frames_in_chunk: 0,
                next_index: 0,
                chunks: Vec::new(),
                run_finished: false,
            }),
        })
    }

    /// Append a buffer to the current chunk, opening it if needed. Splits
    /// on its own when the chunk reaches the maximum duration.
    pub fn write(&self, buffer: &AudioBuffer) -> Result<(), ChunkerError> {
        if buffer.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();

        if inner.run_finished {
            // First audio of a new run; previous run's records are stale.
            inner.chunks.clear();
            inner.run_finished = false;
        }

        inner.open_and_deliver(buffer)?;
        inner.frames_in_chunk += buffer.frames();

        // Hard cap, independent of silence detection. No chunk event.
        let cap_frames = inner
            .chunk_format
            .map(|f| f.frames_in(inner.max_chunk))
            .unwrap_or(0);
        if cap_frames > 0 && inner.frames_in_chunk >= cap_frames {
            log::debug!("chunk reached maximum duration, splitting");
            inner.close_current(false)?;
        }
        Ok(())
    }

    /// Close the current chunk and open the next on the following write.
    ///
    /// Safe to call from the event path concurrently with writes; requests
    /// serialize on the internal lock. Splitting an empty chunk is a no-op.
    pub fn split_now(&self) -> Result<(), ChunkerError> {
        self.inner.lock().close_current(false)
    }

    /// Flush the open chunk or segment and reset for a fresh run.
    ///
    /// An in-process sink is always flushed so its per-segment callback
    /// fires on stop even when the final segment carries no audio.
    pub fn finalize_all(&self) -> Result<(), ChunkerError> {
        let mut inner = self.inner.lock();
        inner.close_current(true)?;

        if inner.write_manifest {
            if let SinkKind::Files { pattern, .. } = &inner.sink {
                if !inner.chunks.is_empty() {
                    let format = inner.chunk_format.unwrap_or(AudioFormat::mono(0));
                    let manifest = ChunkManifest::new(format.sample_rate, inner.chunks.clone());
                    chunk::write_manifest(&manifest, &manifest_path(pattern))?;
                }
            }
        }

        inner.next_index = 0;
        inner.frames_in_chunk = 0;
        inner.chunk_format = None;
        inner.run_finished = true;
        Ok(())
    }

    /// Records of the chunks finalized so far.
    pub fn chunks(&self) -> Vec<ChunkInfo> {
        self.inner.lock().chunks.clone()
    }
}

impl WriterInner {
    fn open_and_deliver(&mut self, buffer: &AudioBuffer) -> Result<(), ChunkerError> {
        match &mut self.sink {
            SinkKind::Files {
                pattern,
                muxer,
                current,
            } => {
                if current.is_none() {
                    let path = format_chunk_path(pattern, self.next_index);
                    if let Some(parent) = path.parent() {
                        if !parent.as_os_str().is_empty() {
                            fs::create_dir_all(parent).map_err(|e| {
                                ChunkerError::Storage(format!(
                                    "failed to create {}: {e}",
                                    parent.display()
                                ))
                            })?;
                        }
                    }
                    log::debug!("opening chunk {}", path.display());
                    *current = Some((muxer.open(&path, buffer.format())?, path));
                    self.chunk_format = Some(buffer.format());
                }
                if let Some((muxer, _)) = current {
                    muxer.write(buffer)?;
                }
            }
            SinkKind::Capture(sink) => {
                self.chunk_format = Some(buffer.format());
                sink.render(buffer.clone());
            }
        }
        Ok(())
    }

    /// Finalize the open chunk and advance the index. `force` flushes an
    /// in-process sink even when the segment is empty.
    fn close_current(&mut self, force: bool) -> Result<(), ChunkerError> {
        match &mut self.sink {
            SinkKind::Files { .. } => {
                let (muxer, path) = match self.take_current() {
                    Some(open) => open,
                    None => return Ok(()),
                };
                muxer.finalize()?;
                let checksum = sha256_file(&path)?;
                self.push_chunk(Some(path.to_string_lossy().into_owned()), Some(checksum));
            }
            SinkKind::Capture(sink) => {
                if self.frames_in_chunk == 0 && !force {
                    return Ok(());
                }
                let sink = Arc::clone(sink);
                if self.frames_in_chunk > 0 {
                    self.push_chunk(None, None);
                }
                sink.flush();
            }
        }
        self.frames_in_chunk = 0;
        Ok(())
    }

    fn take_current(&mut self) -> Option<(Box<dyn Muxer>, PathBuf)> {
        match &mut self.sink {
            SinkKind::Files { current, .. } => current.take(),
            SinkKind::Capture(_) => None,
        }
    }

    fn push_chunk(&mut self, path: Option<String>, checksum: Option<String>) {
        let rate = self.chunk_format.map(|f| f.sample_rate).unwrap_or(0);
        let duration_secs = if rate > 0 {
            self.frames_in_chunk as f64 / f64::from(rate)
        } else {
            0.0
        };
        self.chunks.push(ChunkInfo {
            index: self.next_index,
            path,
            frames: self.frames_in_chunk,
            duration_secs,
            checksum,
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        self.next_index += 1;
    }
}

/// Whether `pattern` carries a `%d`/`%0Nd` chunk index placeholder.
pub fn has_index_placeholder(pattern: &str) -> bool {
    parse_placeholder(pattern).is_some()
}

/// Substitute the chunk index into the pattern, zero-padded to the
/// placeholder's width (`out/%02d.wav`, index 3 → `out/03.wav`).
pub fn format_chunk_path(pattern: &str, index: u32) -> PathBuf {
    match parse_placeholder(pattern) {
        Some((start, end, width)) => {
            let mut path = String::with_capacity(pattern.len() + 8);
            path.push_str(&pattern[..start]);
            path.push_str(&format!("{index:0width$}"));
            path.push_str(&pattern[end..]);
            PathBuf::from(path)
        }
        None => PathBuf::from(format!("{pattern}{index}")),
    }
}

/// Byte range and pad width of the first `%d`/`%0Nd` token.
fn parse_placeholder(pattern: &str) -> Option<(usize, usize, usize)> {
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'd' {
                let width = pattern[i + 1..j].parse().unwrap_or(0);
                return Some((i, j + 1, width));
            }
        }
        i += 1;
    }
    None
}

/// Manifest sidecar path: `manifest.json` in the chunk directory.
fn manifest_path(pattern: &str) -> PathBuf {
    let first_chunk = format_chunk_path(pattern, 0);
    match first_chunk.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("manifest.json"),
        _ => PathBuf::from("manifest.json"),
    }
}

fn sha256_file(path: &Path) -> Result<String, ChunkerError> {
    let data = fs::read(path)
        .map_err(|e| ChunkerError::Storage(format!("failed to read file for checksum: {e}")))?;
    let digest = Sha256::digest(&data);
    Ok(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::params::ParamValue;

    const FORMAT: AudioFormat = AudioFormat {
        sample_rate: 8_000,
        channels: 1,
    };

    fn tone(frames: usize) -> AudioBuffer {
        AudioBuffer::new(FORMAT, vec![0.25; frames])
    }

    fn file_writer(pattern: &str, max_chunk: Duration) -> SegmentWriter {
        let params = StageParams::new()
            .with("location", ParamValue::Str(pattern.into()))
            .with(
                "max-chunk-ns",
                ParamValue::UInt(max_chunk.as_nanos() as u64),
            );
        SegmentWriter::from_params(&params, None, MuxerKind::Wav).unwrap()
    }

    fn capture_writer(sink: Arc<CallbackSink>) -> SegmentWriter {
        SegmentWriter::from_params(&StageParams::new(), Some(sink), MuxerKind::Wav).unwrap()
    }

    #[test]
    fn placeholder_formats_zero_padded() {
        assert_eq!(
            format_chunk_path("out/%02d.wav", 3),
            PathBuf::from("out/03.wav")
        );
        assert_eq!(
            format_chunk_path("out/%02d.wav", 42),
            PathBuf::from("out/42.wav")
        );
        assert_eq!(format_chunk_path("chunk-%d.raw", 7), PathBuf::from("chunk-7.raw"));
        assert!(has_index_placeholder("%04d"));
        assert!(!has_index_placeholder("out/chunk.wav"));
        assert!(!has_index_placeholder("100% done"));
    }

    #[test]
    fn missing_location_without_sink_is_rejected() {
        let result = SegmentWriter::from_params(&StageParams::new(), None, MuxerKind::Wav);
        assert!(matches!(
            result,
            Err(ChunkerError::MissingConfiguration(_))
        ));
    }

    #[test]
    fn chunks_open_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("%02d.wav").to_string_lossy().into_owned();
        let writer = file_writer(&pattern, Duration::ZERO);

        // Splitting before any audio produces no file.
        writer.split_now().unwrap();
        writer.finalize_all().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn split_now_rolls_over_to_the_next_file() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("%02d.wav").to_string_lossy().into_owned();
        let writer = file_writer(&pattern, Duration::ZERO);

        writer.write(&tone(800)).unwrap();
        writer.split_now().unwrap();
        writer.write(&tone(400)).unwrap();
        writer.finalize_all().unwrap();

        assert!(dir.path().join("00.wav").exists());
        assert!(dir.path().join("01.wav").exists());

        let chunks = writer.chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].frames, 800);
        assert_eq!(chunks[1].frames, 400);
        assert!(chunks[0].checksum.is_some());
        assert!((chunks[0].duration_secs - 0.1).abs() < 1e-9);
    }

    #[test]
    fn maximum_duration_caps_a_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("%02d.wav").to_string_lossy().into_owned();
        // 100 ms cap at 8 kHz = 800 frames.
        let writer = file_writer(&pattern, Duration::from_millis(100));

        for _ in 0..4 {
            writer.write(&tone(400)).unwrap();
        }
        writer.finalize_all().unwrap();

        let chunks = writer.chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].frames, 800);
        assert_eq!(chunks[1].frames, 800);
    }

    #[test]
    fn written_wav_is_decodable() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("%02d.wav").to_string_lossy().into_owned();
        let writer = file_writer(&pattern, Duration::ZERO);

        writer.write(&tone(800)).unwrap();
        writer.finalize_all().unwrap();

        let reader = hound::WavReader::open(dir.path().join("00.wav")).unwrap();
        assert_eq!(reader.spec().sample_rate, 8_000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 800);
    }

    #[test]
    fn capture_sink_receives_segments() {
        let sink = Arc::new(CallbackSink::new());
        let writer = capture_writer(sink.clone());

        writer.write(&tone(480)).unwrap();
        writer.write(&tone(480)).unwrap();
        assert_eq!(sink.pending(), 2);

        writer.split_now().unwrap();
        assert_eq!(sink.pending(), 0);

        let chunks = writer.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].frames, 960);
        assert_eq!(chunks[0].path, None);
        assert_eq!(chunks[0].checksum, None);
    }

    #[test]
    fn empty_capture_split_is_skipped_but_finalize_flushes() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let sink = Arc::new(CallbackSink::new());
        let flushes = Arc::new(AtomicUsize::new(0));
        let count = flushes.clone();
        sink.set_segment_callback(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let writer = capture_writer(sink.clone());
        writer.split_now().unwrap();
        assert_eq!(flushes.load(Ordering::SeqCst), 0);

        writer.finalize_all().unwrap();
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manifest_written_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("%02d.wav").to_string_lossy().into_owned();
        let params = StageParams::new()
            .with("location", ParamValue::Str(pattern))
            .with("manifest", ParamValue::Bool(true));
        let writer = SegmentWriter::from_params(&params, None, MuxerKind::Wav).unwrap();

        writer.write(&tone(800)).unwrap();
        writer.finalize_all().unwrap();

        let manifest = chunk::read_manifest(&dir.path().join("manifest.json")).unwrap();
        assert_eq!(manifest.sample_rate, 8_000);
        assert_eq!(manifest.chunks.len(), 1);
        assert_eq!(manifest.chunks[0].frames, 800);
    }

    #[test]
    fn a_new_run_clears_previous_records() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("%02d.wav").to_string_lossy().into_owned();
        let writer = file_writer(&pattern, Duration::ZERO);

        writer.write(&tone(800)).unwrap();
        writer.finalize_all().unwrap();
        assert_eq!(writer.chunks().len(), 1);

        // Restart overwrites from index zero.
        writer.write(&tone(400)).unwrap();
        let chunks = writer.chunks();
        assert_eq!(chunks.len(), 0);
        writer.finalize_all().unwrap();
        let chunks = writer.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].frames, 400);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn raw_muxer_writes_plain_frames() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("%d.raw").to_string_lossy().into_owned();
        let params = StageParams::new().with("location", ParamValue::Str(pattern));
        let writer = SegmentWriter::from_params(&params, None, MuxerKind::Raw).unwrap();

        writer.write(&tone(100)).unwrap();
        writer.finalize_all().unwrap();

        let data = fs::read(dir.path().join("0.raw")).unwrap();
        assert_eq!(data.len(), 200); // 100 frames * 2 bytes
        let first = i16::from_le_bytes([data[0], data[1]]);
        assert_eq!(first, (0.25 * f32::from(i16::MAX)) as i16);
    }
}
