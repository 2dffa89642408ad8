use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

use crate::models::error::ChunkerError;
use crate::pipeline::bus::{Bus, StageMessage};
use crate::stages::decoder::Decoder;
use crate::traits::source::{SampleCallback, SourceProvider};

/// Stage name used on the bus.
pub const FILE_SOURCE_STAGE: &str = "file-source";

/// Pause gate for the worker thread.
struct PauseGate {
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl PauseGate {
    fn new() -> Self {
        Self {
            paused: Mutex::new(false),
            resumed: Condvar::new(),
        }
    }

    fn set_paused(&self, paused: bool) {
        *self.paused.lock() = paused;
        if !paused {
            self.resumed.notify_all();
        }
    }

    /// Block while paused. Wakes immediately once the running flag clears.
    fn wait_while_paused(&self, running: &AtomicBool) {
        let mut paused = self.paused.lock();
        while *paused && running.load(Ordering::SeqCst) {
            self.resumed.wait(&mut paused);
        }
    }
}

/// Reads a container file and feeds the decoder on a worker thread.
///
/// End of stream and decode failures are posted on the bus handed to
/// `start`. Stopping rewinds: a later `start` delivers the file from the
/// beginning again.
pub struct FileSource {
    path: PathBuf,
    decoder: Arc<Decoder>,
    running: Arc<AtomicBool>,
    gate: Arc<PauseGate>,
    worker: Option<thread::JoinHandle<()>>,
}

impl FileSource {
    /// The decoder arrives fully configured: its output-ready handler is
    /// registered by the pipeline builder before the source is boxed.
    pub fn new(path: impl Into<PathBuf>, decoder: Decoder) -> Self {
        Self {
            path: path.into(),
            decoder: Arc::new(decoder),
            running: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(PauseGate::new()),
            worker: None,
        }
    }
}

impl SourceProvider for FileSource {
    fn name(&self) -> &str {
        FILE_SOURCE_STAGE
    }

    fn link(&mut self, _downstream: SampleCallback) -> Result<(), ChunkerError> {
        // The output format is negotiated at runtime; the decoder's
        // output-ready handler owns the link.
        Err(ChunkerError::LinkFailed {
            upstream: FILE_SOURCE_STAGE.into(),
            downstream: "silence-detector".into(),
            reason: "file sources link through their decoder at stream start".into(),
        })
    }

    fn start(&mut self, bus: &Bus) -> Result<(), ChunkerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Reap a worker left over from a finished run.
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.gate.set_paused(false);

        let path = self.path.clone();
        let decoder = Arc::clone(&self.decoder);
        let running = Arc::clone(&self.running);
        let gate = Arc::clone(&self.gate);
        let bus = bus.clone();

        let worker = thread::Builder::new()
            .name("file-source".into())
            .spawn(move || {
                match run_stream(&path, &decoder, &running, &gate) {
                    Ok(true) => bus.post(StageMessage::eos(FILE_SOURCE_STAGE)),
                    Ok(false) => {}
                    Err(ChunkerError::Stream { stage, message }) => {
                        bus.post(StageMessage::error(&stage, message));
                    }
                    Err(e) => bus.post(StageMessage::error(FILE_SOURCE_STAGE, e.to_string())),
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| ChunkerError::Unknown(format!("failed to spawn file worker: {e}")))?;

        self.worker = Some(worker);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), ChunkerError> {
        self.gate.set_paused(true);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), ChunkerError> {
        self.gate.set_paused(false);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ChunkerError> {
        self.running.store(false, Ordering::SeqCst);
        self.gate.set_paused(false);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok(())
    }
}

fn run_stream(
    path: &PathBuf,
    decoder: &Decoder,
    running: &AtomicBool,
    gate: &PauseGate,
) -> Result<bool, ChunkerError> {
    let file = File::open(path).map_err(|e| ChunkerError::Stream {
        stage: FILE_SOURCE_STAGE.into(),
        message: format!("cannot open {}: {e}", path.display()),
    })?;

    let control = || {
        gate.wait_while_paused(running);
        running.load(Ordering::SeqCst)
    };
    decoder.run(BufReader::new(file), &control)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio::AudioBuffer;
    use crate::pipeline::bus::MessageKind;
    use std::sync::atomic::AtomicU64;
    use std::time::{Duration, Instant};

    fn write_wav(path: &std::path::Path, frames: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample(((i % 100) as i16) * 300).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn linked_source(path: &std::path::Path, frames: Arc<AtomicU64>) -> FileSource {
        let mut decoder = Decoder::new();
        decoder.set_output_ready(Box::new(move |_format| {
            let frames = frames.clone();
            Ok(Arc::new(move |buffer: AudioBuffer| {
                frames.fetch_add(buffer.frames(), Ordering::SeqCst);
            }) as SampleCallback)
        }));
        FileSource::new(path, decoder)
    }

    #[test]
    fn delivers_the_whole_file_then_posts_eos() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        write_wav(&path, 20_000);

        let frames = Arc::new(AtomicU64::new(0));
        let mut source = linked_source(&path, frames.clone());

        let bus = Bus::new();
        let eos = Arc::new(AtomicBool::new(false));
        let seen = eos.clone();
        bus.set_sync_handler(Arc::new(move |message| {
            if matches!(message.kind, MessageKind::Eos) {
                seen.store(true, Ordering::SeqCst);
            }
        }));

        source.start(&bus).unwrap();
        wait_for(|| eos.load(Ordering::SeqCst));
        source.stop().unwrap();

        assert_eq!(frames.load(Ordering::SeqCst), 20_000);
    }

    #[test]
    fn missing_file_posts_a_stream_error() {
        let frames = Arc::new(AtomicU64::new(0));
        let mut source = linked_source(std::path::Path::new("/nonexistent/input.wav"), frames);

        let bus = Bus::new();
        let failed = Arc::new(AtomicBool::new(false));
        let seen = failed.clone();
        bus.set_sync_handler(Arc::new(move |message| {
            if matches!(message.kind, MessageKind::Error(_)) {
                seen.store(true, Ordering::SeqCst);
            }
        }));

        source.start(&bus).unwrap();
        wait_for(|| failed.load(Ordering::SeqCst));
        source.stop().unwrap();
    }

    #[test]
    fn restart_replays_from_the_beginning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        write_wav(&path, 5_000);

        let frames = Arc::new(AtomicU64::new(0));
        let mut source = linked_source(&path, frames.clone());
        let bus = Bus::new();

        source.start(&bus).unwrap();
        wait_for(|| !source.running.load(Ordering::SeqCst));
        source.stop().unwrap();
        assert_eq!(frames.load(Ordering::SeqCst), 5_000);

        source.start(&bus).unwrap();
        wait_for(|| !source.running.load(Ordering::SeqCst));
        source.stop().unwrap();
        assert_eq!(frames.load(Ordering::SeqCst), 10_000);
    }

    #[test]
    fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        write_wav(&path, 1_000);

        let frames = Arc::new(AtomicU64::new(0));
        let mut source = linked_source(&path, frames);

        source.stop().unwrap();
        source.start(&Bus::new()).unwrap();
        source.stop().unwrap();
        source.stop().unwrap();
    }

    #[test]
    fn fixed_link_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        write_wav(&path, 16);

        let mut source = FileSource::new(&path, Decoder::new());
        let result = source.link(Arc::new(|_| {}));
        assert!(matches!(result, Err(ChunkerError::LinkFailed { .. })));
    }
}
