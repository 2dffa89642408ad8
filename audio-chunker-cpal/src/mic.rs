//! cpal microphone capture source.
//!
//! Opens the default (or a named) input device and delivers f32 buffers to
//! the linked chain from cpal's callback thread. `cpal::Stream` is not
//! `Send`, so a dedicated thread owns the stream for its whole life and a
//! command channel carries pause/resume/stop.

use std::thread;
use std::time::Duration;

use audio_chunker_core::pipeline::bus::{Bus, StageMessage};
use audio_chunker_core::{AudioBuffer, AudioFormat, ChunkerError, SampleCallback, SourceProvider};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

/// Stage name used on the bus.
pub const MIC_STAGE: &str = "mic-source";

enum StreamCommand {
    Pause,
    Resume,
    Stop,
}

/// Live capture source over cpal.
///
/// The device format (rate, channels, sample type) is whatever the device
/// offers; the pipeline's resampler normalizes the rate downstream.
pub struct MicSource {
    preferred_device: Option<String>,
    chain: Option<SampleCallback>,
    commands: Option<Sender<StreamCommand>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl MicSource {
    /// Capture from the system default input device.
    pub fn default_device() -> Self {
        Self {
            preferred_device: None,
            chain: None,
            commands: None,
            worker: None,
        }
    }

    /// Capture from a specific input device by name.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            preferred_device: Some(name.into()),
            chain: None,
            commands: None,
            worker: None,
        }
    }

    /// Input device names, for selection UIs.
    pub fn list_devices() -> Result<Vec<String>, ChunkerError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| ChunkerError::DeviceNotAvailable(format!("no input devices: {e}")))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

impl SourceProvider for MicSource {
    fn name(&self) -> &str {
        MIC_STAGE
    }

    fn link(&mut self, downstream: SampleCallback) -> Result<(), ChunkerError> {
        self.chain = Some(downstream);
        Ok(())
    }

    fn start(&mut self, bus: &Bus) -> Result<(), ChunkerError> {
        if self.commands.is_some() {
            return Ok(());
        }
        let chain = self.chain.clone().ok_or_else(|| ChunkerError::LinkFailed {
            upstream: MIC_STAGE.into(),
            downstream: "silence-detector".into(),
            reason: "source is not linked".into(),
        })?;

        // Reap a worker left over from a previous run.
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        let (cmd_tx, cmd_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let preferred = self.preferred_device.clone();
        let bus = bus.clone();

        let worker = thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || capture_loop(preferred, chain, bus, cmd_rx, ready_tx))
            .map_err(|e| ChunkerError::Unknown(format!("failed to spawn capture thread: {e}")))?;
        self.worker = Some(worker);

        match ready_rx.recv_timeout(Duration::from_secs(10)) {
            Ok(Ok(())) => {
                self.commands = Some(cmd_tx);
                Ok(())
            }
            Ok(Err(e)) => {
                if let Some(worker) = self.worker.take() {
                    let _ = worker.join();
                }
                Err(e)
            }
            Err(_) => Err(ChunkerError::DeviceNotAvailable(
                "timed out waiting for the capture stream".into(),
            )),
        }
    }

    fn pause(&mut self) -> Result<(), ChunkerError> {
        if let Some(commands) = &self.commands {
            let _ = commands.send(StreamCommand::Pause);
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<(), ChunkerError> {
        if let Some(commands) = &self.commands {
            let _ = commands.send(StreamCommand::Resume);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ChunkerError> {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(StreamCommand::Stop);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        Ok(())
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Owns the stream for its whole life on one thread.
fn capture_loop(
    preferred: Option<String>,
    chain: SampleCallback,
    bus: Bus,
    commands: Receiver<StreamCommand>,
    ready: Sender<Result<(), ChunkerError>>,
) {
    let stream = match build_stream(preferred, chain, &bus) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(ChunkerError::DeviceNotAvailable(format!(
            "failed to start capture: {e}"
        ))));
        return;
    }
    let _ = ready.send(Ok(()));

    for command in commands {
        match command {
            StreamCommand::Pause => {
                if let Err(e) = stream.pause() {
                    bus.post(StageMessage::error(MIC_STAGE, format!("pause failed: {e}")));
                }
            }
            StreamCommand::Resume => {
                if let Err(e) = stream.play() {
                    bus.post(StageMessage::error(MIC_STAGE, format!("resume failed: {e}")));
                }
            }
            StreamCommand::Stop => break,
        }
    }
    // The stream drops here, releasing the device.
}

fn build_stream(
    preferred: Option<String>,
    chain: SampleCallback,
    bus: &Bus,
) -> Result<cpal::Stream, ChunkerError> {
    let host = cpal::default_host();
    let device = match &preferred {
        Some(name) => host
            .input_devices()
            .map_err(|e| ChunkerError::DeviceNotAvailable(format!("no input devices: {e}")))?
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
            .ok_or_else(|| {
                ChunkerError::DeviceNotAvailable(format!("input device '{name}' not found"))
            })?,
        None => host.default_input_device().ok_or_else(|| {
            ChunkerError::DeviceNotAvailable("no default input device".into())
        })?,
    };

    let default_config = device.default_input_config().map_err(|e| {
        ChunkerError::DeviceNotAvailable(format!("no default input config: {e}"))
    })?;
    let sample_format = default_config.sample_format();
    let config: StreamConfig = default_config.into();
    let format = AudioFormat::new(config.sample_rate.0, config.channels);
    let channels = usize::from(config.channels.max(1));

    log::debug!(
        "capture config: {:?}, {} Hz, {} channel(s)",
        sample_format,
        format.sample_rate,
        channels
    );

    let err_fn = {
        let bus = bus.clone();
        move |err: cpal::StreamError| {
            bus.post(StageMessage::error(MIC_STAGE, err.to_string()));
        }
    };

    // Convert every supported sample type to f32 up front so downstream
    // stages stay format-agnostic.
    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                deliver(&chain, format, data.to_vec());
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples = data.iter().map(|&s| f32::from(s) / 32_768.0).collect();
                deliver(&chain, format, samples);
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let samples = data
                    .iter()
                    .map(|&s| (f32::from(s) - 32_768.0) / 32_768.0)
                    .collect();
                deliver(&chain, format, samples);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(ChunkerError::Unknown(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    };

    stream.map_err(|e| ChunkerError::DeviceNotAvailable(format!("failed to open input stream: {e}")))
}

fn deliver(chain: &SampleCallback, format: AudioFormat, samples: Vec<f32>) {
    if !samples.is_empty() {
        chain(AudioBuffer::new(format, samples));
    }
}
