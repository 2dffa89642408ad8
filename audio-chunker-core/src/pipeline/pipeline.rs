use std::sync::Arc;

use parking_lot::Mutex;

use super::bus::{Bus, StageMessage};
use crate::models::error::ChunkerError;
use crate::models::state::PlaybackState;
use crate::stages::resample::Resampler;
use crate::stages::silence::SilenceDetector;
use crate::stages::writer::SegmentWriter;
use crate::traits::source::SourceProvider;

/// Stage name used on the bus for pipeline-level messages.
pub const PIPELINE_STAGE: &str = "pipeline";

/// The assembled processing topology.
///
/// Exclusively owned by the session and torn down exactly once. Run-state
/// transitions are serialized on an internal lock and must never be called
/// from a data-path thread: `stop` joins the source's worker, and a worker
/// cannot join itself. Terminal events therefore route through the
/// session's dispatcher.
pub struct Pipeline {
    bus: Bus,
    source: Mutex<Box<dyn SourceProvider>>,
    silence: Arc<Mutex<SilenceDetector>>,
    resampler: Arc<Mutex<Resampler>>,
    writer: Arc<SegmentWriter>,
    run_state: Mutex<PlaybackState>,
}

impl Pipeline {
    pub(crate) fn new(
        bus: Bus,
        source: Box<dyn SourceProvider>,
        silence: Arc<Mutex<SilenceDetector>>,
        resampler: Arc<Mutex<Resampler>>,
        writer: Arc<SegmentWriter>,
    ) -> Self {
        Self {
            bus,
            source: Mutex::new(source),
            silence,
            resampler,
            writer,
            run_state: Mutex::new(PlaybackState::Stopped),
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn writer(&self) -> &Arc<SegmentWriter> {
        &self.writer
    }

    /// Enter the running state: start the source on first entry, resume
    /// after a pause.
    pub fn play(&self) -> Result<(), ChunkerError> {
        let mut state = self.run_state.lock();
        match *state {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Paused => self.source.lock().resume()?,
            PlaybackState::Stopped => self.source.lock().start(&self.bus)?,
        }
        *state = PlaybackState::Playing;
        self.bus
            .post(StageMessage::state_changed(PIPELINE_STAGE, *state));
        Ok(())
    }

    /// Suspend the data path without releasing the source.
    pub fn pause(&self) -> Result<(), ChunkerError> {
        let mut state = self.run_state.lock();
        if *state != PlaybackState::Playing {
            return Ok(());
        }
        self.source.lock().pause()?;
        *state = PlaybackState::Paused;
        self.bus
            .post(StageMessage::state_changed(PIPELINE_STAGE, *state));
        Ok(())
    }

    /// Full reset: stop the source, drain the detector's tail through the
    /// chain, flush the writer, rewind every stage. Idempotent.
    pub fn stop(&self) -> Result<(), ChunkerError> {
        let mut state = self.run_state.lock();
        if *state == PlaybackState::Stopped {
            return Ok(());
        }
        *state = PlaybackState::Stopped;

        let mut result = self.source.lock().stop();

        // Flush the partial analysis window so the last chunk keeps its tail.
        if let Some(tail) = self.silence.lock().drain() {
            let tail = self.resampler.lock().process(tail);
            if let Err(e) = self.writer.write(&tail) {
                log::error!("failed to flush stream tail: {e}");
                result = result.and(Err(e));
            }
        }

        self.silence.lock().reset();
        self.resampler.lock().reset();

        if let Err(e) = self.writer.finalize_all() {
            log::error!("failed to finalize chunks: {e}");
            result = result.and(Err(e));
        }

        self.bus
            .post(StageMessage::state_changed(PIPELINE_STAGE, *state));
        result
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("pipeline teardown failed: {e}");
        }
    }
}
