use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};

use super::dispatcher::{DispatchTask, Dispatcher};
use crate::models::chunk::ChunkInfo;
use crate::models::config::ChunkerConfig;
use crate::models::error::ChunkerError;
use crate::models::state::PlaybackState;
use crate::pipeline::builder::PipelineBuilder;
use crate::pipeline::bus::{MessageKind, StageMessage};
use crate::pipeline::pipeline::Pipeline;
use crate::stages::silence::{SILENCE_DETECTED_FIELD, SILENCE_MESSAGE};
use crate::stages::writer::SegmentWriter;
use crate::traits::delegate::ChunkerDelegate;
use crate::traits::source::SourceProvider;

/// State shared between control-thread operations and the bus sync handler.
/// One lock discipline covers both sides.
struct Shared {
    state: Mutex<PlaybackState>,
    delegate: RwLock<Option<Arc<dyn ChunkerDelegate>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(PlaybackState::Stopped),
            delegate: RwLock::new(None),
        }
    }

    /// Move to `next`, reporting the new flag value iff the derived playing
    /// flag actually flipped.
    fn transition(&self, next: PlaybackState) -> Option<bool> {
        let mut state = self.state.lock();
        let was = state.is_playing();
        *state = next;
        let now = next.is_playing();
        (was != now).then_some(now)
    }

    fn delegate(&self) -> Option<Arc<dyn ChunkerDelegate>> {
        self.delegate.read().clone()
    }

    /// Fire the playing notification outside any lock.
    fn notify_playing(&self, flip: Option<bool>) {
        if let (Some(playing), Some(delegate)) = (flip, self.delegate()) {
            delegate.on_playing_changed(playing);
        }
    }
}

/// Splits an audio stream into chunks at detected silence.
///
/// The session owns the pipeline, drives its lifecycle, and turns pipeline
/// events into delegate notifications: the derived playing flag (one
/// notification per actual flip), the per-boundary chunk event, and fatal
/// errors. End of stream and fatal errors stop the session on their own —
/// no external call is needed, and the source is released either way.
///
/// Use `mic`-style live input through a capture backend's
/// [`SourceProvider`] (see `audio-chunker-cpal`); file input decodes and
/// chunks faster than real time.
pub struct ChunkerSession {
    pipeline: Arc<Pipeline>,
    writer: Arc<SegmentWriter>,
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
}

impl ChunkerSession {
    /// Build a session from configuration. Sufficient for file input; live
    /// capture needs [`ChunkerSession::with_source`].
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkerError> {
        Self::build(PipelineBuilder::new(config))
    }

    /// Build a session with an injected source: a capture backend for live
    /// input, or any custom [`SourceProvider`].
    pub fn with_source(
        config: ChunkerConfig,
        source: Box<dyn SourceProvider>,
    ) -> Result<Self, ChunkerError> {
        Self::build(PipelineBuilder::new(config).live_source(source))
    }

    fn build(builder: PipelineBuilder) -> Result<Self, ChunkerError> {
        let (pipeline, writer) = builder.build()?;
        let pipeline = Arc::new(pipeline);
        let shared = Arc::new(Shared::new());
        let dispatcher = Dispatcher::spawn(Arc::clone(&pipeline))?;

        install_bus_handler(&pipeline, &shared, &writer, dispatcher.sender());

        Ok(Self {
            pipeline,
            writer,
            shared,
            dispatcher,
        })
    }

    /// Stopped or paused → playing.
    ///
    /// The flag is updated first so a stream that ends immediately still
    /// observes the playing state it is leaving; a failed start reverts it.
    pub fn play(&self) -> Result<(), ChunkerError> {
        let flip = self.shared.transition(PlaybackState::Playing);
        self.shared.notify_playing(flip);

        if let Err(e) = self.pipeline.play() {
            let flip = self.shared.transition(PlaybackState::Stopped);
            self.shared.notify_playing(flip);
            return Err(e);
        }
        Ok(())
    }

    /// Playing → paused. Pausing a stopped session is a caller error;
    /// pausing a paused one is a no-op.
    pub fn pause(&self) -> Result<(), ChunkerError> {
        {
            let state = self.shared.state.lock();
            match *state {
                PlaybackState::Stopped => {
                    return Err(ChunkerError::InvalidState(
                        "cannot pause a stopped chunker".into(),
                    ))
                }
                PlaybackState::Paused => return Ok(()),
                PlaybackState::Playing => {}
            }
        }

        let flip = self.shared.transition(PlaybackState::Paused);
        self.shared.notify_playing(flip);

        if let Err(e) = self.pipeline.pause() {
            let flip = self.shared.transition(PlaybackState::Playing);
            self.shared.notify_playing(flip);
            return Err(e);
        }
        Ok(())
    }

    /// Any state → stopped, with a full pipeline reset. Idempotent and safe
    /// to call at any time. The notification fires before the reset.
    pub fn stop(&self) -> Result<(), ChunkerError> {
        let flip = self.shared.transition(PlaybackState::Stopped);
        self.shared.notify_playing(flip);
        self.pipeline.stop()
    }

    /// Current value of the derived playing flag. Never blocks on the data
    /// path.
    pub fn is_playing(&self) -> bool {
        self.shared.state.lock().is_playing()
    }

    /// Install the event delegate, dropping any previous one.
    pub fn set_delegate(&self, delegate: Arc<dyn ChunkerDelegate>) {
        *self.shared.delegate.write() = Some(delegate);
    }

    pub fn clear_delegate(&self) {
        *self.shared.delegate.write() = None;
    }

    /// Records of the chunks finalized in the current (or last) run.
    pub fn chunks(&self) -> Vec<ChunkInfo> {
        self.writer.chunks()
    }
}

impl Drop for ChunkerSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("stop during teardown failed: {e}");
        }
        // The dispatcher drops after this, joining its worker.
    }
}

/// The bus sync handler: the critical section translating pipeline events
/// into session actions. Runs inline on data-path threads, so it only
/// touches the shared state, the writer handle, and the delegate — pipeline
/// transitions are deferred to the dispatcher.
fn install_bus_handler(
    pipeline: &Arc<Pipeline>,
    shared: &Arc<Shared>,
    writer: &Arc<SegmentWriter>,
    teardown: Sender<DispatchTask>,
) {
    let shared = Arc::clone(shared);
    let writer = Arc::clone(writer);

    pipeline.bus().set_sync_handler(Arc::new(move |message: &StageMessage| {
        match &message.kind {
            MessageKind::Eos => {
                log::debug!("end of stream from {}", message.source);
                let flip = shared.transition(PlaybackState::Stopped);
                shared.notify_playing(flip);
                let _ = teardown.send(DispatchTask::Teardown);
            }
            MessageKind::Error(text) => {
                log::error!("{}: {text}", message.source);
                let error = ChunkerError::Stream {
                    stage: message.source.clone(),
                    message: text.clone(),
                };
                // Surface the error to the owner before the state change.
                if let Some(delegate) = shared.delegate() {
                    delegate.on_error(&error);
                }
                let flip = shared.transition(PlaybackState::Stopped);
                shared.notify_playing(flip);
                let _ = teardown.send(DispatchTask::Teardown);
            }
            MessageKind::Element { name, fields } if name == SILENCE_MESSAGE => {
                if fields.get_bool(SILENCE_DETECTED_FIELD) != Some(true) {
                    return;
                }
                log::debug!("chunking at detected silence");
                // Split first, then announce. Overlapping requests
                // serialize inside the writer.
                if let Err(e) = writer.split_now() {
                    log::error!("split failed: {e}");
                    return;
                }
                if let Some(delegate) = shared.delegate() {
                    delegate.on_chunked();
                }
            }
            MessageKind::StateChanged(state) => {
                // Pipeline-reported state is applied idempotently: a value
                // the flag already reflects stays silent.
                let flip = shared.transition(*state);
                shared.notify_playing(flip);
            }
            MessageKind::Element { .. } => {}
        }
    }));
}
