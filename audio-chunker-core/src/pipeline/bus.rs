use std::sync::Arc;

use parking_lot::RwLock;

use super::params::StageParams;
use crate::models::state::PlaybackState;

/// A control message posted by a pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageMessage {
    /// Name of the posting stage.
    pub source: String,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// The stream finished naturally. Not an error.
    Eos,
    /// A stage failed; fatal for the running stream.
    Error(String),
    /// The data path entered a new run state.
    StateChanged(PlaybackState),
    /// Stage-defined message with typed fields.
    Element { name: String, fields: StageParams },
}

impl StageMessage {
    pub fn eos(source: &str) -> Self {
        Self {
            source: source.into(),
            kind: MessageKind::Eos,
        }
    }

    pub fn error(source: &str, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: MessageKind::Error(message.into()),
        }
    }

    pub fn state_changed(source: &str, state: PlaybackState) -> Self {
        Self {
            source: source.into(),
            kind: MessageKind::StateChanged(state),
        }
    }

    pub fn element(source: &str, name: &str, fields: StageParams) -> Self {
        Self {
            source: source.into(),
            kind: MessageKind::Element {
                name: name.into(),
                fields,
            },
        }
    }
}

/// Handler invoked inline for every posted message.
pub type SyncHandler = Arc<dyn Fn(&StageMessage) + Send + Sync>;

/// Message channel between the data path and the session.
///
/// The sync handler runs on the posting thread, which for stream events is
/// a data-path thread executing inline with media delivery. Handlers must
/// stay quick, must not block on I/O, and must not call pipeline state
/// transitions.
#[derive(Clone, Default)]
pub struct Bus {
    handler: Arc<RwLock<Option<SyncHandler>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the sync handler, replacing any previous one.
    pub fn set_sync_handler(&self, handler: SyncHandler) {
        *self.handler.write() = Some(handler);
    }

    pub fn clear_sync_handler(&self) {
        *self.handler.write() = None;
    }

    pub fn post(&self, message: StageMessage) {
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler(&message),
            None => log::trace!("unhandled bus message from {}", message.source),
        }
    }
}
