use thiserror::Error;

/// Errors that can occur while building or running a chunker.
///
/// Construction problems (`MissingConfiguration`, `InvalidConfiguration`,
/// `UnknownElement`, `LinkFailed`, `DeviceNotAvailable`) are returned
/// synchronously by the builder. `Stream` errors surface through the bus
/// once the stream is running and are fatal for the current run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("unknown element: {0}")]
    UnknownElement(String),

    #[error("cannot link {upstream} to {downstream}: {reason}")]
    LinkFailed {
        upstream: String,
        downstream: String,
        reason: String,
    },

    #[error("device not available: {0}")]
    DeviceNotAvailable(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("stream error from {stage}: {message}")]
    Stream { stage: String, message: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}
