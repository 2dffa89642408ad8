use crate::models::error::ChunkerError;

/// Event delegate for chunker session notifications.
///
/// Methods run on data-path or dispatcher threads, never on the control
/// thread. Implementations must stay quick and must not call session
/// control operations (`play`/`pause`/`stop`) from inside a notification.
pub trait ChunkerDelegate: Send + Sync {
    /// The derived playing flag flipped. Fired exactly once per actual
    /// change; repeated transitions to the same value stay silent.
    fn on_playing_changed(&self, playing: bool) {
        let _ = playing;
    }

    /// A silence-triggered chunk boundary was committed, strictly after the
    /// writer was told to split.
    fn on_chunked(&self) {}

    /// A fatal stream error; the session stops itself right after.
    fn on_error(&self, error: &ChunkerError) {
        let _ = error;
    }
}
