use std::sync::Arc;

use crate::models::audio::AudioBuffer;
use crate::models::error::ChunkerError;
use crate::pipeline::bus::Bus;

/// Entry point of the downstream chain. Sources push decoded interleaved
/// f32 buffers into it from their data thread.
pub type SampleCallback = Arc<dyn Fn(AudioBuffer) + Send + Sync>;

/// A pipeline source: the capture device, a file reader, or anything custom.
///
/// Sources deliver audio on their own data thread and report end-of-stream
/// and errors through the bus handed to `start`. `start` may be called again
/// after `stop`; for finite sources a restart delivers the stream from the
/// beginning.
pub trait SourceProvider: Send {
    /// Stage name used in log and error messages.
    fn name(&self) -> &str;

    /// Fixed link: where this source delivers its audio once started.
    ///
    /// Sources that only learn their output format at runtime (file input
    /// through a decoder) refuse a fixed link and are linked through the
    /// decoder's output-ready handler instead.
    fn link(&mut self, downstream: SampleCallback) -> Result<(), ChunkerError>;

    /// Start delivering audio. The callback linked earlier fires on a
    /// dedicated data thread — keep downstream processing minimal.
    fn start(&mut self, bus: &Bus) -> Result<(), ChunkerError>;

    /// Suspend delivery without releasing the device or file.
    fn pause(&mut self) -> Result<(), ChunkerError>;

    /// Resume delivery after a pause.
    fn resume(&mut self) -> Result<(), ChunkerError>;

    /// Stop delivery and release resources. Idempotent.
    fn stop(&mut self) -> Result<(), ChunkerError>;
}
