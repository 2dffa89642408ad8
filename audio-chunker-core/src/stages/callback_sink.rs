use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio::AudioBuffer;

/// Stage name used on the bus.
pub const CALLBACK_SINK_STAGE: &str = "callback-sink";

pub type BufferCallback = Arc<dyn Fn(&AudioBuffer) + Send + Sync>;
pub type SegmentCallback = Arc<dyn Fn(&[AudioBuffer]) + Send + Sync>;

struct SinkState {
    buffer_cb: Option<BufferCallback>,
    segment_cb: Option<SegmentCallback>,
    segment: Vec<AudioBuffer>,
}

/// In-process sink: collects the open segment's buffers and hands them to
/// user callbacks instead of writing files.
///
/// The two callbacks are independent and optional. Installing a callback
/// drops the previously installed one, releasing whatever it captured.
/// Callbacks run synchronously on the thread delivering the audio and must
/// not block; a callback that needs a buffer beyond the call keeps its own
/// clone.
///
/// Only the open segment is retained. Closing a segment hands the ordered
/// batch to the per-segment callback and clears it, whether or not a
/// callback is installed.
pub struct CallbackSink {
    state: Mutex<SinkState>,
}

impl CallbackSink {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SinkState {
                buffer_cb: None,
                segment_cb: None,
                segment: Vec::new(),
            }),
        }
    }

    /// Install the per-buffer callback, dropping the previous one.
    pub fn set_buffer_callback(&self, callback: impl Fn(&AudioBuffer) + Send + Sync + 'static) {
        self.state.lock().buffer_cb = Some(Arc::new(callback));
    }

    pub fn clear_buffer_callback(&self) {
        self.state.lock().buffer_cb = None;
    }

    /// Install the per-segment callback, dropping the previous one.
    pub fn set_segment_callback(&self, callback: impl Fn(&[AudioBuffer]) + Send + Sync + 'static) {
        self.state.lock().segment_cb = Some(Arc::new(callback));
    }

    pub fn clear_segment_callback(&self) {
        self.state.lock().segment_cb = None;
    }

    /// Number of buffers in the open segment.
    pub fn pending(&self) -> usize {
        self.state.lock().segment.len()
    }

    /// Append a buffer to the open segment and notify the buffer callback.
    pub(crate) fn render(&self, buffer: AudioBuffer) {
        let callback = {
            let mut state = self.state.lock();
            state.segment.push(buffer.clone());
            state.buffer_cb.clone()
        };
        if let Some(callback) = callback {
            callback(&buffer);
        }
    }

    /// Close the open segment: deliver the ordered batch, then clear it.
    pub(crate) fn flush(&self) {
        let (callback, batch) = {
            let mut state = self.state.lock();
            (
                state.segment_cb.clone(),
                std::mem::take(&mut state.segment),
            )
        };
        if let Some(callback) = callback {
            callback(&batch);
        }
    }
}

impl Default for CallbackSink {
    fn default() -> Self {
        Self::new()
    }
}
