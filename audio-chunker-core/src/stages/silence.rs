use std::time::Duration;

use crate::models::audio::{AudioBuffer, AudioFormat};
use crate::pipeline::params::StageParams;

/// Stage name used on the bus.
pub const SILENCE_STAGE: &str = "silence-detector";
/// Name of the element message posted when a silence run is confirmed.
pub const SILENCE_MESSAGE: &str = "silence-detect";
/// Boolean message field: a silence run crossed the minimum duration.
pub const SILENCE_DETECTED_FIELD: &str = "silence-detected";
/// Message field carrying the confirmed run length in nanoseconds.
pub const SILENCE_DURATION_FIELD: &str = "silence-ns";

/// One item of detector output, in stream order.
#[derive(Debug)]
pub enum SilenceItem {
    /// Audio surviving elision.
    Voiced(AudioBuffer),
    /// A silence run crossed the minimum duration. Emitted once per run,
    /// re-armed when voice resumes.
    Silence(SilenceEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceEvent {
    /// Length of the run at the moment it was confirmed.
    pub duration: Duration,
}

enum RunState {
    Voiced,
    Silent { frames: u64, reported: bool },
}

/// Windowed silence detector.
///
/// Audio is analyzed in windows of `hysteresis` frames. A window whose RMS
/// level falls below the threshold counts as silent; consecutive silent
/// windows accumulate into a run, and a run reaching the minimum silence
/// duration is confirmed exactly once. Silent windows are elided from the
/// output when `remove` is set, so downstream chunks contain only voiced
/// audio. A partial trailing window is carried into the next buffer;
/// `drain` releases it at end of stream.
pub struct SilenceDetector {
    threshold_db: f32,
    window_frames: usize,
    min_silence: Duration,
    report: bool,
    remove: bool,
    state: RunState,
    carry: Vec<f32>,
    format: Option<AudioFormat>,
}

impl SilenceDetector {
    /// Build from stage parameters: `threshold` (dB, int), `hysteresis`
    /// (frames, uint), `minimum-silence-ns` (uint), `silent` (bool,
    /// suppresses messages when true), `remove` (bool).
    pub fn from_params(params: &StageParams) -> Self {
        Self {
            threshold_db: params.get_int("threshold").unwrap_or(-60) as f32,
            window_frames: params.get_uint("hysteresis").unwrap_or(480).max(1) as usize,
            min_silence: Duration::from_nanos(
                params.get_uint("minimum-silence-ns").unwrap_or(500_000_000),
            ),
            report: !params.get_bool("silent").unwrap_or(false),
            remove: params.get_bool("remove").unwrap_or(true),
            state: RunState::Voiced,
            carry: Vec::new(),
            format: None,
        }
    }

    /// Feed one buffer through the detector.
    pub fn process(&mut self, buffer: AudioBuffer) -> Vec<SilenceItem> {
        if buffer.is_empty() {
            return Vec::new();
        }

        let format = buffer.format();
        if self.format != Some(format) {
            // Format change mid-stream restarts windowing.
            self.carry.clear();
            self.state = RunState::Voiced;
            self.format = Some(format);
        }

        let channels = usize::from(format.channels.max(1));
        let window_len = self.window_frames * channels;
        let min_silence_frames = format.frames_in(self.min_silence);

        let mut samples = std::mem::take(&mut self.carry);
        samples.extend_from_slice(buffer.samples());

        let mut items = Vec::new();
        let mut voiced: Vec<f32> = Vec::new();
        let mut offset = 0;

        while offset + window_len <= samples.len() {
            let window = &samples[offset..offset + window_len];
            offset += window_len;

            if rms_db(window) < self.threshold_db {
                let frames = match &mut self.state {
                    RunState::Silent { frames, .. } => {
                        *frames += self.window_frames as u64;
                        *frames
                    }
                    RunState::Voiced => {
                        self.state = RunState::Silent {
                            frames: self.window_frames as u64,
                            reported: false,
                        };
                        self.window_frames as u64
                    }
                };

                if let RunState::Silent { reported, .. } = &mut self.state {
                    if !*reported && self.report && frames >= min_silence_frames {
                        *reported = true;
                        if !voiced.is_empty() {
                            items.push(SilenceItem::Voiced(AudioBuffer::new(
                                format,
                                std::mem::take(&mut voiced),
                            )));
                        }
                        items.push(SilenceItem::Silence(SilenceEvent {
                            duration: Duration::from_secs_f64(
                                frames as f64 / format.sample_rate as f64,
                            ),
                        }));
                    }
                }

                if !self.remove {
                    voiced.extend_from_slice(window);
                }
            } else {
                self.state = RunState::Voiced;
                voiced.extend_from_slice(window);
            }
        }

        self.carry = samples.split_off(offset);

        if !voiced.is_empty() {
            items.push(SilenceItem::Voiced(AudioBuffer::new(format, voiced)));
        }
        items
    }

    /// Release the partial trailing window, treating it as voiced.
    pub fn drain(&mut self) -> Option<AudioBuffer> {
        let format = self.format?;
        if self.carry.is_empty() {
            return None;
        }
        Some(AudioBuffer::new(format, std::mem::take(&mut self.carry)))
    }

    /// Rewind to the initial state for a fresh run.
    pub fn reset(&mut self) {
        self.carry.clear();
        self.state = RunState::Voiced;
        self.format = None;
    }
}

fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return -100.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt() as f32;
    if rms <= 0.0 {
        return -100.0;
    }
    20.0 * rms.log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::params::ParamValue;
    use approx::assert_relative_eq;

    const RATE: u32 = 8_000;

    fn detector(min_silence_ms: u64) -> SilenceDetector {
        let params = StageParams::new()
            .with("threshold", ParamValue::Int(-60))
            .with("hysteresis", ParamValue::UInt(480))
            .with(
                "minimum-silence-ns",
                ParamValue::UInt(min_silence_ms * 1_000_000),
            )
            .with("silent", ParamValue::Bool(false))
            .with("remove", ParamValue::Bool(true));
        SilenceDetector::from_params(&params)
    }

    fn tone(frames: usize) -> AudioBuffer {
        let samples: Vec<f32> = (0..frames)
            .map(|i| (i as f32 * 0.35).sin() * 0.5)
            .collect();
        AudioBuffer::new(AudioFormat::mono(RATE), samples)
    }

    fn quiet(frames: usize) -> AudioBuffer {
        AudioBuffer::new(AudioFormat::mono(RATE), vec![0.0; frames])
    }

    fn voiced_frames(items: &[SilenceItem]) -> u64 {
        items
            .iter()
            .map(|item| match item {
                SilenceItem::Voiced(buf) => buf.frames(),
                SilenceItem::Silence(_) => 0,
            })
            .sum()
    }

    fn event_count(items: &[SilenceItem]) -> usize {
        items
            .iter()
            .filter(|item| matches!(item, SilenceItem::Silence(_)))
            .count()
    }

    #[test]
    fn voiced_audio_passes_through() {
        let mut detector = detector(500);
        let items = detector.process(tone(4_800));
        assert_eq!(event_count(&items), 0);
        assert_eq!(voiced_frames(&items), 4_800);
    }

    #[test]
    fn rms_db_of_silence_is_floor() {
        assert_relative_eq!(rms_db(&[0.0; 480]), -100.0);
    }

    #[test]
    fn rms_db_of_full_scale_is_zero() {
        assert_relative_eq!(rms_db(&[1.0; 480]), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn long_silence_confirms_exactly_once() {
        let mut detector = detector(500);
        // 500 ms at 8 kHz = 4000 frames; feed 600 ms of silence.
        let items = detector.process(quiet(4_800));
        assert_eq!(event_count(&items), 1);
        // Silence is elided from the output.
        assert_eq!(voiced_frames(&items), 0);

        // Still the same run: no further event.
        let items = detector.process(quiet(4_800));
        assert_eq!(event_count(&items), 0);
    }

    #[test]
    fn short_silence_does_not_confirm() {
        let mut detector = detector(500);
        let items = detector.process(quiet(1_920)); // 240 ms
        assert_eq!(event_count(&items), 0);
    }

    #[test]
    fn voice_rearms_the_run() {
        let mut detector = detector(500);
        assert_eq!(event_count(&detector.process(quiet(4_800))), 1);
        detector.process(tone(960));
        assert_eq!(event_count(&detector.process(quiet(4_800))), 1);
    }

    #[test]
    fn run_accumulates_across_buffers() {
        let mut detector = detector(500);
        // 3 x 200 ms of silence; the run crosses 500 ms in the third buffer.
        assert_eq!(event_count(&detector.process(quiet(1_600))), 0);
        assert_eq!(event_count(&detector.process(quiet(1_600))), 0);
        let items = detector.process(quiet(1_600));
        assert_eq!(event_count(&items), 1);
    }

    #[test]
    fn voiced_audio_before_confirmation_precedes_the_event() {
        let mut detector = detector(500);
        detector.process(quiet(3_840)); // run at 480 ms, one window short
        let mut samples = tone(480).samples().to_vec();
        samples.extend_from_slice(quiet(480).samples());
        // Voiced window resets the run; the following silence starts a new
        // one, so no event yet.
        let items = detector.process(AudioBuffer::new(AudioFormat::mono(RATE), samples));
        assert_eq!(event_count(&items), 0);
        assert_eq!(voiced_frames(&items), 480);
    }

    #[test]
    fn partial_window_is_carried_and_drained() {
        let mut detector = detector(500);
        let items = detector.process(tone(700));
        // One full window emitted, 220 frames carried.
        assert_eq!(voiced_frames(&items), 480);
        let tail = detector.drain().expect("carry should drain");
        assert_eq!(tail.frames(), 220);
        assert!(detector.drain().is_none());
    }

    #[test]
    fn event_reports_run_duration() {
        let mut detector = detector(500);
        let items = detector.process(quiet(4_800));
        let event = items
            .iter()
            .find_map(|item| match item {
                SilenceItem::Silence(event) => Some(*event),
                _ => None,
            })
            .expect("one confirmed run");
        // Confirmed at the first window at or past 4000 frames.
        assert_relative_eq!(event.duration.as_secs_f64(), 4_320.0 / 8_000.0, epsilon = 1e-9);
    }

    #[test]
    fn remove_disabled_keeps_silent_audio() {
        let params = StageParams::new()
            .with("remove", ParamValue::Bool(false))
            .with("minimum-silence-ns", ParamValue::UInt(500_000_000));
        let mut detector = SilenceDetector::from_params(&params);
        let items = detector.process(quiet(4_800));
        assert_eq!(event_count(&items), 1);
        assert_eq!(voiced_frames(&items), 4_800);
    }

    #[test]
    fn silent_mode_suppresses_events() {
        let params = StageParams::new()
            .with("silent", ParamValue::Bool(true))
            .with("minimum-silence-ns", ParamValue::UInt(500_000_000));
        let mut detector = SilenceDetector::from_params(&params);
        let items = detector.process(quiet(8_000));
        assert_eq!(event_count(&items), 0);
    }
}
