use std::sync::Arc;

use parking_lot::Mutex;

use super::bus::{Bus, StageMessage};
use super::params::{ParamValue, StageParams};
use super::pipeline::Pipeline;
use crate::models::audio::AudioFormat;
use crate::models::config::{ChunkerConfig, ChunkerInput};
use crate::models::error::ChunkerError;
use crate::stages::decoder::{Decoder, DECODER_STAGE};
use crate::stages::file_source::FileSource;
use crate::stages::resample::Resampler;
use crate::stages::silence::{
    SilenceDetector, SilenceItem, SILENCE_DETECTED_FIELD, SILENCE_DURATION_FIELD, SILENCE_MESSAGE,
    SILENCE_STAGE,
};
use crate::stages::writer::{SegmentWriter, WRITER_STAGE};
use crate::stages::MuxerKind;
use crate::traits::source::{SampleCallback, SourceProvider};

/// Builds a ready-to-start pipeline from configuration.
///
/// The downstream chain is the same for every source: silence detector →
/// resampler → segment writer. A live source links it at build time (a
/// failure there is a construction error naming both stages); file input
/// links it from the decoder's output-ready handler once the stream format
/// is known, and a refusal there surfaces as a stream error.
pub struct PipelineBuilder {
    config: ChunkerConfig,
    live_source: Option<Box<dyn SourceProvider>>,
}

impl PipelineBuilder {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            live_source: None,
        }
    }

    /// Source used when the input selects live capture. Also the hook for
    /// fully custom sources.
    pub fn live_source(mut self, source: Box<dyn SourceProvider>) -> Self {
        self.live_source = Some(source);
        self
    }

    /// Assemble the topology, returning the pipeline and the segment-writer
    /// handle used for split commands.
    pub fn build(self) -> Result<(Pipeline, Arc<SegmentWriter>), ChunkerError> {
        let config = self.config;
        config.validate()?;

        // The muxer id resolves even in sink mode, so a bad id fails at
        // construction regardless of the output kind.
        let muxer = MuxerKind::resolve(&config.muxer)?;

        let mut writer_params = StageParams::new()
            .with(
                "max-chunk-ns",
                ParamValue::UInt(config.max_chunk_duration.as_nanos() as u64),
            )
            .with("manifest", ParamValue::Bool(config.write_manifest));
        if let Some(pattern) = &config.output {
            writer_params.set("location", ParamValue::Str(pattern.clone()));
        }
        let writer = Arc::new(SegmentWriter::from_params(
            &writer_params,
            config.sink.clone(),
            muxer,
        )?);

        let silence_params = StageParams::new()
            .with("silent", ParamValue::Bool(false))
            .with("remove", ParamValue::Bool(true))
            .with("hysteresis", ParamValue::UInt(config.silence_hysteresis))
            .with(
                "minimum-silence-ns",
                ParamValue::UInt(config.min_silence_duration.as_nanos() as u64),
            )
            .with(
                "threshold",
                ParamValue::Int(i64::from(config.silence_threshold_db)),
            );
        let silence = Arc::new(Mutex::new(SilenceDetector::from_params(&silence_params)));

        let resampler = Arc::new(Mutex::new(Resampler::new(config.sample_rate)));

        let bus = Bus::new();
        let chain = chain_callback(
            bus.clone(),
            Arc::clone(&silence),
            Arc::clone(&resampler),
            Arc::clone(&writer),
        );

        let source: Box<dyn SourceProvider> = match &config.input {
            ChunkerInput::File(path) => {
                let mut decoder = Decoder::new();
                let link = chain.clone();
                decoder.set_output_ready(Box::new(move |format| {
                    accept_stream_format(format)?;
                    Ok(link.clone())
                }));
                Box::new(FileSource::new(path.clone(), decoder))
            }
            ChunkerInput::Capture => {
                let mut source = self.live_source.ok_or_else(|| {
                    ChunkerError::DeviceNotAvailable(
                        "no capture source provided for live input".into(),
                    )
                })?;
                let upstream = source.name().to_string();
                source.link(chain).map_err(|e| match e {
                    ChunkerError::LinkFailed { .. } => e,
                    other => ChunkerError::LinkFailed {
                        upstream,
                        downstream: SILENCE_STAGE.into(),
                        reason: other.to_string(),
                    },
                })?;
                source
            }
        };

        let pipeline = Pipeline::new(bus, source, silence, resampler, Arc::clone(&writer));
        Ok((pipeline, writer))
    }
}

/// The fixed downstream chain, expressed as the callback sources push into.
/// Runs on the source's data thread.
fn chain_callback(
    bus: Bus,
    silence: Arc<Mutex<SilenceDetector>>,
    resampler: Arc<Mutex<Resampler>>,
    writer: Arc<SegmentWriter>,
) -> SampleCallback {
    Arc::new(move |buffer| {
        let items = silence.lock().process(buffer);
        for item in items {
            match item {
                SilenceItem::Voiced(voiced) => {
                    let out = resampler.lock().process(voiced);
                    if out.is_empty() {
                        continue;
                    }
                    if let Err(e) = writer.write(&out) {
                        bus.post(StageMessage::error(WRITER_STAGE, e.to_string()));
                    }
                }
                SilenceItem::Silence(event) => {
                    let fields = StageParams::new()
                        .with(SILENCE_DETECTED_FIELD, ParamValue::Bool(true))
                        .with(
                            SILENCE_DURATION_FIELD,
                            ParamValue::UInt(event.duration.as_nanos() as u64),
                        );
                    bus.post(StageMessage::element(SILENCE_STAGE, SILENCE_MESSAGE, fields));
                }
            }
        }
    })
}

/// The deferred link check: whether the chain accepts the decoder's
/// negotiated stream format.
fn accept_stream_format(format: AudioFormat) -> Result<(), ChunkerError> {
    if format.sample_rate == 0 || format.channels == 0 || format.channels > 16 {
        return Err(ChunkerError::LinkFailed {
            upstream: DECODER_STAGE.into(),
            downstream: SILENCE_STAGE.into(),
            reason: format!(
                "unsupported stream format: {} Hz, {} channel(s)",
                format.sample_rate, format.channels
            ),
        });
    }
    Ok(())
}
