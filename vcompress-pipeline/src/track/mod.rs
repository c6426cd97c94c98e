//! Per-track pipelines.
//!
//! Each pipeline moves one track from the shared demuxer into the shared
//! [`QueuedMuxer`]. The set of pipelines is closed: [`AnyTrackPipeline`]
//! dispatches to the video, audio or passthrough variant.
//!
//! A transcoding pipeline's `step` drains the encoder until it has nothing
//! left, drains the decoder while it reports control events only (a single
//! consumed buffer ends decoder draining so a saturated encoder cannot
//! deadlock the step), then feeds the decoder from the demuxer until it
//! cannot take more.

mod audio;
mod passthrough;
mod video;

pub use audio::AudioTrackPipeline;
pub use passthrough::PassthroughTrackPipeline;
pub use video::VideoTrackPipeline;

use crate::codec::{BufferAccess, CodecSession, OutputStatus};
use crate::drain::{DrainState, EosFlags};
use crate::error::{PipelineError, Result};
use crate::muxer::QueuedMuxer;
use crate::platform::{Demuxer, MediaPlatform};
use tracing::{debug, trace};
use vcompress_core::{BufferInfo, SampleFlags, TrackFormat, TrackType};

/// Shared collaborators handed to a pipeline on every call.
pub struct StepContext<'a> {
    /// Demuxer shared by both pipelines.
    pub demuxer: &'a mut dyn Demuxer,
    /// Muxer shared by both pipelines.
    pub muxer: &'a mut QueuedMuxer,
}

/// Capability interface of a track pipeline.
pub trait TrackPipeline {
    /// Create and start whatever the pipeline needs.
    fn setup(&mut self, platform: &dyn MediaPlatform, ctx: &mut StepContext<'_>) -> Result<()>;

    /// Move whatever data is ready. Returns whether any work happened.
    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<bool>;

    /// Presentation timestamp of the last sample written to the muxer.
    fn written_presentation_time_us(&self) -> i64;

    /// Whether the track's end of stream reached the muxer side.
    fn is_finished(&self) -> bool;

    /// Stop and free codec sessions and surfaces.
    fn release(&mut self) -> Result<()>;
}

/// One of the three pipeline variants.
pub enum AnyTrackPipeline {
    /// Decode, copy frames through surfaces, encode.
    Video(VideoTrackPipeline),
    /// Decode, remix, encode.
    Audio(AudioTrackPipeline),
    /// Copy compressed samples unchanged.
    Passthrough(PassthroughTrackPipeline),
}

impl AnyTrackPipeline {
    /// Short variant name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Video(_) => "video",
            Self::Audio(_) => "audio",
            Self::Passthrough(_) => "passthrough",
        }
    }

    fn inner(&self) -> &dyn TrackPipeline {
        match self {
            Self::Video(p) => p,
            Self::Audio(p) => p,
            Self::Passthrough(p) => p,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn TrackPipeline {
        match self {
            Self::Video(p) => p,
            Self::Audio(p) => p,
            Self::Passthrough(p) => p,
        }
    }
}

impl TrackPipeline for AnyTrackPipeline {
    fn setup(&mut self, platform: &dyn MediaPlatform, ctx: &mut StepContext<'_>) -> Result<()> {
        self.inner_mut().setup(platform, ctx)
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<bool> {
        self.inner_mut().step(ctx)
    }

    fn written_presentation_time_us(&self) -> i64 {
        self.inner().written_presentation_time_us()
    }

    fn is_finished(&self) -> bool {
        self.inner().is_finished()
    }

    fn release(&mut self) -> Result<()> {
        self.inner_mut().release()
    }
}

/// Decoder and encoder of a transcoding pipeline.
pub(crate) struct CodecPair {
    pub decoder: Box<dyn CodecSession>,
    pub encoder: Box<dyn CodecSession>,
    pub decoder_buffers: BufferAccess,
    pub encoder_buffers: BufferAccess,
    pub decoder_started: bool,
    pub encoder_started: bool,
}

impl CodecPair {
    pub fn new(decoder: Box<dyn CodecSession>, encoder: Box<dyn CodecSession>) -> Self {
        let decoder_buffers = BufferAccess::new(decoder.as_ref());
        let encoder_buffers = BufferAccess::new(encoder.as_ref());
        Self {
            decoder,
            encoder,
            decoder_buffers,
            encoder_buffers,
            decoder_started: false,
            encoder_started: false,
        }
    }

    pub fn start_decoder(&mut self) -> Result<()> {
        self.decoder.start()?;
        self.decoder_started = true;
        self.decoder_buffers = BufferAccess::new(self.decoder.as_ref());
        Ok(())
    }

    pub fn start_encoder(&mut self) -> Result<()> {
        self.encoder.start()?;
        self.encoder_started = true;
        self.encoder_buffers = BufferAccess::new(self.encoder.as_ref());
        Ok(())
    }

    /// Stop started sessions, then release both.
    pub fn release(&mut self) -> Result<()> {
        if self.decoder_started {
            self.decoder.stop()?;
            self.decoder_started = false;
        }
        self.decoder.release()?;
        if self.encoder_started {
            self.encoder.stop()?;
            self.encoder_started = false;
        }
        self.encoder.release()?;
        Ok(())
    }
}

/// Bookkeeping shared by the transcoding pipelines.
#[derive(Debug, Default)]
pub(crate) struct PipelineState {
    pub eos: EosFlags,
    pub actual_output_format: Option<TrackFormat>,
    pub written_presentation_time_us: i64,
    /// Decoder input slot dequeued while its memory was not ready.
    pub held_decoder_input: Option<usize>,
    /// Encoder output dequeued while its memory was not ready.
    pub held_encoder_output: Option<(usize, BufferInfo)>,
    /// Set when the encoder reported new buffers during the last drain.
    pub encoder_buffers_changed: bool,
}

pub(crate) fn create_codecs(
    platform: &dyn MediaPlatform,
    input_format: &TrackFormat,
    output_format: &TrackFormat,
) -> Result<CodecPair> {
    let encoder = platform.create_encoder(&output_format.mime).map_err(|e| {
        PipelineError::setup(format!("Could not create {} encoder: {e}", output_format.mime))
    })?;
    let decoder = platform.create_decoder(&input_format.mime).map_err(|e| {
        PipelineError::setup(format!("Could not create {} decoder: {e}", input_format.mime))
    })?;
    Ok(CodecPair::new(decoder, encoder))
}

/// Feed the decoder one compressed sample of `track_index`.
pub(crate) fn drain_extractor(
    track_index: usize,
    state: &mut PipelineState,
    codecs: &mut CodecPair,
    demuxer: &mut dyn Demuxer,
) -> Result<DrainState> {
    if state.eos.extractor {
        return Ok(DrainState::None);
    }

    let sample_track = demuxer.sample_track_index();
    if matches!(sample_track, Some(index) if index != track_index) {
        return Ok(DrainState::None);
    }

    let slot = match state.held_decoder_input.take() {
        Some(slot) => slot,
        None => match codecs.decoder.dequeue_input_buffer(0)? {
            Some(slot) => slot,
            None => return Ok(DrainState::None),
        },
    };

    if sample_track.is_none() {
        state.eos.extractor = true;
        codecs
            .decoder
            .queue_input_buffer(slot, &BufferInfo::new(0, 0, 0, SampleFlags::END_OF_STREAM))?;
        debug!(track = track_index, "Extractor reached end of stream");
        return Ok(DrainState::None);
    }

    let Some(buf) = codecs.decoder_buffers.input_buffer(codecs.decoder.as_mut(), slot) else {
        state.held_decoder_input = Some(slot);
        return Ok(DrainState::None);
    };
    let size = demuxer.read_sample_data(buf)?;
    let flags = if demuxer.sample_flags().contains(SampleFlags::KEY_FRAME) {
        SampleFlags::KEY_FRAME
    } else {
        SampleFlags::empty()
    };
    let pts = demuxer.sample_time_us();
    codecs
        .decoder
        .queue_input_buffer(slot, &BufferInfo::new(0, size, pts, flags))?;
    trace!(track = track_index, size, pts, "Fed sample to decoder");

    demuxer.advance();
    Ok(DrainState::Consumed)
}

/// Move one encoder output into the muxer.
pub(crate) fn drain_encoder(
    track_type: TrackType,
    state: &mut PipelineState,
    codecs: &mut CodecPair,
    muxer: &mut QueuedMuxer,
) -> Result<DrainState> {
    if state.eos.encoder {
        return Ok(DrainState::None);
    }

    let (slot, mut info) = match state.held_encoder_output.take() {
        Some(held) => held,
        None => {
            let mut info = BufferInfo::default();
            match codecs.encoder.dequeue_output_buffer(&mut info, 0)? {
                OutputStatus::TryAgainLater => return Ok(DrainState::None),
                OutputStatus::FormatChanged => {
                    if state.actual_output_format.is_some() {
                        return Err(PipelineError::protocol(format!(
                            "{track_type} output format changed twice"
                        )));
                    }
                    let format = codecs.encoder.output_format()?;
                    debug!(%track_type, %format, "Encoder output format changed");
                    state.actual_output_format = Some(format.clone());
                    muxer.set_output_format(track_type, format)?;
                    return Ok(DrainState::RetryImmediately);
                }
                OutputStatus::BuffersChanged => {
                    codecs.encoder_buffers = BufferAccess::new(codecs.encoder.as_ref());
                    state.encoder_buffers_changed = true;
                    return Ok(DrainState::RetryImmediately);
                }
                OutputStatus::Buffer(slot) => (slot, info),
            }
        }
    };

    if state.actual_output_format.is_none() {
        return Err(PipelineError::protocol(format!(
            "Could not determine actual {track_type} output format"
        )));
    }

    if info.is_end_of_stream() {
        state.eos.encoder = true;
        info.set(0, 0, 0, info.flags);
        debug!(%track_type, "Encoder reached end of stream");
    }
    if info.is_codec_config() {
        // Parameter sets travel in the output format.
        codecs.encoder.release_output_buffer(slot, false)?;
        return Ok(DrainState::RetryImmediately);
    }

    if info.size > 0 {
        let Some(data) = codecs.encoder_buffers.output_buffer(codecs.encoder.as_ref(), slot) else {
            state.held_encoder_output = Some((slot, info));
            return Ok(DrainState::None);
        };
        muxer.write_sample_data(track_type, data, &info)?;
        state.written_presentation_time_us = info.presentation_time_us;
        trace!(%track_type, size = info.size, pts = info.presentation_time_us, "Muxed encoded sample");
    }
    codecs.encoder.release_output_buffer(slot, false)?;
    Ok(DrainState::Consumed)
}

fn not_set_up(track_type: TrackType) -> PipelineError {
    PipelineError::setup(format!("{track_type} pipeline stepped before setup"))
}
