//! Video transcoding pipeline.
//!
//! The decoder renders into an output surface; each rendered frame is drawn
//! into the encoder's input surface and submitted with its timestamp. No
//! pixel data passes through the pipeline itself.

use super::{
    create_codecs, drain_encoder, drain_extractor, not_set_up, CodecPair, PipelineState, StepContext, TrackPipeline,
};
use crate::codec::{BufferAccess, CodecRole, InputSurface, OutputStatus, OutputSurface};
use crate::drain::DrainState;
use crate::error::Result;
use crate::platform::MediaPlatform;
use tracing::{debug, trace};
use vcompress_core::{BufferInfo, TrackFormat, TrackType};

struct VideoSession {
    codecs: CodecPair,
    output_surface: Box<dyn OutputSurface>,
    input_surface: Option<Box<dyn InputSurface>>,
}

/// Video track pipeline.
pub struct VideoTrackPipeline {
    track_index: usize,
    output_format: TrackFormat,
    state: PipelineState,
    session: Option<VideoSession>,
}

impl VideoTrackPipeline {
    /// Create a new video pipeline encoding track `track_index` to `output_format`.
    pub fn new(track_index: usize, output_format: TrackFormat) -> Self {
        Self {
            track_index,
            output_format,
            state: PipelineState::default(),
            session: None,
        }
    }

    /// Negotiated encoder output format, once known.
    pub fn actual_output_format(&self) -> Option<&TrackFormat> {
        self.state.actual_output_format.as_ref()
    }

    fn drain_decoder(state: &mut PipelineState, session: &mut VideoSession) -> Result<DrainState> {
        if state.eos.decoder {
            return Ok(DrainState::None);
        }

        let codecs = &mut session.codecs;
        let mut info = BufferInfo::default();
        let slot = match codecs.decoder.dequeue_output_buffer(&mut info, 0)? {
            OutputStatus::TryAgainLater => return Ok(DrainState::None),
            // Only output timing matters here.
            OutputStatus::FormatChanged => return Ok(DrainState::RetryImmediately),
            OutputStatus::BuffersChanged => {
                codecs.decoder_buffers = BufferAccess::new(codecs.decoder.as_ref());
                return Ok(DrainState::RetryImmediately);
            }
            OutputStatus::Buffer(slot) => slot,
        };

        if info.is_end_of_stream() {
            codecs.encoder.signal_end_of_input_stream()?;
            state.eos.decoder = true;
            info.size = 0;
            debug!("Video decoder reached end of stream");
        }

        let render = info.size > 0;
        codecs.decoder.release_output_buffer(slot, render)?;
        if render {
            session.output_surface.await_new_image()?;
            session.output_surface.draw_image()?;
            if let Some(input) = session.input_surface.as_mut() {
                input.set_presentation_time(info.presentation_time_us * 1000)?;
                input.swap_buffers()?;
            }
            trace!(pts = info.presentation_time_us, "Rendered frame to encoder surface");
        }
        Ok(DrainState::Consumed)
    }
}

impl TrackPipeline for VideoTrackPipeline {
    fn setup(&mut self, platform: &dyn MediaPlatform, ctx: &mut StepContext<'_>) -> Result<()> {
        let input_format = ctx.demuxer.track_format(self.track_index)?;
        let codecs = create_codecs(platform, &input_format, &self.output_format)?;
        let output_surface = platform.create_output_surface()?;
        let session = self.session.insert(VideoSession {
            codecs,
            output_surface,
            input_surface: None,
        });

        session
            .codecs
            .encoder
            .configure(&self.output_format, None, CodecRole::Encoder)?;
        let mut input_surface = session.codecs.encoder.create_input_surface()?;
        input_surface.make_current()?;
        session.input_surface = Some(input_surface);
        session.codecs.start_encoder()?;

        // Decoders may pre-rotate pixels; the rotation is carried by the
        // container's orientation hint instead.
        let mut decoder_format = input_format;
        if decoder_format.rotation_degrees.is_some() {
            decoder_format.rotation_degrees = Some(0);
        }
        let surface = session.output_surface.id();
        session
            .codecs
            .decoder
            .configure(&decoder_format, Some(surface), CodecRole::Decoder)?;
        session.codecs.start_decoder()?;

        debug!(
            track = self.track_index,
            input = %decoder_format,
            output = %self.output_format,
            "Video pipeline set up"
        );
        Ok(())
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<bool> {
        let session = self.session.as_mut().ok_or_else(|| not_set_up(TrackType::Video))?;
        let state = &mut self.state;
        let mut busy = false;

        while drain_encoder(TrackType::Video, state, &mut session.codecs, ctx.muxer)?.is_busy() {
            busy = true;
        }

        loop {
            let status = Self::drain_decoder(state, session)?;
            if status.is_busy() {
                busy = true;
            }
            if status != DrainState::RetryImmediately {
                break;
            }
        }

        while drain_extractor(self.track_index, state, &mut session.codecs, &mut *ctx.demuxer)?.is_busy() {
            busy = true;
        }

        Ok(busy)
    }

    fn written_presentation_time_us(&self) -> i64 {
        self.state.written_presentation_time_us
    }

    fn is_finished(&self) -> bool {
        self.state.eos.encoder
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            session.output_surface.release();
            if let Some(mut input) = session.input_surface.take() {
                input.release();
            }
            session.codecs.release()?;
        }
        Ok(())
    }
}
