//! Audio transcoding pipeline.

use super::{
    create_codecs, drain_encoder, drain_extractor, not_set_up, CodecPair, PipelineState, StepContext, TrackPipeline,
};
use crate::codec::{BufferAccess, CodecRole, OutputStatus};
use crate::drain::DrainState;
use crate::error::Result;
use crate::platform::MediaPlatform;
use crate::processor::AudioProcessor;
use crate::remix::AudioRemixer;
use tracing::debug;
use vcompress_core::{BufferInfo, TrackFormat, TrackType};

struct AudioSession {
    codecs: CodecPair,
    processor: AudioProcessor,
}

/// Audio track pipeline: decode to PCM, remix channels, encode.
pub struct AudioTrackPipeline {
    track_index: usize,
    output_format: TrackFormat,
    state: PipelineState,
    session: Option<AudioSession>,
}

impl AudioTrackPipeline {
    /// Create a new audio pipeline encoding track `track_index` to `output_format`.
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

    /// Remixer picked once the decoder reported its format.
    pub fn remixer(&self) -> Option<AudioRemixer> {
        self.session.as_ref().and_then(|s| s.processor.remixer())
    }

    fn drain_decoder(state: &mut PipelineState, session: &mut AudioSession) -> Result<DrainState> {
        if state.eos.decoder {
            return Ok(DrainState::None);
        }

        let codecs = &mut session.codecs;
        let mut info = BufferInfo::default();
        let slot = match codecs.decoder.dequeue_output_buffer(&mut info, 0)? {
            OutputStatus::TryAgainLater => return Ok(DrainState::None),
            OutputStatus::FormatChanged => {
                let decoded = codecs.decoder.output_format()?;
                session.processor.set_actual_decoded_format(&decoded)?;
                return Ok(DrainState::RetryImmediately);
            }
            OutputStatus::BuffersChanged => {
                codecs.decoder_buffers = BufferAccess::new(codecs.decoder.as_ref());
                session.processor.refresh_decoder_buffers(codecs.decoder.as_ref());
                return Ok(DrainState::RetryImmediately);
            }
            OutputStatus::Buffer(slot) => slot,
        };

        if info.is_end_of_stream() {
            state.eos.decoder = true;
            session.processor.drain_decoder_buffer_and_queue(None, &info)?;
            codecs.decoder.release_output_buffer(slot, false)?;
            debug!("Audio decoder reached end of stream");
        } else if info.size > 0 {
            session.processor.drain_decoder_buffer_and_queue(Some(slot), &info)?;
        } else {
            codecs.decoder.release_output_buffer(slot, false)?;
        }
        Ok(DrainState::Consumed)
    }
}

impl TrackPipeline for AudioTrackPipeline {
    fn setup(&mut self, platform: &dyn MediaPlatform, ctx: &mut StepContext<'_>) -> Result<()> {
        let input_format = ctx.demuxer.track_format(self.track_index)?;
        let codecs = create_codecs(platform, &input_format, &self.output_format)?;
        let processor = AudioProcessor::new(
            self.output_format.clone(),
            codecs.decoder.as_ref(),
            codecs.encoder.as_ref(),
        );
        let session = self.session.insert(AudioSession { codecs, processor });

        session
            .codecs
            .encoder
            .configure(&self.output_format, None, CodecRole::Encoder)?;
        session.codecs.start_encoder()?;
        session.codecs.decoder.configure(&input_format, None, CodecRole::Decoder)?;
        session.codecs.start_decoder()?;

        // Buffer APIs are only final once both sessions run.
        session.processor.refresh_encoder_buffers(session.codecs.encoder.as_ref());
        session.processor.refresh_decoder_buffers(session.codecs.decoder.as_ref());

        debug!(
            track = self.track_index,
            input = %input_format,
            output = %self.output_format,
            "Audio pipeline set up"
        );
        Ok(())
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<bool> {
        let session = self.session.as_mut().ok_or_else(|| not_set_up(TrackType::Audio))?;
        let state = &mut self.state;
        let mut busy = false;

        while drain_encoder(TrackType::Audio, state, &mut session.codecs, ctx.muxer)?.is_busy() {
            busy = true;
        }
        if state.encoder_buffers_changed {
            session.processor.refresh_encoder_buffers(session.codecs.encoder.as_ref());
            state.encoder_buffers_changed = false;
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

        while session.processor.feed_encoder(
            session.codecs.decoder.as_mut(),
            session.codecs.encoder.as_mut(),
            0,
        )? {
            busy = true;
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
            session.codecs.release()?;
        }
        Ok(())
    }
}
