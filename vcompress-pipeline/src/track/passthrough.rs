//! Passthrough pipeline: compressed samples go straight from the demuxer to
//! the muxer.

use super::{StepContext, TrackPipeline};
use crate::error::Result;
use crate::platform::MediaPlatform;
use tracing::{debug, trace};
use vcompress_core::{BufferInfo, SampleFlags, TrackType};

/// Read buffer size when the track does not declare its largest sample.
pub const DEFAULT_MAX_INPUT_SIZE: usize = 1024 * 1024;

/// Copies one track without any codec session.
pub struct PassthroughTrackPipeline {
    track_index: usize,
    track_type: TrackType,
    buffer: Vec<u8>,
    is_eos: bool,
    written_presentation_time_us: i64,
}

impl PassthroughTrackPipeline {
    /// Create a new passthrough pipeline for track `track_index`.
    pub fn new(track_index: usize, track_type: TrackType) -> Self {
        Self {
            track_index,
            track_type,
            buffer: Vec::new(),
            is_eos: false,
            written_presentation_time_us: 0,
        }
    }
}

impl TrackPipeline for PassthroughTrackPipeline {
    fn setup(&mut self, _platform: &dyn MediaPlatform, ctx: &mut StepContext<'_>) -> Result<()> {
        let format = ctx.demuxer.track_format(self.track_index)?;
        self.buffer = vec![0; format.max_input_size.unwrap_or(DEFAULT_MAX_INPUT_SIZE)];
        debug!(track = self.track_index, track_type = %self.track_type, %format, "Passthrough pipeline set up");
        ctx.muxer.set_output_format(self.track_type, format)
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<bool> {
        if self.is_eos {
            return Ok(false);
        }

        match ctx.demuxer.sample_track_index() {
            None => {
                self.is_eos = true;
                debug!(track_type = %self.track_type, "Passthrough reached end of stream");
                Ok(true)
            }
            Some(index) if index != self.track_index => Ok(false),
            Some(_) => {
                let size = ctx.demuxer.read_sample_data(&mut self.buffer)?;
                let flags = ctx.demuxer.sample_flags() & SampleFlags::KEY_FRAME;
                let info = BufferInfo::new(0, size, ctx.demuxer.sample_time_us(), flags);
                ctx.muxer.write_sample_data(self.track_type, &self.buffer, &info)?;
                self.written_presentation_time_us = info.presentation_time_us;
                trace!(track_type = %self.track_type, size, pts = info.presentation_time_us, "Passed sample through");
                ctx.demuxer.advance();
                Ok(true)
            }
        }
    }

    fn written_presentation_time_us(&self) -> i64 {
        self.written_presentation_time_us
    }

    fn is_finished(&self) -> bool {
        self.is_eos
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
