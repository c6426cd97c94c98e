//! Audio hand-off between decoder output and encoder input.
//!
//! Decoded buffers stay inside the decoder's output slots until they have
//! been remixed into an encoder input slot. The processor only tracks them:
//! an arena of [`AudioBuffer`] records moves between a free-list and a
//! pending queue by index.
//!
//! Encoder input slots are usually smaller than decoder output slots once the
//! channel count changes, so a remix that does not fit spills into a single
//! overflow buffer. The overflow is always drained before the next pending
//! buffer is touched.

use crate::codec::{BufferAccess, CodecSession};
use crate::error::{PipelineError, Result};
use crate::remix::{AudioRemixer, BYTES_PER_SAMPLE};
use std::collections::VecDeque;
use tracing::{debug, trace};
use vcompress_core::{BufferInfo, SampleFlags, TrackFormat};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// One decoded buffer waiting to be remixed.
#[derive(Debug, Clone, Copy, Default)]
struct AudioBuffer {
    /// Decoder output slot, `None` for the end-of-stream marker.
    decoder_slot: Option<usize>,
    presentation_time_us: i64,
    offset: usize,
    size: usize,
}

/// Remix output that did not fit the encoder input slot it was meant for.
#[derive(Debug, Default)]
struct OverflowBuffer {
    data: Vec<u8>,
    position: usize,
    limit: usize,
    presentation_time_us: i64,
}

impl OverflowBuffer {
    fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    fn reset(&mut self) {
        self.position = 0;
        self.limit = 0;
    }
}

/// Sample layout fixed by the decoder's first format change.
#[derive(Debug, Clone, Copy)]
struct Layout {
    sample_rate: u32,
    input_channels: u32,
    output_channels: u32,
    remixer: AudioRemixer,
}

impl Layout {
    fn input_frame_bytes(&self) -> usize {
        self.input_channels as usize * BYTES_PER_SAMPLE
    }

    fn output_frame_bytes(&self) -> usize {
        self.output_channels as usize * BYTES_PER_SAMPLE
    }

    /// `frames * 1_000_000 / sample_rate`. Dividing by `sample_rate * 1_000_000`
    /// would truncate every chunk to zero and repeat timestamps.
    fn frames_to_duration_us(&self, frames: usize) -> i64 {
        frames as i64 * MICROS_PER_SECOND / i64::from(self.sample_rate)
    }
}

/// Moves decoded PCM into encoder input slots, remixing channels on the way.
#[derive(Debug)]
pub struct AudioProcessor {
    encode_format: TrackFormat,
    layout: Option<Layout>,
    decoder_buffers: BufferAccess,
    encoder_buffers: BufferAccess,
    buffers: Vec<AudioBuffer>,
    free: Vec<usize>,
    pending: VecDeque<usize>,
    overflow: OverflowBuffer,
    held_encoder_slot: Option<usize>,
}

impl AudioProcessor {
    /// Create a new processor feeding an encoder configured with `encode_format`.
    pub fn new(encode_format: TrackFormat, decoder: &dyn CodecSession, encoder: &dyn CodecSession) -> Self {
        Self {
            encode_format,
            layout: None,
            decoder_buffers: BufferAccess::new(decoder),
            encoder_buffers: BufferAccess::new(encoder),
            buffers: Vec::new(),
            free: Vec::new(),
            pending: VecDeque::new(),
            overflow: OverflowBuffer::default(),
            held_encoder_slot: None,
        }
    }

    /// Fix the decoded sample layout and pick the remixer.
    ///
    /// Must be called exactly once, after the decoder's first format change
    /// and before any decoded buffer is queued.
    pub fn set_actual_decoded_format(&mut self, decoded: &TrackFormat) -> Result<()> {
        if self.layout.is_some() {
            return Err(PipelineError::protocol("Audio decoder output format changed twice"));
        }

        let sample_rate = decoded.require_sample_rate()?;
        if sample_rate == 0 {
            return Err(PipelineError::Unsupported("Audio sample rate of 0 Hz".into()));
        }
        if sample_rate != self.encode_format.require_sample_rate()? {
            return Err(PipelineError::Unsupported(
                "Audio sample rate conversion not supported yet".into(),
            ));
        }

        let input_channels = decoded.require_channel_count()?;
        let output_channels = self.encode_format.require_channel_count()?;
        check_channel_count(input_channels)?;
        check_channel_count(output_channels)?;

        let remixer = AudioRemixer::select(input_channels, output_channels);
        debug!(
            sample_rate,
            input_channels, output_channels, ?remixer, "Audio layout determined"
        );

        self.layout = Some(Layout {
            sample_rate,
            input_channels,
            output_channels,
            remixer,
        });
        self.overflow.presentation_time_us = 0;
        Ok(())
    }

    /// Remixer chosen by [`AudioProcessor::set_actual_decoded_format`].
    pub fn remixer(&self) -> Option<AudioRemixer> {
        self.layout.map(|l| l.remixer)
    }

    /// Whether leftover remix output is waiting for an encoder slot.
    pub fn has_overflow(&self) -> bool {
        self.overflow.has_remaining()
    }

    /// Number of decoded buffers waiting to be remixed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Re-probe the encoder's buffer API after it reported new buffers.
    pub fn refresh_encoder_buffers(&mut self, encoder: &dyn CodecSession) {
        self.encoder_buffers = BufferAccess::new(encoder);
    }

    /// Re-probe the decoder's buffer API after it reported new buffers.
    pub fn refresh_decoder_buffers(&mut self, decoder: &dyn CodecSession) {
        self.decoder_buffers = BufferAccess::new(decoder);
    }

    /// Queue a decoder output slot for remixing.
    ///
    /// `slot` is `None` for the end-of-stream marker. The slot stays owned by
    /// the decoder until it has been remixed.
    pub fn drain_decoder_buffer_and_queue(&mut self, slot: Option<usize>, info: &BufferInfo) -> Result<()> {
        if self.layout.is_none() {
            return Err(PipelineError::protocol("Buffer received before format"));
        }

        let buffer = AudioBuffer {
            decoder_slot: slot,
            presentation_time_us: if slot.is_some() { info.presentation_time_us } else { 0 },
            offset: info.offset,
            size: if slot.is_some() { info.size } else { 0 },
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.buffers[index] = buffer;
                index
            }
            None => {
                self.buffers.push(buffer);
                self.buffers.len() - 1
            }
        };
        self.pending.push_back(index);
        trace!(?slot, pts = buffer.presentation_time_us, "Queued decoded audio buffer");
        Ok(())
    }

    /// Fill one encoder input slot.
    ///
    /// Pending overflow goes first; otherwise the oldest decoded buffer is
    /// remixed and its decoder slot released. Returns `false` when nothing was
    /// fed, including after the end-of-stream marker has been handed over.
    pub fn feed_encoder(
        &mut self,
        decoder: &mut dyn CodecSession,
        encoder: &mut dyn CodecSession,
        timeout_us: i64,
    ) -> Result<bool> {
        let has_overflow = self.overflow.has_remaining();
        if self.pending.is_empty() && !has_overflow {
            return Ok(false);
        }

        let slot = match self.held_encoder_slot.take() {
            Some(slot) => slot,
            None => match encoder.dequeue_input_buffer(timeout_us)? {
                Some(slot) => slot,
                None => return Ok(false),
            },
        };

        let Some(out) = self.encoder_buffers.input_buffer(encoder, slot) else {
            self.held_encoder_slot = Some(slot);
            return Ok(false);
        };

        if let Some(layout) = self.layout {
            if out.len() < layout.output_frame_bytes() {
                return Err(PipelineError::protocol(format!(
                    "Encoder input buffer of {} bytes cannot hold one audio frame",
                    out.len()
                )));
            }
        }

        if has_overflow {
            let (produced, pts) = self.drain_overflow(out)?;
            encoder.queue_input_buffer(slot, &BufferInfo::new(0, produced, pts, SampleFlags::empty()))?;
            trace!(slot, produced, pts, "Fed overflow to encoder");
            return Ok(true);
        }

        let Some(&index) = self.pending.front() else {
            self.held_encoder_slot = Some(slot);
            return Ok(false);
        };
        let buffer = self.buffers[index];

        let Some(decoder_slot) = buffer.decoder_slot else {
            self.recycle_front();
            encoder.queue_input_buffer(slot, &BufferInfo::new(0, 0, 0, SampleFlags::END_OF_STREAM))?;
            debug!("Audio end of stream fed to encoder");
            return Ok(false);
        };

        let Some(decoded) = self.decoder_buffers.output_buffer(&*decoder, decoder_slot) else {
            self.held_encoder_slot = Some(slot);
            return Ok(false);
        };
        let input = decoded
            .get(buffer.offset..buffer.offset + buffer.size)
            .ok_or_else(|| PipelineError::protocol("Decoded audio range lies outside its buffer"))?;

        let (produced, pts) = self.remix_and_maybe_fill_overflow(&buffer, input, out)?;
        encoder.queue_input_buffer(slot, &BufferInfo::new(0, produced, pts, SampleFlags::empty()))?;
        decoder.release_output_buffer(decoder_slot, false)?;
        self.recycle_front();
        trace!(slot, produced, pts, "Fed remixed audio to encoder");
        Ok(true)
    }

    fn recycle_front(&mut self) {
        if let Some(index) = self.pending.pop_front() {
            self.free.push(index);
        }
    }

    fn layout(&self) -> Result<Layout> {
        self.layout
            .ok_or_else(|| PipelineError::protocol("Audio layout used before decoder format"))
    }

    /// Copy as much overflow as fits into `out`.
    ///
    /// The timestamp is recomputed from how much of the overflow has already
    /// been fed, not taken from the overflow as a whole.
    fn drain_overflow(&mut self, out: &mut [u8]) -> Result<(usize, i64)> {
        let layout = self.layout()?;
        let frame = layout.output_frame_bytes();

        let pts = self.overflow.presentation_time_us
            + layout.frames_to_duration_us(self.overflow.position / frame);

        let remaining = self.overflow.limit - self.overflow.position;
        let len = remaining.min(out.len() / frame * frame);
        let from = self.overflow.position;
        out[..len].copy_from_slice(&self.overflow.data[from..from + len]);

        self.overflow.position += len;
        if !self.overflow.has_remaining() {
            self.overflow.reset();
        }
        Ok((len, pts))
    }

    /// Remix `input` into `out`, spilling what does not fit into the overflow.
    ///
    /// Returns the bytes written to `out` and the source buffer's timestamp.
    fn remix_and_maybe_fill_overflow(
        &mut self,
        buffer: &AudioBuffer,
        input: &[u8],
        out: &mut [u8],
    ) -> Result<(usize, i64)> {
        let layout = self.layout()?;
        let in_frame = layout.input_frame_bytes();
        let out_frame = layout.output_frame_bytes();

        let input_frames = input.len() / in_frame;
        let output_frames = out.len() / out_frame;

        if input_frames <= output_frames {
            let done = layout.remixer.remix(input, out);
            return Ok((done.produced, buffer.presentation_time_us));
        }

        if self.overflow.has_remaining() {
            return Err(PipelineError::protocol("Overflow buffer already holds data"));
        }

        let split = output_frames * in_frame;
        let head = layout.remixer.remix(&input[..split], out);

        let rest = &input[split..];
        let needed = rest.len() / in_frame * out_frame;
        if self.overflow.data.len() < needed {
            self.overflow.data.resize(needed, 0);
        }
        let tail = layout.remixer.remix(rest, &mut self.overflow.data[..needed]);

        self.overflow.position = 0;
        self.overflow.limit = tail.produced;
        self.overflow.presentation_time_us =
            buffer.presentation_time_us + layout.frames_to_duration_us(output_frames);
        trace!(
            spilled = tail.produced,
            overflow_pts = self.overflow.presentation_time_us,
            "Remix overflowed encoder buffer"
        );

        Ok((head.produced, buffer.presentation_time_us))
    }
}

fn check_channel_count(count: u32) -> Result<()> {
    if count != 1 && count != 2 {
        return Err(PipelineError::Unsupported(format!(
            "channel count ({count}) not supported"
        )));
    }
    Ok(())
}
