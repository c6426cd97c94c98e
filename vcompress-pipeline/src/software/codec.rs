//! Lossless software codec session.
//!
//! Implements the full buffer-queue protocol without transforming data:
//! decoders emit their input unchanged (so PCM stored in a container "decodes"
//! to itself), encoders emit their input or surface frames unchanged. Input
//! slots are only recycled once their data has moved into an output slot,
//! so a consumer that stops draining output back-pressures the producer.

use super::surface::{EncoderSurfaceQueue, Frame, SharedHub, SoftwareInputSurface};
use crate::codec::{BufferApi, CodecRole, CodecSession, InputSurface, OutputStatus, SurfaceId};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::trace;
use vcompress_core::avc::PROFILE_IDC_BASELINE;
use vcompress_core::error::Result;
use vcompress_core::{mime, BufferInfo, CodecError, SampleFlags, SpsHeader, TrackFormat, TrackType};

/// Codec id of decoded video frames.
pub const VIDEO_RAW: &str = "video/raw";

/// Shape and behaviour of a software session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareCodecConfig {
    /// Number of input slots.
    pub input_slots: usize,
    /// Number of output slots.
    pub output_slots: usize,
    /// Size of every input slot, and initial size of output slots.
    pub buffer_size: usize,
    /// Buffer API generation exposed to callers.
    pub buffer_api: BufferApi,
    /// Report the output format a second time after the first buffer.
    pub repeat_format_change: bool,
    /// Polls answered with "try again later" before each output buffer.
    pub latency_polls: u32,
    /// Emit buffers without announcing the output format first.
    pub skip_format_change: bool,
    /// Fail `release`.
    pub fail_release: bool,
}

impl Default for SoftwareCodecConfig {
    fn default() -> Self {
        Self {
            input_slots: 4,
            output_slots: 4,
            buffer_size: 64 * 1024,
            buffer_api: BufferApi::PerSlot,
            repeat_format_change: false,
            latency_polls: 0,
            skip_format_change: false,
            fail_release: false,
        }
    }
}

impl SoftwareCodecConfig {
    /// Set slot counts.
    #[must_use]
    pub fn with_slots(mut self, input_slots: usize, output_slots: usize) -> Self {
        self.input_slots = input_slots;
        self.output_slots = output_slots;
        self
    }

    /// Set the slot size.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Select the buffer API generation.
    #[must_use]
    pub fn with_buffer_api(mut self, api: BufferApi) -> Self {
        self.buffer_api = api;
        self
    }

    /// Report the output format twice.
    #[must_use]
    pub fn with_repeated_format_change(mut self) -> Self {
        self.repeat_format_change = true;
        self
    }

    /// Delay every output buffer by `polls` empty polls.
    #[must_use]
    pub fn with_latency(mut self, polls: u32) -> Self {
        self.latency_polls = polls;
        self
    }

    /// Never report the output format.
    #[must_use]
    pub fn without_format_change(mut self) -> Self {
        self.skip_format_change = true;
        self
    }

    /// Make `release` fail.
    #[must_use]
    pub fn with_failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }
}

/// A software decode or encode session.
#[derive(Debug)]
pub struct SoftwareCodec {
    name: String,
    config: SoftwareCodecConfig,
    hub: SharedHub,
    role: Option<CodecRole>,
    format: Option<TrackFormat>,
    surface: Option<SurfaceId>,
    input_surface: Option<Rc<RefCell<EncoderSurfaceQueue>>>,
    inputs: Vec<Vec<u8>>,
    outputs: Vec<Vec<u8>>,
    output_info: Vec<BufferInfo>,
    free_inputs: VecDeque<usize>,
    free_outputs: VecDeque<usize>,
    work: VecDeque<(usize, BufferInfo)>,
    started: bool,
    format_announcements: u32,
    buffers_changed_pending: bool,
    codec_config_pending: bool,
    emitted: usize,
    idle_polls: u32,
    output_eos: bool,
}

impl SoftwareCodec {
    pub(crate) fn new(name: String, config: SoftwareCodecConfig, hub: SharedHub) -> Self {
        Self {
            name,
            config,
            hub,
            role: None,
            format: None,
            surface: None,
            input_surface: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            output_info: Vec::new(),
            free_inputs: VecDeque::new(),
            free_outputs: VecDeque::new(),
            work: VecDeque::new(),
            started: false,
            format_announcements: 0,
            buffers_changed_pending: false,
            codec_config_pending: false,
            emitted: 0,
            idle_polls: 0,
            output_eos: false,
        }
    }

    fn configured_format(&self) -> Result<&TrackFormat> {
        self.format
            .as_ref()
            .ok_or_else(|| CodecError::Config(format!("{} not configured", self.name)).into())
    }

    fn ensure_started(&self) -> Result<()> {
        if self.started {
            Ok(())
        } else {
            Err(CodecError::NotStarted.into())
        }
    }

    fn has_pending_output(&self) -> bool {
        if !self.work.is_empty() {
            return true;
        }
        match &self.input_surface {
            Some(queue) => {
                let queue = queue.borrow();
                !queue.frames.is_empty() || queue.end_of_stream
            }
            None => false,
        }
    }

    /// Encoded SPS matching the configured profile.
    fn parameter_set(format: &TrackFormat) -> Vec<u8> {
        let profile_idc = format
            .profile
            .and_then(|p| u8::try_from(p).ok())
            .unwrap_or(PROFILE_IDC_BASELINE);
        SpsHeader {
            profile_idc,
            constraint_flags: 0,
            level_idc: format.level.and_then(|l| u8::try_from(l).ok()).unwrap_or(31),
            seq_parameter_set_id: 0,
        }
        .to_annex_b()
    }

    fn fill_output(&mut self, slot: usize, data: &[u8], pts: i64, flags: SampleFlags) -> BufferInfo {
        let out = &mut self.outputs[slot];
        if out.len() < data.len() {
            out.resize(data.len(), 0);
        }
        out[..data.len()].copy_from_slice(data);
        let info = BufferInfo::new(0, data.len(), pts, flags);
        self.output_info[slot] = info;
        info
    }

    fn check_input_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.inputs.len() || self.free_inputs.contains(&slot) {
            return Err(CodecError::InvalidSlot { slot }.into());
        }
        Ok(())
    }

    fn check_output_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.outputs.len() || self.free_outputs.contains(&slot) {
            return Err(CodecError::InvalidSlot { slot }.into());
        }
        Ok(())
    }
}

impl CodecSession for SoftwareCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, format: &TrackFormat, surface: Option<SurfaceId>, role: CodecRole) -> Result<()> {
        if self.started {
            return Err(CodecError::Config("configure after start".into()).into());
        }
        if format.mime.is_empty() {
            return Err(CodecError::Config("format has no codec id".into()).into());
        }
        self.format = Some(format.clone());
        self.surface = surface;
        self.role = Some(role);
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<Box<dyn InputSurface>> {
        if self.role != Some(CodecRole::Encoder) || self.started {
            return Err(CodecError::UnsupportedOperation(
                "input surface needs a configured, unstarted encoder".into(),
            )
            .into());
        }
        let queue = Rc::new(RefCell::new(EncoderSurfaceQueue::default()));
        self.input_surface = Some(queue.clone());
        Ok(Box::new(SoftwareInputSurface::new(queue, self.hub.clone())))
    }

    fn start(&mut self) -> Result<()> {
        let is_avc = self.configured_format()?.mime == mime::VIDEO_AVC;
        self.codec_config_pending = self.role == Some(CodecRole::Encoder) && is_avc;

        let size = self.config.buffer_size;
        self.inputs = vec![vec![0; size]; self.config.input_slots];
        self.outputs = vec![vec![0; size]; self.config.output_slots];
        self.output_info = vec![BufferInfo::default(); self.config.output_slots];
        self.free_inputs = (0..self.config.input_slots).collect();
        self.free_outputs = (0..self.config.output_slots).collect();
        self.buffers_changed_pending = self.config.buffer_api == BufferApi::Table;
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.ensure_started()?;
        self.started = false;
        self.work.clear();
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.started = false;
        self.inputs.clear();
        self.outputs.clear();
        self.input_surface = None;
        if self.config.fail_release {
            return Err(CodecError::Other(format!("{} failed to release", self.name)).into());
        }
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout_us: i64) -> Result<Option<usize>> {
        self.ensure_started()?;
        Ok(self.free_inputs.pop_front())
    }

    fn queue_input_buffer(&mut self, slot: usize, info: &BufferInfo) -> Result<()> {
        self.ensure_started()?;
        self.check_input_slot(slot)?;
        if info.range().end > self.inputs[slot].len() {
            return Err(CodecError::Config(format!(
                "queued range {:?} exceeds slot of {} bytes",
                info.range(),
                self.inputs[slot].len()
            ))
            .into());
        }
        self.work.push_back((slot, *info));
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, info: &mut BufferInfo, _timeout_us: i64) -> Result<OutputStatus> {
        self.ensure_started()?;
        if self.output_eos || !self.has_pending_output() {
            return Ok(OutputStatus::TryAgainLater);
        }

        if self.format_announcements == 0 && !self.config.skip_format_change {
            self.format_announcements = 1;
            return Ok(OutputStatus::FormatChanged);
        }
        if self.buffers_changed_pending {
            self.buffers_changed_pending = false;
            return Ok(OutputStatus::BuffersChanged);
        }
        if self.config.repeat_format_change && self.format_announcements == 1 && self.emitted > 0 {
            self.format_announcements = 2;
            return Ok(OutputStatus::FormatChanged);
        }

        if self.idle_polls < self.config.latency_polls {
            self.idle_polls += 1;
            return Ok(OutputStatus::TryAgainLater);
        }
        let Some(out) = self.free_outputs.pop_front() else {
            return Ok(OutputStatus::TryAgainLater);
        };
        self.idle_polls = 0;

        if self.codec_config_pending {
            self.codec_config_pending = false;
            let sps = Self::parameter_set(self.configured_format()?);
            *info = self.fill_output(out, &sps, 0, SampleFlags::CODEC_CONFIG);
            return Ok(OutputStatus::Buffer(out));
        }

        let next = if let Some((slot, queued)) = self.work.pop_front() {
            let data = self.inputs[slot][queued.range()].to_vec();
            self.free_inputs.push_back(slot);
            let flags = queued.flags & (SampleFlags::KEY_FRAME | SampleFlags::END_OF_STREAM);
            (data, queued.presentation_time_us, flags)
        } else {
            let mut queue = self
                .input_surface
                .as_ref()
                .ok_or_else(|| CodecError::Other("no pending input".into()))?
                .borrow_mut();
            match queue.frames.pop_front() {
                Some(frame) => (frame.data, frame.presentation_time_us, SampleFlags::empty()),
                None => (Vec::new(), 0, SampleFlags::END_OF_STREAM),
            }
        };

        let (data, pts, flags) = next;
        if flags.contains(SampleFlags::END_OF_STREAM) {
            self.output_eos = true;
        }
        *info = self.fill_output(out, &data, pts, flags);
        self.emitted += 1;
        trace!(codec = %self.name, slot = out, size = info.size, pts, "Output buffer ready");
        Ok(OutputStatus::Buffer(out))
    }

    fn release_output_buffer(&mut self, slot: usize, render: bool) -> Result<()> {
        self.ensure_started()?;
        self.check_output_slot(slot)?;
        if render {
            let surface = self
                .surface
                .ok_or_else(|| CodecError::UnsupportedOperation("render without a surface".into()))?;
            let info = self.output_info[slot];
            let frame = Frame {
                data: self.outputs[slot][info.range()].to_vec(),
                presentation_time_us: info.presentation_time_us,
            };
            self.hub.borrow_mut().render(surface, frame);
        }
        self.free_outputs.push_back(slot);
        Ok(())
    }

    fn output_format(&self) -> Result<TrackFormat> {
        let configured = self.configured_format()?;
        let mut format = configured.clone();
        match (self.role, configured.track_type()) {
            (Some(CodecRole::Decoder), Some(TrackType::Audio)) => format.mime = mime::AUDIO_RAW.into(),
            (Some(CodecRole::Decoder), _) => format.mime = VIDEO_RAW.into(),
            (Some(CodecRole::Encoder), _) if configured.mime == mime::VIDEO_AVC && format.csd.is_empty() => {
                format.csd.push(Self::parameter_set(configured));
                format.csd.push(vec![0, 0, 0, 1, 0x68, 0xce, 0x38, 0x80]);
            }
            _ => {}
        }
        Ok(format)
    }

    fn signal_end_of_input_stream(&mut self) -> Result<()> {
        self.ensure_started()?;
        let queue = self
            .input_surface
            .as_ref()
            .ok_or_else(|| CodecError::UnsupportedOperation("no input surface".into()))?;
        queue.borrow_mut().end_of_stream = true;
        Ok(())
    }

    fn buffer_api(&self) -> BufferApi {
        self.config.buffer_api
    }

    fn input_buffer(&mut self, slot: usize) -> Option<&mut [u8]> {
        if self.config.buffer_api != BufferApi::PerSlot || self.free_inputs.contains(&slot) {
            return None;
        }
        self.inputs.get_mut(slot).map(Vec::as_mut_slice)
    }

    fn output_buffer(&self, slot: usize) -> Option<&[u8]> {
        if self.config.buffer_api != BufferApi::PerSlot || self.free_outputs.contains(&slot) {
            return None;
        }
        self.outputs.get(slot).map(Vec::as_slice)
    }

    fn input_buffer_table(&mut self) -> &mut [Vec<u8>] {
        if self.config.buffer_api != BufferApi::Table {
            return &mut [];
        }
        &mut self.inputs
    }

    fn output_buffer_table(&self) -> &[Vec<u8>] {
        if self.config.buffer_api != BufferApi::Table {
            return &[];
        }
        &self.outputs
    }
}
