//! Codec session abstractions.
//!
//! A [`CodecSession`] is a platform decode or encode unit exposing an
//! asynchronous buffer-queue protocol: the caller dequeues empty input slots,
//! fills and queues them, then polls for output slots and releases them.
//! All polls used by the pipelines pass a zero timeout.

use std::fmt;
use vcompress_core::error::Result;
use vcompress_core::{BufferInfo, TrackFormat};

/// Whether a session decodes or encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecRole {
    /// Compressed samples in, raw data out.
    Decoder,
    /// Raw data in, compressed samples out.
    Encoder,
}

/// Opaque handle to a platform render target a decoder can draw into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// Result of polling a session's output queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// Nothing available yet.
    TryAgainLater,
    /// The output format changed; read it with [`CodecSession::output_format`].
    FormatChanged,
    /// Buffer memory was reallocated; cached buffer tables are stale.
    BuffersChanged,
    /// Output slot ready; the `BufferInfo` passed to the poll describes it.
    Buffer(usize),
}

/// Generation of buffer-memory API a session offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferApi {
    /// Buffers are queried slot by slot.
    PerSlot,
    /// Buffers are exposed as whole tables indexed by slot.
    Table,
}

/// A platform decode or encode session.
pub trait CodecSession {
    /// Session name for logging.
    fn name(&self) -> &str;

    /// Configure the session. Decoders may render into `surface`.
    fn configure(&mut self, format: &TrackFormat, surface: Option<SurfaceId>, role: CodecRole) -> Result<()>;

    /// Create the input surface of a configured encoder.
    fn create_input_surface(&mut self) -> Result<Box<dyn InputSurface>>;

    /// Start processing.
    fn start(&mut self) -> Result<()>;

    /// Stop processing.
    fn stop(&mut self) -> Result<()>;

    /// Free the session's resources.
    fn release(&mut self) -> Result<()>;

    /// Take an empty input slot, if one is free.
    fn dequeue_input_buffer(&mut self, timeout_us: i64) -> Result<Option<usize>>;

    /// Hand a filled input slot back to the session.
    fn queue_input_buffer(&mut self, slot: usize, info: &BufferInfo) -> Result<()>;

    /// Poll the output queue, filling `info` when a buffer is returned.
    fn dequeue_output_buffer(&mut self, info: &mut BufferInfo, timeout_us: i64) -> Result<OutputStatus>;

    /// Return an output slot, optionally rendering it to the configured surface.
    fn release_output_buffer(&mut self, slot: usize, render: bool) -> Result<()>;

    /// Current output format.
    fn output_format(&self) -> Result<TrackFormat>;

    /// End the input stream of a surface-fed encoder.
    fn signal_end_of_input_stream(&mut self) -> Result<()>;

    /// Which buffer-memory API this session offers.
    fn buffer_api(&self) -> BufferApi;

    /// Input slot memory ([`BufferApi::PerSlot`]).
    fn input_buffer(&mut self, _slot: usize) -> Option<&mut [u8]> {
        None
    }

    /// Output slot memory ([`BufferApi::PerSlot`]).
    fn output_buffer(&self, _slot: usize) -> Option<&[u8]> {
        None
    }

    /// All input slots ([`BufferApi::Table`]).
    fn input_buffer_table(&mut self) -> &mut [Vec<u8>] {
        &mut []
    }

    /// All output slots ([`BufferApi::Table`]).
    fn output_buffer_table(&self) -> &[Vec<u8>] {
        &[]
    }
}

/// Decoder render target.
pub trait OutputSurface {
    /// Handle to pass to [`CodecSession::configure`].
    fn id(&self) -> SurfaceId;

    /// Wait for the frame rendered by the last `release_output_buffer(_, true)`.
    fn await_new_image(&mut self) -> Result<()>;

    /// Draw the latest frame into the current input surface.
    fn draw_image(&mut self) -> Result<()>;

    /// Free the surface.
    fn release(&mut self);
}

/// Encoder input surface.
pub trait InputSurface {
    /// Make this surface the target of subsequent draws.
    fn make_current(&mut self) -> Result<()>;

    /// Timestamp the pending frame, in nanoseconds.
    fn set_presentation_time(&mut self, nanos: i64) -> Result<()>;

    /// Submit the pending frame to the encoder.
    fn swap_buffers(&mut self) -> Result<()>;

    /// Free the surface.
    fn release(&mut self);
}

/// Uniform access to a session's buffer memory.
///
/// Chosen once from the session's [`BufferApi`] when the session starts, and
/// rebuilt when the session reports [`OutputStatus::BuffersChanged`]. A slot
/// that resolves to no memory means "not ready", never a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    /// Ask the session for each slot.
    PerSlot,
    /// Index into the session's buffer tables.
    Table,
}

impl BufferAccess {
    /// Probe the session and pick the matching access path.
    pub fn new(session: &dyn CodecSession) -> Self {
        match session.buffer_api() {
            BufferApi::PerSlot => BufferAccess::PerSlot,
            BufferApi::Table => BufferAccess::Table,
        }
    }

    /// Writable view of input slot `slot`.
    pub fn input_buffer<'a>(&self, session: &'a mut dyn CodecSession, slot: usize) -> Option<&'a mut [u8]> {
        match self {
            BufferAccess::PerSlot => session.input_buffer(slot),
            BufferAccess::Table => session.input_buffer_table().get_mut(slot).map(Vec::as_mut_slice),
        }
    }

    /// Read-only view of output slot `slot`.
    pub fn output_buffer<'a>(&self, session: &'a dyn CodecSession, slot: usize) -> Option<&'a [u8]> {
        match self {
            BufferAccess::PerSlot => session.output_buffer(slot),
            BufferAccess::Table => session.output_buffer_table().get(slot).map(Vec::as_slice),
        }
    }
}

impl fmt::Display for CodecRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decoder => write!(f, "decoder"),
            Self::Encoder => write!(f, "encoder"),
        }
    }
}
