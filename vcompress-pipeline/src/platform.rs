//! Platform collaborators: demuxer, muxer and the factory that creates them.
//!
//! The engine is written against these traits only. A concrete platform
//! supplies container access and codec sessions; [`crate::software`] is the
//! in-process reference implementation.

use crate::codec::{CodecSession, OutputSurface};
use std::path::Path;
use vcompress_core::error::Result;
use vcompress_core::{BufferInfo, SampleFlags, TrackFormat};

/// String metadata keys readable from a source container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKey {
    /// Display rotation in degrees.
    Rotation,
    /// Duration in milliseconds.
    Duration,
}

/// Container reader yielding compressed samples of all selected tracks in
/// file order.
pub trait Demuxer {
    /// Number of tracks in the container.
    fn track_count(&self) -> usize;

    /// Format of track `index`.
    fn track_format(&self, index: usize) -> Result<TrackFormat>;

    /// Include track `index` in the sample sequence.
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Track of the current sample, or `None` once every selected track is exhausted.
    fn sample_track_index(&self) -> Option<usize>;

    /// Copy the current sample into `buf`, returning its size.
    fn read_sample_data(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Presentation timestamp of the current sample.
    fn sample_time_us(&self) -> i64;

    /// Flags of the current sample. Only [`SampleFlags::KEY_FRAME`] is meaningful.
    fn sample_flags(&self) -> SampleFlags;

    /// Move to the next sample. Returns `false` at the end.
    fn advance(&mut self) -> bool;

    /// Raw metadata value, if present.
    fn metadata(&self, key: MetadataKey) -> Option<String>;

    /// Close the container.
    fn release(&mut self) -> Result<()>;
}

/// Container writer.
///
/// Every track must be added before [`Muxer::start`]; samples may only be
/// written between `start` and `stop`.
pub trait Muxer {
    /// Record the display rotation of the video track.
    fn set_orientation_hint(&mut self, degrees: i32) -> Result<()>;

    /// Add a track, returning its index.
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize>;

    /// Write the container header.
    fn start(&mut self) -> Result<()>;

    /// Write one sample. `data` holds exactly `info.size` bytes.
    fn write_sample_data(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<()>;

    /// Finalize the container.
    fn stop(&mut self) -> Result<()>;

    /// Free the writer. Unstopped output is abandoned.
    fn release(&mut self) -> Result<()>;
}

/// Factory for containers, codec sessions and render surfaces.
pub trait MediaPlatform {
    /// Open a container for reading.
    fn open_demuxer(&self, path: &Path) -> Result<Box<dyn Demuxer>>;

    /// Create a container writer targeting `path`.
    fn create_muxer(&self, path: &Path) -> Result<Box<dyn Muxer>>;

    /// Create a decoder for codec id `mime`.
    fn create_decoder(&self, mime: &str) -> Result<Box<dyn CodecSession>>;

    /// Create an encoder for codec id `mime`.
    fn create_encoder(&self, mime: &str) -> Result<Box<dyn CodecSession>>;

    /// Create a render target for a video decoder.
    fn create_output_surface(&self) -> Result<Box<dyn OutputSurface>>;
}
