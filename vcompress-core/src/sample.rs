//! Compressed sample metadata.
//!
//! A sample is a byte range inside some buffer (a demuxer read buffer or a
//! codec output slot) plus a [`BufferInfo`] describing it. Samples are never
//! owned by the pipeline for longer than one hand-off.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Flags attached to a sample or codec buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SampleFlags: u32 {
        /// The sample is a sync (key) frame.
        const KEY_FRAME = 0x0001;
        /// The buffer carries codec configuration, not media data.
        const CODEC_CONFIG = 0x0002;
        /// Last buffer of the stream.
        const END_OF_STREAM = 0x0004;
    }
}

/// Location and timing of one sample inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    /// Start of the valid data.
    pub offset: usize,
    /// Number of valid bytes.
    pub size: usize,
    /// Presentation timestamp in microseconds.
    pub presentation_time_us: i64,
    /// Sample flags.
    pub flags: SampleFlags,
}

impl BufferInfo {
    /// Create buffer info.
    pub fn new(offset: usize, size: usize, presentation_time_us: i64, flags: SampleFlags) -> Self {
        Self {
            offset,
            size,
            presentation_time_us,
            flags,
        }
    }

    /// Overwrite every field.
    pub fn set(&mut self, offset: usize, size: usize, presentation_time_us: i64, flags: SampleFlags) {
        *self = Self::new(offset, size, presentation_time_us, flags);
    }

    /// Byte range of the valid data.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.size
    }

    /// Check the end-of-stream flag.
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }

    /// Check the codec-config flag.
    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(SampleFlags::CODEC_CONFIG)
    }

    /// Check the key-frame flag.
    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(SampleFlags::KEY_FRAME)
    }
}
