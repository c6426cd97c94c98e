//! Track format definitions.
//!
//! A [`TrackFormat`] is the codec configuration of one track: the codec id
//! plus whichever video or audio parameters apply. Two instances exist per
//! track during a run, the input format read from the source and the output
//! format negotiated by the encoder (which may differ from the one requested).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Codec identifiers understood by the engine.
pub mod mime {
    /// H.264/AVC video.
    pub const VIDEO_AVC: &str = "video/avc";
    /// H.265/HEVC video.
    pub const VIDEO_HEVC: &str = "video/hevc";
    /// AAC audio.
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    /// Interleaved signed 16-bit PCM.
    pub const AUDIO_RAW: &str = "audio/raw";
}

/// AAC Low Complexity object type.
pub const AAC_PROFILE_LC: u32 = 2;

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    /// Video track.
    Video,
    /// Audio track.
    Audio,
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Codec parameters for one track.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackFormat {
    /// Codec id (see [`mime`]).
    pub mime: String,
    /// Width in pixels.
    pub width: Option<u32>,
    /// Height in pixels.
    pub height: Option<u32>,
    /// Display rotation in degrees.
    pub rotation_degrees: Option<i32>,
    /// Frames per second.
    pub frame_rate: Option<u32>,
    /// Key frame interval in seconds.
    pub i_frame_interval: Option<u32>,
    /// Target bitrate in bits per second.
    pub bit_rate: Option<u32>,
    /// Sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Interleaved channel count.
    pub channel_count: Option<u32>,
    /// Codec profile.
    pub profile: Option<u32>,
    /// Codec level.
    pub level: Option<u32>,
    /// Largest compressed sample the track produces, in bytes.
    pub max_input_size: Option<usize>,
    /// Codec-specific data (`csd-0`, `csd-1`, ...). For AVC, SPS then PPS.
    pub csd: Vec<Vec<u8>>,
}

impl TrackFormat {
    /// Create a video format.
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    /// Create an audio format.
    pub fn audio(mime: impl Into<String>, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            mime: mime.into(),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Default::default()
        }
    }

    /// Track type implied by the codec id, if recognisable.
    pub fn track_type(&self) -> Option<TrackType> {
        if self.mime.starts_with("video/") {
            Some(TrackType::Video)
        } else if self.mime.starts_with("audio/") {
            Some(TrackType::Audio)
        } else {
            None
        }
    }

    /// Set the bitrate.
    #[must_use]
    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    /// Set the frame rate.
    #[must_use]
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Set the key frame interval.
    #[must_use]
    pub fn with_i_frame_interval(mut self, seconds: u32) -> Self {
        self.i_frame_interval = Some(seconds);
        self
    }

    /// Set the codec profile.
    #[must_use]
    pub fn with_profile(mut self, profile: u32) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Set the largest sample size.
    #[must_use]
    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = Some(size);
        self
    }

    /// Append a codec-specific data block.
    #[must_use]
    pub fn with_csd(mut self, data: Vec<u8>) -> Self {
        self.csd.push(data);
        self
    }

    /// Codec-specific data block `index`.
    pub fn csd(&self, index: usize) -> Option<&[u8]> {
        self.csd.get(index).map(Vec::as_slice)
    }

    /// Sample rate, failing if absent.
    pub fn require_sample_rate(&self) -> Result<u32> {
        self.sample_rate.ok_or(Error::MissingKey("sample-rate"))
    }

    /// Channel count, failing if absent.
    pub fn require_channel_count(&self) -> Result<u32> {
        self.channel_count.ok_or(Error::MissingKey("channel-count"))
    }

    /// Width and height, failing if either is absent.
    pub fn require_dimensions(&self) -> Result<(u32, u32)> {
        let width = self.width.ok_or(Error::MissingKey("width"))?;
        let height = self.height.ok_or(Error::MissingKey("height"))?;
        Ok((width, height))
    }
}

impl fmt::Display for TrackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime)?;
        if let (Some(w), Some(h)) = (self.width, self.height) {
            write!(f, " {w}x{h}")?;
        }
        if let Some(rate) = self.sample_rate {
            write!(f, " {rate}Hz")?;
        }
        if let Some(channels) = self.channel_count {
            write!(f, " {channels}ch")?;
        }
        if let Some(bit_rate) = self.bit_rate {
            write!(f, " {bit_rate}bps")?;
        }
        Ok(())
    }
}
