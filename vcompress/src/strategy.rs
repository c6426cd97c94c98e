//! Output format strategies.
//!
//! A strategy looks at a source track and answers with the format the encoder
//! should be configured with, or `None` to copy the track unchanged.

use serde::{Deserialize, Serialize};
use tracing::debug;
use vcompress_core::format::AAC_PROFILE_LC;
use vcompress_core::{mime, TrackFormat};
use vcompress_pipeline::{PipelineError, Result};

/// Chooses per-track output formats.
pub trait OutputFormatStrategy {
    /// Desired video output format, `None` to pass the track through.
    fn video_output_format(&self, input: &TrackFormat) -> Result<Option<TrackFormat>>;

    /// Desired audio output format, `None` to pass the track through.
    fn audio_output_format(&self, input: &TrackFormat) -> Result<Option<TrackFormat>>;
}

/// Long side of the 720p preset.
pub const HD720_LONG_SIDE: u32 = 1280;
/// Short side of the 720p preset.
pub const HD720_SHORT_SIDE: u32 = 720;

/// Downscale 16:9 video to 720p and optionally re-encode audio as AAC-LC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hd720Strategy {
    /// Video bitrate in bits per second.
    pub video_bit_rate: u32,
    /// Audio bitrate, `None` to keep the source audio.
    pub audio_bit_rate: Option<u32>,
    /// Audio channel count, `None` to keep the source audio.
    pub audio_channels: Option<u32>,
}

impl Default for Hd720Strategy {
    fn default() -> Self {
        Self {
            video_bit_rate: 1_280_000,
            audio_bit_rate: Some(128_000),
            audio_channels: Some(1),
        }
    }
}

impl Hd720Strategy {
    /// Frame rate requested from the encoder.
    pub const FRAME_RATE: u32 = 30;
    /// Key frame interval in seconds.
    pub const I_FRAME_INTERVAL: u32 = 3;

    /// Re-encode video at `video_bit_rate`, keep audio as is.
    pub fn new(video_bit_rate: u32) -> Self {
        Self {
            video_bit_rate,
            audio_bit_rate: None,
            audio_channels: None,
        }
    }

    /// Re-encode audio with the given bitrate and channel count.
    #[must_use]
    pub fn with_audio(mut self, bit_rate: u32, channels: u32) -> Self {
        self.audio_bit_rate = Some(bit_rate);
        self.audio_channels = Some(channels);
        self
    }
}

impl OutputFormatStrategy for Hd720Strategy {
    fn video_output_format(&self, input: &TrackFormat) -> Result<Option<TrackFormat>> {
        let (width, height) = input.require_dimensions()?;
        let (long, short, out_width, out_height) = if width >= height {
            (width, height, HD720_LONG_SIDE, HD720_SHORT_SIDE)
        } else {
            (height, width, HD720_SHORT_SIDE, HD720_LONG_SIDE)
        };

        if u64::from(long) * 9 != u64::from(short) * 16 {
            return Err(PipelineError::Unsupported(format!(
                "This video is not 16:9, and is not able to transcode. ({width}x{height})"
            )));
        }
        if short <= HD720_SHORT_SIDE {
            debug!(width, height, "Video is already 720p or smaller, passing through");
            return Ok(None);
        }

        Ok(Some(
            TrackFormat::video(mime::VIDEO_AVC, out_width, out_height)
                .with_bit_rate(self.video_bit_rate)
                .with_frame_rate(Self::FRAME_RATE)
                .with_i_frame_interval(Self::I_FRAME_INTERVAL),
        ))
    }

    fn audio_output_format(&self, input: &TrackFormat) -> Result<Option<TrackFormat>> {
        let (Some(bit_rate), Some(channels)) = (self.audio_bit_rate, self.audio_channels) else {
            return Ok(None);
        };
        let sample_rate = input.require_sample_rate()?;
        Ok(Some(
            TrackFormat::audio(mime::AUDIO_AAC, sample_rate, channels)
                .with_profile(AAC_PROFILE_LC)
                .with_bit_rate(bit_rate),
        ))
    }
}

/// Never transcode. The engine falls back to a raw file copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassthroughStrategy;

impl OutputFormatStrategy for PassthroughStrategy {
    fn video_output_format(&self, _input: &TrackFormat) -> Result<Option<TrackFormat>> {
        Ok(None)
    }

    fn audio_output_format(&self, _input: &TrackFormat) -> Result<Option<TrackFormat>> {
        Ok(None)
    }
}

/// Fixed output formats, typically loaded from JSON.
///
/// Audio sample rate and channel count left unset are taken from the source,
/// since resampling is not available.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedStrategy {
    /// Video output format, `None` to pass the track through.
    pub video: Option<TrackFormat>,
    /// Audio output format, `None` to pass the track through.
    pub audio: Option<TrackFormat>,
}

impl FixedStrategy {
    /// Strategy with explicit formats.
    pub fn new(video: Option<TrackFormat>, audio: Option<TrackFormat>) -> Self {
        Self { video, audio }
    }

    /// Parse a JSON document with optional `video` and `audio` formats.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| vcompress_core::Error::Config(format!("Invalid strategy: {e}")).into())
    }
}

impl OutputFormatStrategy for FixedStrategy {
    fn video_output_format(&self, _input: &TrackFormat) -> Result<Option<TrackFormat>> {
        Ok(self.video.clone())
    }

    fn audio_output_format(&self, input: &TrackFormat) -> Result<Option<TrackFormat>> {
        let Some(mut format) = self.audio.clone() else {
            return Ok(None);
        };
        if format.sample_rate.is_none() {
            format.sample_rate = Some(input.require_sample_rate()?);
        }
        if format.channel_count.is_none() {
            format.channel_count = Some(input.require_channel_count()?);
        }
        Ok(Some(format))
    }
}
