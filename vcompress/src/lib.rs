//! # vcompress
//!
//! Re-encode a video container at a target bitrate and resolution.
//!
//! The engine moves both tracks of a source container through platform codec
//! sessions and writes them into a new container. Codecs and containers come
//! from a [`MediaPlatform`]; [`software::SoftwarePlatform`] runs everything
//! in-process.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use vcompress::software::SoftwarePlatform;
//!
//! fn main() -> vcompress::Result<()> {
//!     let stats = vcompress::compress_video(
//!         SoftwarePlatform::new(),
//!         Path::new("input.vcx"),
//!         Path::new("output.vcx"),
//!     )?;
//!     println!("done in {} steps", stats.steps);
//!     Ok(())
//! }
//! ```

mod engine;
mod options;
mod strategy;

pub use engine::{Interrupt, ProgressCallback, TranscodeEngine, TranscodeStats, PROGRESS_UNKNOWN};
pub use options::EngineConfig;
pub use strategy::{FixedStrategy, Hd720Strategy, OutputFormatStrategy, PassthroughStrategy, HD720_LONG_SIDE, HD720_SHORT_SIDE};

pub use vcompress_core::{mime, BufferInfo, SampleFlags, TrackFormat, TrackType};
pub use vcompress_pipeline::{software, MediaPlatform, PipelineError, Result, ValidatorConfig};

use std::path::Path;

/// Compress `input` into `output` with the 720p preset: 1.28 Mbit/s video,
/// 128 kbit/s mono AAC audio.
pub fn compress_video<P: MediaPlatform>(platform: P, input: &Path, output: &Path) -> Result<TranscodeStats> {
    TranscodeEngine::new(platform).transcode(input, output, &Hd720Strategy::default())
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
