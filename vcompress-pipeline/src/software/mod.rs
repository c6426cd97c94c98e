//! In-process reference platform.
//!
//! Codec sessions copy data through unchanged and containers are JSON-lines
//! files, which makes the whole engine runnable and testable without any
//! hardware codec. Session behaviour (slot counts, buffer API generation,
//! protocol faults) is configurable per codec id.

mod codec;
mod container;
mod surface;

pub use codec::{SoftwareCodec, SoftwareCodecConfig, VIDEO_RAW};
pub use container::{
    ContainerFile, ContainerHeader, ContainerSample, SoftwareDemuxer, SoftwareMuxer, METADATA_DURATION,
    METADATA_ROTATION,
};
pub use surface::{SoftwareInputSurface, SoftwareOutputSurface};

use crate::codec::{CodecSession, OutputSurface};
use crate::platform::{Demuxer, MediaPlatform, Muxer};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use surface::SharedHub;
use tracing::debug;
use vcompress_core::error::Result;
use vcompress_core::CodecError;

/// Platform backed by [`SoftwareCodec`] sessions and [`ContainerFile`]s.
#[derive(Debug, Default)]
pub struct SoftwarePlatform {
    decoder_config: SoftwareCodecConfig,
    encoder_config: SoftwareCodecConfig,
    encoder_overrides: HashMap<String, SoftwareCodecConfig>,
    unsupported: HashSet<String>,
    fail_muxer_release: bool,
    sessions_created: Cell<usize>,
    hub: SharedHub,
}

impl SoftwarePlatform {
    /// Platform with default session settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings used for every decoder.
    #[must_use]
    pub fn with_decoder_config(mut self, config: SoftwareCodecConfig) -> Self {
        self.decoder_config = config;
        self
    }

    /// Settings used for encoders without a per-codec override.
    #[must_use]
    pub fn with_encoder_config(mut self, config: SoftwareCodecConfig) -> Self {
        self.encoder_config = config;
        self
    }

    /// Settings for encoders of codec id `mime`.
    #[must_use]
    pub fn with_encoder_config_for(mut self, mime: &str, config: SoftwareCodecConfig) -> Self {
        self.encoder_overrides.insert(mime.to_string(), config);
        self
    }

    /// Refuse to create any session for codec id `mime`.
    #[must_use]
    pub fn with_unsupported_codec(mut self, mime: &str) -> Self {
        self.unsupported.insert(mime.to_string());
        self
    }

    /// Muxers fail to release, after writing everything they were given.
    #[must_use]
    pub fn with_failing_muxer_release(mut self) -> Self {
        self.fail_muxer_release = true;
        self
    }

    /// Number of codec sessions handed out so far.
    pub fn sessions_created(&self) -> usize {
        self.sessions_created.get()
    }

    fn create_session(&self, kind: &str, mime: &str, config: SoftwareCodecConfig) -> Result<Box<dyn CodecSession>> {
        if self.unsupported.contains(mime) {
            return Err(CodecError::NotFound(mime.to_string()).into());
        }
        let n = self.sessions_created.get() + 1;
        self.sessions_created.set(n);
        let name = format!("sw.{kind}.{n}");
        debug!(%name, mime, "Created software codec session");
        Ok(Box::new(SoftwareCodec::new(name, config, self.hub.clone())))
    }
}

impl MediaPlatform for SoftwarePlatform {
    fn open_demuxer(&self, path: &Path) -> Result<Box<dyn Demuxer>> {
        Ok(Box::new(SoftwareDemuxer::open(path)?))
    }

    fn create_muxer(&self, path: &Path) -> Result<Box<dyn Muxer>> {
        let muxer = SoftwareMuxer::create(path)?;
        if self.fail_muxer_release {
            return Ok(Box::new(muxer.with_failing_release()));
        }
        Ok(Box::new(muxer))
    }

    fn create_decoder(&self, mime: &str) -> Result<Box<dyn CodecSession>> {
        self.create_session("decoder", mime, self.decoder_config.clone())
    }

    fn create_encoder(&self, mime: &str) -> Result<Box<dyn CodecSession>> {
        let config = self
            .encoder_overrides
            .get(mime)
            .unwrap_or(&self.encoder_config)
            .clone();
        self.create_session("encoder", mime, config)
    }

    fn create_output_surface(&self) -> Result<Box<dyn OutputSurface>> {
        Ok(Box::new(SoftwareOutputSurface::new(self.hub.clone())))
    }
}
