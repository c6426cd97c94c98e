//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use vcompress_pipeline::{PipelineError, Result, ValidatorConfig, DEFAULT_HOLDING_CAPACITY};

/// Tunables of the step loop and the muxer front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sleep after a loop iteration in which no pipeline made progress.
    pub idle_sleep_ms: u64,
    /// Report progress every this many loop iterations.
    pub progress_interval_steps: u64,
    /// Bytes the muxer may hold before both output formats are known.
    pub holding_buffer_capacity: usize,
    /// Output format checks applied before the container is opened.
    pub validator: ValidatorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_sleep_ms: 10,
            progress_interval_steps: 10,
            holding_buffer_capacity: DEFAULT_HOLDING_CAPACITY,
            validator: ValidatorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| vcompress_core::Error::Config(format!("Invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.progress_interval_steps == 0 {
            return Err(config_error("progress_interval_steps must be positive"));
        }
        if self.validator.video_codecs.is_empty() || self.validator.audio_codecs.is_empty() {
            return Err(config_error("validator must allow at least one codec per track"));
        }
        Ok(())
    }

    /// Set the idle sleep.
    #[must_use]
    pub fn idle_sleep_ms(mut self, ms: u64) -> Self {
        self.idle_sleep_ms = ms;
        self
    }

    /// Set the progress reporting interval.
    #[must_use]
    pub fn progress_interval_steps(mut self, steps: u64) -> Self {
        self.progress_interval_steps = steps;
        self
    }

    /// Set the holding buffer capacity.
    #[must_use]
    pub fn holding_buffer_capacity(mut self, bytes: usize) -> Self {
        self.holding_buffer_capacity = bytes;
        self
    }

    /// Set the output format checks.
    #[must_use]
    pub fn validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }
}

fn config_error(msg: &str) -> PipelineError {
    vcompress_core::Error::Config(msg.to_string()).into()
}
