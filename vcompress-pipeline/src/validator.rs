//! Output format validation.
//!
//! Run once both negotiated output formats are known, before the container
//! is opened. A rejected format aborts the run with
//! [`PipelineError::InvalidOutputFormat`].

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use vcompress_core::avc::{PROFILE_IDC_BASELINE, PROFILE_IDC_EXTENDED, PROFILE_IDC_HIGH, PROFILE_IDC_MAIN};
use vcompress_core::{mime, SpsHeader, TrackFormat};

/// Codec ids and profiles the output container accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Accepted video codec ids.
    pub video_codecs: Vec<String>,
    /// Accepted AVC `profile_idc` values, read from the SPS in `csd-0`.
    pub avc_profiles: Vec<u8>,
    /// Accepted audio codec ids.
    pub audio_codecs: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            video_codecs: vec![mime::VIDEO_AVC.to_string()],
            avc_profiles: vec![
                PROFILE_IDC_BASELINE,
                PROFILE_IDC_MAIN,
                PROFILE_IDC_EXTENDED,
                PROFILE_IDC_HIGH,
            ],
            audio_codecs: vec![mime::AUDIO_AAC.to_string()],
        }
    }
}

/// Checks negotiated output formats against a [`ValidatorConfig`].
#[derive(Debug, Clone, Default)]
pub struct OutputFormatValidator {
    config: ValidatorConfig,
}

impl OutputFormatValidator {
    /// Create a new validator.
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate both track formats.
    pub fn validate(&self, video: &TrackFormat, audio: &TrackFormat) -> Result<()> {
        self.validate_video(video)?;
        self.validate_audio(audio)
    }

    /// Check the codec id and, for AVC, the profile of the encoded SPS.
    pub fn validate_video(&self, format: &TrackFormat) -> Result<()> {
        if !self.config.video_codecs.iter().any(|m| *m == format.mime) {
            return Err(PipelineError::InvalidOutputFormat(format!(
                "Video codec not supported, actual mime type: {}",
                format.mime
            )));
        }
        if format.mime != mime::VIDEO_AVC {
            return Ok(());
        }

        let csd = format
            .csd(0)
            .ok_or_else(|| PipelineError::InvalidOutputFormat("AVC format carries no SPS in csd-0".into()))?;
        let sps = SpsHeader::parse(csd).map_err(|e| PipelineError::InvalidOutputFormat(e.to_string()))?;
        if !self.config.avc_profiles.contains(&sps.profile_idc) {
            return Err(PipelineError::InvalidOutputFormat(format!(
                "AVC profile not supported, actual profile_idc: {}",
                sps.profile_idc
            )));
        }
        Ok(())
    }

    /// Check the codec id only.
    pub fn validate_audio(&self, format: &TrackFormat) -> Result<()> {
        if !self.config.audio_codecs.iter().any(|m| *m == format.mime) {
            return Err(PipelineError::InvalidOutputFormat(format!(
                "Audio codec not supported, actual mime type: {}",
                format.mime
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avc(profile_idc: u8) -> TrackFormat {
        let sps = SpsHeader {
            profile_idc,
            constraint_flags: 0,
            level_idc: 31,
            seq_parameter_set_id: 0,
        };
        TrackFormat::video(mime::VIDEO_AVC, 1280, 720).with_csd(sps.to_annex_b())
    }

    #[test]
    fn test_accepts_known_profiles() {
        let validator = OutputFormatValidator::default();
        for profile in [66, 77, 88, 100] {
            validator.validate_video(&avc(profile)).unwrap();
        }
    }

    #[test]
    fn test_rejects_high_10() {
        let validator = OutputFormatValidator::default();
        assert!(matches!(
            validator.validate_video(&avc(110)),
            Err(PipelineError::InvalidOutputFormat(_))
        ));
    }

    #[test]
    fn test_rejects_non_avc_video() {
        let validator = OutputFormatValidator::default();
        let hevc = TrackFormat::video(mime::VIDEO_HEVC, 1280, 720);
        assert!(matches!(
            validator.validate_video(&hevc),
            Err(PipelineError::InvalidOutputFormat(_))
        ));
    }

    #[test]
    fn test_rejects_missing_sps() {
        let validator = OutputFormatValidator::default();
        let format = TrackFormat::video(mime::VIDEO_AVC, 1280, 720);
        assert!(validator.validate_video(&format).is_err());

        let pps_only = format.with_csd(vec![0, 0, 0, 1, 0x68, 0xce, 0x38, 0x80]);
        assert!(validator.validate_video(&pps_only).is_err());
    }

    #[test]
    fn test_audio_codec_only() {
        let validator = OutputFormatValidator::default();
        validator
            .validate_audio(&TrackFormat::audio(mime::AUDIO_AAC, 44_100, 7))
            .unwrap();
        assert!(validator
            .validate_audio(&TrackFormat::audio(mime::AUDIO_RAW, 44_100, 2))
            .is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config: ValidatorConfig =
            serde_json::from_str(r#"{"video_codecs":["video/avc","video/hevc"]}"#).unwrap();
        assert_eq!(config.avc_profiles, vec![66, 77, 88, 100]);

        let validator = OutputFormatValidator::new(config);
        validator
            .validate_video(&TrackFormat::video(mime::VIDEO_HEVC, 640, 360))
            .unwrap();
    }
}
