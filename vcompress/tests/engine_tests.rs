//! End-to-end engine tests on the software platform.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use vcompress::software::{
    ContainerFile, SoftwareCodecConfig, SoftwarePlatform, METADATA_DURATION, METADATA_ROTATION,
};
use vcompress::{
    mime, EngineConfig, FixedStrategy, Hd720Strategy, PassthroughStrategy, PipelineError, SampleFlags,
    TrackFormat, TranscodeEngine, PROGRESS_UNKNOWN,
};
use vcompress_core::SpsHeader;

const SAMPLE_RATE: u32 = 44_100;
const FRAMES_PER_CHUNK: usize = 1024;
const FRAME_INTERVAL_US: i64 = 33_333;

struct Source {
    width: u32,
    height: u32,
    frames: usize,
    chunks: usize,
    duration_ms: Option<&'static str>,
    rotation: Option<&'static str>,
    with_audio: bool,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frames: 30,
            chunks: 43,
            duration_ms: Some("1000"),
            rotation: None,
            with_audio: true,
        }
    }
}

impl Source {
    fn build(&self) -> ContainerFile {
        let sps = SpsHeader {
            profile_idc: 100,
            constraint_flags: 0,
            level_idc: 40,
            seq_parameter_set_id: 0,
        };
        let mut file = ContainerFile::new();
        let video = file.add_track(
            TrackFormat::video(mime::VIDEO_AVC, self.width, self.height)
                .with_frame_rate(30)
                .with_csd(sps.to_annex_b()),
        );
        let audio = self
            .with_audio
            .then(|| file.add_track(TrackFormat::audio(mime::AUDIO_AAC, SAMPLE_RATE, 2)));
        if let Some(ms) = self.duration_ms {
            file.set_metadata(METADATA_DURATION, ms);
        }
        if let Some(degrees) = self.rotation {
            file.set_metadata(METADATA_ROTATION, degrees);
        }

        for i in 0..self.frames.max(self.chunks) {
            if i < self.frames {
                let flags = if i % 30 == 0 { SampleFlags::KEY_FRAME } else { SampleFlags::empty() };
                file.push_sample(video, i as i64 * FRAME_INTERVAL_US, flags, vec![(i % 251) as u8; 200]);
            }
            if let Some(audio) = audio.filter(|_| i < self.chunks) {
                let pts = (i * FRAMES_PER_CHUNK) as i64 * 1_000_000 / i64::from(SAMPLE_RATE);
                let pcm: Vec<u8> = (0..FRAMES_PER_CHUNK * 2)
                    .flat_map(|s| (((s + i) % 2000) as i16 - 1000).to_ne_bytes())
                    .collect();
                file.push_sample(audio, pts, SampleFlags::empty(), pcm);
            }
        }
        file
    }

    fn write(&self, dir: &Path) -> (PathBuf, ContainerFile) {
        let path = dir.join("input.vcx");
        let file = self.build();
        file.write_to(&path).unwrap();
        (path, file)
    }
}

fn fast_config() -> EngineConfig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    EngineConfig::new().idle_sleep_ms(0)
}

fn last_pts(file: &ContainerFile, track: usize) -> i64 {
    file.track_samples(track).map(|s| s.pts).max().unwrap()
}

#[test]
fn test_stereo_to_mono_with_video_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let (input, source) = Source {
        width: 1280,
        height: 720,
        ..Source::default()
    }
    .write(dir.path());
    let output = dir.path().join("output.vcx");

    let mut engine = TranscodeEngine::new(SoftwarePlatform::new()).with_config(fast_config());
    let stats = engine.transcode(&input, &output, &Hd720Strategy::default()).unwrap();
    assert!(!stats.raw_copy);
    assert_eq!(stats.final_progress, 1.0);

    let out = ContainerFile::read_from(&output).unwrap();
    assert_eq!(out.header.tracks[1].channel_count, Some(1));
    assert_eq!(out.header.tracks[1].sample_rate, Some(SAMPLE_RATE));

    let source_video: Vec<_> = source.track_samples(0).map(|s| (s.pts, s.flags, &s.data)).collect();
    let output_video: Vec<_> = out.track_samples(0).map(|s| (s.pts, s.flags, &s.data)).collect();
    assert_eq!(output_video, source_video);

    let drift = (last_pts(&out, 1) - last_pts(&source, 1)).abs();
    assert!(drift <= FRAME_INTERVAL_US, "audio drifted by {drift}us");
    let mono_bytes: usize = out.track_samples(1).map(|s| s.data.len()).sum();
    assert_eq!(mono_bytes, source.track_samples(1).map(|s| s.data.len()).sum::<usize>() / 2);
}

#[test]
fn test_no_transcode_copies_file() {
    let dir = tempfile::tempdir().unwrap();
    let (input, _) = Source::default().write(dir.path());
    let output = dir.path().join("output.vcx");

    let mut engine = TranscodeEngine::new(SoftwarePlatform::new());
    let stats = engine.transcode(&input, &output, &PassthroughStrategy).unwrap();

    assert!(stats.raw_copy);
    assert_eq!(engine.platform().sessions_created(), 0);
    assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&input).unwrap());
}

#[test]
fn test_repeated_format_change_aborts_after_header() {
    let dir = tempfile::tempdir().unwrap();
    let (input, _) = Source::default().write(dir.path());
    let output = dir.path().join("output.vcx");

    let platform = SoftwarePlatform::new().with_encoder_config_for(
        mime::VIDEO_AVC,
        SoftwareCodecConfig::default().with_repeated_format_change(),
    );
    let mut engine = TranscodeEngine::new(platform).with_config(fast_config());
    let err = engine.transcode(&input, &output, &Hd720Strategy::default()).unwrap_err();
    assert!(matches!(err, PipelineError::ProtocolViolation(_)), "unexpected error: {err}");

    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.lines().count() <= 1, "samples committed: {written}");
}

#[test]
fn test_compress_video_downscales_to_720p() {
    let dir = tempfile::tempdir().unwrap();
    let (input, source) = Source::default().write(dir.path());
    let output = dir.path().join("output.vcx");

    let stats = vcompress::compress_video(SoftwarePlatform::new(), &input, &output).unwrap();
    assert!(stats.steps > 0);

    let out = ContainerFile::read_from(&output).unwrap();
    let video = &out.header.tracks[0];
    assert_eq!((video.width, video.height), (Some(1280), Some(720)));
    assert_eq!(video.bit_rate, Some(1_280_000));
    assert_eq!(out.track_samples(0).count(), source.track_samples(0).count());
    assert_eq!(out.header.tracks[1].channel_count, Some(1));
}

#[test]
fn test_progress_reported_in_range() {
    let dir = tempfile::tempdir().unwrap();
    let (input, _) = Source::default().write(dir.path());
    let output = dir.path().join("output.vcx");

    let reports = Rc::new(RefCell::new(Vec::new()));
    let sink = reports.clone();
    let mut engine = TranscodeEngine::new(SoftwarePlatform::new())
        .with_config(fast_config().progress_interval_steps(1))
        .on_progress(move |p| sink.borrow_mut().push(p));
    engine.transcode(&input, &output, &Hd720Strategy::default()).unwrap();

    let reports = reports.borrow();
    assert!(!reports.is_empty());
    assert!(reports.iter().all(|p| (0.0..=1.0).contains(p)), "{reports:?}");
}

#[test]
fn test_unknown_duration_reports_negative_progress() {
    let dir = tempfile::tempdir().unwrap();
    let (input, _) = Source {
        duration_ms: Some("not a number"),
        ..Source::default()
    }
    .write(dir.path());
    let output = dir.path().join("output.vcx");

    let reports = Rc::new(RefCell::new(Vec::new()));
    let sink = reports.clone();
    let mut engine = TranscodeEngine::new(SoftwarePlatform::new())
        .with_config(fast_config().progress_interval_steps(1))
        .on_progress(move |p| sink.borrow_mut().push(p));
    let stats = engine.transcode(&input, &output, &Hd720Strategy::default()).unwrap();

    assert_eq!(stats.final_progress, PROGRESS_UNKNOWN);
    let reports = reports.borrow();
    assert!(!reports.is_empty());
    assert!(reports.iter().all(|p| *p == PROGRESS_UNKNOWN));
}

#[test]
fn test_codec_latency_causes_idle_steps() {
    let dir = tempfile::tempdir().unwrap();
    let (input, source) = Source {
        frames: 10,
        chunks: 10,
        ..Source::default()
    }
    .write(dir.path());
    let output = dir.path().join("output.vcx");

    let slow = SoftwareCodecConfig::default().with_latency(3);
    let platform = SoftwarePlatform::new()
        .with_decoder_config(slow.clone())
        .with_encoder_config(slow);
    let mut engine = TranscodeEngine::new(platform).with_config(fast_config());
    let stats = engine.transcode(&input, &output, &Hd720Strategy::default()).unwrap();

    assert!(stats.idle_steps > 0);
    let out = ContainerFile::read_from(&output).unwrap();
    assert_eq!(out.track_samples(0).count(), source.track_samples(0).count());
}

#[test]
fn test_interrupt_cancels_at_idle_point() {
    let dir = tempfile::tempdir().unwrap();
    let (input, _) = Source::default().write(dir.path());
    let output = dir.path().join("output.vcx");

    let slow = SoftwareCodecConfig::default().with_latency(3);
    let platform = SoftwarePlatform::new()
        .with_decoder_config(slow.clone())
        .with_encoder_config(slow);
    let mut engine = TranscodeEngine::new(platform).with_config(fast_config());
    engine.interrupt().trigger();

    let err = engine.transcode(&input, &output, &Hd720Strategy::default()).unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
}

#[test]
fn test_rotation_hint_carried_to_output() {
    let dir = tempfile::tempdir().unwrap();
    let (input, _) = Source {
        rotation: Some("90"),
        ..Source::default()
    }
    .write(dir.path());
    let output = dir.path().join("output.vcx");

    let mut engine = TranscodeEngine::new(SoftwarePlatform::new()).with_config(fast_config());
    engine.transcode(&input, &output, &Hd720Strategy::default()).unwrap();

    let out = ContainerFile::read_from(&output).unwrap();
    assert_eq!(out.header.metadata.get(METADATA_ROTATION).map(String::as_str), Some("90"));
}

#[test]
fn test_non_widescreen_rejected_before_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let (input, _) = Source {
        width: 1440,
        height: 1080,
        ..Source::default()
    }
    .write(dir.path());
    let output = dir.path().join("output.vcx");

    let mut engine = TranscodeEngine::new(SoftwarePlatform::new());
    let err = engine.transcode(&input, &output, &Hd720Strategy::default()).unwrap_err();
    assert!(matches!(err, PipelineError::Unsupported(_)));
    assert_eq!(engine.platform().sessions_created(), 0);
}

#[test]
fn test_setup_faults() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("output.vcx");
    let mut engine = TranscodeEngine::new(SoftwarePlatform::new());

    let err = engine
        .transcode(&dir.path().join("missing.vcx"), &output, &Hd720Strategy::default())
        .unwrap_err();
    assert!(matches!(err, PipelineError::Setup(_)));

    let (input, _) = Source {
        with_audio: false,
        chunks: 0,
        ..Source::default()
    }
    .write(dir.path());
    let err = engine.transcode(&input, &output, &Hd720Strategy::default()).unwrap_err();
    assert!(matches!(err, PipelineError::Setup(_)));

    let platform = SoftwarePlatform::new().with_unsupported_codec(mime::AUDIO_AAC);
    let (input, _) = Source::default().write(dir.path());
    let err = TranscodeEngine::new(platform)
        .transcode(&input, &output, &Hd720Strategy::default())
        .unwrap_err();
    assert!(matches!(err, PipelineError::Setup(_)));
}

#[test]
fn test_fixed_strategy_reencodes_audio_only() {
    let dir = tempfile::tempdir().unwrap();
    let (input, source) = Source {
        width: 1280,
        height: 720,
        ..Source::default()
    }
    .write(dir.path());
    let output = dir.path().join("output.vcx");

    let strategy = FixedStrategy::new(None, Some(TrackFormat::audio(mime::AUDIO_AAC, SAMPLE_RATE, 2)));
    let mut engine = TranscodeEngine::new(SoftwarePlatform::new()).with_config(fast_config());
    engine.transcode(&input, &output, &strategy).unwrap();

    let out = ContainerFile::read_from(&output).unwrap();
    let source_pcm: Vec<u8> = source.track_samples(1).flat_map(|s| s.data.clone()).collect();
    let output_pcm: Vec<u8> = out.track_samples(1).flat_map(|s| s.data.clone()).collect();
    assert_eq!(output_pcm, source_pcm);
}

#[test]
#[should_panic(expected = "Could not shut down")]
fn test_codec_release_failure_panics() {
    let dir = tempfile::tempdir().unwrap();
    let (input, _) = Source::default().write(dir.path());
    let output = dir.path().join("output.vcx");

    let platform =
        SoftwarePlatform::new().with_decoder_config(SoftwareCodecConfig::default().with_failing_release());
    let mut engine = TranscodeEngine::new(platform).with_config(fast_config());
    let _ = engine.transcode(&input, &output, &Hd720Strategy::default());
}

#[test]
fn test_muxer_release_failure_is_logged_only() {
    let dir = tempfile::tempdir().unwrap();
    let (input, source) = Source::default().write(dir.path());
    let output = dir.path().join("output.vcx");

    let platform = SoftwarePlatform::new().with_failing_muxer_release();
    let mut engine = TranscodeEngine::new(platform).with_config(fast_config());
    let stats = engine.transcode(&input, &output, &Hd720Strategy::default()).unwrap();
    assert_eq!(stats.final_progress, 1.0);

    let out = ContainerFile::read_from(&output).unwrap();
    assert_eq!(out.track_samples(0).count(), source.track_samples(0).count());
}
