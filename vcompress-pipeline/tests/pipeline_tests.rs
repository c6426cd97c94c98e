//! Track pipeline tests against the software platform.
//!
//! Both pipelines share one demuxer and one queued muxer, stepped in turn the
//! way the engine drives them.

use std::path::Path;
use vcompress_core::{mime, SampleFlags, SpsHeader, TrackFormat, TrackType};
use vcompress_pipeline::software::{
    ContainerFile, SoftwareCodecConfig, SoftwareDemuxer, SoftwareMuxer, SoftwarePlatform,
};
use vcompress_pipeline::{
    AnyTrackPipeline, AudioRemixer, AudioTrackPipeline, BufferApi, Demuxer, OutputFormatValidator,
    PassthroughTrackPipeline, PipelineError, QueuedMuxer, Result, StepContext, TrackPipeline, ValidatorConfig,
    VideoTrackPipeline, DEFAULT_HOLDING_CAPACITY,
};

const MAX_STEPS: usize = 10_000;

fn pcm(samples: impl IntoIterator<Item = i16>) -> Vec<u8> {
    samples.into_iter().flat_map(|s| s.to_ne_bytes()).collect()
}

fn baseline_sps() -> Vec<u8> {
    SpsHeader {
        profile_idc: 66,
        constraint_flags: 0,
        level_idc: 31,
        seq_parameter_set_id: 0,
    }
    .to_annex_b()
}

/// Video track 0 with `frames` frames, audio track 1 with `chunks` PCM chunks
/// of `chunk_samples` samples each.
fn source(frames: usize, chunks: usize, chunk_samples: usize, channels: u32) -> ContainerFile {
    let mut file = ContainerFile::new();
    let video = file.add_track(
        TrackFormat::video(mime::VIDEO_AVC, 1920, 1080)
            .with_frame_rate(30)
            .with_csd(baseline_sps()),
    );
    let audio = file.add_track(TrackFormat::audio(mime::AUDIO_AAC, 8000, channels));

    let frame_count = frames.max(chunks);
    for i in 0..frame_count {
        if i < frames {
            let flags = if i == 0 { SampleFlags::KEY_FRAME } else { SampleFlags::empty() };
            file.push_sample(video, i as i64 * 33_333, flags, vec![i as u8; 100]);
        }
        if i < chunks {
            let start = (i * chunk_samples) as i16;
            let samples = (0..chunk_samples as i16).map(|s| start + s);
            let pts = (i * chunk_samples) as i64 * 1_000_000 / (8000 * i64::from(channels));
            file.push_sample(audio, pts, SampleFlags::empty(), pcm(samples));
        }
    }
    file
}

fn h264_720p() -> TrackFormat {
    TrackFormat::video(mime::VIDEO_AVC, 1280, 720)
        .with_bit_rate(1_280_000)
        .with_frame_rate(30)
        .with_i_frame_interval(3)
}

struct Outcome {
    file: ContainerFile,
    steps: usize,
}

fn run(
    platform: &SoftwarePlatform,
    input: ContainerFile,
    mut pipelines: [AnyTrackPipeline; 2],
    output: &Path,
) -> Result<Outcome> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut demuxer = SoftwareDemuxer::from_file(input);
    let mut muxer = QueuedMuxer::new(
        Box::new(SoftwareMuxer::create(output)?),
        OutputFormatValidator::new(ValidatorConfig::default()),
        DEFAULT_HOLDING_CAPACITY,
    );

    let mut steps = 0;
    {
        let mut ctx = StepContext {
            demuxer: &mut demuxer,
            muxer: &mut muxer,
        };
        for pipeline in &mut pipelines {
            pipeline.setup(platform, &mut ctx)?;
        }
        ctx.demuxer.select_track(0)?;
        ctx.demuxer.select_track(1)?;

        while !pipelines.iter().all(|p| p.is_finished()) {
            assert!(steps < MAX_STEPS, "pipelines stalled");
            for pipeline in &mut pipelines {
                pipeline.step(&mut ctx)?;
            }
            steps += 1;
        }
    }

    muxer.stop()?;
    for pipeline in &mut pipelines {
        pipeline.release()?;
    }
    muxer.inner_mut().release()?;

    Ok(Outcome {
        file: ContainerFile::read_from(output)?,
        steps,
    })
}

fn audio_payload(file: &ContainerFile, track: usize) -> Vec<u8> {
    file.track_samples(track).flat_map(|s| s.data.iter().copied()).collect()
}

#[test]
fn test_transcode_downmixes_stereo() {
    let dir = tempfile::tempdir().unwrap();
    let input = source(5, 4, 64, 2);
    let platform = SoftwarePlatform::new();

    let pipelines = [
        AnyTrackPipeline::Video(VideoTrackPipeline::new(0, h264_720p())),
        AnyTrackPipeline::Audio(AudioTrackPipeline::new(1, TrackFormat::audio(mime::AUDIO_AAC, 8000, 1))),
    ];
    let out = run(&platform, input.clone(), pipelines, &dir.path().join("out.vcx"))
        .unwrap()
        .file;
    assert_eq!(out.header.tracks.len(), 2);
    assert_eq!(out.header.tracks[0].mime, mime::VIDEO_AVC);
    assert_eq!(out.header.tracks[1].mime, mime::AUDIO_AAC);
    assert_eq!(out.track_samples(0).count(), 5);

    let source_pcm = audio_payload(&input, 1);
    let mixed = audio_payload(&out, 1);
    assert_eq!(mixed.len(), source_pcm.len() / 2);
    let expected: Vec<u8> = source_pcm
        .chunks_exact(4)
        .flat_map(|c| {
            let a = i16::from_ne_bytes([c[0], c[1]]);
            let b = i16::from_ne_bytes([c[2], c[3]]);
            vcompress_pipeline::downmix_pair(a, b).to_ne_bytes()
        })
        .collect();
    assert_eq!(mixed, expected);
}

#[test]
fn test_video_frames_keep_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let input = source(6, 2, 32, 2);
    let platform = SoftwarePlatform::new();
    let pipelines = [
        AnyTrackPipeline::Video(VideoTrackPipeline::new(0, h264_720p())),
        AnyTrackPipeline::Audio(AudioTrackPipeline::new(1, TrackFormat::audio(mime::AUDIO_AAC, 8000, 2))),
    ];
    let out = run(&platform, input.clone(), pipelines, &dir.path().join("out.vcx"))
        .unwrap()
        .file;

    let source_pts: Vec<i64> = input.track_samples(0).map(|s| s.pts).collect();
    let output_pts: Vec<i64> = out.track_samples(0).map(|s| s.pts).collect();
    assert_eq!(output_pts, source_pts);
    assert!(out.track_samples(0).all(|s| !s.data.is_empty()));

    let csd = out.header.tracks[0].csd(0).unwrap();
    assert_eq!(SpsHeader::parse(csd).unwrap().profile_idc, 66);
}

#[test]
fn test_saturated_encoder_does_not_deadlock() {
    let dir = tempfile::tempdir().unwrap();
    // Mono chunks upmixed into encoder slots half their size: every decoded
    // buffer spills into the overflow.
    let input = source(3, 6, 128, 1);
    let tight = SoftwareCodecConfig::default().with_slots(1, 1).with_buffer_size(256);
    let platform = SoftwarePlatform::new()
        .with_decoder_config(tight.clone())
        .with_encoder_config(tight);

    let pipelines = [
        AnyTrackPipeline::Video(VideoTrackPipeline::new(0, h264_720p())),
        AnyTrackPipeline::Audio(AudioTrackPipeline::new(1, TrackFormat::audio(mime::AUDIO_AAC, 8000, 2))),
    ];
    let outcome = run(&platform, input.clone(), pipelines, &dir.path().join("out.vcx")).unwrap();
    assert!(outcome.steps < MAX_STEPS);

    let source_samples = audio_payload(&input, 1);
    let stereo = audio_payload(&outcome.file, 1);
    assert_eq!(stereo.len(), source_samples.len() * 2);
    for (mono, pair) in source_samples.chunks_exact(2).zip(stereo.chunks_exact(4)) {
        assert_eq!(&pair[..2], mono);
        assert_eq!(&pair[2..], mono);
    }

    let pts: Vec<i64> = outcome.file.track_samples(1).map(|s| s.pts).collect();
    assert!(pts.windows(2).all(|w| w[0] < w[1]), "audio timestamps not increasing: {pts:?}");
}

#[test]
fn test_table_buffer_api_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let input = source(2, 3, 64, 2);
    let table = SoftwareCodecConfig::default().with_buffer_api(BufferApi::Table);
    let platform = SoftwarePlatform::new()
        .with_decoder_config(table.clone())
        .with_encoder_config(table);

    let pipelines = [
        AnyTrackPipeline::Video(VideoTrackPipeline::new(0, h264_720p())),
        AnyTrackPipeline::Audio(AudioTrackPipeline::new(1, TrackFormat::audio(mime::AUDIO_AAC, 8000, 2))),
    ];
    let out = run(&platform, input.clone(), pipelines, &dir.path().join("out.vcx"))
        .unwrap()
        .file;
    assert_eq!(audio_payload(&out, 1), audio_payload(&input, 1));
    assert_eq!(out.track_samples(0).count(), 2);
}

#[test]
fn test_passthrough_tracks_are_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let input = source(4, 4, 16, 2);
    let platform = SoftwarePlatform::new();
    let pipelines = [
        AnyTrackPipeline::Passthrough(PassthroughTrackPipeline::new(0, TrackType::Video)),
        AnyTrackPipeline::Passthrough(PassthroughTrackPipeline::new(1, TrackType::Audio)),
    ];
    let out = run(&platform, input.clone(), pipelines, &dir.path().join("out.vcx"))
        .unwrap()
        .file;

    assert_eq!(platform.sessions_created(), 0);
    assert_eq!(out.header.tracks[0].mime, input.header.tracks[0].mime);
    for track in 0..2 {
        let source: Vec<_> = input.track_samples(track).map(|s| (s.pts, s.flags, &s.data)).collect();
        let copied: Vec<_> = out.track_samples(track).map(|s| (s.pts, s.flags, &s.data)).collect();
        assert_eq!(copied, source);
    }
}

#[test]
fn test_repeated_encoder_format_is_protocol_violation() {
    let dir = tempfile::tempdir().unwrap();
    let input = source(4, 2, 32, 2);
    let platform = SoftwarePlatform::new().with_encoder_config_for(
        mime::VIDEO_AVC,
        SoftwareCodecConfig::default().with_repeated_format_change(),
    );
    let pipelines = [
        AnyTrackPipeline::Video(VideoTrackPipeline::new(0, h264_720p())),
        AnyTrackPipeline::Audio(AudioTrackPipeline::new(1, TrackFormat::audio(mime::AUDIO_AAC, 8000, 2))),
    ];
    let result = run(&platform, input, pipelines, &dir.path().join("out.vcx"));
    assert!(matches!(result, Err(PipelineError::ProtocolViolation(_))));
}

#[test]
fn test_encoder_buffer_before_format_is_protocol_violation() {
    let dir = tempfile::tempdir().unwrap();
    let input = source(4, 2, 32, 2);
    let platform = SoftwarePlatform::new().with_encoder_config_for(
        mime::AUDIO_AAC,
        SoftwareCodecConfig::default().without_format_change(),
    );
    let pipelines = [
        AnyTrackPipeline::Video(VideoTrackPipeline::new(0, h264_720p())),
        AnyTrackPipeline::Audio(AudioTrackPipeline::new(1, TrackFormat::audio(mime::AUDIO_AAC, 8000, 1))),
    ];
    let result = run(&platform, input, pipelines, &dir.path().join("out.vcx"));
    assert!(matches!(result, Err(PipelineError::ProtocolViolation(_))));
}

#[test]
fn test_sample_rate_change_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let input = source(2, 2, 32, 2);
    let platform = SoftwarePlatform::new();
    let pipelines = [
        AnyTrackPipeline::Video(VideoTrackPipeline::new(0, h264_720p())),
        AnyTrackPipeline::Audio(AudioTrackPipeline::new(1, TrackFormat::audio(mime::AUDIO_AAC, 44100, 2))),
    ];
    let result = run(&platform, input, pipelines, &dir.path().join("out.vcx"));
    assert!(matches!(result, Err(PipelineError::Unsupported(_))));
}

#[test]
fn test_missing_encoder_fails_setup() {
    let dir = tempfile::tempdir().unwrap();
    let platform = SoftwarePlatform::new().with_unsupported_codec(mime::VIDEO_AVC);
    let pipelines = [
        AnyTrackPipeline::Video(VideoTrackPipeline::new(0, h264_720p())),
        AnyTrackPipeline::Audio(AudioTrackPipeline::new(1, TrackFormat::audio(mime::AUDIO_AAC, 8000, 2))),
    ];
    let result = run(&platform, source(1, 1, 8, 2), pipelines, &dir.path().join("out.vcx"));
    assert!(matches!(result, Err(PipelineError::Setup(_))));
}

#[test]
fn test_remixer_chosen_from_decoded_layout() {
    let mut demuxer = SoftwareDemuxer::from_file(source(1, 2, 32, 1));
    let dir = tempfile::tempdir().unwrap();
    let mut muxer = QueuedMuxer::new(
        Box::new(SoftwareMuxer::create(&dir.path().join("out.vcx")).unwrap()),
        OutputFormatValidator::new(ValidatorConfig::default()),
        DEFAULT_HOLDING_CAPACITY,
    );
    let platform = SoftwarePlatform::new();
    let mut audio = AudioTrackPipeline::new(1, TrackFormat::audio(mime::AUDIO_AAC, 8000, 2));
    let mut ctx = StepContext {
        demuxer: &mut demuxer,
        muxer: &mut muxer,
    };
    audio.setup(&platform, &mut ctx).unwrap();
    ctx.demuxer.select_track(1).unwrap();

    for _ in 0..4 {
        audio.step(&mut ctx).unwrap();
    }
    assert_eq!(audio.remixer(), Some(AudioRemixer::Upmix));
    assert_eq!(audio.actual_output_format().map(|f| f.mime.as_str()), Some(mime::AUDIO_AAC));
    audio.release().unwrap();
}
