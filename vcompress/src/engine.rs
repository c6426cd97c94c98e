//! Transcode engine: container lifecycle and the cooperative step loop.

use crate::options::EngineConfig;
use crate::strategy::OutputFormatStrategy;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use vcompress_core::{TrackFormat, TrackType};
use vcompress_pipeline::{
    AnyTrackPipeline, AudioTrackPipeline, Demuxer, MediaPlatform, MetadataKey, OutputFormatValidator,
    PassthroughTrackPipeline, PipelineError, QueuedMuxer, Result, StepContext, TrackPipeline, VideoTrackPipeline,
};

/// Progress value reported when the source duration is unknown.
pub const PROGRESS_UNKNOWN: f64 = -1.0;

/// Progress callback, invoked on the stepping thread with a fraction in
/// `[0.0, 1.0]` or [`PROGRESS_UNKNOWN`].
pub type ProgressCallback = Box<dyn FnMut(f64)>;

/// Cancellation handle shared with other threads.
///
/// Triggering it makes the next idle sleep of a running transcode fail with
/// [`PipelineError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// Create an untriggered handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Statistics of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscodeStats {
    /// Loop iterations.
    pub steps: u64,
    /// Loop iterations in which no pipeline made progress.
    pub idle_steps: u64,
    /// Progress at the end of the run.
    pub final_progress: f64,
    /// Whether the input was copied without transcoding.
    pub raw_copy: bool,
}

/// First video and audio track of the source.
#[derive(Debug)]
struct SourceTracks {
    video_index: usize,
    video_format: TrackFormat,
    audio_index: usize,
    audio_format: TrackFormat,
}

enum Plan {
    RawCopy,
    Transcoded(TranscodeStats),
}

/// Drives two track pipelines over one demuxer and one muxer.
pub struct TranscodeEngine<P: MediaPlatform> {
    platform: P,
    config: EngineConfig,
    progress_callback: Option<ProgressCallback>,
    interrupt: Interrupt,
}

impl<P: MediaPlatform> TranscodeEngine<P> {
    /// Create an engine with the default configuration.
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            config: EngineConfig::default(),
            progress_callback: None,
            interrupt: Interrupt::new(),
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(f64) + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Handle for cancelling runs of this engine.
    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// The platform sessions and containers come from.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Transcode `input` into `output`, blocking until done.
    ///
    /// When the strategy wants neither track changed, the input is copied
    /// byte for byte and no codec session is created.
    ///
    /// The [`Interrupt`] is only checked when a loop iteration makes no
    /// progress, so cancellation takes effect at the next idle step rather
    /// than immediately.
    pub fn transcode(
        &mut self,
        input: &Path,
        output: &Path,
        strategy: &dyn OutputFormatStrategy,
    ) -> Result<TranscodeStats> {
        if !input.is_file() {
            return Err(PipelineError::setup(format!("Input {} not found", input.display())));
        }
        info!(input = %input.display(), output = %output.display(), "Starting transcode");

        let mut demuxer = self
            .platform
            .open_demuxer(input)
            .map_err(|e| PipelineError::setup(format!("Could not open {}: {e}", input.display())))?;
        let muxer = match self.platform.create_muxer(output) {
            Ok(muxer) => muxer,
            Err(e) => {
                release_demuxer(demuxer.as_mut());
                return Err(PipelineError::setup(format!(
                    "Could not create {}: {e}",
                    output.display()
                )));
            }
        };
        let mut muxer = QueuedMuxer::new(
            muxer,
            OutputFormatValidator::new(self.config.validator.clone()),
            self.config.holding_buffer_capacity,
        );

        let mut pipelines = Vec::with_capacity(2);
        let result = self.run(demuxer.as_mut(), &mut muxer, &mut pipelines, strategy);
        release(&mut pipelines, demuxer.as_mut(), &mut muxer);

        match result? {
            Plan::RawCopy => {
                info!("No track needs transcoding, copying input");
                std::fs::copy(input, output)?;
                Ok(TranscodeStats {
                    final_progress: 1.0,
                    raw_copy: true,
                    ..TranscodeStats::default()
                })
            }
            Plan::Transcoded(stats) => {
                info!(steps = stats.steps, idle_steps = stats.idle_steps, "Transcode finished");
                Ok(stats)
            }
        }
    }

    fn run(
        &mut self,
        demuxer: &mut dyn Demuxer,
        muxer: &mut QueuedMuxer,
        pipelines: &mut Vec<AnyTrackPipeline>,
        strategy: &dyn OutputFormatStrategy,
    ) -> Result<Plan> {
        let duration_us = read_metadata(demuxer, muxer)?;
        let tracks = first_video_and_audio_track(demuxer)?;

        let video_output = strategy.video_output_format(&tracks.video_format)?;
        let audio_output = strategy.audio_output_format(&tracks.audio_format)?;
        if video_output.is_none() && audio_output.is_none() {
            return Ok(Plan::RawCopy);
        }

        pipelines.push(match video_output {
            Some(format) => AnyTrackPipeline::Video(VideoTrackPipeline::new(tracks.video_index, format)),
            None => AnyTrackPipeline::Passthrough(PassthroughTrackPipeline::new(tracks.video_index, TrackType::Video)),
        });
        pipelines.push(match audio_output {
            Some(format) => AnyTrackPipeline::Audio(AudioTrackPipeline::new(tracks.audio_index, format)),
            None => AnyTrackPipeline::Passthrough(PassthroughTrackPipeline::new(tracks.audio_index, TrackType::Audio)),
        });

        let mut ctx = StepContext { demuxer, muxer };
        for pipeline in pipelines.iter_mut() {
            pipeline.setup(&self.platform, &mut ctx)?;
            debug!(kind = pipeline.kind(), "Pipeline ready");
        }
        ctx.demuxer.select_track(tracks.video_index)?;
        ctx.demuxer.select_track(tracks.audio_index)?;

        let stats = self.run_pipelines(&mut ctx, pipelines, duration_us)?;
        ctx.muxer.stop()?;
        Ok(Plan::Transcoded(stats))
    }

    fn run_pipelines(
        &mut self,
        ctx: &mut StepContext<'_>,
        pipelines: &mut [AnyTrackPipeline],
        duration_us: Option<i64>,
    ) -> Result<TranscodeStats> {
        let mut stats = TranscodeStats::default();
        let idle_sleep = Duration::from_millis(self.config.idle_sleep_ms);
        let interval = self.config.progress_interval_steps.max(1);

        while !pipelines.iter().all(|p| p.is_finished()) {
            let mut stepped = false;
            for pipeline in pipelines.iter_mut() {
                stepped |= pipeline.step(ctx)?;
            }
            stats.steps += 1;

            if stats.steps % interval == 0 {
                if let Some(callback) = self.progress_callback.as_mut() {
                    callback(progress(pipelines, duration_us));
                }
            }

            if !stepped {
                stats.idle_steps += 1;
                if self.interrupt.is_triggered() {
                    warn!(steps = stats.steps, "Transcode interrupted");
                    return Err(PipelineError::Cancelled);
                }
                std::thread::sleep(idle_sleep);
            }
        }

        stats.final_progress = progress(pipelines, duration_us);
        Ok(stats)
    }
}

/// Mean of both pipelines' written time over the duration, each clamped to
/// 1.0 and pinned there once finished.
fn progress(pipelines: &[AnyTrackPipeline], duration_us: Option<i64>) -> f64 {
    let Some(duration) = duration_us.filter(|d| *d > 0) else {
        return PROGRESS_UNKNOWN;
    };
    let total: f64 = pipelines
        .iter()
        .map(|p| {
            if p.is_finished() {
                1.0
            } else {
                (p.written_presentation_time_us() as f64 / duration as f64).min(1.0)
            }
        })
        .sum();
    total / pipelines.len() as f64
}

/// Apply the rotation hint and return the duration in microseconds, if known.
fn read_metadata(demuxer: &dyn Demuxer, muxer: &mut QueuedMuxer) -> Result<Option<i64>> {
    if let Some(degrees) = demuxer
        .metadata(MetadataKey::Rotation)
        .and_then(|r| r.trim().parse::<i32>().ok())
    {
        muxer.inner_mut().set_orientation_hint(degrees)?;
    }

    let duration_us = demuxer
        .metadata(MetadataKey::Duration)
        .and_then(|d| d.trim().parse::<i64>().ok())
        .map(|ms| ms * 1000);
    debug!(?duration_us, "Source metadata read");
    Ok(duration_us)
}

fn first_video_and_audio_track(demuxer: &dyn Demuxer) -> Result<SourceTracks> {
    let mut video = None;
    let mut audio = None;
    for index in 0..demuxer.track_count() {
        let format = demuxer.track_format(index)?;
        match format.track_type() {
            Some(TrackType::Video) if video.is_none() => video = Some((index, format)),
            Some(TrackType::Audio) if audio.is_none() => audio = Some((index, format)),
            _ => {}
        }
    }

    let (video_index, video_format) = video.ok_or_else(|| PipelineError::setup("No video track found in input"))?;
    let (audio_index, audio_format) = audio.ok_or_else(|| PipelineError::setup("No audio track found in input"))?;
    debug!(video_index, %video_format, audio_index, %audio_format, "Source tracks found");
    Ok(SourceTracks {
        video_index,
        video_format,
        audio_index,
        audio_format,
    })
}

fn release_demuxer(demuxer: &mut dyn Demuxer) {
    if let Err(e) = demuxer.release() {
        panic!("Could not shut down demuxer: {e}");
    }
}

/// Release pipelines and the demuxer, then the muxer.
///
/// Codec sessions that fail to shut down leak platform resources, so that is
/// a panic. The container may already be complete when the muxer fails to
/// release, so that is only logged.
fn release(pipelines: &mut Vec<AnyTrackPipeline>, demuxer: &mut dyn Demuxer, muxer: &mut QueuedMuxer) {
    for mut pipeline in pipelines.drain(..) {
        if let Err(e) = pipeline.release() {
            panic!("Could not shut down {} pipeline: {e}", pipeline.kind());
        }
    }
    release_demuxer(demuxer);
    if let Err(e) = muxer.inner_mut().release() {
        error!(error = %e, "Failed to release muxer");
    }
}
