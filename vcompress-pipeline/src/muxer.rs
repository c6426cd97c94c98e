//! Format-gated muxer.
//!
//! The container header needs both tracks' negotiated formats, but the two
//! encoders learn their formats at different times. [`QueuedMuxer`] holds
//! samples in a fixed-capacity buffer until both formats are known, then
//! opens the container, flushes the held samples in arrival order and writes
//! everything after that straight through.

use crate::error::{PipelineError, Result};
use crate::platform::Muxer;
use crate::validator::OutputFormatValidator;
use tracing::{debug, info, trace};
use vcompress_core::{BufferInfo, SampleFlags, TrackFormat, TrackType};

/// Default holding buffer capacity.
pub const DEFAULT_HOLDING_CAPACITY: usize = 64 * 1024;

/// A sample held before the container was opened. Its bytes live in the
/// holding buffer right after those of the previous entry.
#[derive(Debug, Clone, Copy)]
struct SampleInfo {
    track_type: TrackType,
    size: usize,
    presentation_time_us: i64,
    flags: SampleFlags,
}

/// Muxer front-end shared by both track pipelines.
pub struct QueuedMuxer {
    muxer: Box<dyn Muxer>,
    validator: OutputFormatValidator,
    video_format: Option<TrackFormat>,
    audio_format: Option<TrackFormat>,
    video_track: usize,
    audio_track: usize,
    holding: Vec<u8>,
    holding_capacity: usize,
    samples: Vec<SampleInfo>,
    started: bool,
}

impl QueuedMuxer {
    /// Create a new queued muxer.
    pub fn new(muxer: Box<dyn Muxer>, validator: OutputFormatValidator, holding_capacity: usize) -> Self {
        Self {
            muxer,
            validator,
            video_format: None,
            audio_format: None,
            video_track: 0,
            audio_track: 0,
            holding: Vec::new(),
            holding_capacity,
            samples: Vec::new(),
            started: false,
        }
    }

    /// Record a track's negotiated output format.
    ///
    /// The second format opens the container: both formats are validated,
    /// both tracks added, the muxer started and held samples flushed.
    pub fn set_output_format(&mut self, track_type: TrackType, format: TrackFormat) -> Result<()> {
        if self.started {
            return Err(PipelineError::protocol(format!(
                "{track_type} output format set after the muxer started"
            )));
        }
        debug!(%track_type, %format, "Output format determined");
        match track_type {
            TrackType::Video => self.video_format = Some(format),
            TrackType::Audio => self.audio_format = Some(format),
        }
        self.on_set_output_format()
    }

    fn on_set_output_format(&mut self) -> Result<()> {
        let (Some(video), Some(audio)) = (&self.video_format, &self.audio_format) else {
            return Ok(());
        };
        self.validator.validate(video, audio)?;

        self.video_track = self.muxer.add_track(video)?;
        debug!(track = self.video_track, mime = %video.mime, "Added track to muxer");
        self.audio_track = self.muxer.add_track(audio)?;
        debug!(track = self.audio_track, mime = %audio.mime, "Added track to muxer");
        self.muxer.start()?;
        self.started = true;

        info!(
            samples = self.samples.len(),
            bytes = self.holding.len(),
            "Output formats determined, flushing held samples"
        );
        let holding = std::mem::take(&mut self.holding);
        let samples = std::mem::take(&mut self.samples);
        let mut offset = 0;
        for sample in &samples {
            let info = BufferInfo::new(0, sample.size, sample.presentation_time_us, sample.flags);
            let track = self.track_index(sample.track_type);
            self.muxer
                .write_sample_data(track, &holding[offset..offset + sample.size], &info)?;
            offset += sample.size;
        }
        Ok(())
    }

    /// Write the sample `buf[info.range()]`.
    ///
    /// Before the container is open the bytes are copied into the holding
    /// buffer, which fails once its capacity is exhausted.
    pub fn write_sample_data(&mut self, track_type: TrackType, buf: &[u8], info: &BufferInfo) -> Result<()> {
        let data = buf.get(info.range()).ok_or_else(|| {
            PipelineError::protocol(format!(
                "Sample range {:?} exceeds buffer of {} bytes",
                info.range(),
                buf.len()
            ))
        })?;

        if self.started {
            let track = self.track_index(track_type);
            let direct = BufferInfo::new(0, data.len(), info.presentation_time_us, info.flags);
            return Ok(self.muxer.write_sample_data(track, data, &direct)?);
        }

        if self.holding.capacity() == 0 {
            self.holding.reserve_exact(self.holding_capacity);
        }
        let needed = self.holding.len() + data.len();
        if needed > self.holding_capacity {
            return Err(PipelineError::HoldingBufferOverflow {
                needed,
                available: self.holding_capacity,
            });
        }
        self.holding.extend_from_slice(data);
        self.samples.push(SampleInfo {
            track_type,
            size: data.len(),
            presentation_time_us: info.presentation_time_us,
            flags: info.flags,
        });
        trace!(%track_type, size = data.len(), held = self.samples.len(), "Held sample until muxer start");
        Ok(())
    }

    fn track_index(&self, track_type: TrackType) -> usize {
        match track_type {
            TrackType::Video => self.video_track,
            TrackType::Audio => self.audio_track,
        }
    }

    /// Whether the container has been opened.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Number of samples waiting for the container to open.
    pub fn held_samples(&self) -> usize {
        self.samples.len()
    }

    /// Negotiated output format of a track, once known.
    pub fn output_format(&self, track_type: TrackType) -> Option<&TrackFormat> {
        match track_type {
            TrackType::Video => self.video_format.as_ref(),
            TrackType::Audio => self.audio_format.as_ref(),
        }
    }

    /// Finalize the container.
    pub fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Err(PipelineError::protocol("Muxer stopped before both output formats were known"));
        }
        Ok(self.muxer.stop()?)
    }

    /// Access the wrapped muxer.
    pub fn inner_mut(&mut self) -> &mut dyn Muxer {
        self.muxer.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use vcompress_core::error::Result as CoreResult;
    use vcompress_core::mime;

    #[derive(Debug, Default)]
    struct Recorded {
        tracks: Vec<TrackFormat>,
        started: bool,
        samples: Vec<(usize, Vec<u8>, BufferInfo)>,
    }

    struct RecordingMuxer(Rc<RefCell<Recorded>>);

    impl Muxer for RecordingMuxer {
        fn set_orientation_hint(&mut self, _: i32) -> CoreResult<()> {
            Ok(())
        }
        fn add_track(&mut self, format: &TrackFormat) -> CoreResult<usize> {
            let mut rec = self.0.borrow_mut();
            rec.tracks.push(format.clone());
            Ok(rec.tracks.len() - 1)
        }
        fn start(&mut self) -> CoreResult<()> {
            self.0.borrow_mut().started = true;
            Ok(())
        }
        fn write_sample_data(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> CoreResult<()> {
            self.0.borrow_mut().samples.push((track, data.to_vec(), *info));
            Ok(())
        }
        fn stop(&mut self) -> CoreResult<()> {
            Ok(())
        }
        fn release(&mut self) -> CoreResult<()> {
            Ok(())
        }
    }

    fn video_format() -> TrackFormat {
        let sps = vcompress_core::SpsHeader {
            profile_idc: 66,
            constraint_flags: 0,
            level_idc: 30,
            seq_parameter_set_id: 0,
        };
        TrackFormat::video(mime::VIDEO_AVC, 640, 360).with_csd(sps.to_annex_b())
    }

    fn audio_format() -> TrackFormat {
        TrackFormat::audio(mime::AUDIO_AAC, 44_100, 1)
    }

    fn queued(capacity: usize) -> (QueuedMuxer, Rc<RefCell<Recorded>>) {
        let rec = Rc::new(RefCell::new(Recorded::default()));
        let muxer = QueuedMuxer::new(
            Box::new(RecordingMuxer(rec.clone())),
            OutputFormatValidator::default(),
            capacity,
        );
        (muxer, rec)
    }

    #[test]
    fn test_flushes_in_arrival_order() {
        let (mut muxer, rec) = queued(DEFAULT_HOLDING_CAPACITY);
        let writes = [
            (TrackType::Audio, vec![1u8, 2, 3], 0),
            (TrackType::Video, vec![9u8; 10], 0),
            (TrackType::Audio, vec![4u8, 5], 23_000),
        ];
        for (track_type, data, pts) in &writes {
            let info = BufferInfo::new(0, data.len(), *pts, SampleFlags::empty());
            muxer.write_sample_data(*track_type, data, &info).unwrap();
        }
        assert_eq!(muxer.held_samples(), 3);

        muxer.set_output_format(TrackType::Audio, audio_format()).unwrap();
        assert!(!rec.borrow().started);
        assert!(!muxer.is_started());
        muxer.set_output_format(TrackType::Video, video_format()).unwrap();
        assert!(muxer.is_started());

        let rec = rec.borrow();
        assert!(rec.started);
        assert_eq!(rec.tracks[0].mime, mime::VIDEO_AVC);
        assert_eq!(rec.samples.len(), 3);
        assert_eq!(rec.samples[0], (1, vec![1, 2, 3], BufferInfo::new(0, 3, 0, SampleFlags::empty())));
        assert_eq!(rec.samples[1].0, 0);
        assert_eq!(rec.samples[1].1.len(), 10);
        assert_eq!(rec.samples[2].2.presentation_time_us, 23_000);
        assert_eq!(muxer.held_samples(), 0);
    }

    #[test]
    fn test_direct_write_after_start() {
        let (mut muxer, rec) = queued(DEFAULT_HOLDING_CAPACITY);
        muxer.set_output_format(TrackType::Video, video_format()).unwrap();
        muxer.set_output_format(TrackType::Audio, audio_format()).unwrap();

        let buf = [0u8, 0, 7, 7, 7, 0];
        let info = BufferInfo::new(2, 3, 40, SampleFlags::KEY_FRAME);
        muxer.write_sample_data(TrackType::Video, &buf, &info).unwrap();

        let rec = rec.borrow();
        assert_eq!(rec.samples.len(), 1);
        assert_eq!(rec.samples[0].1, vec![7, 7, 7]);
        assert!(rec.samples[0].2.is_key_frame());
    }

    #[test]
    fn test_holding_buffer_overflow() {
        let (mut muxer, _) = queued(8);
        let info = BufferInfo::new(0, 6, 0, SampleFlags::empty());
        muxer.write_sample_data(TrackType::Audio, &[0; 6], &info).unwrap();
        let err = muxer.write_sample_data(TrackType::Audio, &[0; 6], &info).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::HoldingBufferOverflow { needed: 12, available: 8 }
        ));
    }

    #[test]
    fn test_invalid_format_blocks_start() {
        let (mut muxer, rec) = queued(DEFAULT_HOLDING_CAPACITY);
        muxer.set_output_format(TrackType::Audio, TrackFormat::audio(mime::AUDIO_RAW, 8000, 1)).unwrap();
        let err = muxer.set_output_format(TrackType::Video, video_format()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOutputFormat(_)));
        assert!(!rec.borrow().started);
        assert!(muxer.stop().is_err());
    }

    #[test]
    fn test_sample_range_checked() {
        let (mut muxer, _) = queued(DEFAULT_HOLDING_CAPACITY);
        let info = BufferInfo::new(4, 8, 0, SampleFlags::empty());
        assert!(matches!(
            muxer.write_sample_data(TrackType::Video, &[0; 6], &info),
            Err(PipelineError::ProtocolViolation(_))
        ));
    }
}
