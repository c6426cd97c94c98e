//! JSON-lines container used by the software platform.
//!
//! The first line is a [`ContainerHeader`] holding track formats and string
//! metadata. Every following line is one [`ContainerSample`] in file order.

use crate::platform::{Demuxer, MetadataKey, Muxer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vcompress_core::error::{Error, Result};
use vcompress_core::{BufferInfo, ContainerError, SampleFlags, TrackFormat};

/// Metadata key of the display rotation in degrees.
pub const METADATA_ROTATION: &str = "rotation";
/// Metadata key of the duration in milliseconds.
pub const METADATA_DURATION: &str = "duration";

/// Track table and metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub tracks: Vec<TrackFormat>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// One compressed sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSample {
    pub track: usize,
    pub pts: i64,
    #[serde(default)]
    pub flags: SampleFlags,
    pub data: Vec<u8>,
}

/// A whole container held in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerFile {
    pub header: ContainerHeader,
    pub samples: Vec<ContainerSample>,
}

fn invalid(msg: impl std::fmt::Display) -> Error {
    ContainerError::InvalidStructure(msg.to_string()).into()
}

fn write_line<T: Serialize>(out: &mut impl Write, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value).map_err(invalid)?;
    out.write_all(b"\n")?;
    Ok(())
}

impl ContainerFile {
    /// Empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a track, returning its index.
    pub fn add_track(&mut self, format: TrackFormat) -> usize {
        self.header.tracks.push(format);
        self.header.tracks.len() - 1
    }

    /// Set a metadata entry.
    pub fn set_metadata(&mut self, key: &str, value: impl Into<String>) {
        self.header.metadata.insert(key.to_string(), value.into());
    }

    /// Append a sample.
    pub fn push_sample(&mut self, track: usize, pts: i64, flags: SampleFlags, data: Vec<u8>) {
        self.samples.push(ContainerSample { track, pts, flags, data });
    }

    /// Samples of one track, in file order.
    pub fn track_samples(&self, track: usize) -> impl Iterator<Item = &ContainerSample> {
        self.samples.iter().filter(move |s| s.track == track)
    }

    /// Parse a container file.
    pub fn read_from(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines();
        let header_line = lines.next().ok_or_else(|| invalid("missing header line"))??;
        let header: ContainerHeader = serde_json::from_str(&header_line).map_err(invalid)?;

        let mut samples = Vec::new();
        for (n, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let sample: ContainerSample =
                serde_json::from_str(&line).map_err(|e| invalid(format!("sample line {}: {e}", n + 2)))?;
            if sample.track >= header.tracks.len() {
                return Err(ContainerError::TrackNotFound { index: sample.track }.into());
            }
            samples.push(sample);
        }
        Ok(Self { header, samples })
    }

    /// Write the container to `path`, replacing any existing file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        write_line(&mut out, &self.header)?;
        for sample in &self.samples {
            write_line(&mut out, sample)?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Demuxer over a [`ContainerFile`].
#[derive(Debug)]
pub struct SoftwareDemuxer {
    file: ContainerFile,
    selected: BTreeSet<usize>,
    cursor: usize,
}

impl SoftwareDemuxer {
    /// Open and parse `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = ContainerFile::read_from(path)?;
        debug!(
            path = %path.display(),
            tracks = file.header.tracks.len(),
            samples = file.samples.len(),
            "Opened container"
        );
        Ok(Self::from_file(file))
    }

    /// Demux an in-memory container.
    pub fn from_file(file: ContainerFile) -> Self {
        Self {
            file,
            selected: BTreeSet::new(),
            cursor: 0,
        }
    }

    fn current(&self) -> Option<&ContainerSample> {
        self.file.samples[self.cursor.min(self.file.samples.len())..]
            .iter()
            .find(|s| self.selected.contains(&s.track))
    }
}

impl Demuxer for SoftwareDemuxer {
    fn track_count(&self) -> usize {
        self.file.header.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat> {
        let mut format = self
            .file
            .header
            .tracks
            .get(index)
            .cloned()
            .ok_or(ContainerError::TrackNotFound { index })?;
        if format.max_input_size.is_none() {
            format.max_input_size = self.file.track_samples(index).map(|s| s.data.len()).max();
        }
        Ok(format)
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if index >= self.track_count() {
            return Err(ContainerError::TrackNotFound { index }.into());
        }
        self.selected.insert(index);
        Ok(())
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current().map(|s| s.track)
    }

    fn read_sample_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        let sample = self
            .current()
            .ok_or_else(|| invalid("read past the last sample"))?;
        let size = sample.data.len();
        if buf.len() < size {
            return Err(Error::BufferTooSmall {
                needed: size,
                available: buf.len(),
            });
        }
        buf[..size].copy_from_slice(&sample.data);
        Ok(size)
    }

    fn sample_time_us(&self) -> i64 {
        self.current().map_or(-1, |s| s.pts)
    }

    fn sample_flags(&self) -> SampleFlags {
        self.current().map_or(SampleFlags::empty(), |s| s.flags & SampleFlags::KEY_FRAME)
    }

    fn advance(&mut self) -> bool {
        let start = self.cursor.min(self.file.samples.len());
        match self.file.samples[start..]
            .iter()
            .position(|s| self.selected.contains(&s.track))
        {
            Some(offset) => {
                self.cursor = start + offset + 1;
                self.current().is_some()
            }
            None => {
                self.cursor = self.file.samples.len();
                false
            }
        }
    }

    fn metadata(&self, key: MetadataKey) -> Option<String> {
        let name = match key {
            MetadataKey::Rotation => METADATA_ROTATION,
            MetadataKey::Duration => METADATA_DURATION,
        };
        self.file.header.metadata.get(name).cloned()
    }

    fn release(&mut self) -> Result<()> {
        self.selected.clear();
        self.file.samples.clear();
        Ok(())
    }
}

/// Muxer producing a container file.
///
/// `start` writes the header line. Samples are kept in memory and appended by
/// `stop`, so a muxer released without stopping leaves a header-only file.
#[derive(Debug)]
pub struct SoftwareMuxer {
    path: PathBuf,
    header: ContainerHeader,
    samples: Vec<ContainerSample>,
    writer: Option<BufWriter<File>>,
    stopped: bool,
    fail_release: bool,
}

impl SoftwareMuxer {
    /// Create a muxer targeting `path`.
    pub fn create(path: &Path) -> Result<Self> {
        // Fail early when the destination is not writable.
        File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            header: ContainerHeader::default(),
            samples: Vec::new(),
            writer: None,
            stopped: false,
            fail_release: false,
        })
    }

    /// Make `release` fail after discarding its state.
    #[must_use]
    pub fn with_failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    fn ensure_not_started(&self) -> Result<()> {
        if self.writer.is_some() || self.stopped {
            return Err(ContainerError::AlreadyStarted.into());
        }
        Ok(())
    }
}

impl Muxer for SoftwareMuxer {
    fn set_orientation_hint(&mut self, degrees: i32) -> Result<()> {
        self.ensure_not_started()?;
        if degrees.rem_euclid(90) != 0 {
            return Err(Error::invalid_param(format!("Unsupported orientation {degrees}")));
        }
        self.header
            .metadata
            .insert(METADATA_ROTATION.to_string(), degrees.rem_euclid(360).to_string());
        Ok(())
    }

    fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        self.ensure_not_started()?;
        self.header.tracks.push(format.clone());
        Ok(self.header.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<()> {
        self.ensure_not_started()?;
        if self.header.tracks.is_empty() {
            return Err(invalid("no tracks added"));
        }
        let mut out = BufWriter::new(File::create(&self.path)?);
        write_line(&mut out, &self.header)?;
        out.flush()?;
        self.writer = Some(out);
        debug!(path = %self.path.display(), tracks = self.header.tracks.len(), "Muxer started");
        Ok(())
    }

    fn write_sample_data(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<()> {
        if self.writer.is_none() {
            return Err(ContainerError::NotStarted.into());
        }
        if track >= self.header.tracks.len() {
            return Err(ContainerError::TrackNotFound { index: track }.into());
        }
        if data.len() != info.size {
            return Err(Error::invalid_param(format!(
                "sample holds {} bytes, info says {}",
                data.len(),
                info.size
            )));
        }
        self.samples.push(ContainerSample {
            track,
            pts: info.presentation_time_us,
            flags: info.flags & SampleFlags::KEY_FRAME,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut out = self.writer.take().ok_or(ContainerError::NotStarted)?;
        for sample in &self.samples {
            write_line(&mut out, sample)?;
        }
        out.flush()?;
        self.stopped = true;
        debug!(path = %self.path.display(), samples = self.samples.len(), "Muxer stopped");
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.writer.take().is_some() {
            warn!(path = %self.path.display(), "Muxer released before stop, samples discarded");
        }
        self.samples.clear();
        if self.fail_release {
            return Err(ContainerError::Other(format!("Could not close {}", self.path.display())).into());
        }
        Ok(())
    }
}
