//! Track pipelines for the vcompress engine.
//!
//! Connects a demuxer, decoder/encoder sessions and a muxer through the
//! non-blocking buffer-queue protocol of platform codecs. Platform
//! collaborators are traits ([`platform`], [`codec`]); [`software`] is an
//! in-process implementation of all of them.

pub mod codec;
pub mod platform;
pub mod software;
pub mod track;

mod drain;
mod error;
mod muxer;
mod processor;
mod remix;
mod validator;

pub use codec::{BufferAccess, BufferApi, CodecRole, CodecSession, InputSurface, OutputStatus, OutputSurface, SurfaceId};
pub use drain::{DrainState, EosFlags};
pub use error::{PipelineError, Result};
pub use muxer::{QueuedMuxer, DEFAULT_HOLDING_CAPACITY};
pub use platform::{Demuxer, MediaPlatform, MetadataKey, Muxer};
pub use processor::AudioProcessor;
pub use remix::{downmix_pair, AudioRemixer, Remixed, BYTES_PER_SAMPLE};
pub use track::{
    AnyTrackPipeline, AudioTrackPipeline, PassthroughTrackPipeline, StepContext, TrackPipeline, VideoTrackPipeline,
};
pub use validator::{OutputFormatValidator, ValidatorConfig};
