//! Error types shared by every vcompress component.
//!
//! Codec sessions, demuxers and muxers are platform collaborators; they report
//! failures through this hierarchy so the pipeline can wrap them uniformly.

use thiserror::Error;

/// Main error type for platform-facing operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Container errors (demuxing/muxing).
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// Codec session errors.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Bitstream parsing errors.
    #[error("Bitstream error: {0}")]
    Bitstream(#[from] BitstreamError),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A required format key is absent.
    #[error("Missing format key: {0}")]
    MissingKey(&'static str),

    /// Unsupported feature or format.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Buffer too small for operation.
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Container errors.
#[derive(Error, Debug)]
pub enum ContainerError {
    /// Invalid or corrupted container structure.
    #[error("Invalid container structure: {0}")]
    InvalidStructure(String),

    /// Track not found in container.
    #[error("Track {index} not found")]
    TrackNotFound { index: usize },

    /// Operation requires a started muxer.
    #[error("Muxer not started")]
    NotStarted,

    /// Operation is not allowed once the muxer has started.
    #[error("Muxer already started")]
    AlreadyStarted,

    /// Generic container error message.
    #[error("{0}")]
    Other(String),
}

/// Codec session errors.
#[derive(Error, Debug)]
pub enum CodecError {
    /// No codec is available for the requested codec id.
    #[error("No codec available for {0}")]
    NotFound(String),

    /// Session used before `configure`/`start`.
    #[error("Codec session not started")]
    NotStarted,

    /// Session configuration rejected.
    #[error("Codec configuration error: {0}")]
    Config(String),

    /// Slot index does not name a buffer owned by the caller.
    #[error("Invalid buffer slot {slot}")]
    InvalidSlot { slot: usize },

    /// Operation unsupported by this session (e.g. input surface on a decoder).
    #[error("Unsupported codec operation: {0}")]
    UnsupportedOperation(String),

    /// Generic codec error message.
    #[error("{0}")]
    Other(String),
}

/// Bitstream parsing errors.
#[derive(Error, Debug)]
pub enum BitstreamError {
    /// Unexpected end of bitstream.
    #[error("Unexpected end of bitstream")]
    UnexpectedEnd,

    /// No start code where one was required.
    #[error("Start code not found at offset {offset}")]
    MissingStartCode { offset: usize },

    /// Exp-Golomb decoding error.
    #[error("Exp-Golomb decoding error: value too large")]
    ExpGolombOverflow,

    /// Generic bitstream error message.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }
}
