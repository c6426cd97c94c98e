//! Pipeline error types.

use thiserror::Error;
use vcompress_core::error::{CodecError, Error as CoreError};

/// Pipeline error type.
///
/// Transient non-readiness of a codec queue is never an error; it is absorbed
/// by the drain protocol. Everything here aborts the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Core error reported by a platform collaborator.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Setup fault: missing input, missing track, codec creation failure.
    #[error("Setup failed: {0}")]
    Setup(String),

    /// A codec broke the buffer-queue contract.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Requested conversion is not supported.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Negotiated output format cannot be written to the container.
    #[error("Invalid output format: {0}")]
    InvalidOutputFormat(String),

    /// Samples queued before the muxer opened do not fit the holding buffer.
    #[error("Holding buffer overflow: need {needed} bytes, have {available}")]
    HoldingBufferOverflow { needed: usize, available: usize },

    /// The run was interrupted by the caller.
    #[error("Transcode cancelled")]
    Cancelled,
}

impl From<CodecError> for PipelineError {
    fn from(err: CodecError) -> Self {
        PipelineError::Core(CoreError::Codec(err))
    }
}

impl PipelineError {
    /// Create a protocol violation error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        PipelineError::ProtocolViolation(msg.into())
    }

    /// Create a setup error.
    pub fn setup(msg: impl Into<String>) -> Self {
        PipelineError::Setup(msg.into())
    }
}

/// Pipeline result type.
pub type Result<T> = std::result::Result<T, PipelineError>;
