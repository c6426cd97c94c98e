//! # vcompress core
//!
//! Core types shared by the vcompress transcoding engine:
//! - Error handling types
//! - Track formats and codec ids
//! - Sample flags and buffer metadata
//! - H.264 parameter-set parsing used to validate encoder output

pub mod avc;
pub mod bitstream;
pub mod error;
pub mod format;
pub mod sample;

pub use avc::SpsHeader;
pub use error::{BitstreamError, CodecError, ContainerError, Error, Result};
pub use format::{mime, TrackFormat, TrackType};
pub use sample::{BufferInfo, SampleFlags};
