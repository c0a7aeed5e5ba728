//! PCM container and sample helpers for the recorder.
//!
//! - [`wav`]: the fixed 44-byte RIFF/WAVE header: build, validate, and the in-place rewrites of
//!   its size fields once a stream is complete.
//! - [`transcode`]: allocation-free sample conversions between the hardware capture formats and
//!   the stored formats.
//!
//! Nothing in this crate performs I/O; the server crate applies it to files from its streaming loop.

#![forbid(unsafe_code)]

pub mod transcode;
pub mod wav;

pub use transcode::{Transcode, TranscodeError};
pub use wav::{
    build_header, size_patches, validate_header, SizePatch, StreamParams, WavError,
    WavHeader, HEADER_LEN,
};

#[cfg(test)]
mod proptests;
