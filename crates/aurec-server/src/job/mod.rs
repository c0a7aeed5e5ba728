//! Recording and playback jobs.
//!
//! A job owns the audio peripheral from admission until it reaches `Done` or `Error`. Its progress
//! is published through the [`crate::arbiter::Arbiter`] slot; the task running it is detached.

mod controller;

use std::fmt;

use aurec_pcm::{StreamParams, TranscodeError, WavError};

use crate::flash::{FlashError, FlashPath};
use crate::peripheral::PeripheralError;

pub use controller::{CaptureSettings, JobController, JobHandle, PlaybackSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Recording,
    Playback,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::Playback => "playback",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Requested,
    /// Arbitration lock held.
    Admitted,
    /// Driver starting; for playback also the header read.
    Initializing,
    Streaming,
    /// Header patched and/or driver stopping.
    Finalizing,
    Done,
    Error,
}

/// Snapshot of the active job, as published in the job slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: u64,
    pub kind: JobKind,
    pub state: JobState,
    pub target: FlashPath,
    /// Known at admission for recordings, after the header is read for playback.
    pub params: Option<StreamParams>,
    pub bytes_transferred: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("another job is active")]
    ConcurrencyConflict,
    #[error("peripheral initialization failed: {0}")]
    PeripheralInit(#[source] PeripheralError),
    #[error("peripheral transfer failed: {0}")]
    Peripheral(#[source] PeripheralError),
    #[error("storage exhausted: need {needed} bytes, {available} available")]
    StorageExhausted { needed: u64, available: u64 },
    #[error(transparent)]
    Container(#[from] WavError),
    #[error("storage error: {0}")]
    Storage(#[source] FlashError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

impl JobError {
    /// Label used for the `outcome` of `jobs_total`.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::ConcurrencyConflict => "conflict",
            Self::PeripheralInit(_) => "peripheral_init_failed",
            Self::Peripheral(_) => "peripheral_failed",
            Self::StorageExhausted { .. } => "storage_exhausted",
            Self::Container(_) => "malformed_container",
            Self::Storage(_) => "storage_failed",
            Self::Transcode(_) => "transcode_failed",
        }
    }
}

impl From<FlashError> for JobError {
    fn from(err: FlashError) -> Self {
        match err {
            FlashError::NoSpace { needed, available } => Self::StorageExhausted { needed, available },
            other => Self::Storage(other),
        }
    }
}

/// Result of a job that reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub id: u64,
    pub kind: JobKind,
    pub target: FlashPath,
    pub params: StreamParams,
    pub bytes_transferred: u64,
}
