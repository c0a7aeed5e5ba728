//! Recorder service: job arbitration for the shared audio peripheral, bounded uploads, and the
//! HTTP surface that drives them.

pub mod arbiter;
pub mod config;
pub mod error;
pub mod flash;
pub mod http;
pub mod job;
pub mod metrics;
pub mod peripheral;
pub mod server;
pub mod upload;

use std::sync::Arc;

use axum::http::HeaderValue;

use arbiter::Arbiter;
use flash::FlashFs;
use job::{CaptureSettings, JobController, PlaybackSettings};
use metrics::Metrics;
use peripheral::AudioPeripheral;
use upload::{UploadPool, DEFAULT_UPLOAD_SLOTS};

pub const DEFAULT_RECORDING_PATH: &str = "/recording.wav";
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    flash: FlashFs,
    arbiter: Arbiter,
    uploads: UploadPool,
    jobs: JobController,
    metrics: Arc<Metrics>,
    recording_path: String,
    cors_allow_origin: HeaderValue,
    max_request_bytes: usize,
}

impl AppState {
    pub fn new(flash: FlashFs, peripheral: Arc<dyn AudioPeripheral>) -> Self {
        let arbiter = Arbiter::new();
        let metrics = Arc::new(Metrics::new());
        let jobs = JobController::new(
            flash.clone(),
            peripheral,
            arbiter.clone(),
            Arc::clone(&metrics),
        );
        Self {
            flash,
            arbiter,
            uploads: UploadPool::new(DEFAULT_UPLOAD_SLOTS),
            jobs,
            metrics,
            recording_path: DEFAULT_RECORDING_PATH.to_string(),
            cors_allow_origin: HeaderValue::from_static("*"),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }

    /// Number of uploads allowed to write concurrently.
    pub fn with_upload_slots(mut self, slots: usize) -> Self {
        self.uploads = UploadPool::new(slots);
        self
    }

    pub fn with_capture(mut self, capture: CaptureSettings) -> Self {
        self.jobs = self.jobs.with_capture(capture);
        self
    }

    pub fn with_playback(mut self, playback: PlaybackSettings) -> Self {
        self.jobs = self.jobs.with_playback(playback);
        self
    }

    pub fn with_recording_path(mut self, path: impl Into<String>) -> Self {
        self.recording_path = path.into();
        self
    }

    pub fn with_cors_allow_origin(mut self, origin: HeaderValue) -> Self {
        self.cors_allow_origin = origin;
        self
    }

    pub fn with_max_request_bytes(mut self, max: usize) -> Self {
        self.max_request_bytes = max;
        self
    }

    pub fn flash(&self) -> &FlashFs {
        &self.flash
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    pub fn uploads(&self) -> &UploadPool {
        &self.uploads
    }

    pub fn jobs(&self) -> &JobController {
        &self.jobs
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn recording_path(&self) -> &str {
        &self.recording_path
    }

    pub fn cors_allow_origin(&self) -> &HeaderValue {
        &self.cors_allow_origin
    }

    pub fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }
}

pub fn app(state: AppState) -> axum::Router {
    http::router(state)
}

pub use server::{start, RunningServer};
