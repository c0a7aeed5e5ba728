use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::job::JobKind;

pub const UPLOAD_OUTCOMES: [&str; 4] = ["completed", "rejected", "dropped", "aborted"];

/// Prometheus metrics for the recorder.
///
/// All label sets are fixed and small; nothing user-supplied (paths, request ids) becomes a label.
pub struct Metrics {
    registry: Registry,

    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    jobs_total: IntCounterVec,
    job_bytes_total: IntCounterVec,
    uploads_total: IntCounterVec,
    storage_available_bytes: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let build_info = IntGaugeVec::new(
            Opts::new("aurec_build_info", "Build information for aurec-server."),
            &["version"],
        )
        .expect("aurec_build_info metric must be valid");
        registry
            .register(Box::new(build_info.clone()))
            .expect("aurec_build_info must register");
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1);

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests."),
            &["route", "method", "status"],
        )
        .expect("http_requests_total metric must be valid");
        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("http_requests_total must register");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds.",
            )
            .buckets(vec![
                0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["route", "method"],
        )
        .expect("http_request_duration_seconds metric must be valid");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("http_request_duration_seconds must register");

        let jobs_total = IntCounterVec::new(
            Opts::new("jobs_total", "Recording and playback jobs by final outcome."),
            &["kind", "outcome"],
        )
        .expect("jobs_total metric must be valid");
        registry
            .register(Box::new(jobs_total.clone()))
            .expect("jobs_total must register");

        let job_bytes_total = IntCounterVec::new(
            Opts::new(
                "job_bytes_total",
                "Payload bytes moved between the peripheral and storage.",
            ),
            &["kind"],
        )
        .expect("job_bytes_total metric must be valid");
        registry
            .register(Box::new(job_bytes_total.clone()))
            .expect("job_bytes_total must register");

        let uploads_total = IntCounterVec::new(
            Opts::new("uploads_total", "Upload streams by outcome."),
            &["outcome"],
        )
        .expect("uploads_total metric must be valid");
        registry
            .register(Box::new(uploads_total.clone()))
            .expect("uploads_total must register");

        let storage_available_bytes = IntGauge::new(
            "storage_available_bytes",
            "Free flash space at the last query.",
        )
        .expect("storage_available_bytes metric must be valid");
        registry
            .register(Box::new(storage_available_bytes.clone()))
            .expect("storage_available_bytes must register");

        let this = Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            jobs_total,
            job_bytes_total,
            uploads_total,
            storage_available_bytes,
        };

        // Stable exposition before the first job or upload.
        for kind in [JobKind::Recording, JobKind::Playback] {
            this.jobs_total.with_label_values(&[kind.as_str(), "done"]);
            this.job_bytes_total.with_label_values(&[kind.as_str()]);
        }
        for outcome in UPLOAD_OUTCOMES {
            this.uploads_total.with_label_values(&[outcome]);
        }

        this
    }

    pub fn observe_http_request(&self, route: &str, method: &str, status: u16, duration: Duration) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[route, method, &status])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[route, method])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_job(&self, kind: JobKind, outcome: &str) {
        self.jobs_total
            .with_label_values(&[kind.as_str(), outcome])
            .inc();
    }

    pub fn add_job_bytes(&self, kind: JobKind, bytes: u64) {
        self.job_bytes_total
            .with_label_values(&[kind.as_str()])
            .inc_by(bytes);
    }

    pub fn inc_upload(&self, outcome: &str) {
        self.uploads_total.with_label_values(&[outcome]).inc();
    }

    pub fn set_storage_available(&self, bytes: u64) {
        self.storage_available_bytes
            .set(i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    pub fn encode(&self) -> Vec<u8> {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder
            .encode(&metric_families, &mut buf)
            .expect("prometheus encoding must succeed");
        buf
    }

    pub fn metrics_content_type() -> &'static str {
        "text/plain; version=0.0.4"
    }
}
