#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aurec_server::flash::FlashFs;
use aurec_server::job::CaptureSettings;
use aurec_server::peripheral::{
    AudioPeripheral, CaptureStream, I2sConfig, PeripheralError, PinConfig, PlaybackStream,
};
use aurec_server::AppState;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use http_body_util::BodyExt;
use tokio::sync::watch;
use tower::ServiceExt;

/// Sample every capture slot is filled with: `0x0001_0000`, which downscales to 32.
pub const CAPTURE_SAMPLE: [u8; 4] = 0x0001_0000i32.to_le_bytes();
pub const OUTPUT_CHUNK_LIMIT: usize = 300;

/// Peripheral test double: transfers block while the gate is closed. Init failures, short reads
/// and a stalled output are injectable.
pub struct ScriptedPeripheral {
    gate: Arc<watch::Sender<bool>>,
    fail_capture: Mutex<Option<PeripheralError>>,
    max_read: Arc<AtomicUsize>,
    output_stalled: Arc<AtomicBool>,
    played: Arc<Mutex<Vec<u8>>>,
    reads: Arc<AtomicUsize>,
    captures_stopped: Arc<AtomicUsize>,
    last_playback: Mutex<Option<I2sConfig>>,
}

pub struct Gate(Arc<watch::Sender<bool>>);

impl Gate {
    pub fn open(&self) {
        self.0.send_replace(true);
    }
}

impl ScriptedPeripheral {
    pub fn open() -> Arc<Self> {
        let (peripheral, gate) = Self::gated();
        gate.open();
        peripheral
    }

    pub fn gated() -> (Arc<Self>, Gate) {
        let gate = Arc::new(watch::channel(false).0);
        let peripheral = Arc::new(Self {
            gate: Arc::clone(&gate),
            fail_capture: Mutex::new(None),
            max_read: Arc::new(AtomicUsize::new(0)),
            output_stalled: Arc::new(AtomicBool::new(false)),
            played: Arc::new(Mutex::new(Vec::new())),
            reads: Arc::new(AtomicUsize::new(0)),
            captures_stopped: Arc::new(AtomicUsize::new(0)),
            last_playback: Mutex::new(None),
        });
        (peripheral, Gate(gate))
    }

    pub fn fail_next_capture(&self, err: PeripheralError) {
        *self.fail_capture.lock().unwrap() = Some(err);
    }

    /// Cap every capture read at `max` bytes. Zero lifts the cap.
    pub fn limit_reads(&self, max: usize) {
        self.max_read.store(max, Ordering::SeqCst);
    }

    /// Make the output accept nothing from now on.
    pub fn stall_output(&self) {
        self.output_stalled.store(true, Ordering::SeqCst);
    }

    pub fn played(&self) -> Vec<u8> {
        self.played.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn captures_stopped(&self) -> usize {
        self.captures_stopped.load(Ordering::SeqCst)
    }

    pub fn last_playback(&self) -> Option<I2sConfig> {
        self.last_playback.lock().unwrap().clone()
    }
}

async fn wait_open(gate: &watch::Receiver<bool>) -> Result<(), PeripheralError> {
    let mut gate = gate.clone();
    gate.wait_for(|open| *open)
        .await
        .map(|_| ())
        .map_err(|_| PeripheralError::Transfer("gate dropped".to_string()))
}

#[async_trait]
impl AudioPeripheral for ScriptedPeripheral {
    async fn start_capture(
        &self,
        config: &I2sConfig,
    ) -> Result<Box<dyn CaptureStream>, PeripheralError> {
        if let Some(err) = self.fail_capture.lock().unwrap().take() {
            return Err(err);
        }
        Ok(Box::new(ScriptedCapture {
            gate: self.gate.subscribe(),
            bits: config.bits_per_sample,
            max_read: Arc::clone(&self.max_read),
            offset: 0,
            reads: Arc::clone(&self.reads),
            stopped: Arc::clone(&self.captures_stopped),
        }))
    }

    async fn start_playback(
        &self,
        config: &I2sConfig,
    ) -> Result<Box<dyn PlaybackStream>, PeripheralError> {
        *self.last_playback.lock().unwrap() = Some(config.clone());
        Ok(Box::new(ScriptedPlayback {
            gate: self.gate.subscribe(),
            played: Arc::clone(&self.played),
            stalled: Arc::clone(&self.output_stalled),
        }))
    }
}

struct ScriptedCapture {
    gate: watch::Receiver<bool>,
    bits: u16,
    max_read: Arc<AtomicUsize>,
    /// Bytes produced so far, so a short read resumes mid-sample.
    offset: usize,
    reads: Arc<AtomicUsize>,
    stopped: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptureStream for ScriptedCapture {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralError> {
        wait_open(&self.gate).await?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let n = match self.max_read.load(Ordering::SeqCst) {
            0 => buf.len(),
            max => buf.len().min(max),
        };
        for (i, byte) in buf[..n].iter_mut().enumerate() {
            *byte = if self.bits == 32 {
                CAPTURE_SAMPLE[(self.offset + i) % CAPTURE_SAMPLE.len()]
            } else {
                0x11
            };
        }
        self.offset += n;
        Ok(n)
    }

    async fn stop(&mut self) -> Result<(), PeripheralError> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedPlayback {
    gate: watch::Receiver<bool>,
    played: Arc<Mutex<Vec<u8>>>,
    stalled: Arc<AtomicBool>,
}

#[async_trait]
impl PlaybackStream for ScriptedPlayback {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, PeripheralError> {
        wait_open(&self.gate).await?;
        if self.stalled.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let n = buf.len().min(OUTPUT_CHUNK_LIMIT);
        self.played.lock().unwrap().extend_from_slice(&buf[..n]);
        Ok(n)
    }

    async fn stop(&mut self) -> Result<(), PeripheralError> {
        Ok(())
    }
}

/// 8 kHz, 32-bit capture in 64-frame chunks: 256 raw bytes, 128 stored bytes per chunk.
pub fn capture_settings() -> CaptureSettings {
    CaptureSettings {
        sample_rate_hz: 8_000,
        bits_per_sample: 32,
        dma_buf_count: 2,
        dma_buf_len: 64,
        use_apll: false,
        discard_blocks: 0,
        pins: PinConfig::MICROPHONE,
    }
}

pub fn state(root: &Path, capacity: u64, peripheral: Arc<ScriptedPeripheral>) -> AppState {
    AppState::new(FlashFs::new(root, capacity), peripheral).with_capture(capture_settings())
}

/// Write a 16-bit mono 8 kHz container with `payload` after the header.
pub fn write_wav(root: &Path, name: &str, payload: &[u8]) {
    let mut bytes = aurec_pcm::build_header(payload.len() as u32, 8_000, 1, 16).to_vec();
    bytes.extend_from_slice(payload);
    std::fs::write(root.join(name), bytes).unwrap();
}

pub struct Part<'a> {
    pub name: &'a str,
    pub file_name: Option<&'a str>,
    pub data: &'a [u8],
}

pub const BOUNDARY: &str = "aurec-test-boundary";

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    part.name, file_name
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name)
                    .as_bytes(),
            ),
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_request(method: Method, uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

pub fn form_request(method: Method, uri: &str, form: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap())
}
