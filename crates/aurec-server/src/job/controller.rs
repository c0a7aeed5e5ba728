use std::sync::Arc;

use aurec_pcm::{build_header, validate_header, StreamParams, Transcode, WavError};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::{JobError, JobKind, JobReport, JobState};
use crate::arbiter::{Arbiter, PeripheralLease};
use crate::flash::{FlashFile, FlashFs, FlashPath, StorageGuard};
use crate::metrics::Metrics;
use crate::peripheral::{
    AudioPeripheral, CaptureStream, I2sConfig, PeripheralError, PinConfig, PlaybackStream,
};

pub type JobHandle = JoinHandle<Result<JobReport, JobError>>;

/// Microphone side of the peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    pub sample_rate_hz: u32,
    /// Hardware sample depth: 32 (I2S microphone), 16, or 12 (ADC codes).
    pub bits_per_sample: u16,
    pub dma_buf_count: usize,
    pub dma_buf_len: usize,
    pub use_apll: bool,
    /// Chunks read and dropped after the driver starts.
    pub discard_blocks: usize,
    pub pins: PinConfig,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16_000,
            bits_per_sample: 32,
            dma_buf_count: 8,
            dma_buf_len: 256,
            use_apll: false,
            discard_blocks: 0,
            pins: PinConfig::MICROPHONE,
        }
    }
}

impl CaptureSettings {
    pub fn transcode(&self) -> Transcode {
        Transcode::for_source_bits(self.bits_per_sample)
    }

    /// Format of the stored recording: mono, at the capture rate, after transcoding.
    pub fn stored_params(&self) -> Result<StreamParams, WavError> {
        let bits = self.transcode().output_bits(self.bits_per_sample);
        StreamParams::new(self.sample_rate_hz, 1, bits)
    }

    fn i2s_config(&self) -> I2sConfig {
        I2sConfig {
            sample_rate_hz: self.sample_rate_hz,
            bits_per_sample: self.bits_per_sample,
            channels: 1,
            dma_buf_count: self.dma_buf_count,
            dma_buf_len: self.dma_buf_len,
            use_apll: self.use_apll,
            pins: self.pins,
        }
    }
}

/// DAC side of the peripheral. Stream format comes from the file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSettings {
    pub dma_buf_count: usize,
    pub dma_buf_len: usize,
    pub use_apll: bool,
    pub pins: PinConfig,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            dma_buf_count: 8,
            dma_buf_len: 256,
            use_apll: false,
            pins: PinConfig::DAC,
        }
    }
}

/// Admits jobs and runs them on detached tasks.
#[derive(Clone)]
pub struct JobController {
    flash: FlashFs,
    guard: StorageGuard,
    peripheral: Arc<dyn AudioPeripheral>,
    arbiter: Arbiter,
    capture: CaptureSettings,
    playback: PlaybackSettings,
    metrics: Arc<Metrics>,
}

impl JobController {
    pub fn new(
        flash: FlashFs,
        peripheral: Arc<dyn AudioPeripheral>,
        arbiter: Arbiter,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            guard: StorageGuard::new(flash.clone()),
            flash,
            peripheral,
            arbiter,
            capture: CaptureSettings::default(),
            playback: PlaybackSettings::default(),
            metrics,
        }
    }

    pub fn with_capture(mut self, capture: CaptureSettings) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_playback(mut self, playback: PlaybackSettings) -> Self {
        self.playback = playback;
        self
    }

    /// Admit a recording of `seconds` into `target` and start it.
    ///
    /// Fails with [`JobError::ConcurrencyConflict`] without waiting if any job is active.
    pub fn start_recording(&self, target: FlashPath, seconds: u32) -> Result<JobHandle, JobError> {
        let params = self.capture.stored_params()?;
        let ticket = self
            .arbiter
            .try_admit(JobKind::Recording, target.clone(), Some(params))
            .inspect_err(|err| self.metrics.observe_job(JobKind::Recording, err.outcome()))?;

        let span = tracing::info_span!(
            "job",
            id = ticket.id(),
            kind = %JobKind::Recording,
            target = %target,
        );
        tracing::info!(parent: &span, seconds, "recording admitted");

        let this = self.clone();
        Ok(tokio::spawn(
            async move {
                let lease = ticket.acquire().await;
                let result = this.record(&lease, &target, params, seconds).await;
                this.finish(&lease, JobKind::Recording, result.map(|bytes| JobReport {
                    id: lease.id(),
                    kind: JobKind::Recording,
                    target,
                    params,
                    bytes_transferred: bytes,
                }))
            }
            .instrument(span),
        ))
    }

    /// Admit playback of `source` and start it. The header is validated inside the job.
    pub fn start_playback(&self, source: FlashPath) -> Result<JobHandle, JobError> {
        let ticket = self
            .arbiter
            .try_admit(JobKind::Playback, source.clone(), None)
            .inspect_err(|err| self.metrics.observe_job(JobKind::Playback, err.outcome()))?;

        let span = tracing::info_span!(
            "job",
            id = ticket.id(),
            kind = %JobKind::Playback,
            target = %source,
        );
        tracing::info!(parent: &span, "playback admitted");

        let this = self.clone();
        Ok(tokio::spawn(
            async move {
                let lease = ticket.acquire().await;
                let result = this.play(&lease, &source).await;
                this.finish(&lease, JobKind::Playback, result.map(|(params, bytes)| JobReport {
                    id: lease.id(),
                    kind: JobKind::Playback,
                    target: source,
                    params,
                    bytes_transferred: bytes,
                }))
            }
            .instrument(span),
        ))
    }

    fn finish(
        &self,
        lease: &PeripheralLease,
        kind: JobKind,
        result: Result<JobReport, JobError>,
    ) -> Result<JobReport, JobError> {
        match &result {
            Ok(report) => {
                lease.set_state(JobState::Done);
                self.metrics.observe_job(kind, "done");
                tracing::info!(bytes = report.bytes_transferred, "job done");
            }
            Err(err) => {
                lease.set_state(JobState::Error);
                self.metrics.observe_job(kind, err.outcome());
                tracing::warn!(error = %err, "job failed");
            }
        }
        result
    }

    async fn record(
        &self,
        lease: &PeripheralLease,
        target: &FlashPath,
        params: StreamParams,
        seconds: u32,
    ) -> Result<u64, JobError> {
        lease.set_state(JobState::Initializing);
        let config = self.capture.i2s_config();
        let mut capture = self
            .peripheral
            .start_capture(&config)
            .await
            .map_err(JobError::PeripheralInit)?;

        let result = self
            .capture_into(lease, capture.as_mut(), &config, target, params, seconds)
            .await;

        if let Err(err) = capture.stop().await {
            tracing::warn!(error = %err, "capture driver stop failed");
        }
        result
    }

    async fn capture_into(
        &self,
        lease: &PeripheralLease,
        capture: &mut dyn CaptureStream,
        config: &I2sConfig,
        target: &FlashPath,
        params: StreamParams,
        seconds: u32,
    ) -> Result<u64, JobError> {
        let mut file = self.flash.create(target).await?;
        let header = build_header(0, params.sample_rate_hz, params.channels, params.bits_per_sample);
        self.guard.write(&mut file, &header).await?;

        let policy = self.capture.transcode();
        let mut frames = FrameBuffer::new(config.chunk_bytes(), config.bytes_per_frame());
        let mut out = vec![0u8; policy.output_len(frames.capacity())];

        for _ in 0..self.capture.discard_blocks {
            frames.discard(capture).await?;
        }

        lease.set_state(JobState::Streaming);
        let budget = params.bytes_for_seconds(seconds);
        let mut written = 0u64;
        let streamed = self
            .pump_capture(lease, capture, &mut file, policy, &mut frames, &mut out, budget, &mut written)
            .await;
        if streamed.is_ok() {
            lease.set_state(JobState::Finalizing);
        }

        // The header is patched even after a fault so the file describes what actually landed.
        let patched = file.finalize(written).await.map_err(JobError::from);
        self.metrics.add_job_bytes(JobKind::Recording, written);
        match (streamed, patched) {
            (Ok(()), Ok(())) => Ok(written),
            (Ok(()), Err(err)) => Err(err),
            (Err(err), patched) => {
                if let Err(patch_err) = patched {
                    tracing::warn!(error = %patch_err, "header patch after fault failed");
                }
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn pump_capture(
        &self,
        lease: &PeripheralLease,
        capture: &mut dyn CaptureStream,
        file: &mut FlashFile,
        policy: Transcode,
        frames: &mut FrameBuffer,
        out: &mut [u8],
        budget: u64,
        written: &mut u64,
    ) -> Result<(), JobError> {
        while *written < budget {
            frames.fill(capture).await?;
            let produced = frames.drain(policy, out)?;
            let remaining = budget - *written;
            let take = usize::try_from(remaining).map_or(produced, |r| produced.min(r));
            if take == 0 {
                // Less than one frame buffered so far.
                continue;
            }
            self.guard.write(file, &out[..take]).await?;
            *written += take as u64;
            lease.add_bytes(take as u64);
        }
        Ok(())
    }

    async fn play(
        &self,
        lease: &PeripheralLease,
        source: &FlashPath,
    ) -> Result<(StreamParams, u64), JobError> {
        lease.set_state(JobState::Initializing);
        let mut file = self.flash.open(source).await?;
        let raw = file
            .read_header()
            .await?
            .ok_or(WavError::MalformedContainer)?;
        let params = validate_header(&raw)?;
        lease.update(|info| info.params = Some(params));

        let config = I2sConfig::for_stream(
            params,
            self.playback.dma_buf_count,
            self.playback.dma_buf_len,
            self.playback.use_apll,
            self.playback.pins,
        );
        let mut dac = self
            .peripheral
            .start_playback(&config)
            .await
            .map_err(JobError::PeripheralInit)?;

        lease.set_state(JobState::Streaming);
        let mut sent = 0u64;
        let result = self
            .pump_playback(lease, dac.as_mut(), &mut file, config.chunk_bytes(), &mut sent)
            .await;
        if result.is_ok() {
            lease.set_state(JobState::Finalizing);
        }
        self.metrics.add_job_bytes(JobKind::Playback, sent);

        if let Err(err) = dac.stop().await {
            tracing::warn!(error = %err, "playback driver stop failed");
        }
        result.map(|()| (params, sent))
    }

    async fn pump_playback(
        &self,
        lease: &PeripheralLease,
        dac: &mut dyn PlaybackStream,
        file: &mut FlashFile,
        chunk_bytes: usize,
        sent: &mut u64,
    ) -> Result<(), JobError> {
        let mut buf = vec![0u8; chunk_bytes.max(1)];
        loop {
            let n = file.read_chunk(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            let mut offset = 0;
            while offset < n {
                let accepted = dac
                    .write(&buf[offset..n])
                    .await
                    .map_err(JobError::Peripheral)?;
                if accepted == 0 {
                    return Err(transfer_error("output accepted no bytes"));
                }
                offset += accepted;
            }
            *sent += n as u64;
            lease.add_bytes(n as u64);
        }
    }
}

/// Captured bytes awaiting transcoding.
///
/// A read may end inside a frame. Only whole frames are transcoded; the partial frame is moved to
/// the front and completed by the next read.
struct FrameBuffer {
    raw: Vec<u8>,
    frame: usize,
    pending: usize,
}

impl FrameBuffer {
    fn new(chunk_bytes: usize, frame: usize) -> Self {
        let frame = frame.max(1);
        Self {
            raw: vec![0u8; chunk_bytes.max(frame)],
            frame,
            pending: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.raw.len()
    }

    /// Read once into the free tail of the buffer.
    async fn fill(&mut self, capture: &mut dyn CaptureStream) -> Result<(), JobError> {
        let free = self.raw.len() - self.pending;
        let n = capture
            .read(&mut self.raw[self.pending..])
            .await
            .map_err(JobError::Peripheral)?;
        if n == 0 {
            return Err(transfer_error("capture returned no data"));
        }
        if n > free {
            return Err(transfer_error("capture reported more bytes than requested"));
        }
        self.pending += n;
        Ok(())
    }

    /// Transcode every whole buffered frame into `out` and keep the remainder.
    fn drain(&mut self, policy: Transcode, out: &mut [u8]) -> Result<usize, JobError> {
        let whole = self.pending - self.pending % self.frame;
        let produced = policy.apply(&self.raw[..whole], out)?;
        self.raw.copy_within(whole..self.pending, 0);
        self.pending -= whole;
        Ok(produced)
    }

    /// Read one block and drop it, along with anything buffered.
    async fn discard(&mut self, capture: &mut dyn CaptureStream) -> Result<(), JobError> {
        self.pending = 0;
        capture
            .read(&mut self.raw)
            .await
            .map_err(JobError::Peripheral)?;
        Ok(())
    }
}

fn transfer_error(reason: &str) -> JobError {
    JobError::Peripheral(PeripheralError::Transfer(reason.to_string()))
}
