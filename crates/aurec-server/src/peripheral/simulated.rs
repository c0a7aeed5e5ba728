use std::f32::consts::TAU;

use async_trait::async_trait;

use super::{AudioPeripheral, CaptureStream, I2sConfig, PeripheralError, PlaybackStream};

const TONE_HZ: f32 = 440.0;
// Roughly -12 dBFS.
const TONE_LEVEL: f32 = 0.25;

/// Host stand-in for the I2S peripheral.
///
/// Capture produces a sine tone in the requested hardware format; playback swallows the bytes.
/// With `realtime` set, each chunk takes as long as the sample clock would.
#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    realtime: bool,
}

impl SimulatedPeripheral {
    pub fn new(realtime: bool) -> Self {
        Self { realtime }
    }
}

fn check_config(config: &I2sConfig, supported_bits: &[u16]) -> Result<(), PeripheralError> {
    if !supported_bits.contains(&config.bits_per_sample) {
        return Err(PeripheralError::Unsupported(format!(
            "{} bits per sample",
            config.bits_per_sample
        )));
    }
    if config.sample_rate_hz == 0 || config.dma_buf_len == 0 || config.dma_buf_count == 0 {
        return Err(PeripheralError::Unsupported(
            "empty clock or DMA configuration".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl AudioPeripheral for SimulatedPeripheral {
    async fn start_capture(
        &self,
        config: &I2sConfig,
    ) -> Result<Box<dyn CaptureStream>, PeripheralError> {
        check_config(config, &[12, 16, 32])?;
        tracing::debug!(
            sample_rate_hz = config.sample_rate_hz,
            bits = config.bits_per_sample,
            bck = config.pins.bck,
            ws = config.pins.ws,
            sd = config.pins.data,
            "simulated capture started"
        );
        Ok(Box::new(ToneCapture {
            config: config.clone(),
            realtime: self.realtime,
            phase: 0.0,
        }))
    }

    async fn start_playback(
        &self,
        config: &I2sConfig,
    ) -> Result<Box<dyn PlaybackStream>, PeripheralError> {
        check_config(config, &[8, 16, 24, 32])?;
        tracing::debug!(
            sample_rate_hz = config.sample_rate_hz,
            bits = config.bits_per_sample,
            channels = config.channels,
            "simulated playback started"
        );
        Ok(Box::new(NullPlayback {
            config: config.clone(),
            realtime: self.realtime,
            written: 0,
        }))
    }
}

struct ToneCapture {
    config: I2sConfig,
    realtime: bool,
    phase: f32,
}

impl ToneCapture {
    fn next_level(&mut self) -> f32 {
        let step = TAU * TONE_HZ / self.config.sample_rate_hz as f32;
        let level = self.phase.sin() * TONE_LEVEL;
        self.phase = (self.phase + step) % TAU;
        level
    }
}

#[async_trait]
impl CaptureStream for ToneCapture {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralError> {
        let frame = self.config.bytes_per_frame();
        let frames = buf.len() / frame;

        for slot in buf.chunks_exact_mut(frame).take(frames) {
            let level = self.next_level();
            match self.config.bits_per_sample {
                // 24-bit microphone data, left-justified in a 32-bit slot.
                32 => {
                    let sample = ((level * 8_388_607.0) as i32) << 8;
                    slot.copy_from_slice(&sample.to_le_bytes());
                }
                16 => {
                    let sample = (level * 32_767.0) as i16;
                    slot.copy_from_slice(&sample.to_le_bytes());
                }
                // Unsigned 12-bit ADC code centred on mid-scale.
                _ => {
                    let code = (2048.0 + level * 2047.0) as u16 & 0x0fff;
                    slot.copy_from_slice(&code.to_le_bytes());
                }
            }
        }

        if self.realtime {
            tokio::time::sleep(self.config.chunk_duration()).await;
        }
        Ok(frames * frame)
    }

    async fn stop(&mut self) -> Result<(), PeripheralError> {
        tracing::debug!("simulated capture stopped");
        Ok(())
    }
}

struct NullPlayback {
    config: I2sConfig,
    realtime: bool,
    written: u64,
}

#[async_trait]
impl PlaybackStream for NullPlayback {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, PeripheralError> {
        if self.realtime {
            let chunk = self.config.chunk_bytes().max(1);
            let fraction = buf.len() as f64 / chunk as f64;
            tokio::time::sleep(self.config.chunk_duration().mul_f64(fraction)).await;
        }
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    async fn stop(&mut self) -> Result<(), PeripheralError> {
        tracing::debug!(bytes = self.written, "simulated playback stopped");
        Ok(())
    }
}
