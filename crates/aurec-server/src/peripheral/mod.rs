//! Contract of the audio peripheral driver.
//!
//! The device has one I2S peripheral shared by the microphone and the DAC. Starting a stream
//! installs the driver, routes the pins and starts the clock; stopping it tears the driver down.
//! Exclusive use is enforced by [`crate::arbiter::Arbiter`], not here.

mod simulated;

use async_trait::async_trait;

use aurec_pcm::StreamParams;

pub use simulated::SimulatedPeripheral;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinConfig {
    pub bck: i32,
    pub ws: i32,
    pub data: i32,
}

impl PinConfig {
    /// INMP441 microphone wiring.
    pub const MICROPHONE: Self = Self {
        bck: 33,
        ws: 32,
        data: 25,
    };

    /// MAX98357A DAC wiring.
    pub const DAC: Self = Self {
        bck: 27,
        ws: 26,
        data: 14,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2sConfig {
    pub sample_rate_hz: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub dma_buf_count: usize,
    /// Frames per DMA buffer; one chunk of the streaming loop.
    pub dma_buf_len: usize,
    pub use_apll: bool,
    pub pins: PinConfig,
}

impl I2sConfig {
    pub fn for_stream(
        params: StreamParams,
        dma_buf_count: usize,
        dma_buf_len: usize,
        use_apll: bool,
        pins: PinConfig,
    ) -> Self {
        Self {
            sample_rate_hz: params.sample_rate_hz,
            bits_per_sample: params.bits_per_sample,
            channels: params.channels,
            dma_buf_count,
            dma_buf_len,
            use_apll,
            pins,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        (usize::from(self.bits_per_sample) * usize::from(self.channels)).div_ceil(8)
    }

    pub fn chunk_bytes(&self) -> usize {
        self.dma_buf_len * self.bytes_per_frame()
    }

    /// Wall-clock length of one chunk.
    pub fn chunk_duration(&self) -> std::time::Duration {
        let nanos = self.dma_buf_len as u64 * 1_000_000_000 / u64::from(self.sample_rate_hz.max(1));
        std::time::Duration::from_nanos(nanos)
    }
}

/// Driver failures. Codes are the raw driver status values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeripheralError {
    #[error("driver install failed with error 0x{0:x}")]
    Install(i32),
    #[error("pin configuration failed with error 0x{0:x}")]
    Pins(i32),
    #[error("clock configuration failed with error 0x{0:x}")]
    Clock(i32),
    #[error("driver start failed with error 0x{0:x}")]
    Start(i32),
    #[error("unsupported stream configuration: {0}")]
    Unsupported(String),
    #[error("transfer failed: {0}")]
    Transfer(String),
}

#[async_trait]
pub trait AudioPeripheral: Send + Sync {
    /// Install the receive driver and start sampling.
    async fn start_capture(
        &self,
        config: &I2sConfig,
    ) -> Result<Box<dyn CaptureStream>, PeripheralError>;

    /// Install the transmit driver and start the output clock.
    async fn start_playback(
        &self,
        config: &I2sConfig,
    ) -> Result<Box<dyn PlaybackStream>, PeripheralError>;
}

#[async_trait]
pub trait CaptureStream: Send {
    /// Block until `buf` has been filled with captured bytes. Returns the byte count.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralError>;

    async fn stop(&mut self) -> Result<(), PeripheralError>;
}

#[async_trait]
pub trait PlaybackStream: Send {
    /// Queue bytes for output; may accept fewer than offered.
    async fn write(&mut self, buf: &[u8]) -> Result<usize, PeripheralError>;

    async fn stop(&mut self) -> Result<(), PeripheralError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_geometry() {
        let params = StreamParams::new(16_000, 1, 16).unwrap();
        let config = I2sConfig::for_stream(params, 8, 256, false, PinConfig::DAC);
        assert_eq!(config.bytes_per_frame(), 2);
        assert_eq!(config.chunk_bytes(), 512);
        assert_eq!(config.chunk_duration(), std::time::Duration::from_millis(16));

        let capture = I2sConfig {
            bits_per_sample: 32,
            ..config.clone()
        };
        assert_eq!(capture.chunk_bytes(), 1024);

        let adc = I2sConfig {
            bits_per_sample: 12,
            ..config
        };
        assert_eq!(adc.bytes_per_frame(), 2);
    }
}
