use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, ValueEnum};

use aurec_pcm::wav::{MAX_SAMPLE_RATE_HZ, MIN_SAMPLE_RATE_HZ};

use crate::flash::{FlashFs, DEFAULT_CAPACITY_BYTES, DEFAULT_MAX_PATH_LEN};
use crate::job::{CaptureSettings, PlaybackSettings};
use crate::peripheral::PinConfig;
use crate::upload::DEFAULT_UPLOAD_SLOTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "aurec-server", version, about)]
struct Args {
    /// Address the HTTP server listens on.
    #[arg(long, env = "AUREC_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: SocketAddr,

    /// Directory backing the flash filesystem.
    #[arg(long, env = "AUREC_STORAGE_ROOT", default_value = "./flash")]
    storage_root: PathBuf,

    /// Filesystem capacity in bytes. Free space is capacity minus the size of all files.
    #[arg(long, env = "AUREC_STORAGE_CAPACITY", default_value_t = DEFAULT_CAPACITY_BYTES)]
    storage_capacity: u64,

    /// Maximum path length in bytes, including the leading `/`.
    #[arg(long, env = "AUREC_MAX_PATH_LEN", default_value_t = DEFAULT_MAX_PATH_LEN)]
    max_path_len: usize,

    /// Number of uploads allowed to write at once.
    #[arg(long, env = "AUREC_UPLOAD_SLOTS", default_value_t = DEFAULT_UPLOAD_SLOTS)]
    upload_slots: usize,

    /// File written by `/record`.
    #[arg(long, env = "AUREC_RECORDING_PATH", default_value = "/recording.wav")]
    recording_path: String,

    #[arg(long, env = "AUREC_SAMPLE_RATE", default_value_t = 16_000)]
    sample_rate: u32,

    /// Hardware capture depth: 32 (I2S microphone), 16, or 12 (ADC).
    #[arg(long, env = "AUREC_CAPTURE_BITS", default_value_t = 32)]
    capture_bits: u16,

    #[arg(long, env = "AUREC_DMA_BUF_COUNT", default_value_t = 8)]
    dma_buf_count: usize,

    /// Frames per DMA buffer, and per streamed chunk.
    #[arg(long, env = "AUREC_DMA_BUF_LEN", default_value_t = 256)]
    dma_buf_len: usize,

    #[arg(long, env = "AUREC_USE_APLL", default_value_t = false, action = ArgAction::Set)]
    use_apll: bool,

    /// Capture chunks dropped after the driver starts.
    #[arg(long, env = "AUREC_DISCARD_BLOCKS", default_value_t = 0)]
    discard_blocks: usize,

    /// Request body limit in bytes.
    #[arg(long, env = "AUREC_MAX_REQUEST_BYTES", default_value_t = 16 * 1024 * 1024)]
    max_request_bytes: usize,

    /// `Access-Control-Allow-Origin` value.
    #[arg(long, env = "AUREC_CORS_ORIGIN", default_value = "*")]
    cors_origin: String,

    /// Pace the simulated peripheral at the sample clock.
    #[arg(long, env = "AUREC_REALTIME", default_value_t = true, action = ArgAction::Set)]
    realtime: bool,

    /// Log filter (tracing-subscriber EnvFilter syntax).
    #[arg(long, env = "AUREC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "AUREC_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub storage_root: PathBuf,
    pub storage_capacity: u64,
    pub max_path_len: usize,
    pub upload_slots: usize,
    pub recording_path: String,
    pub capture: CaptureSettings,
    pub playback: PlaybackSettings,
    pub max_request_bytes: usize,
    pub cors_origin: String,
    pub realtime: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_args(Args::parse())
    }

    pub fn try_parse_from<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::from_args(Args::try_parse_from(args)?)
    }

    fn from_args(args: Args) -> anyhow::Result<Self> {
        if args.upload_slots == 0 {
            bail!("--upload-slots must be at least 1");
        }
        if !(MIN_SAMPLE_RATE_HZ..=MAX_SAMPLE_RATE_HZ).contains(&args.sample_rate) {
            bail!(
                "--sample-rate must be within {MIN_SAMPLE_RATE_HZ}..={MAX_SAMPLE_RATE_HZ}, got {}",
                args.sample_rate
            );
        }
        if ![12, 16, 32].contains(&args.capture_bits) {
            bail!("--capture-bits must be 12, 16 or 32, got {}", args.capture_bits);
        }
        if args.dma_buf_count == 0 || args.dma_buf_len == 0 {
            bail!("--dma-buf-count and --dma-buf-len must be non-zero");
        }
        if args.max_path_len < 2 {
            bail!("--max-path-len must leave room for a name");
        }

        let cors_origin = args.cors_origin.trim().to_string();
        axum::http::HeaderValue::from_str(&cors_origin)
            .with_context(|| format!("invalid --cors-origin {cors_origin:?}"))?;

        FlashFs::with_max_path_len(&args.storage_root, args.storage_capacity, args.max_path_len)
            .resolve(&args.recording_path)
            .with_context(|| format!("invalid --recording-path {:?}", args.recording_path))?;

        Ok(Self {
            listen_addr: args.listen_addr,
            storage_root: args.storage_root,
            storage_capacity: args.storage_capacity,
            max_path_len: args.max_path_len,
            upload_slots: args.upload_slots,
            recording_path: args.recording_path,
            capture: CaptureSettings {
                sample_rate_hz: args.sample_rate,
                bits_per_sample: args.capture_bits,
                dma_buf_count: args.dma_buf_count,
                dma_buf_len: args.dma_buf_len,
                use_apll: args.use_apll,
                discard_blocks: args.discard_blocks,
                pins: PinConfig::MICROPHONE,
            },
            playback: PlaybackSettings {
                dma_buf_count: args.dma_buf_count,
                dma_buf_len: args.dma_buf_len,
                use_apll: args.use_apll,
                pins: PinConfig::DAC,
            },
            max_request_bytes: args.max_request_bytes,
            cors_origin,
            realtime: args.realtime,
            log_level: args.log_level,
            log_format: args.log_format,
        })
    }
}
