/// Length of the canonical PCM RIFF/WAVE header.
pub const HEADER_LEN: usize = 44;

/// `fmt ` format tag for uncompressed PCM.
pub const FORMAT_PCM: u16 = 1;

pub const MIN_SAMPLE_RATE_HZ: u32 = 8_000;
pub const MAX_SAMPLE_RATE_HZ: u32 = 192_000;
pub const SUPPORTED_BIT_DEPTHS: [u16; 4] = [8, 16, 24, 32];

/// Bytes covered by the RIFF size field in addition to the data payload.
pub const RIFF_SIZE_OVERHEAD: u32 = (HEADER_LEN - 8) as u32;

const RIFF_TAG: [u8; 4] = *b"RIFF";
const WAVE_TAG: [u8; 4] = *b"WAVE";
const FMT_TAG: [u8; 4] = *b"fmt ";
const DATA_TAG: [u8; 4] = *b"data";
const FMT_CHUNK_LEN: u32 = 16;

// Field offsets. The two size fields are the only ones ever rewritten after the initial write.
const RIFF_SIZE_OFFSET: usize = 4;
const FORMAT_TAG_OFFSET: usize = 20;
const CHANNELS_OFFSET: usize = 22;
const SAMPLE_RATE_OFFSET: usize = 24;
const BYTE_RATE_OFFSET: usize = 28;
const BLOCK_ALIGN_OFFSET: usize = 32;
const BITS_PER_SAMPLE_OFFSET: usize = 34;
const DATA_SIZE_OFFSET: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WavError {
    #[error("malformed container: missing RIFF/WAVE markers")]
    MalformedContainer,
    #[error("unsupported audio format tag {0} (only PCM is supported)")]
    UnsupportedFormat(u16),
    #[error("unsupported channel count {0}")]
    UnsupportedChannelCount(u16),
    #[error("unsupported sample rate {0} Hz")]
    UnsupportedSampleRate(u32),
    #[error("unsupported bit depth {0}")]
    UnsupportedBitDepth(u16),
}

/// Parameters of a PCM stream. Fixed for the lifetime of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamParams {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl StreamParams {
    /// Build a validated parameter set.
    pub fn new(sample_rate_hz: u32, channels: u16, bits_per_sample: u16) -> Result<Self, WavError> {
        let params = Self {
            sample_rate_hz,
            channels,
            bits_per_sample,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), WavError> {
        if self.channels != 1 && self.channels != 2 {
            return Err(WavError::UnsupportedChannelCount(self.channels));
        }
        if !(MIN_SAMPLE_RATE_HZ..=MAX_SAMPLE_RATE_HZ).contains(&self.sample_rate_hz) {
            return Err(WavError::UnsupportedSampleRate(self.sample_rate_hz));
        }
        if !SUPPORTED_BIT_DEPTHS.contains(&self.bits_per_sample) {
            return Err(WavError::UnsupportedBitDepth(self.bits_per_sample));
        }
        Ok(())
    }

    /// `sample_rate * bits_per_sample * channels / 8`, truncated to the 32-bit header field.
    pub fn byte_rate(&self) -> u32 {
        (u64::from(self.sample_rate_hz) * u64::from(self.bits_per_sample) * u64::from(self.channels)
            / 8) as u32
    }

    /// `bits_per_sample * channels / 8`, truncated to the 16-bit header field.
    pub fn block_align(&self) -> u16 {
        (u32::from(self.bits_per_sample) * u32::from(self.channels) / 8) as u16
    }

    /// Number of payload bytes produced by `seconds` of audio.
    pub fn bytes_for_seconds(&self, seconds: u32) -> u64 {
        u64::from(self.byte_rate()) * u64::from(seconds)
    }
}

/// Typed view of the 44-byte header.
///
/// `byte_rate`, `block_align` and the RIFF size are derived from the other fields and are never
/// stored independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub params: StreamParams,
    pub data_size: u32,
}

impl WavHeader {
    pub fn new(params: StreamParams, data_size: u32) -> Self {
        Self { params, data_size }
    }

    pub fn riff_size(&self) -> u32 {
        self.data_size.wrapping_add(RIFF_SIZE_OVERHEAD)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut raw = [0u8; HEADER_LEN];
        raw[0..4].copy_from_slice(&RIFF_TAG);
        put_u32(&mut raw, RIFF_SIZE_OFFSET, self.riff_size());
        raw[8..12].copy_from_slice(&WAVE_TAG);
        raw[12..16].copy_from_slice(&FMT_TAG);
        put_u32(&mut raw, 16, FMT_CHUNK_LEN);
        put_u16(&mut raw, FORMAT_TAG_OFFSET, FORMAT_PCM);
        put_u16(&mut raw, CHANNELS_OFFSET, self.params.channels);
        put_u32(&mut raw, SAMPLE_RATE_OFFSET, self.params.sample_rate_hz);
        put_u32(&mut raw, BYTE_RATE_OFFSET, self.params.byte_rate());
        put_u16(&mut raw, BLOCK_ALIGN_OFFSET, self.params.block_align());
        put_u16(&mut raw, BITS_PER_SAMPLE_OFFSET, self.params.bits_per_sample);
        raw[36..40].copy_from_slice(&DATA_TAG);
        put_u32(&mut raw, DATA_SIZE_OFFSET, self.data_size);
        raw
    }

    /// Parse and validate a header.
    ///
    /// The returned `data_size` is whatever the header claims; readers must take the payload
    /// length from the filesystem instead.
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Result<Self, WavError> {
        if raw[0..4] != RIFF_TAG || raw[8..12] != WAVE_TAG {
            return Err(WavError::MalformedContainer);
        }

        let format = get_u16(raw, FORMAT_TAG_OFFSET);
        if format != FORMAT_PCM {
            return Err(WavError::UnsupportedFormat(format));
        }

        let params = StreamParams {
            sample_rate_hz: get_u32(raw, SAMPLE_RATE_OFFSET),
            channels: get_u16(raw, CHANNELS_OFFSET),
            bits_per_sample: get_u16(raw, BITS_PER_SAMPLE_OFFSET),
        };
        params.validate()?;

        Ok(Self {
            params,
            data_size: get_u32(raw, DATA_SIZE_OFFSET),
        })
    }
}

/// Build a header for `data_size` payload bytes. Pure; never fails.
pub fn build_header(
    data_size: u32,
    sample_rate_hz: u32,
    channels: u16,
    bits_per_sample: u16,
) -> [u8; HEADER_LEN] {
    WavHeader::new(
        StreamParams {
            sample_rate_hz,
            channels,
            bits_per_sample,
        },
        data_size,
    )
    .to_bytes()
}

/// Validate a header and extract its stream parameters. Size fields are not inspected.
pub fn validate_header(raw: &[u8; HEADER_LEN]) -> Result<StreamParams, WavError> {
    WavHeader::parse(raw).map(|header| header.params)
}

/// One in-place rewrite of a 4-byte little-endian size field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePatch {
    pub offset: u64,
    pub bytes: [u8; 4],
}

/// The two field rewrites that turn a placeholder header into one describing `data_size` bytes.
pub fn size_patches(data_size: u32) -> [SizePatch; 2] {
    [
        SizePatch {
            offset: RIFF_SIZE_OFFSET as u64,
            bytes: data_size.wrapping_add(RIFF_SIZE_OVERHEAD).to_le_bytes(),
        },
        SizePatch {
            offset: DATA_SIZE_OFFSET as u64,
            bytes: data_size.to_le_bytes(),
        },
    ]
}

fn put_u16(raw: &mut [u8; HEADER_LEN], offset: usize, value: u16) {
    raw[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(raw: &mut [u8; HEADER_LEN], offset: usize, value: u32) {
    raw[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u16(raw: &[u8; HEADER_LEN], offset: usize) -> u16 {
    u16::from_le_bytes([raw[offset], raw[offset + 1]])
}

fn get_u32(raw: &[u8; HEADER_LEN], offset: usize) -> u32 {
    u32::from_le_bytes([
        raw[offset],
        raw[offset + 1],
        raw[offset + 2],
        raw[offset + 3],
    ])
}
