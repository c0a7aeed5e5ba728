//! Sample conversions between hardware capture formats and stored formats.
//!
//! Both conversions are tuned for perceived loudness on the target hardware rather than for
//! arithmetic exactness; the constants are part of the observable behavior.

/// Arithmetic right shift applied to 32-bit I2S microphone samples before truncation to 16 bits.
pub const DOWNSCALE_SHIFT: u32 = 11;

/// Divisor used when mapping 12-bit ADC codes onto 8 bits (`value * 256 / RESCALE_DIVISOR`).
///
/// 2048 rather than 4096 doubles the output level; codes above 2047 wrap.
pub const RESCALE_DIVISOR: u32 = 2048;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscodeError {
    #[error("destination buffer too small: need {needed} bytes, have {available}")]
    DestinationTooSmall { needed: usize, available: usize },
}

/// Conversion policy, selected by the hardware source bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transcode {
    /// Bytes are copied unchanged.
    Passthrough,
    /// 32-bit little-endian samples to 16-bit, see [`downscale_i32_to_i16`].
    Downscale32To16,
    /// Packed 12-bit ADC codes to `{0x00, level}` pairs, see [`rescale_12bit_to_8bit`].
    Rescale12To8,
}

impl Transcode {
    pub fn for_source_bits(bits_per_sample: u16) -> Self {
        match bits_per_sample {
            32 => Self::Downscale32To16,
            12 => Self::Rescale12To8,
            _ => Self::Passthrough,
        }
    }

    /// Bit depth of the samples this policy produces from `source_bits` input.
    pub fn output_bits(self, source_bits: u16) -> u16 {
        match self {
            Self::Passthrough => source_bits,
            // Rescaled output keeps the two-byte stride of the ADC input.
            Self::Downscale32To16 | Self::Rescale12To8 => 16,
        }
    }

    /// Output byte count for `input_len` bytes of whole input samples.
    pub fn output_len(self, input_len: usize) -> usize {
        match self {
            Self::Passthrough => input_len,
            Self::Downscale32To16 => input_len / 4 * 2,
            Self::Rescale12To8 => input_len / 2 * 2,
        }
    }

    /// Convert `src` into the front of `dst`, returning the number of bytes produced.
    pub fn apply(self, src: &[u8], dst: &mut [u8]) -> Result<usize, TranscodeError> {
        let needed = self.output_len(src.len());
        if dst.len() < needed {
            return Err(TranscodeError::DestinationTooSmall {
                needed,
                available: dst.len(),
            });
        }

        Ok(match self {
            Self::Passthrough => {
                dst[..needed].copy_from_slice(&src[..needed]);
                needed
            }
            Self::Downscale32To16 => downscale_i32_to_i16(src, dst),
            Self::Rescale12To8 => rescale_12bit_to_8bit(src, dst),
        })
    }
}

/// Shift each signed 32-bit sample right by [`DOWNSCALE_SHIFT`] and keep the low 16 bits.
///
/// The shift is arithmetic, so in-range negative samples keep their sign. Processes as many whole
/// samples as fit in both buffers and returns the number of bytes written.
pub fn downscale_i32_to_i16(src: &[u8], dst: &mut [u8]) -> usize {
    let samples = (src.len() / 4).min(dst.len() / 2);
    for (input, output) in src
        .chunks_exact(4)
        .zip(dst.chunks_exact_mut(2))
        .take(samples)
    {
        let sample = i32::from_le_bytes([input[0], input[1], input[2], input[3]]);
        let reduced = (sample >> DOWNSCALE_SHIFT) as i16;
        output.copy_from_slice(&reduced.to_le_bytes());
    }
    samples * 2
}

/// Rebuild 12-bit codes from little-endian byte pairs (upper nibble ignored) and scale them to
/// 8 bits, emitting `{0x00, level}` for every input pair.
pub fn rescale_12bit_to_8bit(src: &[u8], dst: &mut [u8]) -> usize {
    let pairs = (src.len() / 2).min(dst.len() / 2);
    for (input, output) in src
        .chunks_exact(2)
        .zip(dst.chunks_exact_mut(2))
        .take(pairs)
    {
        let value = (u32::from(input[1] & 0x0f) << 8) | u32::from(input[0]);
        output[0] = 0;
        output[1] = (value * 256 / RESCALE_DIVISOR) as u8;
    }
    pairs * 2
}
