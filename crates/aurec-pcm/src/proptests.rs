use crate::wav::{
    build_header, size_patches, validate_header, StreamParams, WavHeader, HEADER_LEN,
    MAX_SAMPLE_RATE_HZ, MIN_SAMPLE_RATE_HZ, SUPPORTED_BIT_DEPTHS,
};
use crate::Transcode;
use proptest::prelude::*;

fn params_strategy() -> impl Strategy<Value = StreamParams> {
    (
        MIN_SAMPLE_RATE_HZ..=MAX_SAMPLE_RATE_HZ,
        prop_oneof![Just(1u16), Just(2u16)],
        prop::sample::select(SUPPORTED_BIT_DEPTHS.to_vec()),
    )
        .prop_map(|(sample_rate_hz, channels, bits_per_sample)| StreamParams {
            sample_rate_hz,
            channels,
            bits_per_sample,
        })
}

proptest! {
    #[test]
    fn header_round_trips_stream_params(params in params_strategy(), data_size in any::<u32>()) {
        let raw = build_header(
            data_size,
            params.sample_rate_hz,
            params.channels,
            params.bits_per_sample,
        );
        prop_assert_eq!(validate_header(&raw), Ok(params));

        let header = WavHeader::parse(&raw).unwrap();
        prop_assert_eq!(header.data_size, data_size);
        prop_assert_eq!(header.riff_size(), data_size.wrapping_add(36));
    }

    #[test]
    fn build_header_is_deterministic(params in params_strategy(), data_size in any::<u32>()) {
        let a = build_header(data_size, params.sample_rate_hz, params.channels, params.bits_per_sample);
        let b = build_header(data_size, params.sample_rate_hz, params.channels, params.bits_per_sample);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn patched_size_matches_payload(params in params_strategy(), payload_len in 0usize..4096) {
        let mut bytes = build_header(0, params.sample_rate_hz, params.channels, params.bits_per_sample).to_vec();
        bytes.extend(std::iter::repeat(0u8).take(payload_len));
        for patch in size_patches(payload_len as u32) {
            let offset = patch.offset as usize;
            bytes[offset..offset + 4].copy_from_slice(&patch.bytes);
        }

        let raw: [u8; HEADER_LEN] = bytes[..HEADER_LEN].try_into().unwrap();
        let header = WavHeader::parse(&raw).unwrap();
        prop_assert_eq!(header.data_size as usize, bytes.len() - HEADER_LEN);
        prop_assert_eq!(header.params, params);
    }

    #[test]
    fn transcode_never_overruns(bits in prop_oneof![Just(12u16), Just(16u16), Just(32u16)], src in prop::collection::vec(any::<u8>(), 0..2048)) {
        let policy = Transcode::for_source_bits(bits);
        let mut dst = vec![0u8; policy.output_len(src.len())];
        let produced = policy.apply(&src, &mut dst).unwrap();
        prop_assert_eq!(produced, dst.len());
    }
}
