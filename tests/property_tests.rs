// SPDX-License-Identifier: MIT
//! Property-based tests using proptest
//!
//! Random inputs, chunk sizes and ranges, checking that every decoded range
//! matches the input slice regardless of how the file was laid out.

use proptest::prelude::*;

use rac::{DRange, DecodeMode, IndexLocation};

mod test_fixtures;
use test_fixtures::{decode_range, encode_plain, zlib_config};

/// Input bytes with some repetition so chunks actually compress
fn input_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..3000),
        prop::collection::vec(prop::sample::select(b"abcab \n".to_vec()), 0..3000),
    ]
}

fn location_strategy() -> impl Strategy<Value = IndexLocation> {
    prop_oneof![Just(IndexLocation::Start), Just(IndexLocation::End)]
}

/// Input plus a sub-range [s, e) of it
fn input_and_range() -> impl Strategy<Value = (Vec<u8>, u64, u64)> {
    input_strategy().prop_flat_map(|data| {
        let len = data.len() as u64;
        (Just(data), 0..=len, 0..=len).prop_map(|(data, a, b)| (data, a.min(b), a.max(b)))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_full_range_round_trips(
        data in input_strategy(),
        dchunk in 1u64..700,
        location in location_strategy(),
    ) {
        let source = encode_plain(&zlib_config(dchunk, location), &data);
        let out = decode_range(source, DRange::full(), DecodeMode::SingleThreaded).unwrap();
        prop_assert_eq!(out, data);
    }

    #[test]
    fn prop_sub_range_matches_slice(
        (data, start, end) in input_and_range(),
        dchunk in 1u64..700,
        location in location_strategy(),
        node_capacity in 2usize..16,
    ) {
        let config = zlib_config(dchunk, location).with_node_capacity(node_capacity);
        let source = encode_plain(&config, &data);
        let out =
            decode_range(source, DRange::new(start, end), DecodeMode::SingleThreaded).unwrap();
        prop_assert_eq!(&out[..], &data[start as usize..end as usize]);
    }

    #[test]
    fn prop_parallel_equals_single_threaded(
        (data, start, end) in input_and_range(),
        dchunk in 1u64..300,
        workers in 2usize..6,
    ) {
        let source = encode_plain(&zlib_config(dchunk, IndexLocation::End), &data);
        let range = DRange::new(start, end);
        let serial = decode_range(source.clone(), range, DecodeMode::SingleThreaded).unwrap();
        let parallel = decode_range(source, range, DecodeMode::Parallel { workers }).unwrap();
        prop_assert_eq!(parallel, serial);
    }

    #[test]
    fn prop_start_beyond_end_is_range_error(
        data in input_strategy(),
        extra in 1u64..100,
    ) {
        let len = data.len() as u64;
        let source = encode_plain(&zlib_config(64, IndexLocation::Start), &data);
        let range = DRange::new(len + extra, len + extra);
        let err = decode_range(source, range, DecodeMode::SingleThreaded).unwrap_err();
        prop_assert_eq!(err.kind(), rac::ErrorKind::Range);
    }
}
