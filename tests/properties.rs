use proptest::prelude::*;

use zipkit::deflate::huffman::HuffmanTree;
use zipkit::deflate::{compress, decompress, zlib_compress, zlib_decompress};
use zipkit::{CompressionLevel, DeflateWriter, InflateReader};

use std::io::{Read, Write};

fn level() -> impl Strategy<Value = CompressionLevel> {
    (0u32..=9).prop_map(|l| CompressionLevel::new(l).unwrap())
}

/// Short alphabets give the matcher something to find.
fn payload() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..4096),
        prop::collection::vec(prop::sample::select(b"abcab ".to_vec()), 0..20000),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn raw_round_trip(data in payload(), level in level()) {
        let packed = compress(&data, level).unwrap();
        prop_assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn zlib_round_trip(data in payload(), level in level()) {
        let packed = zlib_compress(&data, level).unwrap();
        prop_assert_eq!(zlib_decompress(&packed).unwrap(), data);
    }

    #[test]
    fn stream_adapters_round_trip(data in payload(), chunk in 1usize..700) {
        let mut writer = DeflateWriter::new(Vec::new(), CompressionLevel::DEFAULT);
        for piece in data.chunks(chunk) {
            writer.write_all(piece).unwrap();
        }
        let packed = writer.finish().unwrap();

        let mut out = Vec::new();
        InflateReader::new(&packed[..]).read_to_end(&mut out).unwrap();
        prop_assert_eq!(out, data);
    }

    #[test]
    fn huffman_lengths_fill_the_code_space(
        freqs in prop::collection::vec(0u32..10_000, 2..300),
        max_bits in 9usize..=15,
    ) {
        let tree = HuffmanTree::build(&freqs, 0, max_bits);
        let lengths = tree.lengths();
        prop_assert!(lengths.iter().all(|&l| (l as usize) <= max_bits));
        let kraft: u64 = lengths
            .iter()
            .filter(|&&l| l > 0)
            .map(|&l| 1u64 << (max_bits - l as usize))
            .sum();
        prop_assert_eq!(kraft, 1u64 << max_bits);
    }
}
