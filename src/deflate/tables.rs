//! Constant tables from RFC 1951.

/// Shortest back-reference.
pub const MIN_MATCH: usize = 3;

/// Longest back-reference.
pub const MAX_MATCH: usize = 258;

/// Furthest back-reference.
pub const MAX_DISTANCE: usize = 32768;

/// Longest Huffman code in a literal/length or distance tree.
pub const MAX_BITS: usize = 15;

/// Longest code in the code-length tree.
pub const MAX_BL_BITS: usize = 7;

/// Literal/length alphabet size used by the encoder (286 and 287 never occur).
pub const LITERAL_NUM: usize = 286;

/// Distance alphabet size used by the encoder.
pub const DISTANCE_NUM: usize = 30;

/// Code-length alphabet size.
pub const BITLEN_NUM: usize = 19;

/// End-of-block symbol.
pub const END_OF_BLOCK: usize = 256;

/// Code-length symbol: repeat previous length 3-6 times.
pub const REP_3_6: usize = 16;

/// Code-length symbol: repeat zero 3-10 times.
pub const REP_ZERO_3_10: usize = 17;

/// Code-length symbol: repeat zero 11-138 times.
pub const REP_ZERO_11_138: usize = 18;

/// Order in which code-length code lengths are transmitted.
pub const BL_ORDER: [usize; BITLEN_NUM] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Block type codes of the 2-bit BTYPE field.
pub const STORED_BLOCK: u32 = 0;
pub const FIXED_BLOCK: u32 = 1;
pub const DYNAMIC_BLOCK: u32 = 2;

/// Base lengths for length symbols 257-285.
pub const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];

/// Extra bits for length symbols 257-285.
pub const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

/// Base distances for distance symbols 0-29.
pub const DISTANCE_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

/// Extra bits for distance symbols 0-29.
pub const DISTANCE_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// Code lengths of the fixed literal/length tree (section 3.2.6).
pub const FIXED_LITERAL_LENGTHS: [u8; 288] = {
    let mut lengths = [0u8; 288];
    let mut i = 0;
    while i < 288 {
        lengths[i] = match i {
            0..=143 => 8,
            144..=255 => 9,
            256..=279 => 7,
            _ => 8,
        };
        i += 1;
    }
    lengths
};

/// Code lengths of the fixed distance tree.
pub const FIXED_DISTANCE_LENGTHS: [u8; 32] = [5; 32];

/// Literal/length symbol for a match length of 3..=258.
pub fn length_symbol(length: usize) -> usize {
    debug_assert!((MIN_MATCH..=MAX_MATCH).contains(&length));
    if length == MAX_MATCH {
        return 285;
    }
    // Last base not greater than `length`.
    let index = LENGTH_BASE[..28].partition_point(|&base| base as usize <= length) - 1;
    257 + index
}

/// Distance symbol for a distance of 1..=32768.
pub fn distance_symbol(distance: usize) -> usize {
    debug_assert!((1..=MAX_DISTANCE).contains(&distance));
    DISTANCE_BASE.partition_point(|&base| base as usize <= distance) - 1
}

/// Reverse the low `len` bits of `code`.
pub fn reverse_bits(code: u32, len: u32) -> u32 {
    if len == 0 {
        return 0;
    }
    code.reverse_bits() >> (32 - len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_symbols() {
        assert_eq!(length_symbol(3), 257);
        assert_eq!(length_symbol(10), 264);
        assert_eq!(length_symbol(11), 265);
        assert_eq!(length_symbol(12), 265);
        assert_eq!(length_symbol(257), 284);
        assert_eq!(length_symbol(258), 285);
    }

    #[test]
    fn test_distance_symbols() {
        assert_eq!(distance_symbol(1), 0);
        assert_eq!(distance_symbol(4), 3);
        assert_eq!(distance_symbol(5), 4);
        assert_eq!(distance_symbol(6), 4);
        assert_eq!(distance_symbol(24577), 29);
        assert_eq!(distance_symbol(32768), 29);
    }

    #[test]
    fn test_every_length_is_covered() {
        for length in MIN_MATCH..=MAX_MATCH {
            let index = length_symbol(length) - 257;
            let base = LENGTH_BASE[index] as usize;
            let span = 1usize << LENGTH_EXTRA[index];
            assert!(length >= base && length < base + span, "length {length}");
        }
    }

    #[test]
    fn test_reverse_bits() {
        assert_eq!(reverse_bits(0b1100, 4), 0b0011);
        assert_eq!(reverse_bits(0b10101010, 8), 0b01010101);
        assert_eq!(reverse_bits(0b1, 1), 0b1);
    }
}
