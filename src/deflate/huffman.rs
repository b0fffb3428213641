//! Canonical Huffman coding for DEFLATE.
//!
//! The encoder side builds length-limited trees from symbol frequencies and
//! run-length encodes code-length sequences; the decoder side turns a
//! code-length sequence back into a lookup table.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::LazyLock;

use super::bits::{BitSink, BitSource};
use super::tables::{
    reverse_bits, FIXED_DISTANCE_LENGTHS, FIXED_LITERAL_LENGTHS, MAX_BITS, REP_3_6, REP_ZERO_11_138,
    REP_ZERO_3_10,
};
use crate::error::{Error, Result};

/// Bits resolved by the primary decode table.
const PRIMARY_BITS: u32 = 9;

/// A canonical Huffman code over a symbol alphabet.
#[derive(Debug, Clone)]
pub struct HuffmanTree {
    freqs: Vec<u32>,
    lengths: Vec<u8>,
    /// Bit-reversed codes, ready to be written LSB first.
    codes: Vec<u16>,
    num_codes: usize,
}

impl HuffmanTree {
    /// Build a tree whose codes are at most `max_bits` long.
    ///
    /// At least two symbols always receive codes: when fewer than two
    /// frequencies are non-zero, the lowest unused symbols are added as
    /// placeholders. `num_codes` covers the last coded symbol but never
    /// drops below `min_codes`.
    pub fn build(freqs: &[u32], min_codes: usize, max_bits: usize) -> Self {
        let mut leaves: Vec<usize> = (0..freqs.len()).filter(|&s| freqs[s] > 0).collect();
        let mut filler = 0;
        while leaves.len() < 2 && filler < freqs.len() {
            if freqs[filler] == 0 {
                leaves.push(filler);
            }
            filler += 1;
        }
        leaves.sort_unstable();
        debug_assert!(leaves.len() <= 1 << max_bits);

        let depths = leaf_depths(freqs, &leaves);
        let mut lengths = vec![0u8; freqs.len()];

        if depths.iter().all(|&d| d <= max_bits) {
            for (&symbol, &depth) in leaves.iter().zip(&depths) {
                lengths[symbol] = depth as u8;
            }
        } else {
            let mut bl_count = vec![0usize; max_bits + 1];
            for &depth in &depths {
                bl_count[depth.min(max_bits)] += 1;
            }
            limit_lengths(&mut bl_count, max_bits);

            // The deepest leaves of the unconstrained tree take the longest codes.
            let mut order: Vec<usize> = (0..leaves.len()).collect();
            order.sort_by_key(|&i| (Reverse(depths[i]), freqs[leaves[i]], leaves[i]));
            let mut next = order.into_iter();
            for bits in (1..=max_bits).rev() {
                for _ in 0..bl_count[bits] {
                    if let Some(i) = next.next() {
                        lengths[leaves[i]] = bits as u8;
                    }
                }
            }
        }

        let last = leaves.last().copied().unwrap_or(0);
        let num_codes = (last + 1).max(min_codes).min(freqs.len());
        let codes = canonical_codes(&lengths);
        Self {
            freqs: freqs.to_vec(),
            lengths,
            codes,
            num_codes,
        }
    }

    /// Build a tree from known code lengths.
    pub fn from_lengths(lengths: &[u8]) -> Self {
        Self {
            freqs: vec![0; lengths.len()],
            lengths: lengths.to_vec(),
            codes: canonical_codes(lengths),
            num_codes: lengths.len(),
        }
    }

    /// The fixed literal/length tree.
    pub fn fixed_literal() -> &'static HuffmanTree {
        static TREE: LazyLock<HuffmanTree> =
            LazyLock::new(|| HuffmanTree::from_lengths(&FIXED_LITERAL_LENGTHS));
        &TREE
    }

    /// The fixed distance tree.
    pub fn fixed_distance() -> &'static HuffmanTree {
        static TREE: LazyLock<HuffmanTree> =
            LazyLock::new(|| HuffmanTree::from_lengths(&FIXED_DISTANCE_LENGTHS));
        &TREE
    }

    pub fn lengths(&self) -> &[u8] {
        &self.lengths
    }

    /// Code length of `symbol`, 0 when unused.
    pub fn length(&self, symbol: usize) -> u8 {
        self.lengths[symbol]
    }

    /// Bit-reversed code of `symbol`.
    pub fn code(&self, symbol: usize) -> u16 {
        self.codes[symbol]
    }

    /// Symbols that must be transmitted in a dynamic header.
    pub fn num_codes(&self) -> usize {
        self.num_codes
    }

    /// Bits needed to encode the frequencies the tree was built from.
    pub fn encoded_length(&self) -> u64 {
        self.freqs
            .iter()
            .zip(&self.lengths)
            .map(|(&f, &l)| f as u64 * l as u64)
            .sum()
    }

    /// Bits needed to encode `freqs` with this tree.
    pub fn cost_of(&self, freqs: &[u32]) -> u64 {
        freqs
            .iter()
            .zip(&self.lengths)
            .map(|(&f, &l)| f as u64 * l as u64)
            .sum()
    }

    #[inline]
    pub fn write_symbol(&self, sink: &mut BitSink, symbol: usize) {
        debug_assert!(self.lengths[symbol] > 0, "symbol {symbol} has no code");
        sink.write_bits(self.codes[symbol] as u32, self.lengths[symbol] as u32);
    }
}

/// Depth of each leaf in an unconstrained Huffman merge tree.
fn leaf_depths(freqs: &[u32], leaves: &[usize]) -> Vec<usize> {
    // Node ids: leaves first, merged nodes appended. A parent id is always
    // greater than its children's.
    let mut parent = vec![usize::MAX; 2 * leaves.len()];
    let mut heap = BinaryHeap::with_capacity(leaves.len());
    for (id, &symbol) in leaves.iter().enumerate() {
        heap.push(Reverse((freqs[symbol] as u64, 0u32, id)));
    }

    let mut next_id = leaves.len();
    while heap.len() > 1 {
        let Some(Reverse((w1, d1, a))) = heap.pop() else { break };
        let Some(Reverse((w2, d2, b))) = heap.pop() else { break };
        parent[a] = next_id;
        parent[b] = next_id;
        heap.push(Reverse((w1 + w2, d1.max(d2) + 1, next_id)));
        next_id += 1;
    }

    let mut depth = vec![0usize; next_id];
    for id in (0..next_id.saturating_sub(1)).rev() {
        depth[id] = depth[parent[id]] + 1;
    }
    depth.truncate(leaves.len());
    depth
}

/// Shorten codes until no length exceeds `max_bits` and the Kraft sum is
/// exactly one. `bl_count[max_bits]` must already include every clamped leaf.
fn limit_lengths(bl_count: &mut [usize], max_bits: usize) {
    let mut total: usize = (1..=max_bits).map(|bits| bl_count[bits] << (max_bits - bits)).sum();
    while total != 1 << max_bits {
        bl_count[max_bits] -= 1;
        for bits in (1..max_bits).rev() {
            if bl_count[bits] != 0 {
                bl_count[bits] -= 1;
                bl_count[bits + 1] += 2;
                break;
            }
        }
        total -= 1;
    }
}

/// Assign canonical codes: shorter codes first, then increasing symbol order.
fn canonical_codes(lengths: &[u8]) -> Vec<u16> {
    let mut bl_count = [0u32; MAX_BITS + 1];
    for &len in lengths {
        bl_count[len as usize] += 1;
    }
    bl_count[0] = 0;

    let mut next_code = [0u32; MAX_BITS + 2];
    let mut code = 0u32;
    for bits in 1..=MAX_BITS {
        code = (code + bl_count[bits - 1]) << 1;
        next_code[bits] = code;
    }

    lengths
        .iter()
        .map(|&len| {
            if len == 0 {
                return 0;
            }
            let code = next_code[len as usize];
            next_code[len as usize] += 1;
            reverse_bits(code, len as u32) as u16
        })
        .collect()
}

/// One symbol of a run-length encoded code-length sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLengthToken {
    /// A literal code length 0-15.
    Length(u8),
    /// Repeat the previous length 3-6 times.
    RepeatPrevious(u8),
    /// A run of 3-138 zero lengths.
    RepeatZero(u8),
}

impl CodeLengthToken {
    /// Symbol in the code-length alphabet.
    pub fn symbol(self) -> usize {
        match self {
            CodeLengthToken::Length(len) => len as usize,
            CodeLengthToken::RepeatPrevious(_) => REP_3_6,
            CodeLengthToken::RepeatZero(n) if n <= 10 => REP_ZERO_3_10,
            CodeLengthToken::RepeatZero(_) => REP_ZERO_11_138,
        }
    }

    /// Extra bits following the symbol as `(value, bit count)`.
    pub fn extra_bits(self) -> (u32, u32) {
        match self {
            CodeLengthToken::Length(_) => (0, 0),
            CodeLengthToken::RepeatPrevious(n) => (n as u32 - 3, 2),
            CodeLengthToken::RepeatZero(n) if n <= 10 => (n as u32 - 3, 3),
            CodeLengthToken::RepeatZero(n) => (n as u32 - 11, 7),
        }
    }
}

/// Run-length encode a code-length sequence.
pub fn code_length_tokens(lengths: &[u8]) -> Vec<CodeLengthToken> {
    let mut tokens = Vec::new();
    let mut previous: Option<u8> = None;
    let mut i = 0;

    while i < lengths.len() {
        let len = lengths[i];
        let mut run = 1;
        while i + run < lengths.len() && lengths[i + run] == len {
            run += 1;
        }
        i += run;

        let mut left = run;
        if len == 0 {
            while left >= 3 {
                let take = left.min(138);
                tokens.push(CodeLengthToken::RepeatZero(take as u8));
                left -= take;
            }
        } else {
            if previous != Some(len) {
                tokens.push(CodeLengthToken::Length(len));
                left -= 1;
            }
            while left >= 3 {
                let take = left.min(6);
                tokens.push(CodeLengthToken::RepeatPrevious(take as u8));
                left -= take;
            }
        }
        tokens.extend(std::iter::repeat_n(CodeLengthToken::Length(len), left));
        previous = Some(len);
    }
    tokens
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Invalid,
    Leaf { symbol: u16, len: u8 },
    Link { offset: u32, bits: u8 },
}

/// Decoding table: codes up to 9 bits resolve in the primary table, longer
/// codes go through a per-prefix subtable.
#[derive(Debug, Clone)]
pub struct DecodeTable {
    primary: Vec<Slot>,
    secondary: Vec<Slot>,
}

impl DecodeTable {
    /// Build a table from code lengths. Incomplete codes are accepted (a
    /// lone distance code is legal); over-subscribed ones are not.
    pub fn new(lengths: &[u8]) -> Result<Self> {
        let mut bl_count = [0i32; MAX_BITS + 1];
        for &len in lengths {
            if len as usize > MAX_BITS {
                return Err(Error::format(format!("code length {len} exceeds {MAX_BITS}")));
            }
            bl_count[len as usize] += 1;
        }
        bl_count[0] = 0;

        let mut left = 1i32;
        for &count in &bl_count[1..] {
            left = (left << 1) - count;
            if left < 0 {
                return Err(Error::format("over-subscribed Huffman code lengths"));
            }
        }

        Ok(Self::from_valid_lengths(lengths))
    }

    /// Build from lengths already known not to be over-subscribed.
    fn from_valid_lengths(lengths: &[u8]) -> Self {
        let codes = canonical_codes(lengths);
        let primary_size = 1usize << PRIMARY_BITS;

        // Widest suffix under each primary prefix decides its subtable size.
        let mut sub_bits = vec![0u32; primary_size];
        for (symbol, &len) in lengths.iter().enumerate() {
            let len = len as u32;
            if len > PRIMARY_BITS {
                let prefix = codes[symbol] as usize & (primary_size - 1);
                sub_bits[prefix] = sub_bits[prefix].max(len - PRIMARY_BITS);
            }
        }

        let mut primary = vec![Slot::Invalid; primary_size];
        let mut secondary = Vec::new();
        for (prefix, &bits) in sub_bits.iter().enumerate() {
            if bits > 0 {
                primary[prefix] = Slot::Link {
                    offset: secondary.len() as u32,
                    bits: bits as u8,
                };
                secondary.resize(secondary.len() + (1 << bits), Slot::Invalid);
            }
        }

        for (symbol, &len) in lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }
            let code = codes[symbol] as usize;
            let leaf = Slot::Leaf {
                symbol: symbol as u16,
                len,
            };
            let len = len as u32;
            if len <= PRIMARY_BITS {
                for index in (code..primary_size).step_by(1 << len) {
                    primary[index] = leaf;
                }
            } else if let Slot::Link { offset, bits } = primary[code & (primary_size - 1)] {
                let suffix = code >> PRIMARY_BITS;
                for index in (suffix..1usize << bits).step_by(1 << (len - PRIMARY_BITS)) {
                    secondary[offset as usize + index] = leaf;
                }
            }
        }

        Self { primary, secondary }
    }

    /// The fixed literal/length decoder.
    pub fn fixed_literal() -> &'static DecodeTable {
        static TABLE: LazyLock<DecodeTable> =
            LazyLock::new(|| DecodeTable::from_valid_lengths(&FIXED_LITERAL_LENGTHS));
        &TABLE
    }

    /// The fixed distance decoder.
    pub fn fixed_distance() -> &'static DecodeTable {
        static TABLE: LazyLock<DecodeTable> =
            LazyLock::new(|| DecodeTable::from_valid_lengths(&FIXED_DISTANCE_LENGTHS));
        &TABLE
    }

    /// Decode one symbol. `Ok(None)` means more input is needed.
    pub fn decode(&self, input: &mut BitSource) -> Result<Option<u16>> {
        let (bits, available) = input.peek_available(PRIMARY_BITS);
        match self.primary[bits as usize] {
            Slot::Leaf { symbol, len } if len as u32 <= available => {
                input.drop_bits(len as u32);
                Ok(Some(symbol))
            }
            Slot::Leaf { .. } => Ok(None),
            Slot::Invalid if available == PRIMARY_BITS => {
                Err(Error::format("illegal Huffman code"))
            }
            Slot::Invalid => Ok(None),
            Slot::Link { offset, bits } => {
                if available < PRIMARY_BITS {
                    return Ok(None);
                }
                let wanted = PRIMARY_BITS + bits as u32;
                let (value, available) = input.peek_available(wanted);
                let index = offset as usize + (value >> PRIMARY_BITS) as usize;
                match self.secondary[index] {
                    Slot::Leaf { symbol, len } if len as u32 <= available => {
                        input.drop_bits(len as u32);
                        Ok(Some(symbol))
                    }
                    Slot::Invalid if available == wanted => {
                        Err(Error::format("illegal Huffman code"))
                    }
                    _ => Ok(None),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kraft_sum(lengths: &[u8], max_bits: usize) -> u64 {
        lengths
            .iter()
            .filter(|&&l| l > 0)
            .map(|&l| 1u64 << (max_bits - l as usize))
            .sum()
    }

    fn plain_code(tree: &HuffmanTree, symbol: usize) -> u32 {
        let len = tree.length(symbol) as u32;
        reverse_bits(tree.code(symbol) as u32, len)
    }

    #[test]
    fn test_canonical_codes_match_rfc_example() {
        // RFC 1951 section 3.2.2: lengths (3, 3, 3, 3, 3, 2, 4, 4).
        let tree = HuffmanTree::from_lengths(&[3, 3, 3, 3, 3, 2, 4, 4]);
        let expected = [0b010, 0b011, 0b100, 0b101, 0b110, 0b00, 0b1110, 0b1111];
        for (symbol, &code) in expected.iter().enumerate() {
            assert_eq!(plain_code(&tree, symbol), code, "symbol {symbol}");
        }
    }

    #[test]
    fn test_build_satisfies_kraft_equality() {
        let freqs = [10, 1, 1, 5, 0, 7, 2, 2, 30, 0, 0, 1];
        let tree = HuffmanTree::build(&freqs, 1, 15);
        assert_eq!(kraft_sum(tree.lengths(), 15), 1 << 15);
        for (symbol, &f) in freqs.iter().enumerate() {
            assert_eq!(f > 0, tree.length(symbol) > 0);
        }
        assert_eq!(tree.num_codes(), 12);
    }

    #[test]
    fn test_build_limits_length() {
        // Fibonacci weights produce a maximally skewed tree.
        let mut freqs = vec![0u32; 30];
        let (mut a, mut b) = (1u32, 1u32);
        for f in freqs.iter_mut() {
            *f = a;
            let next = a.saturating_add(b);
            a = b;
            b = next;
        }
        let tree = HuffmanTree::build(&freqs, 1, 15);
        assert!(tree.lengths().iter().all(|&l| (1..=15).contains(&l)));
        assert_eq!(kraft_sum(tree.lengths(), 15), 1 << 15);

        let tree = HuffmanTree::build(&freqs[..19], 4, 7);
        assert!(tree.lengths().iter().all(|&l| (1..=7).contains(&l)));
        assert_eq!(kraft_sum(tree.lengths(), 7), 1 << 7);
    }

    #[test]
    fn test_build_degenerate_inputs() {
        let mut freqs = vec![0u32; 286];
        freqs[256] = 1;
        let tree = HuffmanTree::build(&freqs, 257, 15);
        assert_eq!(tree.length(0), 1);
        assert_eq!(tree.length(256), 1);
        assert_eq!(tree.num_codes(), 257);

        let tree = HuffmanTree::build(&[0u32; 30], 1, 15);
        assert_eq!(tree.length(0), 1);
        assert_eq!(tree.length(1), 1);
        assert_eq!(tree.num_codes(), 2);
    }

    #[test]
    fn test_codes_are_prefix_free() {
        let freqs: Vec<u32> = (0..40).map(|i| (i * 7 % 13) as u32).collect();
        let tree = HuffmanTree::build(&freqs, 1, 15);
        let coded: Vec<(u32, u32)> = (0..freqs.len())
            .filter(|&s| tree.length(s) > 0)
            .map(|s| (plain_code(&tree, s), tree.length(s) as u32))
            .collect();
        for (i, &(ca, la)) in coded.iter().enumerate() {
            for &(cb, lb) in &coded[i + 1..] {
                let shared = la.min(lb);
                assert_ne!(ca >> (la - shared), cb >> (lb - shared));
            }
        }
    }

    #[test]
    fn test_code_length_tokens() {
        let lengths = [3, 3, 3, 3, 3, 3, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 5, 0, 0];
        let tokens = code_length_tokens(&lengths);
        assert_eq!(
            tokens,
            vec![
                CodeLengthToken::Length(3),
                CodeLengthToken::RepeatPrevious(6),
                CodeLengthToken::Length(3),
                CodeLengthToken::RepeatZero(12),
                CodeLengthToken::Length(5),
                CodeLengthToken::Length(0),
                CodeLengthToken::Length(0),
            ]
        );
        assert_eq!(CodeLengthToken::RepeatZero(12).symbol(), REP_ZERO_11_138);
        assert_eq!(CodeLengthToken::RepeatZero(12).extra_bits(), (1, 7));
        assert_eq!(CodeLengthToken::RepeatZero(138).extra_bits(), (127, 7));
    }

    #[test]
    fn test_code_length_tokens_long_zero_run() {
        let lengths = vec![0u8; 300];
        let tokens = code_length_tokens(&lengths);
        assert_eq!(
            tokens,
            vec![
                CodeLengthToken::RepeatZero(138),
                CodeLengthToken::RepeatZero(138),
                CodeLengthToken::RepeatZero(24),
            ]
        );
    }

    #[test]
    fn test_decode_table_roundtrip_long_codes() {
        let mut freqs = vec![1u32; 286];
        freqs[0] = 100_000;
        freqs[1] = 50_000;
        freqs[2] = 25_000;
        let tree = HuffmanTree::build(&freqs, 257, 15);
        assert!(tree.lengths().iter().any(|&l| l > 9));

        let mut sink = BitSink::new();
        for symbol in 0..286 {
            tree.write_symbol(&mut sink, symbol);
        }
        let bytes = sink.finish();

        let table = DecodeTable::new(tree.lengths()).unwrap();
        let mut source = BitSource::new();
        source.set_input(&bytes);
        for symbol in 0..286u16 {
            assert_eq!(table.decode(&mut source).unwrap(), Some(symbol));
        }
    }

    #[test]
    fn test_decode_table_needs_input_on_partial_code() {
        let tree = HuffmanTree::fixed_literal();
        let mut sink = BitSink::new();
        tree.write_symbol(&mut sink, 200); // 9-bit code
        let bytes = sink.finish();

        let table = DecodeTable::fixed_literal();
        let mut source = BitSource::new();
        source.set_input(&bytes[..1]);
        assert_eq!(table.decode(&mut source).unwrap(), None);
        source.set_input(&bytes[1..]);
        assert_eq!(table.decode(&mut source).unwrap(), Some(200));
    }

    #[test]
    fn test_decode_table_rejects_bad_lengths() {
        assert!(DecodeTable::new(&[1, 1, 1]).is_err());
        // A single one-bit code is incomplete but legal.
        let table = DecodeTable::new(&[0, 1]).unwrap();
        let mut source = BitSource::new();
        source.set_input(&[0x00, 0x00]);
        assert_eq!(table.decode(&mut source).unwrap(), Some(1));
        let mut source = BitSource::new();
        source.set_input(&[0xFF, 0xFF]);
        assert!(table.decode(&mut source).is_err());
    }
}
