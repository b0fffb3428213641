//! Token buffering and block emission.
//!
//! The engine tallies literals and matches here. When the buffer fills, or the
//! engine flushes, the block is written in whichever of the three DEFLATE
//! encodings costs the fewest bits.

use tracing::trace;

use super::bits::BitSink;
use super::huffman::{code_length_tokens, CodeLengthToken, HuffmanTree};
use super::tables::{
    distance_symbol, length_symbol, BITLEN_NUM, BL_ORDER, DISTANCE_BASE, DISTANCE_EXTRA,
    DISTANCE_NUM, DYNAMIC_BLOCK, END_OF_BLOCK, FIXED_BLOCK, LENGTH_BASE, LENGTH_EXTRA, LITERAL_NUM,
    MAX_BITS, MAX_BL_BITS, STORED_BLOCK,
};

/// Tokens buffered before a block is forced out.
pub const BUFFER_SIZE: usize = 1 << 14;

/// Largest payload of a single stored block.
pub const MAX_STORED_BLOCK: usize = 0xFFFF;

#[derive(Debug, Clone, Copy)]
enum Token {
    Literal(u8),
    Match { length: u16, distance: u16 },
}

/// Which encoding a flushed block used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Stored,
    Fixed,
    Dynamic,
}

/// Per-block token buffer and Huffman block writer.
#[derive(Debug)]
pub struct BlockEncoder {
    sink: BitSink,
    tokens: Vec<Token>,
    literal_freqs: Vec<u32>,
    distance_freqs: Vec<u32>,
    /// Extra bits carried by the buffered matches.
    extra_bits: u64,
}

impl Default for BlockEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockEncoder {
    pub fn new() -> Self {
        Self {
            sink: BitSink::new(),
            tokens: Vec::with_capacity(BUFFER_SIZE),
            literal_freqs: vec![0; LITERAL_NUM],
            distance_freqs: vec![0; DISTANCE_NUM],
            extra_bits: 0,
        }
    }

    pub fn sink(&self) -> &BitSink {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut BitSink {
        &mut self.sink
    }

    /// Drop buffered tokens and pending output.
    pub fn reset(&mut self) {
        self.sink.reset();
        self.clear_block();
    }

    fn clear_block(&mut self) {
        self.tokens.clear();
        self.literal_freqs.fill(0);
        self.distance_freqs.fill(0);
        self.extra_bits = 0;
    }

    pub fn is_full(&self) -> bool {
        self.tokens.len() >= BUFFER_SIZE
    }

    /// Buffered token count.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Record a literal byte. Returns true when the buffer is full.
    pub fn tally_literal(&mut self, byte: u8) -> bool {
        self.tokens.push(Token::Literal(byte));
        self.literal_freqs[byte as usize] += 1;
        self.is_full()
    }

    /// Record a back-reference. Returns true when the buffer is full.
    pub fn tally_match(&mut self, distance: usize, length: usize) -> bool {
        let lc = length_symbol(length);
        let dc = distance_symbol(distance);
        self.tokens.push(Token::Match {
            length: length as u16,
            distance: distance as u16,
        });
        self.literal_freqs[lc] += 1;
        self.distance_freqs[dc] += 1;
        self.extra_bits += LENGTH_EXTRA[lc - 257] as u64 + DISTANCE_EXTRA[dc] as u64;
        self.is_full()
    }

    /// Write `data` as stored blocks, splitting at 65535 bytes. Only the
    /// final piece carries the `last` flag. Buffered tokens are discarded:
    /// the caller hands over the bytes they stand for.
    pub fn flush_stored_block(&mut self, data: &[u8], last: bool) {
        let mut chunks = data.chunks(MAX_STORED_BLOCK).peekable();
        if chunks.peek().is_none() {
            self.write_stored_header(0, last);
        }
        while let Some(chunk) = chunks.next() {
            let is_last = last && chunks.peek().is_none();
            self.write_stored_header(chunk.len() as u16, is_last);
            self.sink.write_block(chunk);
        }
        self.clear_block();
    }

    fn write_stored_header(&mut self, len: u16, last: bool) {
        self.sink.write_bits((STORED_BLOCK << 1) | last as u32, 3);
        self.sink.align_to_byte();
        self.sink.write_short(len);
        self.sink.write_short(!len);
    }

    /// Close the current block.
    ///
    /// `stored` holds the raw bytes covered by the buffered tokens when they
    /// are still available; without them a stored block is not an option.
    pub fn flush_block(&mut self, stored: Option<&[u8]>, last: bool) -> BlockKind {
        self.literal_freqs[END_OF_BLOCK] += 1;

        let literal_tree = HuffmanTree::build(&self.literal_freqs, 257, MAX_BITS);
        let distance_tree = HuffmanTree::build(&self.distance_freqs, 1, MAX_BITS);

        let literal_tokens = code_length_tokens(&literal_tree.lengths()[..literal_tree.num_codes()]);
        let distance_tokens =
            code_length_tokens(&distance_tree.lengths()[..distance_tree.num_codes()]);

        let mut bl_freqs = vec![0u32; BITLEN_NUM];
        let mut rle_extra = 0u64;
        for token in literal_tokens.iter().chain(&distance_tokens) {
            bl_freqs[token.symbol()] += 1;
            rle_extra += token.extra_bits().1 as u64;
        }
        let bl_tree = HuffmanTree::build(&bl_freqs, 4, MAX_BL_BITS);

        let mut bl_codes = 4;
        for i in (4..BITLEN_NUM).rev() {
            if bl_tree.length(BL_ORDER[i]) > 0 {
                bl_codes = i + 1;
                break;
            }
        }

        let dynamic_len = 14
            + 3 * bl_codes as u64
            + bl_tree.encoded_length()
            + rle_extra
            + literal_tree.encoded_length()
            + distance_tree.encoded_length()
            + self.extra_bits;
        let fixed_len = self.extra_bits
            + HuffmanTree::fixed_literal().cost_of(&self.literal_freqs)
            + HuffmanTree::fixed_distance().cost_of(&self.distance_freqs);
        let best_len = dynamic_len.min(fixed_len);

        let kind = match stored {
            Some(data) if (data.len() as u64) + 4 < best_len >> 3 => BlockKind::Stored,
            _ if fixed_len <= dynamic_len => BlockKind::Fixed,
            _ => BlockKind::Dynamic,
        };
        trace!(
            tokens = self.tokens.len(),
            stored_len = stored.map_or(0, <[u8]>::len),
            fixed_len,
            dynamic_len,
            ?kind,
            last,
            "flushing block"
        );

        match kind {
            BlockKind::Stored => {
                if let Some(data) = stored {
                    self.flush_stored_block(data, last);
                }
                return kind;
            }
            BlockKind::Fixed => {
                self.sink.write_bits((FIXED_BLOCK << 1) | last as u32, 3);
                self.compress_block(HuffmanTree::fixed_literal(), HuffmanTree::fixed_distance());
            }
            BlockKind::Dynamic => {
                self.sink.write_bits((DYNAMIC_BLOCK << 1) | last as u32, 3);
                self.sink.write_bits((literal_tree.num_codes() - 257) as u32, 5);
                self.sink.write_bits((distance_tree.num_codes() - 1) as u32, 5);
                self.sink.write_bits((bl_codes - 4) as u32, 4);
                for &symbol in &BL_ORDER[..bl_codes] {
                    self.sink.write_bits(bl_tree.length(symbol) as u32, 3);
                }
                self.write_code_lengths(&bl_tree, &literal_tokens);
                self.write_code_lengths(&bl_tree, &distance_tokens);
                self.compress_block(&literal_tree, &distance_tree);
            }
        }
        self.clear_block();
        kind
    }

    fn write_code_lengths(&mut self, bl_tree: &HuffmanTree, tokens: &[CodeLengthToken]) {
        for &token in tokens {
            bl_tree.write_symbol(&mut self.sink, token.symbol());
            let (value, count) = token.extra_bits();
            if count > 0 {
                self.sink.write_bits(value, count);
            }
        }
    }

    fn compress_block(&mut self, literal_tree: &HuffmanTree, distance_tree: &HuffmanTree) {
        let sink = &mut self.sink;
        for &token in &self.tokens {
            match token {
                Token::Literal(byte) => literal_tree.write_symbol(sink, byte as usize),
                Token::Match { length, distance } => {
                    let (length, distance) = (length as usize, distance as usize);
                    let lc = length_symbol(length);
                    literal_tree.write_symbol(sink, lc);
                    let extra = LENGTH_EXTRA[lc - 257] as u32;
                    if extra > 0 {
                        sink.write_bits((length - LENGTH_BASE[lc - 257] as usize) as u32, extra);
                    }

                    let dc = distance_symbol(distance);
                    distance_tree.write_symbol(sink, dc);
                    let extra = DISTANCE_EXTRA[dc] as u32;
                    if extra > 0 {
                        sink.write_bits((distance - DISTANCE_BASE[dc] as usize) as u32, extra);
                    }
                }
            }
        }
        literal_tree.write_symbol(sink, END_OF_BLOCK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate::Inflater;

    fn inflate_raw(data: &[u8]) -> Vec<u8> {
        let mut inflater = Inflater::new(true);
        inflater.set_input(data);
        let mut out = vec![0u8; 1 << 20];
        let n = inflater.inflate(&mut out).unwrap();
        assert!(inflater.is_finished());
        out.truncate(n);
        out
    }

    #[test]
    fn test_short_literal_block_uses_fixed_codes() {
        let mut encoder = BlockEncoder::new();
        for &b in b"abc" {
            encoder.tally_literal(b);
        }
        let kind = encoder.flush_block(None, true);
        assert_eq!(kind, BlockKind::Fixed);
        let bytes = std::mem::take(encoder.sink_mut()).finish();
        assert_eq!(inflate_raw(&bytes), b"abc");
    }

    #[test]
    fn test_skewed_block_uses_dynamic_codes() {
        let mut encoder = BlockEncoder::new();
        let mut expected = Vec::new();
        for i in 0..4000 {
            let b = if i % 10 == 0 { b'x' } else { b'a' };
            encoder.tally_literal(b);
            expected.push(b);
        }
        let kind = encoder.flush_block(None, true);
        assert_eq!(kind, BlockKind::Dynamic);
        let bytes = std::mem::take(encoder.sink_mut()).finish();
        assert!(bytes.len() < 1000);
        assert_eq!(inflate_raw(&bytes), expected);
    }

    #[test]
    fn test_random_block_falls_back_to_stored() {
        // Every byte value once: Huffman coding cannot beat 8 bits per byte.
        let data: Vec<u8> = (0..=255u8).collect();
        let mut encoder = BlockEncoder::new();
        for &b in &data {
            encoder.tally_literal(b);
        }
        let kind = encoder.flush_block(Some(&data), true);
        assert_eq!(kind, BlockKind::Stored);
        let bytes = std::mem::take(encoder.sink_mut()).finish();
        assert_eq!(bytes.len(), data.len() + 5);
        assert_eq!(inflate_raw(&bytes), data);
    }

    #[test]
    fn test_matches_round_trip() {
        let mut encoder = BlockEncoder::new();
        for &b in b"abcd" {
            encoder.tally_literal(b);
        }
        encoder.tally_match(4, 258);
        encoder.tally_match(1, 3);
        let bytes = {
            encoder.flush_block(None, true);
            std::mem::take(encoder.sink_mut()).finish()
        };
        let out = inflate_raw(&bytes);
        assert_eq!(out.len(), 4 + 258 + 3);
        assert!(out.starts_with(b"abcdabcdabcd"));
        assert_eq!(&out[262..], b"bbb");
    }

    #[test]
    fn test_long_stored_data_is_split() {
        let data = vec![7u8; 70_000];
        let mut encoder = BlockEncoder::new();
        encoder.flush_stored_block(&data, true);
        let bytes = std::mem::take(encoder.sink_mut()).finish();
        assert_eq!(bytes.len(), data.len() + 10);
        // First block is not final.
        assert_eq!(bytes[0] & 1, 0);
        assert_eq!(inflate_raw(&bytes), data);
    }
}
