//! Streaming decompressor.

use super::bits::BitSource;
use super::dynheader::DynHeader;
use super::huffman::DecodeTable;
use super::tables::{
    DISTANCE_BASE, DISTANCE_EXTRA, DYNAMIC_BLOCK, FIXED_BLOCK, LENGTH_BASE, LENGTH_EXTRA,
    MAX_MATCH, STORED_BLOCK,
};
use super::window::OutputWindow;
use crate::checksum::{Adler32, Checksum};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Header,
    Dictionary,
    Blocks,
    StoredLen1,
    StoredLen2,
    Stored,
    DynHeader,
    Huffman,
    HuffmanLenBits,
    HuffmanDist,
    HuffmanDistBits,
    Checksum,
    Finished,
}

#[derive(Debug)]
enum Tables {
    Fixed,
    Dynamic {
        literal: DecodeTable,
        distance: DecodeTable,
    },
}

impl Tables {
    fn literal(&self) -> &DecodeTable {
        match self {
            Tables::Fixed => DecodeTable::fixed_literal(),
            Tables::Dynamic { literal, .. } => literal,
        }
    }

    fn distance(&self) -> &DecodeTable {
        match self {
            Tables::Fixed => DecodeTable::fixed_distance(),
            Tables::Dynamic { distance, .. } => distance,
        }
    }
}

/// Streaming DEFLATE decompressor with optional zlib framing.
///
/// Decoding never blocks: when input runs out, [`inflate`](Self::inflate)
/// returns what it has and [`needs_input`](Self::needs_input) turns true.
#[derive(Debug)]
pub struct Inflater {
    mode: Mode,
    no_header: bool,
    input: BitSource,
    output: OutputWindow,
    adler: Option<Adler32>,
    /// Dictionary id from the header, or the stream checksum being read.
    read_adler: u32,
    needed_bits: u32,
    rep_length: usize,
    rep_distance: usize,
    stored_len: usize,
    is_last_block: bool,
    tables: Option<Tables>,
    dyn_header: Option<DynHeader>,
    total_fed: u64,
    total_out: u64,
}

impl Inflater {
    /// With `no_header` the input is raw DEFLATE (as in ZIP entries);
    /// otherwise a zlib header and Adler-32 trailer are expected.
    pub fn new(no_header: bool) -> Self {
        Self {
            mode: if no_header { Mode::Blocks } else { Mode::Header },
            no_header,
            input: BitSource::new(),
            output: OutputWindow::new(),
            adler: (!no_header).then(Adler32::new),
            read_adler: 0,
            needed_bits: 0,
            rep_length: 0,
            rep_distance: 0,
            stored_len: 0,
            is_last_block: false,
            tables: None,
            dyn_header: None,
            total_fed: 0,
            total_out: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.no_header);
    }

    pub fn set_input(&mut self, data: &[u8]) {
        self.input.set_input(data);
        self.total_fed += data.len() as u64;
    }

    pub fn needs_input(&self) -> bool {
        self.input.is_needing_input()
    }

    /// True when the zlib header announced a preset dictionary that has not
    /// been supplied yet.
    pub fn needs_dictionary(&self) -> bool {
        self.mode == Mode::Dictionary && self.needed_bits == 0
    }

    pub fn set_dictionary(&mut self, dictionary: &[u8]) -> Result<()> {
        if !self.needs_dictionary() {
            return Err(Error::usage("no dictionary is needed"));
        }
        let id = Adler32::of(dictionary);
        if id != self.read_adler {
            return Err(Error::checksum_mismatch("dictionary Adler-32", self.read_adler, id));
        }
        self.output.copy_dictionary(dictionary);
        self.mode = Mode::Blocks;
        Ok(())
    }

    /// True when the end of the stream was reached and all output handed out.
    pub fn is_finished(&self) -> bool {
        self.mode == Mode::Finished && self.output.available() == 0
    }

    /// Compressed bytes consumed.
    pub fn total_in(&self) -> u64 {
        self.total_fed - self.input.remaining_input() as u64
    }

    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Input bytes queued but not consumed.
    pub fn remaining_input(&self) -> usize {
        self.input.remaining_input()
    }

    /// Hand back the unconsumed input, e.g. the bytes following the end of
    /// the stream.
    pub fn take_remaining_input(&mut self) -> Vec<u8> {
        let rest = self.input.take_remaining();
        self.total_fed -= rest.len() as u64;
        rest
    }

    /// Adler-32 of the output so far (1 for raw streams).
    pub fn adler(&self) -> u32 {
        self.adler.as_ref().map_or(1, Checksum::value)
    }

    /// Decompress into `out`. Returns 0 when more input (or a dictionary) is
    /// needed or the stream is finished.
    pub fn inflate(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            if !self.is_finished() {
                self.decode()?;
            }
            return Ok(0);
        }

        let mut copied = 0;
        loop {
            if self.mode != Mode::Checksum {
                let more = self.output.copy_output(&mut out[copied..]);
                if more > 0 {
                    if let Some(adler) = self.adler.as_mut() {
                        adler.update(&out[copied..copied + more]);
                    }
                    copied += more;
                    self.total_out += more as u64;
                    if copied == out.len() {
                        return Ok(copied);
                    }
                }
            }
            let progressed = self.decode()?;
            if !progressed && (self.output.available() == 0 || self.mode == Mode::Checksum) {
                return Ok(copied);
            }
        }
    }

    /// Advance the state machine. Returns false when nothing more can be
    /// done without input or output space.
    fn decode(&mut self) -> Result<bool> {
        match self.mode {
            Mode::Header => self.decode_header(),
            Mode::Dictionary => self.decode_dictionary(),
            Mode::Checksum => self.decode_checksum(),
            Mode::Blocks => {
                if self.is_last_block {
                    if self.no_header {
                        self.mode = Mode::Finished;
                        return Ok(false);
                    }
                    self.input.skip_to_byte_boundary();
                    self.needed_bits = 32;
                    self.mode = Mode::Checksum;
                    return Ok(true);
                }

                let Some(header) = self.input.get_bits(3) else {
                    return Ok(false);
                };
                self.is_last_block |= header & 1 != 0;
                match header >> 1 {
                    STORED_BLOCK => {
                        self.input.skip_to_byte_boundary();
                        self.mode = Mode::StoredLen1;
                    }
                    FIXED_BLOCK => {
                        self.tables = Some(Tables::Fixed);
                        self.mode = Mode::Huffman;
                    }
                    DYNAMIC_BLOCK => {
                        self.dyn_header = Some(DynHeader::new());
                        self.mode = Mode::DynHeader;
                    }
                    other => {
                        return Err(Error::format(format!("unknown block type {other}")));
                    }
                }
                Ok(true)
            }
            Mode::StoredLen1 => {
                let Some(len) = self.input.get_bits(16) else {
                    return Ok(false);
                };
                self.stored_len = len as usize;
                self.mode = Mode::StoredLen2;
                Ok(true)
            }
            Mode::StoredLen2 => {
                let Some(nlen) = self.input.get_bits(16) else {
                    return Ok(false);
                };
                if nlen != (self.stored_len as u32 ^ 0xFFFF) {
                    return Err(Error::format("stored block length does not match its complement"));
                }
                self.mode = Mode::Stored;
                Ok(true)
            }
            Mode::Stored => {
                let copied = self.output.copy_stored(&mut self.input, self.stored_len);
                self.stored_len -= copied;
                if self.stored_len == 0 {
                    self.mode = Mode::Blocks;
                    return Ok(true);
                }
                Ok(copied > 0)
            }
            Mode::DynHeader => {
                let Some(header) = self.dyn_header.as_mut() else {
                    return Err(Error::format("dynamic header state lost"));
                };
                if !header.attempt_read(&mut self.input)? {
                    return Ok(false);
                }
                self.tables = Some(Tables::Dynamic {
                    literal: header.literal_table()?,
                    distance: header.distance_table()?,
                });
                self.dyn_header = None;
                self.mode = Mode::Huffman;
                Ok(true)
            }
            Mode::Huffman | Mode::HuffmanLenBits | Mode::HuffmanDist | Mode::HuffmanDistBits => {
                self.decode_huffman()
            }
            Mode::Finished => Ok(false),
        }
    }

    fn decode_header(&mut self) -> Result<bool> {
        let Some(bits) = self.input.get_bits(16) else {
            return Ok(false);
        };
        // The two header bytes arrive least significant bit first.
        let header = bits.swap_bytes() >> 16;
        if header % 31 != 0 {
            return Err(Error::format("zlib header check bits are wrong"));
        }
        if header & 0x0F00 != 8 << 8 {
            return Err(Error::format(format!(
                "zlib compression method {} is not deflate",
                (header >> 8) & 0x0F
            )));
        }
        if header & 0x0020 == 0 {
            self.mode = Mode::Blocks;
        } else {
            self.mode = Mode::Dictionary;
            self.needed_bits = 32;
        }
        Ok(true)
    }

    fn read_be_u32(&mut self) -> bool {
        while self.needed_bits > 0 {
            let Some(byte) = self.input.get_bits(8) else {
                return false;
            };
            self.read_adler = (self.read_adler << 8) | byte;
            self.needed_bits -= 8;
        }
        true
    }

    fn decode_dictionary(&mut self) -> Result<bool> {
        self.read_be_u32();
        Ok(false)
    }

    fn decode_checksum(&mut self) -> Result<bool> {
        if !self.read_be_u32() {
            return Ok(false);
        }
        let actual = self.adler();
        if actual != self.read_adler {
            return Err(Error::checksum_mismatch("Adler-32", self.read_adler, actual));
        }
        self.mode = Mode::Finished;
        Ok(false)
    }

    fn decode_huffman(&mut self) -> Result<bool> {
        let Some(tables) = self.tables.as_ref() else {
            return Err(Error::format("Huffman tables missing"));
        };
        let mut free = self.output.free_space();

        while free >= MAX_MATCH {
            match self.mode {
                Mode::Huffman => {
                    let symbol = loop {
                        let Some(symbol) = tables.literal().decode(&mut self.input)? else {
                            return Ok(false);
                        };
                        if symbol >= 256 {
                            break symbol as usize;
                        }
                        self.output.write(symbol as u8);
                        free -= 1;
                        if free < MAX_MATCH {
                            return Ok(true);
                        }
                    };
                    if symbol == 256 {
                        self.tables = None;
                        self.mode = Mode::Blocks;
                        return Ok(true);
                    }
                    let index = symbol - 257;
                    if index >= LENGTH_BASE.len() {
                        return Err(Error::format(format!("illegal length symbol {symbol}")));
                    }
                    self.rep_length = LENGTH_BASE[index] as usize;
                    self.needed_bits = LENGTH_EXTRA[index] as u32;
                    self.mode = Mode::HuffmanLenBits;
                }
                Mode::HuffmanLenBits => {
                    if self.needed_bits > 0 {
                        let Some(extra) = self.input.get_bits(self.needed_bits) else {
                            return Ok(false);
                        };
                        self.rep_length += extra as usize;
                    }
                    self.mode = Mode::HuffmanDist;
                }
                Mode::HuffmanDist => {
                    let Some(symbol) = tables.distance().decode(&mut self.input)? else {
                        return Ok(false);
                    };
                    let symbol = symbol as usize;
                    if symbol >= DISTANCE_BASE.len() {
                        return Err(Error::format(format!("illegal distance symbol {symbol}")));
                    }
                    self.rep_distance = DISTANCE_BASE[symbol] as usize;
                    self.needed_bits = DISTANCE_EXTRA[symbol] as u32;
                    self.mode = Mode::HuffmanDistBits;
                }
                Mode::HuffmanDistBits => {
                    if self.needed_bits > 0 {
                        let Some(extra) = self.input.get_bits(self.needed_bits) else {
                            return Ok(false);
                        };
                        self.rep_distance += extra as usize;
                    }
                    self.output.repeat(self.rep_length, self.rep_distance)?;
                    free -= self.rep_length;
                    self.mode = Mode::Huffman;
                }
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate::{zlib_compress, CompressionLevel};
    use crate::error::ErrorKind;

    fn inflate_all(inflater: &mut Inflater, data: &[u8]) -> Result<Vec<u8>> {
        inflater.set_input(data);
        let mut out = Vec::new();
        let mut buf = [0u8; 333];
        loop {
            let n = inflater.inflate(&mut buf)?;
            out.extend_from_slice(&buf[..n]);
            if n == 0 {
                break;
            }
        }
        Ok(out)
    }

    #[test]
    fn test_stored_block() {
        let data = [0x01, 0x05, 0x00, 0xFA, 0xFF, b'h', b'e', b'l', b'l', b'o'];
        let mut inflater = Inflater::new(true);
        assert_eq!(inflate_all(&mut inflater, &data).unwrap(), b"hello");
        assert!(inflater.is_finished());
        assert_eq!(inflater.total_in(), 10);
        assert_eq!(inflater.total_out(), 5);
    }

    #[test]
    fn test_fixed_block_from_zlib() {
        // zlib.compress(b"hello") with the default level.
        let data = [
            0x78, 0x9C, 0xCB, 0x48, 0xCD, 0xC9, 0xC9, 0x07, 0x00, 0x06, 0x2C, 0x02, 0x15,
        ];
        let mut inflater = Inflater::new(false);
        assert_eq!(inflate_all(&mut inflater, &data).unwrap(), b"hello");
        assert!(inflater.is_finished());
        assert_eq!(inflater.adler(), 0x062C0215);
    }

    #[test]
    fn test_byte_at_a_time() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8 ^ (i / 1000) as u8).collect();
        let compressed = zlib_compress(&data, CompressionLevel::DEFAULT).unwrap();

        let mut inflater = Inflater::new(false);
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        for &byte in &compressed {
            inflater.set_input(&[byte]);
            loop {
                let n = inflater.inflate(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
        }
        assert!(inflater.is_finished());
        assert_eq!(out, data);
    }

    #[test]
    fn test_trailing_bytes_are_left_over() {
        let data = [0x01, 0x01, 0x00, 0xFE, 0xFF, b'x', 0xAA, 0xBB];
        let mut inflater = Inflater::new(true);
        assert_eq!(inflate_all(&mut inflater, &data).unwrap(), b"x");
        assert_eq!(inflater.remaining_input(), 2);
        assert_eq!(inflater.take_remaining_input(), vec![0xAA, 0xBB]);
        assert_eq!(inflater.total_in(), 6);
    }

    #[test]
    fn test_corrupt_streams() {
        let cases: [(&[u8], bool); 5] = [
            // Block type 3.
            (&[0x07], true),
            // Stored length complement mismatch.
            (&[0x01, 0x05, 0x00, 0x00, 0x00], true),
            // Bad zlib check bits.
            (&[0x78, 0x9D, 0x03, 0x00], false),
            // Distance before start of output: fixed block, length 3, distance 1.
            (&[0x03, 0x02, 0x00], true),
            // Fixed block with literal/length symbol 286.
            (&[0x1B, 0x03], true),
        ];
        for (data, raw) in cases {
            let mut inflater = Inflater::new(raw);
            let err = inflate_all(&mut inflater, data).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Format, "{data:02x?}");
        }
    }

    #[test]
    fn test_adler_mismatch() {
        let mut compressed = zlib_compress(b"checksum me", CompressionLevel::DEFAULT).unwrap();
        let last = compressed.len() - 1;
        compressed[last] ^= 0xFF;
        let mut inflater = Inflater::new(false);
        let err = inflate_all(&mut inflater, &compressed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }
}
