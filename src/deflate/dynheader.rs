//! Dynamic block header decoding.
//!
//! Reads HLIT/HDIST/HCLEN, the code-length code, and the run-length encoded
//! literal/length and distance code lengths. Like the rest of the inflater it
//! suspends whenever input runs out and resumes on the next call.

use super::bits::BitSource;
use super::huffman::DecodeTable;
use super::tables::{BITLEN_NUM, BL_ORDER, DISTANCE_NUM, END_OF_BLOCK, LITERAL_NUM};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Counts,
    CodeLengthLengths,
    Lengths,
    /// A repeat symbol was decoded; its extra bits are still missing.
    RepeatBits(u16),
    Done,
}

#[derive(Debug)]
pub struct DynHeader {
    stage: Stage,
    literal_count: usize,
    distance_count: usize,
    bl_count: usize,
    bl_lengths: [u8; BITLEN_NUM],
    bl_index: usize,
    bl_table: Option<DecodeTable>,
    lengths: Vec<u8>,
}

impl Default for DynHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl DynHeader {
    pub fn new() -> Self {
        Self {
            stage: Stage::Counts,
            literal_count: 0,
            distance_count: 0,
            bl_count: 0,
            bl_lengths: [0; BITLEN_NUM],
            bl_index: 0,
            bl_table: None,
            lengths: Vec::new(),
        }
    }

    /// Consume header bits. Returns `Ok(true)` once the header is complete,
    /// `Ok(false)` when more input is needed.
    pub fn attempt_read(&mut self, input: &mut BitSource) -> Result<bool> {
        loop {
            match self.stage {
                Stage::Counts => {
                    let Some(bits) = input.get_bits(14) else {
                        return Ok(false);
                    };
                    self.literal_count = (bits & 0x1F) as usize + 257;
                    self.distance_count = ((bits >> 5) & 0x1F) as usize + 1;
                    self.bl_count = ((bits >> 10) & 0xF) as usize + 4;
                    if self.literal_count > LITERAL_NUM {
                        return Err(Error::format(format!(
                            "too many literal/length codes: {}",
                            self.literal_count
                        )));
                    }
                    if self.distance_count > DISTANCE_NUM {
                        return Err(Error::format(format!(
                            "too many distance codes: {}",
                            self.distance_count
                        )));
                    }
                    self.lengths = Vec::with_capacity(self.literal_count + self.distance_count);
                    self.stage = Stage::CodeLengthLengths;
                }
                Stage::CodeLengthLengths => {
                    while self.bl_index < self.bl_count {
                        let Some(len) = input.get_bits(3) else {
                            return Ok(false);
                        };
                        self.bl_lengths[BL_ORDER[self.bl_index]] = len as u8;
                        self.bl_index += 1;
                    }
                    self.bl_table = Some(DecodeTable::new(&self.bl_lengths)?);
                    self.stage = Stage::Lengths;
                }
                Stage::Lengths => {
                    let total = self.literal_count + self.distance_count;
                    let Some(table) = self.bl_table.as_ref() else {
                        return Err(Error::format("code-length table missing"));
                    };
                    while self.lengths.len() < total {
                        let Some(symbol) = table.decode(input)? else {
                            return Ok(false);
                        };
                        if symbol < 16 {
                            self.lengths.push(symbol as u8);
                        } else {
                            self.stage = Stage::RepeatBits(symbol);
                            break;
                        }
                    }
                    if self.lengths.len() == total {
                        self.stage = Stage::Done;
                    }
                }
                Stage::RepeatBits(symbol) => {
                    let (extra, base) = match symbol {
                        16 => (2, 3),
                        17 => (3, 3),
                        _ => (7, 11),
                    };
                    let Some(bits) = input.get_bits(extra) else {
                        return Ok(false);
                    };
                    let count = base + bits as usize;
                    let value = if symbol == 16 {
                        match self.lengths.last() {
                            Some(&last) => last,
                            None => {
                                return Err(Error::format("repeat code with no previous length"));
                            }
                        }
                    } else {
                        0
                    };
                    if self.lengths.len() + count > self.literal_count + self.distance_count {
                        return Err(Error::format("code length repeat overflows the header"));
                    }
                    self.lengths.extend(std::iter::repeat_n(value, count));
                    self.stage = Stage::Lengths;
                }
                Stage::Done => {
                    if self.lengths[END_OF_BLOCK] == 0 {
                        return Err(Error::format("missing end-of-block code"));
                    }
                    return Ok(true);
                }
            }
        }
    }

    /// Literal/length decoder. Only valid after [`attempt_read`](Self::attempt_read)
    /// returned true.
    pub fn literal_table(&self) -> Result<DecodeTable> {
        DecodeTable::new(&self.lengths[..self.literal_count])
    }

    pub fn distance_table(&self) -> Result<DecodeTable> {
        DecodeTable::new(&self.lengths[self.literal_count..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate::bits::BitSink;

    fn header_bits(hlit: u32, hdist: u32, hclen: u32) -> BitSink {
        let mut sink = BitSink::new();
        sink.write_bits(hlit, 5);
        sink.write_bits(hdist, 5);
        sink.write_bits(hclen, 4);
        sink
    }

    #[test]
    fn test_rejects_too_many_literal_codes() {
        let sink = header_bits(30, 0, 0);
        let mut input = BitSource::new();
        input.set_input(&sink.finish());
        let err = DynHeader::new().attempt_read(&mut input).unwrap_err();
        assert!(err.to_string().contains("literal/length"));
    }

    #[test]
    fn test_rejects_too_many_distance_codes() {
        let sink = header_bits(0, 30, 0);
        let mut input = BitSource::new();
        input.set_input(&sink.finish());
        assert!(DynHeader::new().attempt_read(&mut input).is_err());
    }

    #[test]
    fn test_rejects_leading_repeat() {
        // Code-length code: symbols 16 and 0 with one bit each. 16 is first
        // in transmission order, 0 is fourth.
        let mut sink = header_bits(0, 0, 0);
        for len in [1, 0, 0, 1] {
            sink.write_bits(len, 3);
        }
        // Symbol 0 gets code 0, symbol 16 gets code 1.
        sink.write_bits(1, 1);
        sink.write_bits(0, 2);
        let mut input = BitSource::new();
        input.set_input(&sink.finish());
        let err = DynHeader::new().attempt_read(&mut input).unwrap_err();
        assert!(err.to_string().contains("no previous length"));
    }

    #[test]
    fn test_resumes_across_inputs() {
        let mut sink = header_bits(0, 0, 1);
        // Code-length code: symbols 0, 8 and 18 with lengths 2, 1, 2.
        // BL_ORDER = 16, 17, 18, 0, 8, ...
        for len in [0, 0, 2, 2, 1] {
            sink.write_bits(len, 3);
        }
        // Canonical codes: 8 -> 0, 0 -> 10, 18 -> 11 (written bit-reversed).
        let zero = (0b01, 2);
        let eight = (0b0, 1);
        let rep18 = (0b11, 2);
        // 257 literal lengths: 8 for symbol 0, zeros up to 255, 8 for 256.
        sink.write_bits(eight.0, eight.1);
        sink.write_bits(rep18.0, rep18.1);
        sink.write_bits(138 - 11, 7);
        sink.write_bits(rep18.0, rep18.1);
        sink.write_bits(117 - 11, 7);
        sink.write_bits(eight.0, eight.1);
        // One distance length.
        sink.write_bits(zero.0, zero.1);
        let bytes = sink.finish();

        let mut header = DynHeader::new();
        let mut input = BitSource::new();
        let mut complete = false;
        for &byte in &bytes {
            input.set_input(&[byte]);
            if header.attempt_read(&mut input).unwrap() {
                complete = true;
                break;
            }
        }
        assert!(complete);
        assert!(header.literal_table().is_ok());
        assert!(header.distance_table().is_ok());
    }
}
