//! Bit-level packing for DEFLATE streams.
//!
//! DEFLATE packs values starting at the least significant bit of each byte.
//! [`BitSink`] accumulates encoder output; [`BitSource`] hands out bits to the
//! decoder and never blocks: every read reports "not enough input" instead.

/// Pending encoder output.
#[derive(Debug, Default)]
pub struct BitSink {
    buffer: Vec<u8>,
    /// Bytes already handed out by [`BitSink::flush`].
    start: usize,
    bits: u64,
    bit_count: u32,
}

impl BitSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard everything, including partial bits.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.start = 0;
        self.bits = 0;
        self.bit_count = 0;
    }

    /// Append the low `count` bits of `value` (count <= 32).
    #[inline]
    pub fn write_bits(&mut self, value: u32, count: u32) {
        debug_assert!(count <= 32);
        self.bits |= (value as u64) << self.bit_count;
        self.bit_count += count;
        while self.bit_count >= 8 {
            self.buffer.push(self.bits as u8);
            self.bits >>= 8;
            self.bit_count -= 8;
        }
    }

    /// Write a 16-bit value, least significant byte first. Must be aligned.
    pub fn write_short(&mut self, value: u16) {
        debug_assert_eq!(self.bit_count, 0);
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a 16-bit value, most significant byte first. Must be aligned.
    pub fn write_short_msb(&mut self, value: u16) {
        debug_assert_eq!(self.bit_count, 0);
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a 32-bit value, most significant byte first. Must be aligned.
    pub fn write_int_msb(&mut self, value: u32) {
        debug_assert_eq!(self.bit_count, 0);
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Copy raw bytes. Must be aligned.
    pub fn write_block(&mut self, data: &[u8]) {
        debug_assert_eq!(self.bit_count, 0);
        self.buffer.extend_from_slice(data);
    }

    /// Pad the partial byte with zero bits.
    pub fn align_to_byte(&mut self) {
        if self.bit_count > 0 {
            self.buffer.push(self.bits as u8);
        }
        self.bits = 0;
        self.bit_count = 0;
    }

    /// Number of bits waiting for a full byte.
    pub fn bit_count(&self) -> u32 {
        self.bit_count
    }

    /// True when no whole bytes are waiting to be flushed.
    pub fn is_flushed(&self) -> bool {
        self.start == self.buffer.len()
    }

    /// Number of whole bytes waiting to be flushed.
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.start
    }

    /// Move as many whole bytes as fit into `out`.
    pub fn flush(&mut self, out: &mut [u8]) -> usize {
        let count = self.pending().min(out.len());
        out[..count].copy_from_slice(&self.buffer[self.start..self.start + count]);
        self.start += count;
        if self.start == self.buffer.len() {
            self.buffer.clear();
            self.start = 0;
        }
        count
    }

    /// Align and return all pending bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.align_to_byte();
        self.buffer.split_off(self.start)
    }
}

/// Decoder input: a byte queue with a bit accumulator in front of it.
#[derive(Debug, Default)]
pub struct BitSource {
    input: Vec<u8>,
    pos: usize,
    bits: u32,
    bit_count: u32,
}

impl BitSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.input.clear();
        self.pos = 0;
        self.bits = 0;
        self.bit_count = 0;
    }

    /// Queue more input bytes.
    pub fn set_input(&mut self, data: &[u8]) {
        if self.pos == self.input.len() {
            self.input.clear();
            self.pos = 0;
        } else if self.pos > 0 {
            self.input.drain(..self.pos);
            self.pos = 0;
        }
        self.input.extend_from_slice(data);
    }

    /// True when every queued byte has been pulled into the accumulator.
    pub fn is_needing_input(&self) -> bool {
        self.pos == self.input.len()
    }

    /// Whole bytes not yet pulled into the accumulator.
    pub fn available_bytes(&self) -> usize {
        self.input.len() - self.pos
    }

    /// Bits that can be read without more input.
    pub fn available_bits(&self) -> usize {
        self.bit_count as usize + 8 * self.available_bytes()
    }

    /// Unconsumed input, whole bytes only. Bits parked in the accumulator
    /// count once they form a whole byte.
    pub fn remaining_input(&self) -> usize {
        self.available_bytes() + (self.bit_count / 8) as usize
    }

    /// Return the next `n` bits (n <= 16) without consuming them, or `None`
    /// when fewer than `n` bits are available.
    #[inline]
    pub fn peek_bits(&mut self, n: u32) -> Option<u32> {
        debug_assert!(n <= 16);
        while self.bit_count < n {
            let &byte = self.input.get(self.pos)?;
            self.pos += 1;
            self.bits |= (byte as u32) << self.bit_count;
            self.bit_count += 8;
        }
        Some(self.bits & ((1u32 << n) - 1))
    }

    /// Like [`peek_bits`](Self::peek_bits) but returns whatever is available,
    /// up to `n` bits, together with the bit count.
    pub fn peek_available(&mut self, n: u32) -> (u32, u32) {
        match self.peek_bits(n) {
            Some(value) => (value, n),
            None => {
                let count = self.bit_count;
                (self.bits & ((1u32 << count) - 1), count)
            }
        }
    }

    /// Consume `n` bits previously peeked.
    #[inline]
    pub fn drop_bits(&mut self, n: u32) {
        debug_assert!(n <= self.bit_count);
        self.bits >>= n;
        self.bit_count -= n;
    }

    /// Read `n` bits (n <= 16).
    pub fn get_bits(&mut self, n: u32) -> Option<u32> {
        let value = self.peek_bits(n)?;
        self.drop_bits(n);
        Some(value)
    }

    /// Drop bits up to the next byte boundary.
    pub fn skip_to_byte_boundary(&mut self) {
        let extra = self.bit_count % 8;
        self.drop_bits(extra);
    }

    /// Drop the partial byte and hand back every unconsumed whole byte.
    pub fn take_remaining(&mut self) -> Vec<u8> {
        self.skip_to_byte_boundary();
        let mut rest = Vec::with_capacity(self.remaining_input());
        while self.bit_count > 0 {
            rest.push(self.bits as u8);
            self.drop_bits(8);
        }
        rest.extend_from_slice(&self.input[self.pos..]);
        self.reset();
        rest
    }

    /// Copy up to `len` byte-aligned bytes into `out`, returning the count.
    pub fn copy_bytes(&mut self, out: &mut [u8], len: usize) -> usize {
        debug_assert_eq!(self.bit_count % 8, 0);
        let mut len = len.min(out.len());
        let mut written = 0;
        while self.bit_count > 0 && len > 0 {
            out[written] = self.bits as u8;
            self.drop_bits(8);
            written += 1;
            len -= 1;
        }
        let count = len.min(self.available_bytes());
        out[written..written + count].copy_from_slice(&self.input[self.pos..self.pos + count]);
        self.pos += count;
        written + count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_sink_lsb_first() {
        let mut sink = BitSink::new();
        sink.write_bits(0b0100, 4);
        sink.write_bits(0b1011, 4);
        sink.write_bits(0b11001010, 8);
        assert_eq!(sink.finish(), vec![0b10110100, 0b11001010]);
    }

    #[test]
    fn test_bit_sink_partial_flush() {
        let mut sink = BitSink::new();
        sink.write_bits(0xABCD, 16);
        sink.write_bits(1, 3);

        let mut out = [0u8; 1];
        assert_eq!(sink.flush(&mut out), 1);
        assert_eq!(out[0], 0xCD);
        assert!(!sink.is_flushed());
        assert_eq!(sink.flush(&mut out), 1);
        assert_eq!(out[0], 0xAB);
        assert!(sink.is_flushed());
        assert_eq!(sink.bit_count(), 3);

        sink.align_to_byte();
        sink.write_short_msb(0x7801);
        assert_eq!(sink.finish(), vec![0x01, 0x78, 0x01]);
    }

    #[test]
    fn test_bit_source_reads_across_bytes() {
        let mut source = BitSource::new();
        source.set_input(&[0b10110100, 0b11001010]);
        assert_eq!(source.get_bits(4), Some(0b0100));
        assert_eq!(source.get_bits(4), Some(0b1011));
        assert_eq!(source.get_bits(8), Some(0b11001010));
        assert_eq!(source.get_bits(1), None);
        assert!(source.is_needing_input());
    }

    #[test]
    fn test_bit_source_resumes_after_more_input() {
        let mut source = BitSource::new();
        source.set_input(&[0xFF]);
        assert_eq!(source.peek_bits(12), None);
        source.set_input(&[0x0A]);
        assert_eq!(source.get_bits(12), Some(0xAFF));
        assert_eq!(source.available_bits(), 4);
    }

    #[test]
    fn test_copy_bytes_after_alignment() {
        let mut source = BitSource::new();
        source.set_input(&[0x01, 0x11, 0x22, 0x33]);
        assert_eq!(source.get_bits(3), Some(1));
        source.skip_to_byte_boundary();
        // Pull a byte into the accumulator so both paths are exercised.
        assert_eq!(source.peek_bits(8), Some(0x11));
        let mut out = [0u8; 3];
        assert_eq!(source.copy_bytes(&mut out, 3), 3);
        assert_eq!(out, [0x11, 0x22, 0x33]);
        assert_eq!(source.remaining_input(), 0);
    }

    #[test]
    fn test_take_remaining_returns_buffered_bytes() {
        let mut source = BitSource::new();
        source.set_input(&[0x05, 0xAA, 0xBB, 0xCC]);
        assert_eq!(source.get_bits(3), Some(5));
        // Pull the next byte into the accumulator.
        assert_eq!(source.peek_bits(13), Some(0xAA << 5));
        assert_eq!(source.take_remaining(), vec![0xAA, 0xBB, 0xCC]);
        assert!(source.is_needing_input());
    }
}
