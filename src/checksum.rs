//! Running 32-bit checksums.
//!
//! ZIP entries are verified with CRC-32; zlib framing around a DEFLATE
//! stream carries an Adler-32 trailer.

/// A running checksum over arbitrary byte ranges.
pub trait Checksum {
    /// Feed more bytes into the checksum.
    fn update(&mut self, data: &[u8]);

    /// Current checksum value.
    fn value(&self) -> u32;

    /// Restart from the initial value.
    fn reset(&mut self);
}

/// CRC-32 (IEEE 802.3), as used by ZIP.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    /// CRC-32 of a complete buffer.
    pub fn of(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}

impl Checksum for Crc32 {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn reset(&mut self) {
        self.hasher.reset();
    }
}

/// Largest prime smaller than 65536.
const ADLER_BASE: u32 = 65521;

/// Bytes that can be summed before the 32-bit accumulators may overflow.
const ADLER_NMAX: usize = 5552;

/// Adler-32 (RFC 1950).
#[derive(Debug, Clone, Copy)]
pub struct Adler32 {
    a: u32,
    b: u32,
}

impl Adler32 {
    pub fn new() -> Self {
        Self { a: 1, b: 0 }
    }

    /// Adler-32 of a complete buffer.
    pub fn of(data: &[u8]) -> u32 {
        let mut adler = Self::new();
        adler.update(data);
        adler.value()
    }
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Checksum for Adler32 {
    fn update(&mut self, data: &[u8]) {
        for chunk in data.chunks(ADLER_NMAX) {
            for &byte in chunk {
                self.a += byte as u32;
                self.b += self.a;
            }
            self.a %= ADLER_BASE;
            self.b %= ADLER_BASE;
        }
    }

    fn value(&self) -> u32 {
        (self.b << 16) | self.a
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_values() {
        assert_eq!(Crc32::of(b""), 0);
        assert_eq!(Crc32::of(b"hello"), 0x3610A686);
        assert_eq!(Crc32::of(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn test_crc32_incremental() {
        let mut crc = Crc32::new();
        crc.update(b"hel");
        crc.update(b"lo");
        assert_eq!(crc.value(), 0x3610A686);
        crc.reset();
        assert_eq!(crc.value(), 0);
    }

    #[test]
    fn test_adler32_known_values() {
        assert_eq!(Adler32::of(b""), 1);
        assert_eq!(Adler32::of(b"Wikipedia"), 0x11E60398);
    }

    #[test]
    fn test_adler32_long_input() {
        let data = vec![0xFFu8; 100_000];
        let mut split = Adler32::new();
        split.update(&data[..33_333]);
        split.update(&data[33_333..]);
        assert_eq!(split.value(), Adler32::of(&data));
    }
}
