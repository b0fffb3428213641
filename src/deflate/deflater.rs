//! Streaming compressor with optional zlib framing.

use std::fmt;

use super::engine::{DeflateStrategy, DeflaterEngine};
use super::tables::STORED_BLOCK;
use crate::error::{Error, Result};

/// Compression method field of the zlib header.
const Z_DEFLATED: u16 = 8;

/// Window size exponent announced in the zlib header (32 KiB window).
const MAX_WBITS: u16 = 15;

/// FDICT bit of the zlib FLG byte.
const PRESET_DICT: u16 = 0x20;

/// Compression level 0 (stored) to 9 (best).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub const NONE: CompressionLevel = CompressionLevel(0);
    pub const FASTEST: CompressionLevel = CompressionLevel(1);
    pub const DEFAULT: CompressionLevel = CompressionLevel(6);
    pub const BEST: CompressionLevel = CompressionLevel(9);

    pub fn new(level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::usage(format!("compression level {level} is out of range 0-9")));
        }
        Ok(CompressionLevel(level as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        CompressionLevel::DEFAULT
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable stage of a [`Deflater`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeflaterState {
    /// No output produced yet; the dictionary may still be set.
    Init,
    Busy,
    /// A sync flush is in progress.
    Flushing,
    /// Input is closed; the final block and trailer are being written.
    Finishing,
    Finished,
}

/// Streaming DEFLATE compressor.
///
/// Feed input with [`set_input`](Self::set_input) and pull output with
/// [`deflate`](Self::deflate) until [`needs_input`](Self::needs_input).
/// Call [`finish`](Self::finish) at end of input and keep pulling until
/// [`is_finished`](Self::is_finished).
#[derive(Debug)]
pub struct Deflater {
    engine: DeflaterEngine,
    level: CompressionLevel,
    no_header: bool,
    state: DeflaterState,
    /// Set while a flush or finish was requested before the first output.
    requested: Option<DeflaterState>,
    dictionary_set: bool,
    total_out: u64,
}

impl Deflater {
    /// Create a compressor. With `no_header` the output is raw DEFLATE as
    /// stored in ZIP entries; otherwise it is wrapped in zlib framing.
    pub fn new(level: CompressionLevel, no_header: bool) -> Self {
        Self {
            engine: DeflaterEngine::new(level.get(), DeflateStrategy::Default),
            level,
            no_header,
            state: DeflaterState::Init,
            requested: None,
            dictionary_set: false,
            total_out: 0,
        }
    }

    pub fn reset(&mut self) {
        self.engine.reset();
        self.state = DeflaterState::Init;
        self.requested = None;
        self.dictionary_set = false;
        self.total_out = 0;
    }

    pub fn state(&self) -> DeflaterState {
        self.state
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    pub fn set_level(&mut self, level: CompressionLevel) {
        if level != self.level {
            self.level = level;
            self.engine.set_level(level.get());
        }
    }

    pub fn strategy(&self) -> DeflateStrategy {
        self.engine.strategy()
    }

    pub fn set_strategy(&mut self, strategy: DeflateStrategy) {
        self.engine.set_strategy(strategy);
    }

    pub fn total_in(&self) -> u64 {
        self.engine.total_in()
    }

    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    pub fn adler(&self) -> u32 {
        self.engine.adler()
    }

    pub fn needs_input(&self) -> bool {
        self.engine.needs_input()
    }

    /// Queue input. Fails once [`finish`](Self::finish) has been called or
    /// while earlier input is still pending.
    pub fn set_input(&mut self, data: &[u8]) -> Result<()> {
        if self.is_closing() {
            return Err(Error::usage("deflater input is already finished"));
        }
        self.engine.set_input(data)
    }

    /// Preset dictionary. Only allowed before any output is produced.
    pub fn set_dictionary(&mut self, dictionary: &[u8]) -> Result<()> {
        if self.state != DeflaterState::Init {
            return Err(Error::usage("dictionary must be set before compressing"));
        }
        self.engine.set_dictionary(dictionary);
        self.dictionary_set = true;
        Ok(())
    }

    /// Request a sync flush: after the next [`deflate`](Self::deflate) calls
    /// all input so far is decodable from the output.
    pub fn flush(&mut self) {
        match self.state {
            DeflaterState::Init => self.requested = Some(DeflaterState::Flushing),
            DeflaterState::Busy => self.state = DeflaterState::Flushing,
            _ => {}
        }
    }

    /// Close the input.
    pub fn finish(&mut self) {
        match self.state {
            DeflaterState::Init => self.requested = Some(DeflaterState::Finishing),
            DeflaterState::Busy | DeflaterState::Flushing => {
                self.state = DeflaterState::Finishing
            }
            _ => {}
        }
    }

    fn is_closing(&self) -> bool {
        matches!(
            self.state,
            DeflaterState::Finishing | DeflaterState::Finished
        ) || self.requested == Some(DeflaterState::Finishing)
    }

    /// True once the trailer is written and all output was pulled.
    pub fn is_finished(&self) -> bool {
        self.state == DeflaterState::Finished && self.engine.pending().is_flushed()
    }

    /// Compress into `out`, returning the number of bytes written.
    pub fn deflate(&mut self, out: &mut [u8]) -> Result<usize> {
        if self.state == DeflaterState::Init {
            if !self.no_header {
                self.write_zlib_header();
            }
            self.state = self.requested.take().unwrap_or(DeflaterState::Busy);
        }

        let mut written = 0;
        loop {
            let count = self.engine.pending_mut().flush(&mut out[written..]);
            written += count;
            self.total_out += count as u64;
            if written == out.len() || self.state == DeflaterState::Finished {
                break;
            }

            let flushing = matches!(
                self.state,
                DeflaterState::Flushing | DeflaterState::Finishing
            );
            let finishing = self.state == DeflaterState::Finishing;
            if !self.engine.deflate(flushing, finishing) {
                match self.state {
                    DeflaterState::Busy => return Ok(written),
                    DeflaterState::Flushing => {
                        // Empty stored block: byte-aligns everything so far.
                        let pending = self.engine.pending_mut();
                        pending.write_bits(STORED_BLOCK << 1, 3);
                        pending.align_to_byte();
                        pending.write_short(0);
                        pending.write_short(0xFFFF);
                        self.state = DeflaterState::Busy;
                    }
                    DeflaterState::Finishing => {
                        let adler = self.engine.adler();
                        let pending = self.engine.pending_mut();
                        pending.align_to_byte();
                        if !self.no_header {
                            pending.write_int_msb(adler);
                        }
                        self.state = DeflaterState::Finished;
                    }
                    DeflaterState::Init | DeflaterState::Finished => {}
                }
            }
        }
        Ok(written)
    }

    fn write_zlib_header(&mut self) {
        let mut header = (Z_DEFLATED + ((MAX_WBITS - 8) << 4)) << 8;
        let level_flags = match self.level.get() {
            0 | 1 => 0,
            2..=5 => 1,
            6 => 2,
            _ => 3,
        };
        header |= level_flags << 6;
        if self.dictionary_set {
            header |= PRESET_DICT;
        }
        header += 31 - (header % 31);

        let dictionary_id = self.engine.adler();
        let pending = self.engine.pending_mut();
        pending.write_short_msb(header);
        if self.dictionary_set {
            pending.write_int_msb(dictionary_id);
            self.engine.reset_adler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Adler32;
    use crate::deflate::Inflater;

    fn compress_all(deflater: &mut Deflater, data: &[u8]) -> Vec<u8> {
        deflater.set_input(data).unwrap();
        deflater.finish();
        let mut out = Vec::new();
        let mut buf = [0u8; 1000];
        while !deflater.is_finished() {
            let n = deflater.deflate(&mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_zlib_framing() {
        let data = b"hello hello hello hello";
        let mut deflater = Deflater::new(CompressionLevel::DEFAULT, false);
        let out = compress_all(&mut deflater, data);

        assert_eq!(&out[..2], &[0x78, 0x9C]);
        let trailer = u32::from_be_bytes(out[out.len() - 4..].try_into().unwrap());
        assert_eq!(trailer, Adler32::of(data));
        assert_eq!(deflater.total_in(), data.len() as u64);
        assert_eq!(deflater.total_out(), out.len() as u64);
    }

    #[test]
    fn test_header_level_flags() {
        for (level, flg) in [(0, 0x01), (1, 0x01), (5, 0x5E), (9, 0xDA)] {
            let mut deflater = Deflater::new(CompressionLevel::new(level).unwrap(), false);
            let out = compress_all(&mut deflater, b"");
            assert_eq!(out[0], 0x78);
            assert_eq!(out[1], flg, "level {level}");
        }
    }

    #[test]
    fn test_sync_flush_makes_input_decodable() {
        let mut deflater = Deflater::new(CompressionLevel::DEFAULT, true);
        deflater.set_input(b"first part, ").unwrap();
        deflater.flush();
        let mut buf = [0u8; 256];
        let mut out = Vec::new();
        loop {
            let n = deflater.deflate(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(&out[out.len() - 4..], &[0x00, 0x00, 0xFF, 0xFF]);

        let mut inflater = Inflater::new(true);
        inflater.set_input(&out);
        let mut decoded = [0u8; 64];
        let n = inflater.inflate(&mut decoded).unwrap();
        assert_eq!(&decoded[..n], b"first part, ");
        assert!(!inflater.is_finished());
    }

    #[test]
    fn test_dictionary_sets_fdict() {
        let dictionary = b"common prefix words";
        let mut deflater = Deflater::new(CompressionLevel::DEFAULT, false);
        deflater.set_dictionary(dictionary).unwrap();
        let out = compress_all(&mut deflater, b"common prefix words again");
        assert_eq!(out[1] & 0x20, 0x20);
        assert_eq!(u16::from_be_bytes([out[0], out[1]]) % 31, 0);
        let id = u32::from_be_bytes(out[2..6].try_into().unwrap());
        assert_eq!(id, Adler32::of(dictionary));

        let mut inflater = Inflater::new(false);
        inflater.set_input(&out);
        let mut decoded = [0u8; 64];
        assert_eq!(inflater.inflate(&mut decoded).unwrap(), 0);
        assert!(inflater.needs_dictionary());
        inflater.set_dictionary(dictionary).unwrap();
        let n = inflater.inflate(&mut decoded).unwrap();
        assert_eq!(&decoded[..n], b"common prefix words again");
        assert!(inflater.is_finished());
    }

    #[test]
    fn test_input_after_finish_is_rejected() {
        let mut deflater = Deflater::new(CompressionLevel::DEFAULT, true);
        deflater.finish();
        assert!(deflater.set_input(b"late").is_err());
        assert!(CompressionLevel::new(10).is_err());
    }
}
