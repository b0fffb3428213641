//! DEFLATE (RFC 1951) compression and decompression.
//!
//! ## Architecture
//!
//! - [`bits`]: LSB-first bit packing shared by both directions
//! - [`huffman`]: length-limited canonical Huffman codes and decode tables
//! - [`blocks`] / [`engine`] / [`Deflater`]: LZ77 matching, block selection,
//!   zlib framing
//! - [`Inflater`]: resumable decoder state machine
//! - [`DeflateWriter`] / [`InflateReader`]: `std::io` adapters
//!
//! Both [`Deflater`] and [`Inflater`] are push-style and never block: they
//! report when they need more input instead of reading it themselves.

pub mod bits;
pub mod blocks;
mod deflater;
mod dynheader;
pub mod engine;
pub mod huffman;
mod inflater;
mod stream;
pub mod tables;
mod window;

pub use deflater::{CompressionLevel, Deflater, DeflaterState};
pub use engine::DeflateStrategy;
pub use inflater::Inflater;
pub use stream::{DeflateWriter, InflateReader};

use crate::error::{Error, Result};

/// Compress `data` into a raw DEFLATE stream.
pub fn compress(data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    deflate_all(data, Deflater::new(level, true))
}

/// Compress `data` into a zlib stream (header and Adler-32 trailer).
pub fn zlib_compress(data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    deflate_all(data, Deflater::new(level, false))
}

fn deflate_all(data: &[u8], mut deflater: Deflater) -> Result<Vec<u8>> {
    deflater.set_input(data)?;
    deflater.finish();
    let mut out = Vec::with_capacity(data.len() / 2 + 64);
    let mut buf = vec![0u8; 16 * 1024];
    while !deflater.is_finished() {
        let n = deflater.deflate(&mut buf)?;
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}

/// Decompress a complete raw DEFLATE stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    inflate_all(data, Inflater::new(true))
}

/// Decompress a complete zlib stream, verifying its Adler-32 trailer.
pub fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>> {
    inflate_all(data, Inflater::new(false))
}

fn inflate_all(data: &[u8], mut inflater: Inflater) -> Result<Vec<u8>> {
    inflater.set_input(data);
    let mut out = Vec::with_capacity(data.len() * 3);
    let mut buf = vec![0u8; 32 * 1024];
    loop {
        let n = inflater.inflate(&mut buf)?;
        out.extend_from_slice(&buf[..n]);
        if n == 0 {
            break;
        }
    }
    if !inflater.is_finished() {
        if inflater.needs_dictionary() {
            return Err(Error::capability("deflate stream requires a preset dictionary"));
        }
        return Err(Error::format("unexpected end of deflate stream"));
    }
    Ok(out)
}
