//! `Read` / `Write` adapters around the streaming codec.

use std::io::{self, Read, Write};

use super::deflater::{CompressionLevel, Deflater};
use super::inflater::Inflater;
use crate::crypto::{Decryptor, Encryptor};
use crate::error::{Error, Result};

const BUFFER_SIZE: usize = 32 * 1024;

/// Compresses everything written to it into `inner` as raw DEFLATE.
pub struct DeflateWriter<W: Write> {
    inner: W,
    deflater: Deflater,
    buffer: Vec<u8>,
    encryptor: Option<Box<dyn Encryptor>>,
}

impl<W: Write> DeflateWriter<W> {
    pub fn new(inner: W, level: CompressionLevel) -> Self {
        Self::with_deflater(inner, Deflater::new(level, true))
    }

    pub fn with_deflater(inner: W, deflater: Deflater) -> Self {
        Self {
            inner,
            deflater,
            buffer: vec![0; BUFFER_SIZE],
            encryptor: None,
        }
    }

    /// Encrypt compressed bytes before they reach `inner`.
    pub fn with_encryptor(mut self, encryptor: Box<dyn Encryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Uncompressed bytes accepted so far.
    pub fn total_in(&self) -> u64 {
        self.deflater.total_in()
    }

    /// Compressed bytes produced so far (before any encryption trailer).
    pub fn total_out(&self) -> u64 {
        self.deflater.total_out()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Pull output until the deflater stops filling the buffer.
    fn drain(&mut self) -> Result<()> {
        loop {
            let n = self.deflater.deflate(&mut self.buffer)?;
            if n > 0 {
                let chunk = &mut self.buffer[..n];
                if let Some(encryptor) = self.encryptor.as_mut() {
                    encryptor.encrypt(chunk);
                }
                self.inner.write_all(chunk)?;
            }
            if n < self.buffer.len() {
                return Ok(());
            }
        }
    }

    /// Write the final block and any encryption trailer, returning `inner`.
    pub fn finish(mut self) -> Result<W> {
        self.deflater.finish();
        while !self.deflater.is_finished() {
            self.drain()?;
        }
        if let Some(encryptor) = self.encryptor.as_mut() {
            let trailer = encryptor.finish();
            self.inner.write_all(&trailer)?;
        }
        Ok(self.inner)
    }
}

impl<W: Write> Write for DeflateWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.deflater.set_input(buf)?;
        self.drain()?;
        Ok(buf.len())
    }

    /// Sync flush: everything written so far becomes decodable.
    fn flush(&mut self) -> io::Result<()> {
        self.deflater.flush();
        self.drain()?;
        self.inner.flush()
    }
}

/// Decompresses raw DEFLATE read from `inner`.
pub struct InflateReader<R: Read> {
    inner: R,
    inflater: Inflater,
    buffer: Vec<u8>,
    decryptor: Option<Box<dyn Decryptor>>,
}

impl<R: Read> InflateReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_inflater(inner, Inflater::new(true))
    }

    pub fn with_inflater(inner: R, inflater: Inflater) -> Self {
        Self {
            inner,
            inflater,
            buffer: vec![0; BUFFER_SIZE],
            decryptor: None,
        }
    }

    /// Decrypt bytes from `inner` before inflating them.
    pub fn with_decryptor(mut self, decryptor: Box<dyn Decryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    pub fn total_in(&self) -> u64 {
        self.inflater.total_in()
    }

    pub fn total_out(&self) -> u64 {
        self.inflater.total_out()
    }

    pub fn is_finished(&self) -> bool {
        self.inflater.is_finished()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn decryptor_mut(&mut self) -> Option<&mut (dyn Decryptor + 'static)> {
        self.decryptor.as_deref_mut()
    }

    /// Split into the inner reader, the decryptor and the bytes read past
    /// the end of the compressed stream.
    pub fn into_parts(mut self) -> (R, Option<Box<dyn Decryptor>>, Vec<u8>) {
        let rest = self.inflater.take_remaining_input();
        (self.inner, self.decryptor, rest)
    }

    fn inflate(&mut self, out: &mut [u8]) -> Result<usize> {
        loop {
            let n = self.inflater.inflate(out)?;
            if n > 0 || self.inflater.is_finished() {
                return Ok(n);
            }
            if self.inflater.needs_dictionary() {
                return Err(Error::capability("deflate stream requires a preset dictionary"));
            }
            let read = self.inner.read(&mut self.buffer)?;
            if read == 0 {
                return Err(Error::format("unexpected end of deflate stream"));
            }
            let chunk = &mut self.buffer[..read];
            if let Some(decryptor) = self.decryptor.as_mut() {
                decryptor.decrypt(chunk);
            }
            self.inflater.set_input(chunk);
        }
    }
}

impl<R: Read> Read for InflateReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        Ok(self.inflate(buf)?)
    }
}
