//! Forward-only archive reader.
//!
//! [`ZipStreamReader`] walks local headers from the front of a stream and
//! never seeks, so it works on pipes and sockets. It trusts local headers
//! only; the central directory is where it stops.
//!
//! Deflated entries whose sizes come in a trailing data descriptor are
//! delimited by the end of the deflate stream. The inflater reads ahead in
//! blocks, so the bytes it took past the end are pushed back before the
//! descriptor is read.

use std::io::{self, Read};
use std::mem;

use tracing::{debug, trace};

use super::entry::ZipEntry;
use super::parser::LocalFileHeader;
use super::structures::{
    CompressionMethod, DataDescriptor, EndOfCentralDirectory, Zip64EOCD, CDFH_SIGNATURE,
    LFH_SIGNATURE, LFH_SIZE, VERSION_SUPPORTED,
};
use crate::checksum::{Checksum, Crc32};
use crate::deflate::InflateReader;
use crate::error::{Error, Result};

/// A reader with a stack of bytes to hand out before reading more.
struct Pushback<R> {
    inner: R,
    pending: Vec<u8>,
    pos: usize,
}

impl<R: Read> Pushback<R> {
    fn unread(&mut self, mut data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        data.extend_from_slice(&self.pending[self.pos..]);
        self.pending = data;
        self.pos = 0;
    }

    /// Fill `buf` completely. Returns false on a clean end of stream before
    /// the first byte.
    fn fill(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(Error::format("unexpected end of stream inside a header"));
            }
            filled += n;
        }
        Ok(true)
    }

    fn fill_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() || self.fill(buf)? {
            Ok(())
        } else {
            Err(Error::format("unexpected end of stream inside a header"))
        }
    }
}

impl<R: Read> Read for Pushback<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.pending.len() {
            let n = buf.len().min(self.pending.len() - self.pos);
            buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
            self.pos += n;
            if self.pos == self.pending.len() {
                self.pending.clear();
                self.pos = 0;
            }
            return Ok(n);
        }
        self.inner.read(buf)
    }
}

enum Body<R: Read> {
    /// Between entries; the reader owns the source.
    Idle(Pushback<R>),
    Stored(io::Take<Pushback<R>>),
    Deflated(Box<InflateReader<Pushback<R>>>),
    /// A previous error left the source unusable.
    Poisoned,
}

struct Current {
    entry: ZipEntry,
    crc: Crc32,
    produced: u64,
    /// Whether the local header carried Zip64 data (the descriptor then
    /// has 64-bit sizes).
    zip64: bool,
    finished: bool,
}

/// Reads entries in stream order: call [`next_entry`](Self::next_entry),
/// then read the entry's data through the [`Read`] impl.
pub struct ZipStreamReader<R: Read> {
    body: Body<R>,
    current: Option<Current>,
    done: bool,
}

impl<R: Read> ZipStreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            body: Body::Idle(Pushback {
                inner,
                pending: Vec::new(),
                pos: 0,
            }),
            current: None,
            done: false,
        }
    }

    /// Move to the next entry, skipping whatever is left of the current
    /// one. Returns `None` at the central directory or the end of the
    /// stream.
    ///
    /// The returned entry has sizes and CRC from the local header; for
    /// descriptor entries those are only known once the data is read.
    ///
    /// # Errors
    ///
    /// `Format` for damaged headers, `Capability` for encrypted entries and
    /// stored entries with a data descriptor (their end cannot be found
    /// without the central directory), `UnsupportedMethod` for other
    /// methods.
    pub fn next_entry(&mut self) -> Result<Option<ZipEntry>> {
        if self.current.as_ref().is_some_and(|c| !c.finished) {
            io::copy(&mut *self, &mut io::sink())?;
        }
        self.current = None;
        if self.done {
            return Ok(None);
        }
        let source = match &mut self.body {
            Body::Idle(source) => source,
            _ => return Err(Error::usage("stream reader is in an unusable state")),
        };

        let mut signature = [0u8; 4];
        if !source.fill(&mut signature)? {
            debug!("stream ended without a central directory");
            self.done = true;
            return Ok(None);
        }
        if signature == CDFH_SIGNATURE
            || signature == EndOfCentralDirectory::SIGNATURE
            || signature == Zip64EOCD::SIGNATURE
        {
            debug!("reached the central directory");
            self.done = true;
            return Ok(None);
        }
        if signature != LFH_SIGNATURE {
            return Err(Error::format(format!(
                "unexpected signature {signature:02x?} where a local header should be"
            )));
        }

        let mut fixed = [0u8; LFH_SIZE];
        fixed[..4].copy_from_slice(&signature);
        source.fill_exact(&mut fixed[4..])?;
        let (mut header, name_len, extra_len) = LocalFileHeader::parse_fixed(&fixed)?;
        header.name = vec![0u8; name_len];
        source.fill_exact(&mut header.name)?;
        header.extra = vec![0u8; extra_len];
        source.fill_exact(&mut header.extra)?;
        let entry = header.to_entry()?;

        if entry.is_encrypted() {
            return Err(Error::capability(format!(
                "{}: encrypted entries cannot be streamed",
                entry.name()
            )));
        }
        if !entry.method().is_supported() {
            return Err(Error::UnsupportedMethod(entry.method().as_u16()));
        }
        if entry.version_needed() > VERSION_SUPPORTED {
            return Err(Error::capability(format!(
                "{}: version {} needed to extract",
                entry.name(),
                entry.version_needed()
            )));
        }
        if entry.method() == CompressionMethod::Stored && entry.has_descriptor() {
            return Err(Error::capability(format!(
                "{}: stored entry with a data descriptor cannot be streamed",
                entry.name()
            )));
        }

        let Body::Idle(source) = mem::replace(&mut self.body, Body::Poisoned) else {
            return Err(Error::usage("stream reader is in an unusable state"));
        };
        self.body = if entry.method() == CompressionMethod::Deflate {
            Body::Deflated(Box::new(InflateReader::new(source)))
        } else {
            Body::Stored(source.take(entry.compressed_size()))
        };
        trace!(name = entry.name(), method = ?entry.method(), "streaming entry");
        self.current = Some(Current {
            zip64: entry.is_zip64_forced(),
            entry: entry.clone(),
            crc: Crc32::new(),
            produced: 0,
            finished: false,
        });
        Ok(Some(entry))
    }

    /// The entry being read, with sizes and CRC filled in from the data
    /// descriptor once its data has been read to the end.
    pub fn current_entry(&self) -> Option<&ZipEntry> {
        self.current.as_ref().map(|c| &c.entry)
    }

    /// Recover the source after the entry's data and check the result.
    fn complete_entry(&mut self) -> Result<()> {
        let mut source = match mem::replace(&mut self.body, Body::Poisoned) {
            Body::Stored(take) => {
                if take.limit() > 0 {
                    return Err(Error::format("unexpected end of stream inside entry data"));
                }
                take.into_inner()
            }
            Body::Deflated(reader) => {
                let (mut source, _, rest) = reader.into_parts();
                source.unread(rest);
                source
            }
            Body::Idle(source) => source,
            Body::Poisoned => return Err(Error::usage("stream reader is in an unusable state")),
        };
        let Some(current) = self.current.as_mut() else {
            self.body = Body::Idle(source);
            return Ok(());
        };
        current.finished = true;

        if current.entry.has_descriptor() {
            let descriptor = read_descriptor(&mut source, current.zip64)?;
            current.entry.set_crc(descriptor.crc32);
            current.entry.set_size(descriptor.uncompressed_size);
            current.entry.set_compressed_size(descriptor.compressed_size);
        }
        self.body = Body::Idle(source);

        if current.produced != current.entry.size() {
            return Err(Error::size_mismatch(current.entry.size(), current.produced));
        }
        let crc = current.crc.value();
        if crc != current.entry.crc() {
            return Err(Error::checksum_mismatch("CRC", current.entry.crc(), crc));
        }
        Ok(())
    }
}

fn read_descriptor<R: Read>(source: &mut Pushback<R>, zip64: bool) -> Result<DataDescriptor> {
    let fields_len = if zip64 { 20 } else { 12 };
    let mut fields = vec![0u8; fields_len];
    source.fill_exact(&mut fields[..4])?;
    if fields[..4] == *DataDescriptor::SIGNATURE {
        source.fill_exact(&mut fields[..])?;
    } else {
        source.fill_exact(&mut fields[4..])?;
    }
    DataDescriptor::from_fields(&fields, zip64)
}

impl<R: Read> Read for ZipStreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.current.as_ref().is_none_or(|c| c.finished) {
            return Ok(0);
        }
        let n = match &mut self.body {
            Body::Stored(take) => take.read(buf)?,
            Body::Deflated(reader) => reader.read(buf)?,
            Body::Idle(_) | Body::Poisoned => 0,
        };
        if n == 0 {
            self.complete_entry()?;
            return Ok(0);
        }
        if let Some(current) = self.current.as_mut() {
            current.crc.update(&buf[..n]);
            current.produced += n as u64;
        }
        Ok(n)
    }
}
