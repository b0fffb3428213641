//! Forward-only archive writer.
//!
//! [`ZipWriter`] never seeks. Deflated entries are written with the data
//! descriptor flag and zero CRC and sizes in the local header; the real
//! values follow the data in a descriptor. Stored entries have no end
//! marker of their own, so their size and CRC must be set on the entry
//! before it is started.

use std::io::{self, Write};

use tracing::{debug, trace};

use super::archive::UseZip64;
use super::entry::ZipEntry;
use super::headers::{central_header, local_header, prepare_name, write_end_records};
use super::structures::{flags, CompressionMethod, DataDescriptor, ZIP64_THRESHOLD};
use crate::checksum::{Checksum, Crc32};
use crate::deflate::{CompressionLevel, Deflater};
use crate::error::{Error, Result};

const BUFFER_SIZE: usize = 64 * 1024;

struct OpenEntry {
    entry: ZipEntry,
    /// The local header carries Zip64 data, so the descriptor does too.
    zip64: bool,
    data_start: u64,
    crc: Crc32,
    size: u64,
}

/// Writes an archive to any [`Write`] sink, one entry at a time.
pub struct ZipWriter<W: Write> {
    inner: W,
    written: u64,
    entries: Vec<ZipEntry>,
    current: Option<OpenEntry>,
    deflater: Deflater,
    buffer: Vec<u8>,
    comment: String,
    level: CompressionLevel,
    use_zip64: UseZip64,
}

impl<W: Write> ZipWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            written: 0,
            entries: Vec::new(),
            current: None,
            deflater: Deflater::new(CompressionLevel::DEFAULT, true),
            buffer: vec![0; BUFFER_SIZE],
            comment: String::new(),
            level: CompressionLevel::DEFAULT,
            use_zip64: UseZip64::Dynamic,
        }
    }

    /// Level for entries started after this call.
    pub fn set_level(&mut self, level: CompressionLevel) {
        self.level = level;
    }

    pub fn set_use_zip64(&mut self, use_zip64: UseZip64) {
        self.use_zip64 = use_zip64;
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) -> Result<()> {
        let comment = comment.into();
        if comment.len() > u16::MAX as usize {
            return Err(Error::usage("archive comment is longer than 65535 bytes"));
        }
        self.comment = comment;
        Ok(())
    }

    /// Bytes written to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    fn emit(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Close any open entry and write the local header for `entry`. Its
    /// data is then written through the [`Write`] impl.
    ///
    /// # Errors
    ///
    /// `Usage` for a stored entry without a size and CRC, or one too large
    /// for [`UseZip64::Off`]. `Capability` for encrypted entries.
    /// `UnsupportedMethod` for methods other than stored and deflated.
    pub fn start_entry(&mut self, mut entry: ZipEntry) -> Result<()> {
        self.close_entry()?;

        if entry.is_encrypted() {
            return Err(Error::capability("the streaming writer does not encrypt"));
        }
        match entry.method() {
            CompressionMethod::Stored => {
                if !entry.has_size() || !entry.has_crc() {
                    return Err(Error::usage(format!(
                        "{}: stored entries need a size and CRC before writing",
                        entry.name()
                    )));
                }
                entry.set_compressed_size(entry.size());
                entry.set_flag(flags::DESCRIPTOR, false);
            }
            CompressionMethod::Deflate => {
                entry.set_flag(flags::DESCRIPTOR, true);
                self.deflater.reset();
                self.deflater.set_level(self.level);
            }
            other => return Err(Error::UnsupportedMethod(other.as_u16())),
        }
        match self.use_zip64 {
            UseZip64::On => entry.force_zip64(),
            UseZip64::Dynamic if !entry.has_size() => entry.force_zip64(),
            UseZip64::Off if entry.has_size() && entry.size() >= ZIP64_THRESHOLD => {
                return Err(Error::usage(format!(
                    "{} needs Zip64 but Zip64 is turned off",
                    entry.name()
                )));
            }
            _ => {}
        }

        entry.offset = self.written;
        let name = prepare_name(&mut entry);
        let header = local_header(&entry, &name)?;
        self.emit(&header.bytes)?;
        trace!(name = entry.name(), offset = entry.offset(), "started entry");
        self.current = Some(OpenEntry {
            entry,
            zip64: header.zip64,
            data_start: self.written,
            crc: Crc32::new(),
            size: 0,
        });
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        loop {
            let n = self.deflater.deflate(&mut self.buffer)?;
            if n > 0 {
                self.inner.write_all(&self.buffer[..n])?;
                self.written += n as u64;
            }
            if n < self.buffer.len() {
                return Ok(());
            }
        }
    }

    fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| Error::usage("no entry is open; call start_entry first"))?;
        current.crc.update(data);
        current.size += data.len() as u64;
        if current.entry.method() == CompressionMethod::Deflate {
            self.deflater.set_input(data)?;
            self.drain()
        } else {
            self.emit(data)
        }
    }

    /// Finish the open entry, if any.
    ///
    /// # Errors
    ///
    /// `Integrity` when a stored entry's data does not match the size or
    /// CRC it was started with.
    pub fn close_entry(&mut self) -> Result<()> {
        let Some(current) = self.current.take() else {
            return Ok(());
        };
        let OpenEntry {
            mut entry,
            zip64,
            data_start,
            crc,
            size,
        } = current;
        let crc = crc.value();

        if entry.method() == CompressionMethod::Deflate {
            self.deflater.finish();
            while !self.deflater.is_finished() {
                self.drain()?;
            }
            let compressed = self.written - data_start;
            if !zip64 && (size >= ZIP64_THRESHOLD || compressed >= ZIP64_THRESHOLD) {
                return Err(Error::usage(format!(
                    "{} grew past 4 GiB without Zip64 headers",
                    entry.name()
                )));
            }
            entry.set_size(size);
            entry.set_compressed_size(compressed);
            entry.set_crc(crc);
            let descriptor = DataDescriptor {
                crc32: crc,
                compressed_size: compressed,
                uncompressed_size: size,
            };
            let len = descriptor.write_to(&mut self.inner, zip64)?;
            self.written += len as u64;
        } else {
            if size != entry.size() {
                return Err(Error::size_mismatch(entry.size(), size));
            }
            if crc != entry.crc() {
                return Err(Error::checksum_mismatch("CRC", entry.crc(), crc));
            }
        }
        trace!(
            name = entry.name(),
            size = entry.size(),
            compressed = entry.compressed_size(),
            "closed entry"
        );
        self.entries.push(entry);
        Ok(())
    }

    /// Entries closed so far.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Close the open entry, write the central directory and end records,
    /// and return the sink.
    pub fn finish(mut self) -> Result<W> {
        self.close_entry()?;
        let cd_offset = self.written;
        let mut entries = std::mem::take(&mut self.entries);
        for entry in &mut entries {
            let name = prepare_name(entry);
            let header = central_header(entry, &name)?;
            self.emit(&header)?;
        }
        let cd_size = self.written - cd_offset;
        let comment = std::mem::take(&mut self.comment);
        self.written += write_end_records(
            &mut self.inner,
            entries.len() as u64,
            cd_offset,
            cd_size,
            comment.as_bytes(),
        )?;
        self.inner.flush()?;
        debug!(entries = entries.len(), len = self.written, "finished streaming archive");
        Ok(self.inner)
    }
}

impl<W: Write> Write for ZipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.write_data(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
