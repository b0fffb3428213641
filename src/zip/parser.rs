//! Directory location and header parsing over any [`ReadAt`] source.
//!
//! An archive is read back to front: the end record (and the Zip64 end
//! record it may point to) gives the central directory, which lists every
//! entry. Local headers are only read when an entry's data is wanted, and
//! are then checked against the central copy.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::io::ReadAt;

use super::entry::ZipEntry;
use super::names::decode_name;
use super::structures::*;

/// Longest archive comment; bounds the backward search for the end record.
const MAX_COMMENT_SIZE: u64 = u16::MAX as u64;

/// Everything read from the end of an archive.
#[derive(Debug, Clone)]
pub struct CentralDirectory {
    pub entries: Vec<ZipEntry>,
    pub comment: String,
    /// Offset of the (32-bit) end of central directory record.
    pub eocd_offset: u64,
    /// Offset of the central directory, as found (not as recorded).
    pub cd_offset: u64,
    pub cd_size: u64,
    /// Bytes in front of the first entry that the recorded offsets do not
    /// account for (a self-extractor stub).
    pub prefix: u64,
}

/// The fixed part of a Local File Header plus its name and extra field.
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub dos_time: u32,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Parse the fixed 30 bytes; returns the header (with empty name and
    /// extra) and the name and extra lengths.
    pub fn parse_fixed(buf: &[u8]) -> Result<(Self, usize, usize)> {
        if buf.len() < LFH_SIZE || &buf[0..4] != LFH_SIGNATURE {
            return Err(Error::format("invalid local file header signature"));
        }
        let mut cursor = Cursor::new(&buf[4..LFH_SIZE]);
        let header = Self {
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            method: cursor.read_u16::<LittleEndian>()?,
            dos_time: cursor.read_u32::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            name: Vec::new(),
            extra: Vec::new(),
        };
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
        Ok((header, name_len, extra_len))
    }

    /// Length of the whole header.
    pub fn len(&self) -> u64 {
        (LFH_SIZE + self.name.len() + self.extra.len()) as u64
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// The entry this header describes, with Zip64 and timestamp extra data
    /// applied.
    pub fn to_entry(&self) -> Result<ZipEntry> {
        let utf8 = self.flags & flags::UNICODE_NAME != 0;
        let mut entry = ZipEntry::new(decode_name(&self.name, utf8));
        entry.set_flags(self.flags);
        entry.set_method(CompressionMethod::from_u16(self.method));
        entry.set_version_to_extract(self.version_needed);
        entry.set_dos_time(self.dos_time);
        entry.set_crc(self.crc32);
        entry.set_size(self.uncompressed_size as u64);
        entry.set_compressed_size(self.compressed_size as u64);
        entry.set_external_attributes(0);
        entry.set_extra(self.extra.clone())?;
        entry.process_extra_data(true)?;
        Ok(entry)
    }
}

/// Reads archive structures from a shared source. [`ZipArchive`](super::ZipArchive)
/// drives it; it holds no state beyond the source and its length.
///
/// ```ignore
/// let parser = ZipParser::new(source);
/// let directory = parser.read_central_directory()?;
/// let data_offset = parser.test_local_header(&directory.entries[0], true)?;
/// ```
pub struct ZipParser<R: ReadAt + ?Sized> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt + ?Sized> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Locate the end of central directory record. Returns the record,
    /// its offset and the raw archive comment.
    ///
    /// # Errors
    ///
    /// `Format` when no record with a consistent comment length exists in
    /// the last 64 KiB + 22 bytes (not an archive, or truncated).
    pub fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64, Vec<u8>)> {
        const EOCD: usize = EndOfCentralDirectory::SIZE;
        if self.size < EOCD as u64 {
            return Err(Error::format("too short to be an archive"));
        }

        // Most archives have no comment, so the record is the last 22 bytes
        let tail_offset = self.size - EOCD as u64;
        let mut tail = [0u8; EOCD];
        self.reader.read_exact_at(tail_offset, &mut tail)?;
        if tail[..4] == *EndOfCentralDirectory::SIGNATURE && tail[20..22] == [0, 0] {
            return Ok((EndOfCentralDirectory::from_bytes(&tail)?, tail_offset, Vec::new()));
        }

        let window = (MAX_COMMENT_SIZE + EOCD as u64).min(self.size);
        let window_start = self.size - window;
        let mut buf = vec![0u8; window as usize];
        self.reader.read_exact_at(window_start, &mut buf)?;

        // A candidate counts only if its comment runs exactly to the end
        let found = (0..=buf.len() - EOCD).rev().find(|&i| {
            buf[i..i + 4] == *EndOfCentralDirectory::SIGNATURE
                && u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize == buf.len() - i - EOCD
        });
        match found {
            Some(i) => Ok((
                EndOfCentralDirectory::from_bytes(&buf[i..i + EOCD])?,
                window_start + i as u64,
                buf[i + EOCD..].to_vec(),
            )),
            None => Err(Error::format("end of central directory not found")),
        }
    }

    /// Read the Zip64 end record through the locator that precedes the
    /// 32-bit end record at `eocd_offset`. Returns the record and the
    /// offset it was found at.
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<(Zip64EOCD, u64)> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| Error::format("Zip64 end of central directory locator not found"))?;
        let mut locator = [0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut locator)?;
        let locator = Zip64EOCDLocator::from_bytes(&locator)?;

        // The record sits right before the locator; the recorded offset is
        // wrong when the archive has a prefix.
        let expected = locator_offset.checked_sub(Zip64EOCD::MIN_SIZE as u64);
        let mut record = [0u8; Zip64EOCD::MIN_SIZE];
        for offset in [Some(locator.eocd64_offset), expected].into_iter().flatten() {
            if offset + Zip64EOCD::MIN_SIZE as u64 > self.size {
                continue;
            }
            self.reader.read_exact_at(offset, &mut record)?;
            if record[..4] == *Zip64EOCD::SIGNATURE {
                return Ok((Zip64EOCD::from_bytes(&record)?, offset));
            }
        }
        Err(Error::format("Zip64 end of central directory record not found"))
    }

    /// Read the end records and every central directory record.
    pub fn read_central_directory(&self) -> Result<CentralDirectory> {
        let (eocd, eocd_offset, comment) = self.find_eocd()?;

        if eocd.disk_number != eocd.disk_with_cd && !eocd.is_zip64() {
            return Err(Error::capability("multi-disk archives are not supported"));
        }

        let (recorded_offset, cd_size, total_entries, cd_end) = if eocd.is_zip64() {
            let (eocd64, eocd64_offset) = self.read_zip64_eocd(eocd_offset)?;
            (
                eocd64.cd_offset,
                eocd64.cd_size,
                eocd64.total_entries,
                eocd64_offset,
            )
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
                eocd_offset,
            )
        };

        // The directory ends where the end records begin, so its real
        // position tells how much was prepended to the archive.
        let cd_offset = cd_end
            .checked_sub(cd_size)
            .ok_or_else(|| Error::format("central directory size exceeds archive"))?;
        let prefix = cd_offset.checked_sub(recorded_offset).ok_or_else(|| {
            Error::format("central directory offset points past its real position")
        })?;

        // A directory record is at least 46 bytes.
        if total_entries > cd_size / CDFH_MIN_SIZE as u64 {
            return Err(Error::format(format!(
                "{total_entries} entries cannot fit in a {cd_size}-byte central directory"
            )));
        }

        let mut records = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut records)?;
        let mut cursor = Cursor::new(records.as_slice());
        let mut entries = Vec::with_capacity(total_entries as usize);
        for index in 0..total_entries as usize {
            let mut entry = self.parse_central_header(&mut cursor)?;
            entry.offset += prefix;
            entry.index = Some(index);
            entries.push(entry);
        }

        debug!(
            entries = entries.len(),
            cd_offset,
            cd_size,
            prefix,
            "read central directory"
        );

        Ok(CentralDirectory {
            entries,
            comment: decode_comment(&comment),
            eocd_offset,
            cd_offset,
            cd_size,
            prefix,
        })
    }

    /// Parse one central directory record at the cursor.
    ///
    /// # Errors
    ///
    /// `Format` for a bad signature, a truncated record, or a saturated
    /// 32-bit field with no Zip64 value behind it.
    pub fn parse_central_header(&self, cursor: &mut Cursor<&[u8]>) -> Result<ZipEntry> {
        parse_central_header(cursor)
    }

    /// Read the Local File Header at `offset`.
    pub fn read_local_header(&self, offset: u64) -> Result<LocalFileHeader> {
        let mut fixed = [0u8; LFH_SIZE];
        self.reader.read_exact_at(offset, &mut fixed)?;
        let (mut header, name_len, extra_len) = LocalFileHeader::parse_fixed(&fixed)?;
        let mut variable = vec![0u8; name_len + extra_len];
        self.reader
            .read_exact_at(offset + LFH_SIZE as u64, &mut variable)?;
        header.extra = variable.split_off(name_len);
        header.name = variable;
        Ok(header)
    }

    /// Check an entry's local header against its central record and return
    /// the offset of its data.
    ///
    /// The quick form only checks the signature and compression method.
    /// The full form also compares flags, version, name, CRC and sizes
    /// (unless a data descriptor carries them) and Zip64 consistency.
    ///
    /// # Errors
    ///
    /// `Format` for structural disagreement, `Integrity` when the CRC or
    /// sizes of the two copies differ, `Capability` when the local header
    /// asks for a newer version than this engine supports.
    pub fn test_local_header(&self, entry: &ZipEntry, full: bool) -> Result<u64> {
        let header = self.read_local_header(entry.offset()).map_err(|err| match err {
            Error::Format(msg) => Error::Format(format!("{}: {msg}", entry.name())),
            other => other,
        })?;
        let data_offset = entry.offset() + header.len();

        let local = header.to_entry()?;
        if local.method() != entry.method() {
            return Err(Error::format(format!(
                "{}: compression method differs between local and central header",
                entry.name()
            )));
        }

        if full {
            if (header.version_needed & 0xFF) > VERSION_SUPPORTED {
                return Err(Error::capability(format!(
                    "{}: version {} needed to extract",
                    entry.name(),
                    header.version_needed & 0xFF
                )));
            }
            const COMPARED: u16 = flags::ENCRYPTED | flags::DESCRIPTOR | flags::STRONG_ENCRYPTION;
            if header.flags & COMPARED != entry.flags() & COMPARED {
                return Err(Error::format(format!(
                    "{}: flags differ between local and central header",
                    entry.name()
                )));
            }
            if local.name() != entry.name() {
                return Err(Error::format(format!(
                    "{}: local header names {:?}",
                    entry.name(),
                    local.name()
                )));
            }
            if entry.has_descriptor() {
                // The local copies are zero unless the writer knew them
                let agrees = |local: u64, central: u64| local == 0 || local == central;
                if !agrees(local.crc() as u64, entry.crc() as u64) {
                    return Err(Error::checksum_mismatch("header CRC", entry.crc(), local.crc()));
                }
                if !agrees(local.size(), entry.size()) {
                    return Err(Error::size_mismatch(entry.size(), local.size()));
                }
                if !agrees(local.compressed_size(), entry.compressed_size()) {
                    return Err(Error::size_mismatch(
                        entry.compressed_size(),
                        local.compressed_size(),
                    ));
                }
            } else {
                if local.crc() != entry.crc() {
                    return Err(Error::checksum_mismatch("header CRC", entry.crc(), local.crc()));
                }
                if local.size() != entry.size() {
                    return Err(Error::size_mismatch(entry.size(), local.size()));
                }
                if local.compressed_size() != entry.compressed_size() {
                    return Err(Error::size_mismatch(
                        entry.compressed_size(),
                        local.compressed_size(),
                    ));
                }
            }
        }

        let data_end = data_offset.checked_add(entry.compressed_size());
        if data_end.is_none_or(|end| end > self.size) {
            return Err(Error::format(format!(
                "{}: entry data extends past the end of the archive",
                entry.name()
            )));
        }
        Ok(data_offset)
    }

    /// The data descriptor after an entry's data and its length on disk,
    /// `None` for entries without one. Its form (signed or not, 32- or
    /// 64-bit sizes) is taken from the bytes and the local header.
    pub fn read_descriptor(&self, entry: &ZipEntry, data_offset: u64) -> Result<Option<(DataDescriptor, u64)>> {
        if !entry.has_descriptor() {
            return Ok(None);
        }
        let header = self.read_local_header(entry.offset())?;
        let fields = if header.to_entry()?.is_zip64_forced() { 20 } else { 12 };
        let zip64 = fields == 20;

        let at = data_offset + entry.compressed_size();
        let mut buf = [0u8; DataDescriptor::ZIP64_SIZE];
        let available = self.size.saturating_sub(at).min(buf.len() as u64) as usize;
        self.reader.read_exact_at(at, &mut buf[..available])?;
        let start = if available >= 4 && buf[..4] == *DataDescriptor::SIGNATURE { 4 } else { 0 };
        if available < start + fields {
            return Err(Error::format(format!("{}: data descriptor is truncated", entry.name())));
        }
        let descriptor = DataDescriptor::from_fields(&buf[start..start + fields], zip64)?;
        Ok(Some((descriptor, (start + fields) as u64)))
    }

    /// Length of the data descriptor after an entry's data, 0 without one.
    pub fn descriptor_len(&self, entry: &ZipEntry, data_offset: u64) -> Result<u64> {
        Ok(self
            .read_descriptor(entry, data_offset)?
            .map_or(0, |(_, len)| len))
    }

    /// Compare an entry's data descriptor, if it has one, with the central
    /// directory's CRC and sizes.
    pub fn test_descriptor(&self, entry: &ZipEntry, data_offset: u64) -> Result<()> {
        let Some((descriptor, _)) = self.read_descriptor(entry, data_offset)? else {
            return Ok(());
        };
        if descriptor.crc32 != entry.crc() {
            return Err(Error::checksum_mismatch("descriptor CRC", entry.crc(), descriptor.crc32));
        }
        if descriptor.compressed_size != entry.compressed_size() {
            return Err(Error::size_mismatch(entry.compressed_size(), descriptor.compressed_size));
        }
        if descriptor.uncompressed_size != entry.size() {
            return Err(Error::size_mismatch(entry.size(), descriptor.uncompressed_size));
        }
        Ok(())
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    /// Total size of the archive.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Archive comments are written as UTF-8; older archives use code page 437.
pub(crate) fn decode_comment(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => decode_name(bytes, false),
    }
}

/// See [`ZipParser::parse_central_header`].
pub(crate) fn parse_central_header(cursor: &mut Cursor<&[u8]>) -> Result<ZipEntry> {
    let mut sig = [0u8; 4];
    cursor
        .read_exact(&mut sig)
        .map_err(|_| Error::format("central directory is truncated"))?;
    if sig != CDFH_SIGNATURE {
        return Err(Error::format("invalid central directory header signature"));
    }

    let mut fixed = [0u8; CDFH_MIN_SIZE - 4];
    cursor
        .read_exact(&mut fixed)
        .map_err(|_| Error::format("central directory is truncated"))?;
    let mut fields = Cursor::new(&fixed[..]);

    let version_made_by = fields.read_u16::<LittleEndian>()?;
    let version_needed = fields.read_u16::<LittleEndian>()?;
    let flags = fields.read_u16::<LittleEndian>()?;
    let compression_method = fields.read_u16::<LittleEndian>()?;
    let dos_time = fields.read_u32::<LittleEndian>()?;
    let crc32 = fields.read_u32::<LittleEndian>()?;
    let compressed_size = fields.read_u32::<LittleEndian>()? as u64;
    let uncompressed_size = fields.read_u32::<LittleEndian>()? as u64;
    let file_name_length = fields.read_u16::<LittleEndian>()? as usize;
    let extra_field_length = fields.read_u16::<LittleEndian>()? as usize;
    let file_comment_length = fields.read_u16::<LittleEndian>()? as usize;
    let _disk_number_start = fields.read_u16::<LittleEndian>()?;
    let internal_attrs = fields.read_u16::<LittleEndian>()?;
    let external_attrs = fields.read_u32::<LittleEndian>()?;
    let lfh_offset = fields.read_u32::<LittleEndian>()? as u64;

    let mut variable = vec![0u8; file_name_length + extra_field_length + file_comment_length];
    cursor
        .read_exact(&mut variable)
        .map_err(|_| Error::format("central directory is truncated"))?;
    let comment = variable.split_off(file_name_length + extra_field_length);
    let extra = variable.split_off(file_name_length);
    let name = variable;

    let utf8 = flags & super::structures::flags::UNICODE_NAME != 0;
    let mut entry = ZipEntry::new(decode_name(&name, utf8));
    entry.set_version_made_by(version_made_by);
    entry.set_version_to_extract(version_needed);
    entry.set_flags(flags);
    entry.set_method(CompressionMethod::from_u16(compression_method));
    entry.set_dos_time(dos_time);
    entry.set_crc(crc32);
    entry.set_size(uncompressed_size);
    entry.set_compressed_size(compressed_size);
    entry.set_internal_attributes(internal_attrs);
    entry.set_external_attributes(external_attrs);
    entry.set_comment(decode_name(&comment, utf8));
    entry.offset = lfh_offset;
    entry.set_extra(extra)?;

    // Apply the ZIP64 extended information extra field (0x0001) and the
    // timestamp / AES blocks.
    entry.process_extra_data(false)?;

    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::extra::{ExtraData, TAG_ZIP64};
    use crate::zip::headers::{central_header, local_header, prepare_name, write_end_records};

    /// One stored entry "a.txt" = "hello", optionally behind a prefix and
    /// followed by a comment.
    fn tiny_archive(prefix: &[u8], comment: &[u8]) -> Vec<u8> {
        let mut entry = ZipEntry::new("a.txt");
        entry.set_method(CompressionMethod::Stored);
        entry.set_size(5);
        entry.set_compressed_size(5);
        entry.set_crc(0x3610A686);
        let name = prepare_name(&mut entry);
        let mut out = local_header(&entry, &name).unwrap().bytes;
        out.extend_from_slice(b"hello");
        let cd_offset = out.len() as u64;
        let central = central_header(&entry, &name).unwrap();
        out.extend_from_slice(&central);
        write_end_records(&mut out, 1, cd_offset, central.len() as u64, comment).unwrap();
        [prefix, &out].concat()
    }

    #[test]
    fn test_reads_directory() {
        let data = Arc::new(tiny_archive(b"", b""));
        let parser = ZipParser::new(data);
        let directory = parser.read_central_directory().unwrap();
        assert_eq!(directory.entries.len(), 1);
        let entry = &directory.entries[0];
        assert_eq!(entry.name(), "a.txt");
        assert_eq!(entry.size(), 5);
        assert_eq!(entry.crc(), 0x3610A686);
        assert_eq!(parser.test_local_header(entry, true).unwrap(), 35);
    }

    #[test]
    fn test_comment_and_prefix() {
        let data = Arc::new(tiny_archive(b"#!stub\n", b"archive comment"));
        let parser = ZipParser::new(data);
        let directory = parser.read_central_directory().unwrap();
        assert_eq!(directory.comment, "archive comment");
        assert_eq!(directory.prefix, 7);
        let entry = &directory.entries[0];
        assert_eq!(entry.offset(), 7);
        assert_eq!(parser.test_local_header(entry, true).unwrap(), 42);
    }

    #[test]
    fn test_not_a_zip() {
        let parser = ZipParser::new(Arc::new(vec![0u8; 100]));
        let err = parser.read_central_directory().unwrap_err();
        assert!(err.to_string().contains("end of central directory"));

        let parser = ZipParser::new(Arc::new(b"PK".to_vec()));
        assert!(parser.read_central_directory().is_err());
    }

    #[test]
    fn test_truncated_archive_is_fatal() {
        let data = tiny_archive(b"", b"");
        let parser = ZipParser::new(Arc::new(data[..data.len() - 3].to_vec()));
        assert!(parser.read_central_directory().is_err());
    }

    #[test]
    fn test_local_header_mismatch_detected() {
        let mut data = tiny_archive(b"", b"");
        // Flip a byte of the local header CRC.
        data[14] ^= 0x01;
        let parser = ZipParser::new(Arc::new(data));
        let directory = parser.read_central_directory().unwrap();
        let err = parser.test_local_header(&directory.entries[0], true).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Integrity);
        // The quick check does not look at the CRC.
        assert!(parser.test_local_header(&directory.entries[0], false).is_ok());
    }

    #[test]
    fn test_zip64_sizes_round_trip_and_strip() {
        let mut entry = ZipEntry::new("huge.bin");
        entry.set_method(CompressionMethod::Stored);
        entry.set_size(0x1_0000_0000);
        entry.set_compressed_size(0x1_0000_0000);
        entry.set_crc(1);
        let name = prepare_name(&mut entry);
        let header = central_header(&entry, &name).unwrap();

        let parsed = parse_central_header(&mut Cursor::new(header.as_slice())).unwrap();
        assert_eq!(parsed.size(), 0x1_0000_0000);
        assert_eq!(parsed.compressed_size(), 0x1_0000_0000);

        // Strip the Zip64 block: the escaped fields can no longer be read.
        let mut stripped = header[..CDFH_MIN_SIZE].to_vec();
        stripped[30..32].copy_from_slice(&0u16.to_le_bytes());
        stripped.extend_from_slice(&name);
        let extra = ExtraData::parse(&header[CDFH_MIN_SIZE + name.len()..]).unwrap();
        assert!(extra.find(TAG_ZIP64).is_some());
        let err = parse_central_header(&mut Cursor::new(stripped.as_slice())).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Format);
    }

    #[test]
    fn test_size_just_below_threshold_needs_no_zip64() {
        let mut entry = ZipEntry::new("edge.bin");
        entry.set_method(CompressionMethod::Stored);
        entry.set_size(0xFFFF_FFFE);
        entry.set_compressed_size(0xFFFF_FFFE);
        let name = prepare_name(&mut entry);
        let header = central_header(&entry, &name).unwrap();
        let extra = ExtraData::parse(&header[CDFH_MIN_SIZE + name.len()..]).unwrap();
        assert!(extra.find(TAG_ZIP64).is_none());
        let parsed = parse_central_header(&mut Cursor::new(header.as_slice())).unwrap();
        assert_eq!(parsed.size(), 0xFFFF_FFFE);
    }
}
