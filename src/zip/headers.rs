//! Serialization of local headers, central headers and end records.
//!
//! Whatever a local header claims must agree with the central header for
//! the same entry; both are built from one [`ZipEntry`] here.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

use super::entry::ZipEntry;
use super::extra::{ExtraData, TAG_ZIP64, Zip64ExtraField};
use super::names::encode_name;
use super::structures::{
    EndOfCentralDirectory, Zip64EOCD, Zip64EOCDLocator, CDFH_MIN_SIZE, CDFH_SIGNATURE,
    LFH_SIGNATURE, LFH_SIZE, ZIP64_MARKER_16, ZIP64_MARKER_32, ZIP64_THRESHOLD,
};
use crate::error::{Error, Result};

/// Offset of the CRC field within a local header.
pub const LFH_CRC_OFFSET: usize = 14;
/// Offset of the compressed size field within a local header.
pub const LFH_SIZES_OFFSET: usize = 18;

/// Where the sizes of a local header live, for patching once known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeFields {
    /// Compressed size then size, 32 bits each, at this header offset.
    Header(usize),
    /// Size then compressed size, 64 bits each, inside the Zip64 block.
    Zip64(usize),
}

impl SizeFields {
    /// Bytes to write at [`SizeFields::offset`].
    pub fn encode(&self, size: u64, compressed_size: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        match self {
            SizeFields::Header(_) => {
                out.extend_from_slice(&(compressed_size as u32).to_le_bytes());
                out.extend_from_slice(&(size as u32).to_le_bytes());
            }
            SizeFields::Zip64(_) => {
                out.extend_from_slice(&size.to_le_bytes());
                out.extend_from_slice(&compressed_size.to_le_bytes());
            }
        }
        out
    }

    pub fn offset(&self) -> usize {
        match self {
            SizeFields::Header(offset) | SizeFields::Zip64(offset) => *offset,
        }
    }
}

/// A serialized local header.
#[derive(Debug, Clone)]
pub struct LocalHeaderBytes {
    pub bytes: Vec<u8>,
    pub sizes: SizeFields,
    /// True when the header carries a Zip64 block (the data descriptor, if
    /// any, then uses 64-bit sizes).
    pub zip64: bool,
}

/// Encode the entry's name, setting the UTF-8 flag if the legacy code page
/// cannot represent it.
pub fn prepare_name(entry: &mut ZipEntry) -> Vec<u8> {
    let (bytes, utf8) = encode_name(entry.name(), entry.is_unicode_name());
    entry.set_unicode_name(utf8);
    bytes
}

/// Method code as stored; AES entries record 99 and keep the real method in
/// their extra data.
fn stored_method(entry: &ZipEntry) -> u16 {
    if entry.aes_key_strength() > 0 {
        99
    } else {
        entry.method().as_u16()
    }
}

fn extra_without_zip64(entry: &ZipEntry) -> Result<ExtraData> {
    let mut extra = ExtraData::parse(entry.extra())?;
    extra.remove(TAG_ZIP64);
    Ok(extra)
}

fn check_lengths(name: &[u8], extra: usize, comment: usize) -> Result<()> {
    if name.len() > u16::MAX as usize {
        return Err(Error::usage("entry name is longer than 65535 bytes"));
    }
    if extra > u16::MAX as usize {
        return Err(Error::usage("extra data is longer than 65535 bytes"));
    }
    if comment > u16::MAX as usize {
        return Err(Error::usage("entry comment is longer than 65535 bytes"));
    }
    Ok(())
}

/// Build the local header for `entry`.
///
/// Descriptor entries get zero CRC and sizes. Entries needing Zip64 get
/// escaped sizes and a Zip64 block holding both, so the real values can be
/// patched in afterwards whatever their magnitude.
pub fn local_header(entry: &ZipEntry, name: &[u8]) -> Result<LocalHeaderBytes> {
    let zip64 = entry.local_header_requires_zip64();
    let descriptor = entry.has_descriptor();
    let (crc, size, compressed) = if descriptor {
        (0, 0, 0)
    } else {
        (entry.crc(), entry.size(), entry.compressed_size())
    };

    let mut extra = extra_without_zip64(entry)?;
    if zip64 {
        let field = Zip64ExtraField {
            size: Some(size),
            compressed_size: Some(compressed),
            offset: None,
            disk_start: None,
        };
        let mut blocks = ExtraData::new();
        blocks.set(TAG_ZIP64, field.to_bytes())?;
        // Zip64 block first, so its position does not depend on the rest.
        let rest = extra.to_bytes();
        extra = ExtraData::parse(&[blocks.to_bytes(), rest].concat())?;
    }
    let extra_bytes = extra.to_bytes();
    check_lengths(name, extra_bytes.len(), 0)?;

    let mut out = Vec::with_capacity(LFH_SIZE + name.len() + extra_bytes.len());
    out.write_all(LFH_SIGNATURE)?;
    out.write_u16::<LittleEndian>(entry.version_needed())?;
    out.write_u16::<LittleEndian>(entry.flags())?;
    out.write_u16::<LittleEndian>(stored_method(entry))?;
    out.write_u32::<LittleEndian>(entry.dos_time())?;
    out.write_u32::<LittleEndian>(crc)?;
    if zip64 {
        out.write_u32::<LittleEndian>(ZIP64_MARKER_32)?;
        out.write_u32::<LittleEndian>(ZIP64_MARKER_32)?;
    } else {
        out.write_u32::<LittleEndian>(compressed as u32)?;
        out.write_u32::<LittleEndian>(size as u32)?;
    }
    out.write_u16::<LittleEndian>(name.len() as u16)?;
    out.write_u16::<LittleEndian>(extra_bytes.len() as u16)?;
    out.write_all(name)?;
    out.write_all(&extra_bytes)?;

    let sizes = if zip64 {
        SizeFields::Zip64(LFH_SIZE + name.len() + 4)
    } else {
        SizeFields::Header(LFH_SIZES_OFFSET)
    };
    Ok(LocalHeaderBytes {
        bytes: out,
        sizes,
        zip64,
    })
}

/// Build the central directory header for `entry`. Only the fields that
/// overflow go into its Zip64 block.
pub fn central_header(entry: &ZipEntry, name: &[u8]) -> Result<Vec<u8>> {
    let forced = entry.is_zip64_forced();
    let size_escaped = forced || entry.size() >= ZIP64_THRESHOLD;
    let compressed_escaped = forced || entry.compressed_size() >= ZIP64_THRESHOLD;
    let offset_escaped = entry.offset() >= ZIP64_THRESHOLD;

    let mut extra = extra_without_zip64(entry)?;
    if size_escaped || compressed_escaped || offset_escaped {
        let field = Zip64ExtraField {
            size: size_escaped.then_some(entry.size()),
            compressed_size: compressed_escaped.then_some(entry.compressed_size()),
            offset: offset_escaped.then_some(entry.offset()),
            disk_start: None,
        };
        extra.set(TAG_ZIP64, field.to_bytes())?;
    }
    let extra_bytes = extra.to_bytes();
    let comment = encode_name(entry.comment(), entry.is_unicode_name()).0;
    check_lengths(name, extra_bytes.len(), comment.len())?;

    let escape = |escaped: bool, value: u64| if escaped { ZIP64_MARKER_32 } else { value as u32 };

    let mut out = Vec::with_capacity(CDFH_MIN_SIZE + name.len() + extra_bytes.len() + comment.len());
    out.write_all(CDFH_SIGNATURE)?;
    out.write_u16::<LittleEndian>(entry.version_made_by())?;
    out.write_u16::<LittleEndian>(entry.version_needed())?;
    out.write_u16::<LittleEndian>(entry.flags())?;
    out.write_u16::<LittleEndian>(stored_method(entry))?;
    out.write_u32::<LittleEndian>(entry.dos_time())?;
    out.write_u32::<LittleEndian>(entry.crc())?;
    out.write_u32::<LittleEndian>(escape(compressed_escaped, entry.compressed_size()))?;
    out.write_u32::<LittleEndian>(escape(size_escaped, entry.size()))?;
    out.write_u16::<LittleEndian>(name.len() as u16)?;
    out.write_u16::<LittleEndian>(extra_bytes.len() as u16)?;
    out.write_u16::<LittleEndian>(comment.len() as u16)?;
    out.write_u16::<LittleEndian>(0)?; // disk number start
    out.write_u16::<LittleEndian>(entry.internal_attributes())?;
    out.write_u32::<LittleEndian>(entry.external_attributes())?;
    out.write_u32::<LittleEndian>(escape(offset_escaped, entry.offset()))?;
    out.write_all(name)?;
    out.write_all(&extra_bytes)?;
    out.write_all(&comment)?;
    Ok(out)
}

/// Write the end records for a directory of `entries` entries of `cd_size`
/// bytes at `cd_offset`, followed by the archive comment. The Zip64 record
/// and locator are written only when a value overflows.
///
/// Returns the number of bytes written.
pub fn write_end_records<W: Write>(
    out: &mut W,
    entries: u64,
    cd_offset: u64,
    cd_size: u64,
    comment: &[u8],
) -> Result<u64> {
    if comment.len() > u16::MAX as usize {
        return Err(Error::usage("archive comment is longer than 65535 bytes"));
    }
    let mut written = 0u64;
    let needs_zip64 = entries >= ZIP64_MARKER_16 as u64
        || cd_offset >= ZIP64_THRESHOLD
        || cd_size >= ZIP64_THRESHOLD;
    if needs_zip64 {
        let eocd64_offset = cd_offset + cd_size;
        Zip64EOCD::new(entries, cd_size, cd_offset).write_to(out)?;
        Zip64EOCDLocator {
            disk_with_eocd64: 0,
            eocd64_offset,
            total_disks: 1,
        }
        .write_to(out)?;
        written += (Zip64EOCD::MIN_SIZE + Zip64EOCDLocator::SIZE) as u64;
    }
    EndOfCentralDirectory::new(entries, cd_size, cd_offset, comment.len() as u16).write_to(out)?;
    out.write_all(comment)?;
    written += (EndOfCentralDirectory::SIZE + comment.len()) as u64;
    Ok(written)
}
