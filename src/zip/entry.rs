//! The archive entry model.

use std::time::SystemTime;

use super::dostime::DosDateTime;
use super::extra::{
    AesExtraField, ExtendedUnixTime, ExtraData, NtfsTime, TAG_AES, TAG_EXTENDED_UNIX_TIME,
    TAG_NTFS, TAG_ZIP64, Zip64ExtraField,
};
use super::structures::{
    flags, CompressionMethod, VERSION_AES, VERSION_DEFLATE, VERSION_MADE_BY, VERSION_STORED,
    VERSION_SUPPORTED, VERSION_ZIP64, ZIP64_MARKER_32, ZIP64_THRESHOLD,
};
use crate::error::{Error, Result};

/// MS-DOS directory attribute bit.
const DOS_DIRECTORY: u32 = 0x10;

/// One member of an archive.
///
/// Archives hand out clones; changing a returned entry never changes the
/// archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ZipEntry {
    name: String,
    size: u64,
    compressed_size: u64,
    crc: u32,
    size_known: bool,
    compressed_size_known: bool,
    crc_known: bool,
    method: CompressionMethod,
    flags: u16,
    dos_time: u32,
    version_made_by: u16,
    /// As read from a header; 0 means derive it.
    version_to_extract: u16,
    external_attributes: u32,
    internal_attributes: u16,
    pub(crate) offset: u64,
    comment: String,
    extra: Vec<u8>,
    force_zip64: bool,
    modified_extra: Option<SystemTime>,
    aes_strength: u8,
    /// Position in the archive's entry list when read from an archive.
    pub(crate) index: Option<usize>,
}

impl ZipEntry {
    /// A new entry stamped with the current time. `name` is stored as given.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut entry = Self {
            name,
            size: 0,
            compressed_size: 0,
            crc: 0,
            size_known: false,
            compressed_size_known: false,
            crc_known: false,
            method: CompressionMethod::Deflate,
            flags: 0,
            dos_time: 0,
            version_made_by: VERSION_MADE_BY,
            version_to_extract: 0,
            external_attributes: 0,
            internal_attributes: 0,
            offset: 0,
            comment: String::new(),
            extra: Vec::new(),
            force_zip64: false,
            modified_extra: None,
            aes_strength: 0,
            index: None,
        };
        entry.set_modified(SystemTime::now());
        if entry.name.ends_with('/') {
            entry.external_attributes |= DOS_DIRECTORY;
            entry.method = CompressionMethod::Stored;
            entry.set_size(0);
            entry.set_compressed_size(0);
            entry.set_crc(0);
        }
        entry
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// Uncompressed size.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.size_known = true;
    }

    /// Stored size, including any encryption header and trailer.
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn set_compressed_size(&mut self, size: u64) {
        self.compressed_size = size;
        self.compressed_size_known = true;
    }

    pub fn crc(&self) -> u32 {
        self.crc
    }

    pub fn set_crc(&mut self, crc: u32) {
        self.crc = crc;
        self.crc_known = true;
    }

    pub fn has_size(&self) -> bool {
        self.size_known
    }

    pub fn has_compressed_size(&self) -> bool {
        self.compressed_size_known
    }

    pub fn has_crc(&self) -> bool {
        self.crc_known
    }

    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    pub fn set_method(&mut self, method: CompressionMethod) {
        self.method = method;
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub(crate) fn set_flags(&mut self, flags: u16) {
        self.flags = flags;
    }

    pub(crate) fn set_flag(&mut self, flag: u16, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    pub fn dos_time(&self) -> u32 {
        self.dos_time
    }

    pub fn set_dos_time(&mut self, value: u32) {
        self.dos_time = value;
    }

    pub fn date_time(&self) -> DosDateTime {
        DosDateTime::from_packed(self.dos_time)
    }

    /// Set the DOS time from an instant. Extra-data timestamps are not
    /// changed.
    pub fn set_modified(&mut self, time: SystemTime) {
        self.dos_time = DosDateTime::from_system_time(time).to_packed();
    }

    /// Last modification time, preferring the NTFS or Unix extra data over
    /// the two-second DOS field.
    pub fn modified(&self) -> SystemTime {
        self.modified_extra
            .unwrap_or_else(|| self.date_time().to_system_time())
    }

    pub fn version_made_by(&self) -> u16 {
        self.version_made_by
    }

    pub(crate) fn set_version_made_by(&mut self, version: u16) {
        self.version_made_by = version;
    }

    pub(crate) fn set_version_to_extract(&mut self, version: u16) {
        self.version_to_extract = version;
    }

    /// Host system from the version-made-by field (0 = MS-DOS, 3 = Unix).
    pub fn host_system(&self) -> u8 {
        (self.version_made_by >> 8) as u8
    }

    pub fn external_attributes(&self) -> u32 {
        self.external_attributes
    }

    pub fn set_external_attributes(&mut self, attributes: u32) {
        self.external_attributes = attributes;
    }

    pub fn internal_attributes(&self) -> u16 {
        self.internal_attributes
    }

    pub(crate) fn set_internal_attributes(&mut self, attributes: u16) {
        self.internal_attributes = attributes;
    }

    /// Offset of the local header.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    pub fn extra(&self) -> &[u8] {
        &self.extra
    }

    /// Replace the raw extra field.
    ///
    /// # Errors
    ///
    /// Returns a `Format` error if the blocks do not parse.
    pub fn set_extra(&mut self, extra: Vec<u8>) -> Result<()> {
        ExtraData::parse(&extra)?;
        self.extra = extra;
        Ok(())
    }

    pub fn is_unicode_name(&self) -> bool {
        self.flags & flags::UNICODE_NAME != 0
    }

    pub fn set_unicode_name(&mut self, on: bool) {
        self.set_flag(flags::UNICODE_NAME, on);
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/') || self.external_attributes & DOS_DIRECTORY != 0
    }

    pub fn is_file(&self) -> bool {
        !self.is_directory()
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }

    pub(crate) fn set_encrypted(&mut self, on: bool) {
        self.set_flag(flags::ENCRYPTED, on);
    }

    /// CRC and sizes follow the data in a data descriptor.
    pub fn has_descriptor(&self) -> bool {
        self.flags & flags::DESCRIPTOR != 0
    }

    /// AES key strength code (1 to 3), 0 when not AES-encrypted.
    pub fn aes_key_strength(&self) -> u8 {
        self.aes_strength
    }

    pub fn force_zip64(&mut self) {
        self.force_zip64 = true;
    }

    pub fn is_zip64_forced(&self) -> bool {
        self.force_zip64
    }

    /// Version needed to extract, as read or as this entry requires.
    pub fn version_needed(&self) -> u16 {
        if self.version_to_extract != 0 {
            return self.version_to_extract & 0xFF;
        }
        if self.aes_strength > 0 {
            VERSION_AES
        } else if self.central_header_requires_zip64() {
            VERSION_ZIP64
        } else if self.method == CompressionMethod::Deflate
            || self.is_directory()
            || self.is_encrypted()
        {
            VERSION_DEFLATE
        } else {
            VERSION_STORED
        }
    }

    /// Whether this engine can extract the entry's data.
    pub fn can_decompress(&self) -> bool {
        self.version_needed() <= VERSION_SUPPORTED && self.method.is_supported()
    }

    pub fn local_header_requires_zip64(&self) -> bool {
        self.force_zip64 || self.size >= ZIP64_THRESHOLD || self.compressed_size >= ZIP64_THRESHOLD
    }

    pub fn central_header_requires_zip64(&self) -> bool {
        self.local_header_requires_zip64() || self.offset >= ZIP64_THRESHOLD
    }

    /// Apply the extra data after reading a header into this entry.
    ///
    /// Fields holding the 0xFFFFFFFF escape take their value from the Zip64
    /// block; a local header's Zip64 block always carries both sizes.
    /// Extended timestamps and AES parameters are picked up too.
    ///
    /// # Errors
    ///
    /// Returns a `Format` error when an escaped field has no Zip64 data,
    /// and a `Capability` error for an unknown AES key strength.
    pub(crate) fn process_extra_data(&mut self, local: bool) -> Result<()> {
        let extra = ExtraData::parse(&self.extra)?;
        let size_escaped = self.size == ZIP64_MARKER_32 as u64;
        let compressed_escaped = self.compressed_size == ZIP64_MARKER_32 as u64;
        let offset_escaped = !local && self.offset == ZIP64_MARKER_32 as u64;

        match extra.find(TAG_ZIP64) {
            Some(data) => {
                let (want_size, want_compressed) = if local {
                    (true, true)
                } else {
                    (size_escaped, compressed_escaped)
                };
                let zip64 = Zip64ExtraField::parse(data, want_size, want_compressed, offset_escaped)
                    .or_else(|err| {
                        // A local header may legitimately carry only the
                        // escaped fields.
                        if local {
                            Zip64ExtraField::parse(data, size_escaped, compressed_escaped, false)
                        } else {
                            Err(err)
                        }
                    })?;
                if let Some(size) = zip64.size {
                    if size_escaped || local {
                        self.size = size;
                    }
                }
                if let Some(size) = zip64.compressed_size {
                    if compressed_escaped || local {
                        self.compressed_size = size;
                    }
                }
                if let Some(offset) = zip64.offset {
                    self.offset = offset;
                }
                self.force_zip64 = self.force_zip64 || local;
            }
            None if size_escaped || compressed_escaped || offset_escaped => {
                return Err(Error::format(format!(
                    "entry {} needs Zip64 extra data but has none",
                    self.name
                )));
            }
            None => {}
        }

        if let Some(ntfs) = extra.find(TAG_NTFS).and_then(NtfsTime::parse) {
            self.modified_extra = ntfs.modified_time();
        } else if let Some(unix) = extra
            .find(TAG_EXTENDED_UNIX_TIME)
            .and_then(ExtendedUnixTime::parse)
        {
            self.modified_extra = unix.modified_time();
        }

        if self.method == CompressionMethod::Aes {
            let data = extra
                .find(TAG_AES)
                .ok_or_else(|| Error::format("AES entry without AES extra data"))?;
            let aes = AesExtraField::parse(data)?;
            if aes.key_bits().is_none() {
                return Err(Error::capability(format!(
                    "unknown AES key strength {}",
                    aes.strength
                )));
            }
            self.aes_strength = aes.strength;
            self.method = CompressionMethod::from_u16(aes.method);
        }
        Ok(())
    }

    /// Replace the Unix timestamp extra block with `time`.
    pub fn set_extended_time(&mut self, time: SystemTime) -> Result<()> {
        let mut extra = ExtraData::parse(&self.extra)?;
        extra.set(TAG_EXTENDED_UNIX_TIME, ExtendedUnixTime::from_modified(time).to_bytes())?;
        self.extra = extra.to_bytes();
        self.modified_extra = Some(time);
        Ok(())
    }
}
