//! Fixed-size ZIP records, signatures and flag values.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

use crate::error::{Error, Result};

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Value stored in a 32-bit size or offset field whose real value lives in
/// the Zip64 extra field.
pub const ZIP64_MARKER_32: u32 = 0xFFFF_FFFF;
/// Same for the 16-bit entry counts in the end record.
pub const ZIP64_MARKER_16: u16 = 0xFFFF;

/// Sizes at or above this need Zip64.
pub const ZIP64_THRESHOLD: u64 = ZIP64_MARKER_32 as u64;

pub const VERSION_STORED: u16 = 10;
pub const VERSION_DEFLATE: u16 = 20;
pub const VERSION_ZIP64: u16 = 45;
pub const VERSION_AES: u16 = 51;
/// Highest version-needed-to-extract this engine accepts.
pub const VERSION_SUPPORTED: u16 = 51;
/// Version made by: MS-DOS host, APPNOTE version 4.5.
pub const VERSION_MADE_BY: u16 = 45;

/// General purpose bit flags.
pub mod flags {
    pub const ENCRYPTED: u16 = 0x0001;
    /// CRC and sizes follow the data in a data descriptor.
    pub const DESCRIPTOR: u16 = 0x0008;
    pub const PATCHED: u16 = 0x0020;
    pub const STRONG_ENCRYPTION: u16 = 0x0040;
    pub const UNICODE_NAME: u16 = 0x0800;
    pub const ENCRYPTED_CENTRAL_DIRECTORY: u16 = 0x2000;
}

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    /// Marker method of AES-encrypted entries; the real method is in the
    /// AES extra field.
    Aes,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            99 => CompressionMethod::Aes,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Aes => 99,
            CompressionMethod::Unknown(v) => *v,
        }
    }

    /// Whether this engine can decompress the method.
    pub fn is_supported(&self) -> bool {
        matches!(self, CompressionMethod::Stored | CompressionMethod::Deflate)
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::format("invalid end of central directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Record for a single-disk archive, with escape values wherever the
    /// real value needs the Zip64 record.
    pub fn new(entries: u64, cd_size: u64, cd_offset: u64, comment_len: u16) -> Self {
        let count = if entries >= ZIP64_MARKER_16 as u64 {
            ZIP64_MARKER_16
        } else {
            entries as u16
        };
        Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: count,
            total_entries: count,
            cd_size: clamp_to_marker(cd_size),
            cd_offset: clamp_to_marker(cd_offset),
            comment_len,
        }
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.disk_number)?;
        out.write_u16::<LittleEndian>(self.disk_with_cd)?;
        out.write_u16::<LittleEndian>(self.disk_entries)?;
        out.write_u16::<LittleEndian>(self.total_entries)?;
        out.write_u32::<LittleEndian>(self.cd_size)?;
        out.write_u32::<LittleEndian>(self.cd_offset)?;
        out.write_u16::<LittleEndian>(self.comment_len)?;
        Ok(())
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == ZIP64_MARKER_16
            || self.total_entries == ZIP64_MARKER_16
            || self.cd_size == ZIP64_MARKER_32
            || self.cd_offset == ZIP64_MARKER_32
    }
}

fn clamp_to_marker(value: u64) -> u32 {
    if value >= ZIP64_THRESHOLD {
        ZIP64_MARKER_32
    } else {
        value as u32
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::format("Zip64 end of central directory locator not found"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        out.write_u64::<LittleEndian>(self.eocd64_offset)?;
        out.write_u32::<LittleEndian>(self.total_disks)?;
        Ok(())
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCD {
    /// Size of the remaining record, excluding the signature and this field.
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::format("invalid Zip64 end of central directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn new(entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        Self {
            eocd64_size: (Self::MIN_SIZE - 12) as u64,
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_ZIP64,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size,
            cd_offset,
        }
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u64::<LittleEndian>(self.eocd64_size)?;
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        out.write_u16::<LittleEndian>(self.version_needed)?;
        out.write_u32::<LittleEndian>(self.disk_number)?;
        out.write_u32::<LittleEndian>(self.disk_with_cd)?;
        out.write_u64::<LittleEndian>(self.disk_entries)?;
        out.write_u64::<LittleEndian>(self.total_entries)?;
        out.write_u64::<LittleEndian>(self.cd_size)?;
        out.write_u64::<LittleEndian>(self.cd_offset)?;
        Ok(())
    }
}

/// Data descriptor written after the data of a streamed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub const SIGNATURE: &'static [u8] = b"PK\x07\x08";
    /// Signature, CRC and 32-bit sizes.
    pub const SIZE: usize = 16;
    /// Signature, CRC and 64-bit sizes.
    pub const ZIP64_SIZE: usize = 24;

    pub fn write_to<W: Write>(&self, out: &mut W, zip64: bool) -> Result<usize> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        if zip64 {
            out.write_u64::<LittleEndian>(self.compressed_size)?;
            out.write_u64::<LittleEndian>(self.uncompressed_size)?;
            Ok(Self::ZIP64_SIZE)
        } else {
            out.write_u32::<LittleEndian>(self.compressed_size as u32)?;
            out.write_u32::<LittleEndian>(self.uncompressed_size as u32)?;
            Ok(Self::SIZE)
        }
    }

    /// Parse a descriptor whose signature (if any) has already been
    /// consumed. `data` starts at the CRC.
    pub fn from_fields(data: &[u8], zip64: bool) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let (compressed_size, uncompressed_size) = if zip64 {
            (
                cursor.read_u64::<LittleEndian>()?,
                cursor.read_u64::<LittleEndian>()?,
            )
        } else {
            (
                cursor.read_u32::<LittleEndian>()? as u64,
                cursor.read_u32::<LittleEndian>()? as u64,
            )
        };
        Ok(Self {
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eocd_round_trip() {
        let eocd = EndOfCentralDirectory::new(3, 150, 1000, 7);
        let mut buf = Vec::new();
        eocd.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), EndOfCentralDirectory::SIZE);
        assert_eq!(EndOfCentralDirectory::from_bytes(&buf).unwrap(), eocd);
        assert!(!eocd.is_zip64());
    }

    #[test]
    fn test_eocd_escapes_large_values() {
        let eocd = EndOfCentralDirectory::new(70_000, 10, ZIP64_THRESHOLD, 0);
        assert_eq!(eocd.total_entries, ZIP64_MARKER_16);
        assert_eq!(eocd.cd_offset, ZIP64_MARKER_32);
        assert_eq!(eocd.cd_size, 10);
        assert!(eocd.is_zip64());
    }

    #[test]
    fn test_zip64_records_have_fixed_sizes() {
        let mut buf = Vec::new();
        Zip64EOCD::new(1, 2, 3).write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), Zip64EOCD::MIN_SIZE);
        let parsed = Zip64EOCD::from_bytes(&buf).unwrap();
        assert_eq!(parsed.eocd64_size, 44);
        assert_eq!(parsed.version_needed, 45);

        let mut buf = Vec::new();
        let locator = Zip64EOCDLocator {
            disk_with_eocd64: 0,
            eocd64_offset: 0x1_0000_0000,
            total_disks: 1,
        };
        locator.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), Zip64EOCDLocator::SIZE);
        assert_eq!(Zip64EOCDLocator::from_bytes(&buf).unwrap(), locator);
    }

    #[test]
    fn test_bad_signatures_are_format_errors() {
        let zeros = [0u8; 64];
        assert!(EndOfCentralDirectory::from_bytes(&zeros).is_err());
        assert!(Zip64EOCDLocator::from_bytes(&zeros).is_err());
        assert!(Zip64EOCD::from_bytes(&zeros).is_err());
    }

    #[test]
    fn test_descriptor_forms() {
        let descriptor = DataDescriptor {
            crc32: 0x3610A686,
            compressed_size: 7,
            uncompressed_size: 5,
        };
        let mut buf = Vec::new();
        assert_eq!(descriptor.write_to(&mut buf, false).unwrap(), 16);
        assert_eq!(DataDescriptor::from_fields(&buf[4..], false).unwrap(), descriptor);

        let mut buf = Vec::new();
        assert_eq!(descriptor.write_to(&mut buf, true).unwrap(), 24);
        assert_eq!(DataDescriptor::from_fields(&buf[4..], true).unwrap(), descriptor);
    }

    #[test]
    fn test_compression_method_codes() {
        assert_eq!(CompressionMethod::from_u16(8), CompressionMethod::Deflate);
        assert_eq!(CompressionMethod::from_u16(12).as_u16(), 12);
        assert!(!CompressionMethod::Aes.is_supported());
    }
}
