//! Tagged extra-data blocks.
//!
//! Each block is a 16-bit tag, a 16-bit length and that many bytes. The
//! typed helpers cover the blocks this engine interprets; anything else is
//! carried through untouched.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

pub const TAG_ZIP64: u16 = 0x0001;
pub const TAG_NTFS: u16 = 0x000A;
pub const TAG_EXTENDED_UNIX_TIME: u16 = 0x5455;
pub const TAG_AES: u16 = 0x9901;

/// An ordered list of extra-data blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraData {
    blocks: Vec<(u16, Vec<u8>)>,
}

impl ExtraData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split raw extra-field bytes into blocks.
    ///
    /// # Errors
    ///
    /// Returns a `Format` error if a block's length runs past the end.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut blocks = Vec::new();
        let mut pos = 0;
        // Some writers pad the field with fewer than four stray bytes.
        while pos + 4 <= data.len() {
            let tag = u16::from_le_bytes([data[pos], data[pos + 1]]);
            let len = u16::from_le_bytes([data[pos + 2], data[pos + 3]]) as usize;
            pos += 4;
            if pos + len > data.len() {
                return Err(Error::format(format!(
                    "extra data block 0x{tag:04x} overruns the extra field"
                )));
            }
            blocks.push((tag, data[pos..pos + len].to_vec()));
            pos += len;
        }
        Ok(Self { blocks })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len_bytes());
        for (tag, data) in &self.blocks {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&(data.len() as u16).to_le_bytes());
            out.extend_from_slice(data);
        }
        out
    }

    /// Serialized length in bytes.
    pub fn len_bytes(&self) -> usize {
        self.blocks.iter().map(|(_, d)| 4 + d.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn find(&self, tag: u16) -> Option<&[u8]> {
        self.blocks
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, d)| d.as_slice())
    }

    /// Insert or replace the block with this tag.
    ///
    /// # Errors
    ///
    /// Returns a `Usage` error when the block would not fit a 16-bit length.
    pub fn set(&mut self, tag: u16, data: Vec<u8>) -> Result<()> {
        if data.len() > u16::MAX as usize - 4 {
            return Err(Error::usage("extra data block too large"));
        }
        match self.blocks.iter_mut().find(|(t, _)| *t == tag) {
            Some(block) => block.1 = data,
            None => self.blocks.push((tag, data)),
        }
        Ok(())
    }

    pub fn remove(&mut self, tag: u16) -> bool {
        let before = self.blocks.len();
        self.blocks.retain(|(t, _)| *t != tag);
        self.blocks.len() != before
    }

    /// Offset of the data of block `tag` within the serialized bytes.
    pub fn data_offset(&self, tag: u16) -> Option<usize> {
        let mut pos = 0;
        for (t, data) in &self.blocks {
            if *t == tag {
                return Some(pos + 4);
            }
            pos += 4 + data.len();
        }
        None
    }
}

/// Zip64 extended information (tag 0x0001). Only the fields whose header
/// value overflowed are present, always in this order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64ExtraField {
    pub size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub offset: Option<u64>,
    pub disk_start: Option<u32>,
}

impl Zip64ExtraField {
    /// Read the fields flagged as present.
    ///
    /// # Errors
    ///
    /// Returns a `Format` error when the block is too short for them.
    pub fn parse(data: &[u8], size: bool, compressed_size: bool, offset: bool) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let mut next = |wanted: bool| -> Result<Option<u64>> {
            if !wanted {
                return Ok(None);
            }
            cursor
                .read_u64::<LittleEndian>()
                .map(Some)
                .map_err(|_| Error::format("Zip64 extra data is too short"))
        };
        Ok(Self {
            size: next(size)?,
            compressed_size: next(compressed_size)?,
            offset: next(offset)?,
            disk_start: None,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(28);
        for value in [self.size, self.compressed_size, self.offset].into_iter().flatten() {
            out.extend_from_slice(&value.to_le_bytes());
        }
        if let Some(disk) = self.disk_start {
            out.extend_from_slice(&disk.to_le_bytes());
        }
        out
    }
}

/// Extended timestamp (tag 0x5455): seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtendedUnixTime {
    pub modified: Option<i32>,
    pub accessed: Option<i32>,
    pub created: Option<i32>,
}

impl ExtendedUnixTime {
    const MODIFIED: u8 = 1;
    const ACCESSED: u8 = 2;
    const CREATED: u8 = 4;

    /// Parse the block. The central directory copy carries only the
    /// modification time even when the flags announce more.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&flags, mut rest) = data.split_first()?;
        let mut next = |flag: u8| -> Option<i32> {
            if flags & flag == 0 || rest.len() < 4 {
                return None;
            }
            let value = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            rest = &rest[4..];
            Some(value)
        };
        let modified = next(Self::MODIFIED);
        let accessed = next(Self::ACCESSED);
        let created = next(Self::CREATED);
        Some(Self {
            modified,
            accessed,
            created,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut flags = 0u8;
        let mut out = vec![0u8];
        for (flag, value) in [
            (Self::MODIFIED, self.modified),
            (Self::ACCESSED, self.accessed),
            (Self::CREATED, self.created),
        ] {
            if let Some(value) = value {
                flags |= flag;
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        out[0] = flags;
        out
    }

    pub fn modified_time(&self) -> Option<SystemTime> {
        let secs = self.modified?;
        Some(if secs >= 0 {
            UNIX_EPOCH + Duration::from_secs(secs as u64)
        } else {
            UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs() as u64)
        })
    }

    pub fn from_modified(time: SystemTime) -> Self {
        let secs = match time.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs().min(i32::MAX as u64) as i32,
            Err(e) => -(e.duration().as_secs().min(i32::MAX as u64) as i32),
        };
        Self {
            modified: Some(secs),
            ..Self::default()
        }
    }
}

/// NTFS timestamps (tag 0x000A): 100ns ticks since 1601-01-01.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NtfsTime {
    pub modified: u64,
    pub accessed: u64,
    pub created: u64,
}

/// 100ns ticks between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

impl NtfsTime {
    const ATTRIBUTE_TIMES: u16 = 1;

    pub fn parse(data: &[u8]) -> Option<Self> {
        // 4 reserved bytes, then attributes as (tag, size, value).
        let mut cursor = Cursor::new(data.get(4..)?);
        while let (Ok(tag), Ok(size)) = (
            cursor.read_u16::<LittleEndian>(),
            cursor.read_u16::<LittleEndian>(),
        ) {
            if tag == Self::ATTRIBUTE_TIMES && size == 24 {
                return Some(Self {
                    modified: cursor.read_u64::<LittleEndian>().ok()?,
                    accessed: cursor.read_u64::<LittleEndian>().ok()?,
                    created: cursor.read_u64::<LittleEndian>().ok()?,
                });
            }
            cursor.set_position(cursor.position() + size as u64);
        }
        None
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(&[0; 4]);
        let _ = out.write_u16::<LittleEndian>(Self::ATTRIBUTE_TIMES);
        let _ = out.write_u16::<LittleEndian>(24);
        for value in [self.modified, self.accessed, self.created] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn modified_time(&self) -> Option<SystemTime> {
        if self.modified == 0 {
            return None;
        }
        let ticks = self.modified.checked_sub(FILETIME_UNIX_EPOCH)?;
        Some(UNIX_EPOCH + Duration::from_nanos(ticks.saturating_mul(100)))
    }

    pub fn filetime(time: SystemTime) -> u64 {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => FILETIME_UNIX_EPOCH + (d.as_nanos() / 100) as u64,
            Err(e) => FILETIME_UNIX_EPOCH.saturating_sub((e.duration().as_nanos() / 100) as u64),
        }
    }
}

/// WinZip AES parameters (tag 0x9901).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesExtraField {
    /// 1 = AE-1 (CRC stored), 2 = AE-2 (CRC zero).
    pub vendor_version: u16,
    /// 1, 2, 3 for 128, 192, 256-bit keys.
    pub strength: u8,
    /// The compression method actually used.
    pub method: u16,
}

impl AesExtraField {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 7 || &data[2..4] != b"AE" {
            return Err(Error::format("malformed AES extra data"));
        }
        Ok(Self {
            vendor_version: u16::from_le_bytes([data[0], data[1]]),
            strength: data[4],
            method: u16::from_le_bytes([data[5], data[6]]),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(7);
        out.extend_from_slice(&self.vendor_version.to_le_bytes());
        out.extend_from_slice(b"AE");
        out.push(self.strength);
        out.extend_from_slice(&self.method.to_le_bytes());
        out
    }

    /// Key length in bits.
    pub fn key_bits(&self) -> Option<u32> {
        match self.strength {
            1 => Some(128),
            2 => Some(192),
            3 => Some(256),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_serialize_blocks() {
        let mut extra = ExtraData::new();
        extra.set(0xCAFE, vec![1, 2, 3]).unwrap();
        extra.set(TAG_ZIP64, vec![9; 8]).unwrap();
        let bytes = extra.to_bytes();
        assert_eq!(bytes.len(), extra.len_bytes());
        let parsed = ExtraData::parse(&bytes).unwrap();
        assert_eq!(parsed, extra);
        assert_eq!(parsed.find(0xCAFE), Some(&[1u8, 2, 3][..]));
        assert_eq!(parsed.data_offset(TAG_ZIP64), Some(4 + 3 + 4));
    }

    #[test]
    fn test_set_replaces_and_remove_drops() {
        let mut extra = ExtraData::new();
        extra.set(7, vec![1]).unwrap();
        extra.set(7, vec![2, 2]).unwrap();
        assert_eq!(extra.find(7), Some(&[2u8, 2][..]));
        assert!(extra.remove(7));
        assert!(!extra.remove(7));
        assert!(extra.is_empty());
    }

    #[test]
    fn test_overrunning_block_is_rejected() {
        let bytes = [0x01, 0x00, 0x10, 0x00, 0xAA];
        assert!(ExtraData::parse(&bytes).is_err());
    }

    #[test]
    fn test_zip64_field_order() {
        let field = Zip64ExtraField {
            size: Some(0x1_0000_0000),
            compressed_size: None,
            offset: Some(42),
            disk_start: None,
        };
        let bytes = field.to_bytes();
        assert_eq!(bytes.len(), 16);
        let parsed = Zip64ExtraField::parse(&bytes, true, false, true).unwrap();
        assert_eq!(parsed, field);
        assert!(Zip64ExtraField::parse(&bytes, true, true, true).is_err());
    }

    #[test]
    fn test_unix_time_round_trip() {
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let field = ExtendedUnixTime::from_modified(t);
        let parsed = ExtendedUnixTime::parse(&field.to_bytes()).unwrap();
        assert_eq!(parsed.modified_time(), Some(t));
    }

    #[test]
    fn test_ntfs_time_round_trip() {
        let t = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        let field = NtfsTime {
            modified: NtfsTime::filetime(t),
            accessed: 0,
            created: 0,
        };
        let parsed = NtfsTime::parse(&field.to_bytes()).unwrap();
        assert_eq!(parsed.modified_time(), Some(t));
    }

    #[test]
    fn test_aes_field() {
        let field = AesExtraField {
            vendor_version: 2,
            strength: 3,
            method: 8,
        };
        let parsed = AesExtraField::parse(&field.to_bytes()).unwrap();
        assert_eq!(parsed, field);
        assert_eq!(parsed.key_bits(), Some(256));
    }
}
