//! Transactional updates.
//!
//! ## Architecture
//!
//! [`ZipArchive::begin_update`] snapshots the directory as a list of copy
//! records. [`add`](ZipArchive::add) and [`delete`](ZipArchive::delete)
//! edit that list, keyed by entry name, and nothing touches the stream
//! until [`commit`](ZipArchive::commit). A commit writes, in order:
//!
//! 1. copied entries, sorted by their offset in the old archive,
//! 2. added entries, in the order they were staged,
//! 3. the central directory and end records,
//!
//! and then patches CRCs and sizes that were unknown when a local header
//! was written. In [`UpdateMode::Direct`] this happens in the live stream,
//! moving copied entries down over deleted ones (entries already in place
//! are not touched) and truncating the tail. In [`UpdateMode::Safe`] the
//! new archive is built in a temporary output and swapped in at the end,
//! so a failed commit leaves the original untouched.
//!
//! A commit that only changes the archive comment rewrites the end record
//! in place.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, trace};

use super::archive::{ArchiveSettings, UseZip64, ZipArchive};
use super::entry::ZipEntry;
use super::headers::{
    central_header, local_header, prepare_name, write_end_records, LFH_CRC_OFFSET,
};
use super::names::{transform_directory_name, transform_name};
use super::structures::{
    flags, CompressionMethod, DataDescriptor, EndOfCentralDirectory, ZIP64_THRESHOLD,
};
use crate::checksum::{Checksum, Crc32};
use crate::crypto::EncryptionScheme;
use crate::deflate::{CompressionLevel, DeflateWriter, Deflater};
use crate::error::{Error, Result};
use crate::io::{ArchiveFile, ArchiveStorage, ReadAt, UpdateMode};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Where an added entry's data comes from.
pub enum EntrySource {
    Bytes(Vec<u8>),
    /// A file, read at commit time.
    File(PathBuf),
    /// A stream, read at commit time. A known size lets the local header
    /// be written without Zip64 fields.
    Reader {
        reader: Box<dyn Read + Send>,
        size: Option<u64>,
    },
    Directory,
}

impl fmt::Debug for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntrySource::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
            EntrySource::File(path) => f.debug_tuple("File").field(path).finish(),
            EntrySource::Reader { size, .. } => {
                f.debug_struct("Reader").field("size", size).finish()
            }
            EntrySource::Directory => f.write_str("Directory"),
        }
    }
}

/// An entry to add, with the options that override the archive settings.
#[derive(Debug)]
pub struct AddOptions {
    name: String,
    source: EntrySource,
    method: Option<CompressionMethod>,
    level: Option<CompressionLevel>,
    unicode: Option<bool>,
    modified: Option<SystemTime>,
    comment: Option<String>,
}

impl AddOptions {
    /// `name` is normalized with [`transform_name`] when staged.
    pub fn new(name: impl Into<String>, source: EntrySource) -> Self {
        Self {
            name: name.into(),
            source,
            method: None,
            level: None,
            unicode: None,
            modified: None,
            comment: None,
        }
    }

    pub fn bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::new(name, EntrySource::Bytes(data.into()))
    }

    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(name, EntrySource::File(path.into()))
    }

    pub fn reader(name: impl Into<String>, reader: impl Read + Send + 'static, size: Option<u64>) -> Self {
        Self::new(
            name,
            EntrySource::Reader {
                reader: Box::new(reader),
                size,
            },
        )
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, EntrySource::Directory)
    }

    /// Defaults to deflate.
    pub fn method(mut self, method: CompressionMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn level(mut self, level: CompressionLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn unicode(mut self, unicode: bool) -> Self {
        self.unicode = Some(unicode);
        self
    }

    pub fn modified(mut self, time: SystemTime) -> Self {
        self.modified = Some(time);
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateCommand {
    /// Keep an entry of the current archive.
    Copy,
    Add,
}

#[derive(Debug)]
struct UpdateRecord {
    command: UpdateCommand,
    entry: ZipEntry,
    source: Option<EntrySource>,
    level: CompressionLevel,
    encrypt: bool,
    /// Data offset and descriptor length of a copied entry.
    copy_span: Option<(u64, u64)>,
}

/// Staged changes between `begin_update` and `commit`.
#[derive(Debug)]
pub(crate) struct PendingUpdate {
    records: Vec<Option<UpdateRecord>>,
    index: HashMap<String, usize>,
    storage: ArchiveStorage,
    comment: Option<String>,
    contents_edited: bool,
}

impl PendingUpdate {
    fn stage(&mut self, record: UpdateRecord) {
        let name = record.entry.name().to_string();
        match self.index.get(&name) {
            Some(&i) => self.records[i] = Some(record),
            None => {
                self.index.insert(name, self.records.len());
                self.records.push(Some(record));
            }
        }
        self.contents_edited = true;
    }
}

/// A local-header field rewritten after the entry's data.
#[derive(Debug)]
struct Patch {
    offset: u64,
    bytes: Vec<u8>,
}

/// What added entries need for encryption.
struct Encryption<'a> {
    scheme: Option<&'a dyn EncryptionScheme>,
    password: Option<&'a [u8]>,
}

fn not_updating() -> Error {
    Error::usage("no update in progress; call begin_update first")
}

impl ZipArchive<ArchiveFile> {
    /// Start staging changes, committed with the archive's own storage.
    pub fn begin_update(&mut self) -> Result<()> {
        let storage = self.storage.clone();
        self.begin_update_with(storage)
    }

    /// Start staging changes; `storage` picks the commit mode and where a
    /// safe commit builds the new archive.
    pub fn begin_update_with(&mut self, storage: ArchiveStorage) -> Result<()> {
        if self.update.is_some() {
            return Err(Error::usage("an update is already in progress"));
        }
        let mut update = PendingUpdate {
            records: Vec::with_capacity(self.entries.len()),
            index: HashMap::with_capacity(self.entries.len()),
            storage,
            comment: None,
            contents_edited: false,
        };
        for entry in &self.entries {
            update.index.insert(entry.name().to_string(), update.records.len());
            update.records.push(Some(UpdateRecord {
                command: UpdateCommand::Copy,
                entry: entry.clone(),
                source: None,
                level: self.settings.default_level,
                encrypt: false,
                copy_span: None,
            }));
        }
        debug!(entries = self.entries.len(), "began update");
        self.update = Some(update);
        Ok(())
    }

    pub fn is_updating(&self) -> bool {
        self.update.is_some()
    }

    /// Stage an entry. An entry with the same (normalized) name is
    /// replaced.
    ///
    /// # Errors
    ///
    /// `Usage` outside an update, for an empty name, or for an entry too
    /// large for [`UseZip64::Off`]. `Capability` when a password is set
    /// without an encryption scheme.
    pub fn add(&mut self, options: AddOptions) -> Result<()> {
        if self.update.is_none() {
            return Err(not_updating());
        }
        let encrypt = self.settings.password.is_some();
        if encrypt && self.encryption.is_none() {
            return Err(Error::capability(
                "a password is set but no encryption scheme is configured",
            ));
        }
        let record = build_add_record(options, &self.settings, encrypt)?;
        trace!(name = record.entry.name(), method = ?record.entry.method(), "staged add");
        self.update.as_mut().ok_or_else(not_updating)?.stage(record);
        Ok(())
    }

    /// Unstage the entry called `name`.
    ///
    /// # Errors
    ///
    /// `Usage` outside an update or when no staged entry has that name.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let update = self.update.as_mut().ok_or_else(not_updating)?;
        let key = if update.index.contains_key(name) {
            name.to_string()
        } else {
            transform_name(name)
        };
        let i = update
            .index
            .remove(&key)
            .ok_or_else(|| Error::usage(format!("cannot find entry to delete: {name}")))?;
        update.records[i] = None;
        update.contents_edited = true;
        trace!(name = %key, "staged delete");
        Ok(())
    }

    /// Changing an entry in place is not supported; delete and add it.
    pub fn modify(&mut self, name: &str) -> Result<()> {
        Err(Error::usage(format!(
            "cannot modify {name} in place; delete it and add it again"
        )))
    }

    /// Stage a new archive comment.
    pub fn set_comment(&mut self, comment: impl Into<String>) -> Result<()> {
        let comment = comment.into();
        if comment.len() > u16::MAX as usize {
            return Err(Error::usage("archive comment is longer than 65535 bytes"));
        }
        let update = self.update.as_mut().ok_or_else(not_updating)?;
        update.comment = Some(comment);
        Ok(())
    }

    /// Drop all staged changes.
    pub fn abort(&mut self) {
        if self.update.take().is_some() {
            debug!("aborted update");
        }
    }

    /// Write the staged changes and reload the directory.
    ///
    /// A failed commit discards the staged changes. After a failed direct
    /// commit the archive may be damaged; a failed safe commit leaves it
    /// as it was.
    ///
    /// # Errors
    ///
    /// `Usage` outside an update or while entry readers are open. Any
    /// error from reading sources or writing the archive.
    pub fn commit(&mut self) -> Result<()> {
        let update = self.update.take().ok_or_else(not_updating)?;
        if Arc::strong_count(&self.stream) > 1 {
            self.update = Some(update);
            return Err(Error::usage("entry readers are still open"));
        }

        if self.eocd_offset.is_some() && !update.contents_edited {
            match update.comment {
                Some(comment) if comment != self.comment => self.commit_comment(&comment)?,
                _ => {
                    debug!("nothing to commit");
                    return Ok(());
                }
            }
        } else {
            self.commit_contents(update)?;
        }
        self.reload()
    }

    fn commit_comment(&mut self, comment: &str) -> Result<()> {
        let eocd_offset = self.eocd_offset.ok_or_else(not_updating)?;
        let mut fixed = [0u8; EndOfCentralDirectory::SIZE];
        self.stream.read_exact_at(eocd_offset, &mut fixed)?;
        let mut eocd = EndOfCentralDirectory::from_bytes(&fixed)?;
        eocd.comment_len = comment.len() as u16;

        let mut file = self.stream.lock();
        file.seek(SeekFrom::Start(eocd_offset))?;
        eocd.write_to(&mut *file)?;
        file.write_all(comment.as_bytes())?;
        file.flush()?;
        file.set_len(eocd_offset + (EndOfCentralDirectory::SIZE + comment.len()) as u64)?;
        debug!(len = comment.len(), "rewrote archive comment in place");
        Ok(())
    }

    fn commit_contents(&mut self, update: PendingUpdate) -> Result<()> {
        let PendingUpdate {
            records,
            storage,
            comment,
            ..
        } = update;
        let comment = comment.unwrap_or_else(|| self.comment.clone());

        let mut records: Vec<UpdateRecord> = records.into_iter().flatten().collect();
        records.sort_by_key(|r| match r.command {
            UpdateCommand::Copy => (0, r.entry.offset()),
            UpdateCommand::Add => (1, 0),
        });
        for record in records.iter_mut().filter(|r| r.command == UpdateCommand::Copy) {
            let index = self.index_of(&record.entry)?;
            let data_offset = self.data_offset(index)?;
            let descriptor = self.parser().descriptor_len(&record.entry, data_offset)?;
            record.copy_span = Some((data_offset, descriptor));
        }

        let encryption = Encryption {
            scheme: self.encryption.as_deref(),
            password: self.settings.password.as_deref(),
        };
        let is_new = self.eocd_offset.is_none();

        if is_new || storage.mode() == UpdateMode::Direct {
            let start = if is_new { 0 } else { self.prefix };
            let mut file = self.stream.lock();
            let out = storage.open_for_direct_update(&mut file)?;
            let end = write_records(out, None, &mut records, start, &comment, &encryption)?;
            out.set_len(end)?;
            debug!(entries = records.len(), len = end, "committed update in place");
        } else {
            let mut temp = storage.get_temp_output(&self.stream.lock())?;
            let source: &dyn ReadAt = &*self.stream;
            copy_prefix(&mut temp, source, self.prefix)?;
            let end = write_records(&mut temp, Some(source), &mut records, self.prefix, &comment, &encryption)?;

            let mut file = self.stream.lock();
            storage.convert_temp_to_final(temp, &mut file)?;
            debug!(entries = records.len(), len = end, "committed update through temporary output");
        }
        Ok(())
    }
}

fn build_add_record(options: AddOptions, settings: &ArchiveSettings, encrypt: bool) -> Result<UpdateRecord> {
    let AddOptions {
        name,
        source,
        method,
        level,
        unicode,
        modified,
        comment,
    } = options;
    let is_directory = matches!(source, EntrySource::Directory);
    let name = if is_directory {
        transform_directory_name(&name)
    } else {
        transform_name(&name)
    };
    if name.is_empty() || name == "/" {
        return Err(Error::usage("entry name is empty"));
    }

    let mut entry = ZipEntry::new(name);
    entry.set_unicode_name(unicode.unwrap_or(settings.unicode_names));
    if !is_directory {
        let method = method.unwrap_or(CompressionMethod::Deflate);
        if !matches!(method, CompressionMethod::Stored | CompressionMethod::Deflate) {
            return Err(Error::UnsupportedMethod(method.as_u16()));
        }
        entry.set_method(method);
    }

    match &source {
        EntrySource::Bytes(data) => {
            entry.set_size(data.len() as u64);
            entry.set_crc(Crc32::of(data));
        }
        EntrySource::File(path) => {
            let meta = fs::metadata(path)?;
            if !meta.is_file() {
                return Err(Error::usage(format!("{} is not a file", path.display())));
            }
            entry.set_size(meta.len());
            if let Ok(time) = meta.modified() {
                entry.set_modified(time);
            }
        }
        EntrySource::Reader { size: Some(size), .. } => entry.set_size(*size),
        EntrySource::Reader { size: None, .. } | EntrySource::Directory => {}
    }
    if let Some(time) = modified {
        entry.set_modified(time);
    }
    if let Some(comment) = comment {
        entry.set_comment(comment);
    }

    match settings.use_zip64 {
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

    let encrypt = encrypt && !is_directory;
    if encrypt {
        entry.set_encrypted(true);
        // The CRC is only known after the data, so it goes in a descriptor.
        if !entry.has_crc() {
            entry.set_flag(flags::DESCRIPTOR, true);
        }
    } else if entry.method() == CompressionMethod::Stored && entry.has_size() {
        entry.set_compressed_size(entry.size());
    }

    Ok(UpdateRecord {
        command: UpdateCommand::Add,
        entry,
        source: Some(source),
        level: level.unwrap_or(settings.default_level),
        encrypt,
        copy_span: None,
    })
}

/// Write all records from `start`, then the directory and end records.
/// With no `source`, copied entries are moved within `out` itself.
///
/// Returns the end of the archive.
fn write_records<W: Read + Write + Seek>(
    out: &mut W,
    source: Option<&dyn ReadAt>,
    records: &mut [UpdateRecord],
    start: u64,
    comment: &str,
    encryption: &Encryption<'_>,
) -> Result<u64> {
    let mut position = start;
    let mut patches = Vec::new();
    for record in records.iter_mut() {
        position = match record.command {
            UpdateCommand::Copy => {
                let (data_offset, descriptor_len) = record
                    .copy_span
                    .ok_or_else(|| Error::format("copied entry has no data location"))?;
                match source {
                    None => move_entry(out, &mut record.entry, data_offset, descriptor_len, position)?,
                    Some(source) => rewrite_entry(out, source, &mut record.entry, data_offset, position)?,
                }
            }
            UpdateCommand::Add => write_added_entry(out, record, position, encryption, &mut patches)?,
        };
    }

    let cd_offset = position;
    out.seek(SeekFrom::Start(cd_offset))?;
    let mut cd_size = 0u64;
    for record in records.iter_mut() {
        let name = prepare_name(&mut record.entry);
        let header = central_header(&record.entry, &name)?;
        out.write_all(&header)?;
        cd_size += header.len() as u64;
    }
    let end_len = write_end_records(out, records.len() as u64, cd_offset, cd_size, comment.as_bytes())?;

    for patch in &patches {
        out.seek(SeekFrom::Start(patch.offset))?;
        out.write_all(&patch.bytes)?;
    }
    out.flush()?;
    Ok(cd_offset + cd_size + end_len)
}

/// Move a copied entry down to `position` inside the live stream. An entry
/// already there is left alone.
fn move_entry<F: Read + Write + Seek>(
    file: &mut F,
    entry: &mut ZipEntry,
    data_offset: u64,
    descriptor_len: u64,
    position: u64,
) -> Result<u64> {
    let total = (data_offset - entry.offset()) + entry.compressed_size() + descriptor_len;
    if entry.offset() == position {
        trace!(name = entry.name(), "entry already in place");
        return Ok(position + total);
    }
    if entry.offset() < position {
        return Err(Error::format(format!(
            "{}: entry overlaps the previous entry",
            entry.name()
        )));
    }
    trace!(name = entry.name(), from = entry.offset(), to = position, "moving entry");

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut done = 0u64;
    while done < total {
        let n = (total - done).min(buf.len() as u64) as usize;
        file.seek(SeekFrom::Start(entry.offset() + done))?;
        file.read_exact(&mut buf[..n])?;
        file.seek(SeekFrom::Start(position + done))?;
        file.write_all(&buf[..n])?;
        done += n as u64;
    }
    entry.offset = position;
    Ok(position + total)
}

/// Write a copied entry into a fresh output: regenerated local header, the
/// raw data, and a regenerated descriptor if it had one.
/// Carry over whatever precedes the first entry, such as a
/// self-extractor stub.
fn copy_prefix<W: Write + Seek>(out: &mut W, source: &dyn ReadAt, prefix: u64) -> Result<()> {
    out.seek(SeekFrom::Start(0))?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut done = 0u64;
    while done < prefix {
        let n = (prefix - done).min(buf.len() as u64) as usize;
        source.read_exact_at(done, &mut buf[..n])?;
        out.write_all(&buf[..n])?;
        done += n as u64;
    }
    if prefix > 0 {
        trace!(prefix, "copied data ahead of the first entry");
    }
    Ok(())
}

fn rewrite_entry<W: Write + Seek>(
    out: &mut W,
    source: &dyn ReadAt,
    entry: &mut ZipEntry,
    data_offset: u64,
    position: u64,
) -> Result<u64> {
    out.seek(SeekFrom::Start(position))?;
    entry.offset = position;
    let name = prepare_name(entry);
    let header = local_header(entry, &name)?;
    out.write_all(&header.bytes)?;

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut done = 0u64;
    while done < entry.compressed_size() {
        let n = (entry.compressed_size() - done).min(buf.len() as u64) as usize;
        source.read_exact_at(data_offset + done, &mut buf[..n])?;
        out.write_all(&buf[..n])?;
        done += n as u64;
    }

    let mut written = header.bytes.len() as u64 + entry.compressed_size();
    if entry.has_descriptor() {
        let descriptor = DataDescriptor {
            crc32: entry.crc(),
            compressed_size: entry.compressed_size(),
            uncompressed_size: entry.size(),
        };
        written += descriptor.write_to(out, header.zip64)? as u64;
    }
    Ok(position + written)
}

/// Counts and checksums what passes through.
struct HashingReader<R> {
    inner: R,
    crc: Crc32,
    count: u64,
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.crc.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

fn write_added_entry<W: Write + Seek>(
    out: &mut W,
    record: &mut UpdateRecord,
    position: u64,
    encryption: &Encryption<'_>,
    patches: &mut Vec<Patch>,
) -> Result<u64> {
    let entry = &mut record.entry;
    out.seek(SeekFrom::Start(position))?;
    entry.offset = position;
    let name = prepare_name(entry);
    let header = local_header(entry, &name)?;
    out.write_all(&header.bytes)?;
    let data_start = position + header.bytes.len() as u64;

    let input: Box<dyn Read + Send> = match record.source.take() {
        Some(EntrySource::Bytes(data)) => Box::new(Cursor::new(data)),
        Some(EntrySource::File(path)) => Box::new(fs::File::open(path)?),
        Some(EntrySource::Reader { reader, .. }) => reader,
        Some(EntrySource::Directory) | None => Box::new(io::empty()),
    };
    let mut input = HashingReader {
        inner: input,
        crc: Crc32::new(),
        count: 0,
    };

    let mut encryptor = None;
    if record.encrypt {
        let (scheme, password) = encryption
            .scheme
            .zip(encryption.password)
            .ok_or_else(|| Error::capability("encryption is not configured"))?;
        let (enc_header, enc) = scheme.encryptor(entry, password)?;
        out.write_all(&enc_header)?;
        encryptor = Some(enc);
    }

    if entry.method() == CompressionMethod::Deflate {
        let mut writer = DeflateWriter::with_deflater(&mut *out, Deflater::new(record.level, true));
        if let Some(enc) = encryptor {
            writer = writer.with_encryptor(enc);
        }
        io::copy(&mut input, &mut writer)?;
        writer.finish()?;
    } else {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            if let Some(enc) = encryptor.as_mut() {
                enc.encrypt(&mut buf[..n]);
            }
            out.write_all(&buf[..n])?;
        }
        if let Some(enc) = encryptor.as_mut() {
            out.write_all(&enc.finish())?;
        }
    }

    let data_end = out.stream_position()?;
    let compressed = data_end - data_start;
    let size = input.count;
    let crc = input.crc.value();
    if entry.has_size() && entry.size() != size {
        return Err(Error::size_mismatch(entry.size(), size));
    }
    if entry.has_crc() && entry.crc() != crc {
        return Err(Error::checksum_mismatch("CRC", entry.crc(), crc));
    }
    if !header.zip64 && (size >= ZIP64_THRESHOLD || compressed >= ZIP64_THRESHOLD) {
        return Err(Error::usage(format!(
            "{} grew past 4 GiB without Zip64 headers",
            entry.name()
        )));
    }

    let patch_crc = !entry.has_crc();
    let patch_sizes = !entry.has_size() || !entry.has_compressed_size() || entry.compressed_size() != compressed;
    entry.set_size(size);
    entry.set_compressed_size(compressed);
    entry.set_crc(crc);
    trace!(name = entry.name(), size, compressed, "wrote entry");

    if entry.has_descriptor() {
        let descriptor = DataDescriptor {
            crc32: crc,
            compressed_size: compressed,
            uncompressed_size: size,
        };
        let len = descriptor.write_to(out, header.zip64)?;
        return Ok(data_end + len as u64);
    }
    if patch_crc {
        patches.push(Patch {
            offset: position + LFH_CRC_OFFSET as u64,
            bytes: crc.to_le_bytes().to_vec(),
        });
    }
    if patch_sizes {
        patches.push(Patch {
            offset: position + header.sizes.offset() as u64,
            bytes: header.sizes.encode(size, compressed),
        });
    }
    Ok(data_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn archive_with(names: &[(&str, &[u8])]) -> ZipArchive {
        let mut archive = ZipArchive::create_in_memory();
        archive.begin_update().unwrap();
        for (name, data) in names {
            archive.add(AddOptions::bytes(*name, data.to_vec())).unwrap();
        }
        archive.commit().unwrap();
        archive
    }

    #[test]
    fn test_calls_outside_update_are_usage_errors() {
        let mut archive = ZipArchive::create_in_memory();
        let err = archive.add(AddOptions::bytes("a", b"x".to_vec())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(archive.delete("a").unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(archive.commit().unwrap_err().kind(), ErrorKind::Usage);
        archive.begin_update().unwrap();
        assert_eq!(archive.begin_update().unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(archive.modify("a").unwrap_err().kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_add_then_delete_leaves_count() {
        let mut archive = archive_with(&[("a.txt", b"hello")]);
        archive.begin_update().unwrap();
        archive.add(AddOptions::bytes("b.txt", b"bye".to_vec())).unwrap();
        archive.delete("b.txt").unwrap();
        archive.commit().unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.read_entry("a.txt").unwrap(), b"hello");
    }

    #[test]
    fn test_delete_unknown_name() {
        let mut archive = archive_with(&[("a.txt", b"hello")]);
        archive.begin_update().unwrap();
        let err = archive.delete("missing.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_add_replaces_same_name() {
        let mut archive = archive_with(&[("a.txt", b"hello")]);
        archive.begin_update().unwrap();
        archive.add(AddOptions::bytes("./a.txt", b"replaced".to_vec())).unwrap();
        archive.commit().unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.read_entry("a.txt").unwrap(), b"replaced");
    }

    #[test]
    fn test_direct_commit_moves_entries_down() {
        let mut archive = archive_with(&[("a", b"first entry"), ("b", b"second"), ("c", b"third one")]);
        let c_offset = archive.get_entry("c").unwrap().offset();
        archive
            .begin_update_with(ArchiveStorage::memory(UpdateMode::Direct))
            .unwrap();
        archive.delete("a").unwrap();
        archive.commit().unwrap();

        assert_eq!(archive.len(), 2);
        assert_eq!(archive.entry(0).unwrap().offset(), 0);
        assert!(archive.get_entry("c").unwrap().offset() < c_offset);
        assert_eq!(archive.read_entry("b").unwrap(), b"second");
        assert_eq!(archive.read_entry("c").unwrap(), b"third one");
        let report = archive
            .test_archive(crate::zip::TestOptions {
                test_data: true,
                ..Default::default()
            })
            .unwrap();
        assert!(report.is_ok());
    }

    #[test]
    fn test_direct_commit_keeps_entries_in_place() {
        let mut archive = archive_with(&[("a", b"first entry"), ("b", b"second")]);
        let before = archive.entries();
        archive
            .begin_update_with(ArchiveStorage::memory(UpdateMode::Direct))
            .unwrap();
        archive.add(AddOptions::bytes("c", b"new".to_vec())).unwrap();
        archive.commit().unwrap();
        assert_eq!(archive.entry(0).unwrap().offset(), before[0].offset());
        assert_eq!(archive.entry(1).unwrap().offset(), before[1].offset());
        assert_eq!(archive.read_entry("c").unwrap(), b"new");
    }

    #[test]
    fn test_safe_commit_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.zip");
        let mut archive = ZipArchive::create_file(&path).unwrap();
        archive.begin_update().unwrap();
        archive.add(AddOptions::bytes("a.txt", b"hello".to_vec())).unwrap();
        archive.add(AddOptions::bytes("b.txt", b"world".to_vec())).unwrap();
        archive.commit().unwrap();

        archive.begin_update().unwrap();
        archive.delete("a.txt").unwrap();
        archive.commit().unwrap();
        drop(archive);

        let archive = ZipArchive::open_file(&path).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.read_entry("b.txt").unwrap(), b"world");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_comment_only_commit_rewrites_tail() {
        let mut archive = archive_with(&[("a.txt", b"hello")]);
        let len_before = archive.to_bytes().unwrap().len();
        archive.begin_update().unwrap();
        archive.set_comment("a new comment").unwrap();
        archive.commit().unwrap();
        assert_eq!(archive.comment(), "a new comment");
        assert_eq!(archive.to_bytes().unwrap().len(), len_before + 13);

        archive.begin_update().unwrap();
        archive.set_comment("").unwrap();
        archive.commit().unwrap();
        assert_eq!(archive.to_bytes().unwrap().len(), len_before);
    }

    #[test]
    fn test_abort_discards_changes() {
        let mut archive = archive_with(&[("a.txt", b"hello")]);
        archive.begin_update().unwrap();
        archive.delete("a.txt").unwrap();
        archive.abort();
        assert!(!archive.is_updating());
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn test_unknown_size_reader_uses_zip64() {
        let mut archive = ZipArchive::create_in_memory();
        archive.begin_update().unwrap();
        let data = vec![b'z'; 10_000];
        archive
            .add(AddOptions::reader("stream.bin", Cursor::new(data.clone()), None))
            .unwrap();
        archive.commit().unwrap();

        let entry = archive.get_entry("stream.bin").unwrap();
        assert_eq!(entry.size(), 10_000);
        assert_eq!(archive.read_entry("stream.bin").unwrap(), data);
        // The local header carries a Zip64 block even though nothing needs it.
        let local = archive.parser().read_local_header(entry.offset()).unwrap();
        assert!(local.to_entry().unwrap().is_zip64_forced());
    }

    #[test]
    fn test_zip64_off_rejects_large_entries() {
        let mut archive = ZipArchive::create_in_memory();
        archive.settings_mut().use_zip64 = UseZip64::Off;
        archive.begin_update().unwrap();
        let err = archive
            .add(AddOptions::reader("big", io::empty(), Some(5 << 30)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_declared_size_must_match() {
        let mut archive = ZipArchive::create_in_memory();
        archive.begin_update().unwrap();
        archive
            .add(AddOptions::reader("short", Cursor::new(vec![1u8; 3]), Some(10)))
            .unwrap();
        let err = archive.commit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_commit_refused_while_reading() {
        let mut archive = archive_with(&[("a.txt", b"hello")]);
        let entry = archive.get_entry("a.txt").unwrap();
        let reader = archive.entry_reader(&entry).unwrap();
        archive.begin_update().unwrap();
        archive.add(AddOptions::bytes("b", b"x".to_vec())).unwrap();
        assert_eq!(archive.commit().unwrap_err().kind(), ErrorKind::Usage);
        drop(reader);
        archive.commit().unwrap();
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn test_file_source_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        std::fs::write(&path, b"file contents").unwrap();

        let mut archive = ZipArchive::create_in_memory();
        archive.begin_update().unwrap();
        archive.add(AddOptions::file("docs\\input.txt", &path)).unwrap();
        archive.add(AddOptions::directory("docs")).unwrap();
        archive.commit().unwrap();

        assert_eq!(archive.read_entry("docs/input.txt").unwrap(), b"file contents");
        assert!(archive.get_entry("docs/").unwrap().is_directory());
    }

    #[test]
    fn test_encrypted_add_with_unknown_crc_uses_descriptor() {
        use crate::crypto::testing::XorScheme;

        let mut archive = ZipArchive::create_in_memory();
        archive.set_encryption(Arc::new(XorScheme));
        archive.settings_mut().password = Some(b"pw".to_vec());
        archive.begin_update().unwrap();
        archive
            .add(AddOptions::reader("s", Cursor::new(b"streamed secret".to_vec()), None))
            .unwrap();
        archive.commit().unwrap();
        let entry = archive.get_entry("s").unwrap();
        assert!(entry.has_descriptor());
        assert_eq!(archive.read_entry("s").unwrap(), b"streamed secret");

        // Copying the entry through a safe commit keeps it readable.
        archive.begin_update().unwrap();
        archive.add(AddOptions::bytes("t", b"more".to_vec())).unwrap();
        archive.commit().unwrap();
        assert_eq!(archive.read_entry("s").unwrap(), b"streamed secret");
    }
}
