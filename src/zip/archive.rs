//! Random-access archives: opening, entry lookup, entry streams and the
//! archive test.
//!
//! The update half of [`ZipArchive`] lives in [`update`](super::update).

use std::fmt;
use std::io::{self, Read, Seek};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use super::entry::ZipEntry;
use super::parser::ZipParser;
use super::structures::{flags, CompressionMethod, VERSION_SUPPORTED};
use super::update::PendingUpdate;
use crate::checksum::{Checksum, Crc32};
use crate::crypto::{Decryptor, EncryptionScheme};
use crate::deflate::{CompressionLevel, InflateReader};
use crate::error::{Error, Result};
use crate::io::{ArchiveFile, ArchiveStorage, PartialReader, ReadAt, SharedStream};

/// When entries are written with Zip64 extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UseZip64 {
    /// Never; entries that would need it are rejected.
    Off,
    /// Always, for every new entry.
    On,
    /// When sizes or offsets require it, and whenever an entry's size is
    /// not known before it is written.
    #[default]
    Dynamic,
}

/// Options for entries written by an archive.
#[derive(Clone, Default)]
pub struct ArchiveSettings {
    pub use_zip64: UseZip64,
    pub default_level: CompressionLevel,
    /// Store new names as UTF-8 rather than code page 437.
    pub unicode_names: bool,
    /// Password for encrypted entries; new entries are encrypted when set.
    pub password: Option<Vec<u8>>,
}

impl fmt::Debug for ArchiveSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveSettings")
            .field("use_zip64", &self.use_zip64)
            .field("default_level", &self.default_level)
            .field("unicode_names", &self.unicode_names)
            .field("password", &self.password.as_ref().map(|_| "<set>"))
            .finish()
    }
}

/// Whether [`ZipArchive::test_archive`] stops at the first problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestStrategy {
    #[default]
    FindFirstError,
    FindAllErrors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestOptions {
    /// Decompress every entry and verify its CRC, not only the headers.
    pub test_data: bool,
    pub strategy: TestStrategy,
}

/// A problem found while testing one entry.
#[derive(Debug)]
pub struct TestProblem {
    pub entry: String,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct TestReport {
    pub entries_tested: usize,
    pub problems: Vec<TestProblem>,
}

impl TestReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// A ZIP archive over a seekable stream.
///
/// Archives over an [`ArchiveFile`] (from [`open_file`](Self::open_file),
/// [`from_bytes`](Self::from_bytes) and the `create_*` constructors) can
/// also be updated.
pub struct ZipArchive<S: Read + Seek + Send = ArchiveFile> {
    pub(crate) stream: Arc<SharedStream<S>>,
    pub(crate) entries: Vec<ZipEntry>,
    /// Data offset of each entry once its local header has been checked.
    data_offsets: Vec<OnceLock<u64>>,
    pub(crate) comment: String,
    pub(crate) settings: ArchiveSettings,
    pub(crate) encryption: Option<Arc<dyn EncryptionScheme>>,
    /// Offset of the end record; `None` until a new archive is committed.
    pub(crate) eocd_offset: Option<u64>,
    /// Bytes in front of the first entry.
    pub(crate) prefix: u64,
    pub(crate) storage: ArchiveStorage,
    pub(crate) update: Option<PendingUpdate>,
}

impl<S: Read + Seek + Send> fmt::Debug for ZipArchive<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipArchive")
            .field("entries", &self.entries.len())
            .field("comment", &self.comment)
            .field("settings", &self.settings)
            .field("updating", &self.update.is_some())
            .finish()
    }
}

impl<S: Read + Seek + Send> ZipArchive<S> {
    /// Read the central directory of the archive in `stream`.
    ///
    /// # Errors
    ///
    /// Returns a `Format` error when no valid directory can be found.
    pub fn open(stream: S) -> Result<Self> {
        Self::open_shared(Arc::new(SharedStream::new(stream)), ArchiveStorage::default())
    }

    pub(crate) fn open_shared(stream: Arc<SharedStream<S>>, storage: ArchiveStorage) -> Result<Self> {
        let mut archive = Self::empty(stream, storage);
        archive.reload()?;
        Ok(archive)
    }

    pub(crate) fn empty(stream: Arc<SharedStream<S>>, storage: ArchiveStorage) -> Self {
        Self {
            stream,
            entries: Vec::new(),
            data_offsets: Vec::new(),
            comment: String::new(),
            settings: ArchiveSettings::default(),
            encryption: None,
            eocd_offset: None,
            prefix: 0,
            storage,
            update: None,
        }
    }

    /// Re-read the directory from the stream.
    pub(crate) fn reload(&mut self) -> Result<()> {
        let directory = ZipParser::new(Arc::clone(&self.stream)).read_central_directory()?;
        debug!(
            entries = directory.entries.len(),
            eocd_offset = directory.eocd_offset,
            "opened archive"
        );
        self.data_offsets = directory.entries.iter().map(|_| OnceLock::new()).collect();
        self.entries = directory.entries;
        self.comment = directory.comment;
        self.eocd_offset = Some(directory.eocd_offset);
        self.prefix = directory.prefix;
        Ok(())
    }

    pub(crate) fn parser(&self) -> ZipParser<SharedStream<S>> {
        ZipParser::new(Arc::clone(&self.stream))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies of all entries, in directory order.
    pub fn entries(&self) -> Vec<ZipEntry> {
        self.entries.clone()
    }

    pub fn entry(&self, index: usize) -> Option<ZipEntry> {
        self.entries.get(index).cloned()
    }

    /// Index of the entry called `name`.
    pub fn find_entry(&self, name: &str, ignore_case: bool) -> Option<usize> {
        self.entries.iter().position(|e| {
            if ignore_case {
                e.name().eq_ignore_ascii_case(name)
                    || e.name().to_lowercase() == name.to_lowercase()
            } else {
                e.name() == name
            }
        })
    }

    pub fn get_entry(&self, name: &str) -> Option<ZipEntry> {
        self.find_entry(name, false).map(|i| self.entries[i].clone())
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn settings(&self) -> &ArchiveSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ArchiveSettings {
        &mut self.settings
    }

    /// The scheme used for encrypted entries, for reading and for adds
    /// while a password is set.
    pub fn set_encryption(&mut self, scheme: Arc<dyn EncryptionScheme>) {
        self.encryption = Some(scheme);
    }

    /// Take the stream back.
    ///
    /// # Errors
    ///
    /// Returns a `Usage` error while entry readers are still alive.
    pub fn into_inner(self) -> Result<S> {
        Arc::try_unwrap(self.stream)
            .map(SharedStream::into_inner)
            .map_err(|_| Error::usage("entry readers still hold the archive stream"))
    }

    pub(crate) fn index_of(&self, entry: &ZipEntry) -> Result<usize> {
        entry
            .index
            .filter(|&i| self.entries.get(i).is_some_and(|e| e.name() == entry.name()))
            .or_else(|| self.find_entry(entry.name(), false))
            .ok_or_else(|| Error::EntryNotFound(entry.name().to_string()))
    }

    /// Data offset of entry `index`, checking its local header on the
    /// first call.
    pub(crate) fn data_offset(&self, index: usize) -> Result<u64> {
        if let Some(&offset) = self.data_offsets[index].get() {
            return Ok(offset);
        }
        let offset = self.parser().test_local_header(&self.entries[index], true)?;
        let _ = self.data_offsets[index].set(offset);
        Ok(offset)
    }

    /// A stream of the entry's uncompressed data.
    ///
    /// The reader checks the size and CRC when it reaches the end of the
    /// data, so a short read loop that stops early skips that check.
    ///
    /// # Errors
    ///
    /// `EntryNotFound` if the entry is not in this archive,
    /// `UnsupportedMethod` for methods other than stored and deflated,
    /// `Capability` for entries that need a newer version, strong
    /// encryption, or a scheme and password that are not configured.
    pub fn entry_reader(&self, entry: &ZipEntry) -> Result<ZipEntryReader<S>> {
        let index = self.index_of(entry)?;
        let entry = &self.entries[index];

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
        let data_offset = self.data_offset(index)?;

        let mut start = data_offset;
        let mut len = entry.compressed_size();
        let mut decryptor = None;
        let mut trailer = None;
        if entry.is_encrypted() {
            if entry.flags() & flags::STRONG_ENCRYPTION != 0 {
                return Err(Error::capability(format!(
                    "{}: strong encryption is not supported",
                    entry.name()
                )));
            }
            let scheme = self.encryption.as_ref().ok_or_else(|| {
                Error::capability(format!("{}: entry is encrypted", entry.name()))
            })?;
            let password = self.settings.password.as_deref().ok_or_else(|| {
                Error::capability(format!("{}: password required", entry.name()))
            })?;
            let header_len = scheme.header_len(entry) as u64;
            let trailer_len = scheme.trailer_len(entry) as u64;
            len = len
                .checked_sub(header_len + trailer_len)
                .ok_or_else(|| Error::format(format!("{}: encrypted data too short", entry.name())))?;
            let mut header = vec![0u8; header_len as usize];
            self.stream.read_exact_at(start, &mut header)?;
            decryptor = Some(scheme.decryptor(entry, password, &header)?);
            start += header_len;
            if trailer_len > 0 {
                trailer = Some((start + len, trailer_len as usize));
            }
        }

        let input = PartialReader::new(Arc::clone(&self.stream), start, len);
        let body = if entry.method() == CompressionMethod::Deflate {
            let mut reader = InflateReader::new(input);
            if let Some(decryptor) = decryptor {
                reader = reader.with_decryptor(decryptor);
            }
            EntryBody::Deflated(Box::new(reader))
        } else {
            EntryBody::Stored { input, decryptor }
        };

        // AE-2 entries store a zero CRC; the authentication code replaces it.
        let check_crc = !(entry.aes_key_strength() > 0 && entry.crc() == 0);

        Ok(ZipEntryReader {
            name: entry.name().to_string(),
            body,
            crc: Crc32::new(),
            expected_crc: check_crc.then_some(entry.crc()),
            expected_size: entry.size(),
            produced: 0,
            trailer: trailer.map(|(offset, len)| (Arc::clone(&self.stream), offset, len)),
            done: false,
        })
    }

    /// Read a whole entry into memory.
    pub fn read_entry(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .get_entry(name)
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))?;
        let mut out = Vec::with_capacity(entry.size().min(64 << 20) as usize);
        self.entry_reader(&entry)?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Check every entry's headers and, if asked, its data.
    ///
    /// Each entry contributes at most one problem: testing an entry stops
    /// at its first failure. With [`TestStrategy::FindFirstError`] the
    /// whole test stops there too.
    pub fn test_archive(&self, options: TestOptions) -> Result<TestReport> {
        let mut report = TestReport::default();
        for index in 0..self.entries.len() {
            report.entries_tested += 1;
            if let Err(error) = self.test_entry(index, options.test_data) {
                let name = self.entries[index].name().to_string();
                warn!(entry = %name, %error, "archive test found a problem");
                report.problems.push(TestProblem { entry: name, error });
                if options.strategy == TestStrategy::FindFirstError {
                    break;
                }
            }
        }
        debug!(
            tested = report.entries_tested,
            problems = report.problems.len(),
            "archive test finished"
        );
        Ok(report)
    }

    fn test_entry(&self, index: usize, test_data: bool) -> Result<()> {
        let entry = &self.entries[index];
        let parser = self.parser();
        let offset = parser.test_local_header(entry, true)?;
        let _ = self.data_offsets[index].set(offset);
        parser.test_descriptor(entry, offset)?;
        if test_data && entry.is_file() {
            let mut reader = self.entry_reader(entry)?;
            io::copy(&mut reader, &mut io::sink())?;
        }
        Ok(())
    }
}

impl ZipArchive<ArchiveFile> {
    /// Open an archive on disk for reading and updating.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = ArchiveFile::open(path)?;
        Self::open_shared(Arc::new(SharedStream::new(file)), ArchiveStorage::default())
    }

    /// Open an archive held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::open_shared(
            Arc::new(SharedStream::new(ArchiveFile::memory(data))),
            ArchiveStorage::memory(Default::default()),
        )
    }

    /// Start a new archive at `path`, replacing any existing file. Nothing
    /// is written until the first commit.
    pub fn create_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = ArchiveFile::create(path)?;
        Ok(Self::empty(
            Arc::new(SharedStream::new(file)),
            ArchiveStorage::default(),
        ))
    }

    /// Start a new archive in memory.
    pub fn create_in_memory() -> Self {
        Self::empty(
            Arc::new(SharedStream::new(ArchiveFile::memory(Vec::new()))),
            ArchiveStorage::memory(Default::default()),
        )
    }

    /// Raw archive bytes, for in-memory archives.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        self.stream.lock().as_bytes().map(<[u8]>::to_vec)
    }
}

enum EntryBody<S: Read + Seek + Send> {
    Stored {
        input: PartialReader<SharedStream<S>>,
        decryptor: Option<Box<dyn Decryptor>>,
    },
    Deflated(Box<InflateReader<PartialReader<SharedStream<S>>>>),
}

/// Uncompressed data of one entry; see [`ZipArchive::entry_reader`].
pub struct ZipEntryReader<S: Read + Seek + Send> {
    name: String,
    body: EntryBody<S>,
    crc: Crc32,
    expected_crc: Option<u32>,
    expected_size: u64,
    produced: u64,
    /// Encryption trailer: stream, offset, length.
    trailer: Option<(Arc<SharedStream<S>>, u64, usize)>,
    done: bool,
}

impl<S: Read + Seek + Send> ZipEntryReader<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uncompressed bytes produced so far.
    pub fn position(&self) -> u64 {
        self.produced
    }

    fn read_body(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.body {
            EntryBody::Stored { input, decryptor } => {
                let n = input.read(buf)?;
                if let Some(decryptor) = decryptor.as_mut() {
                    decryptor.decrypt(&mut buf[..n]);
                }
                Ok(n)
            }
            EntryBody::Deflated(reader) => reader.read(buf),
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.done = true;
        if self.produced != self.expected_size {
            return Err(Error::size_mismatch(self.expected_size, self.produced));
        }
        if let Some(expected) = self.expected_crc {
            let actual = self.crc.value();
            if actual != expected {
                return Err(Error::checksum_mismatch("CRC", expected, actual));
            }
        }
        if let Some((stream, offset, len)) = self.trailer.take() {
            let mut trailer = vec![0u8; len];
            stream.read_exact_at(offset, &mut trailer)?;
            let decryptor: Option<&mut (dyn Decryptor + 'static)> = match &mut self.body {
                EntryBody::Stored { decryptor, .. } => decryptor.as_deref_mut(),
                EntryBody::Deflated(reader) => reader.decryptor_mut(),
            };
            if let Some(decryptor) = decryptor {
                decryptor.verify(&trailer)?;
            }
        }
        Ok(())
    }
}

impl<S: Read + Seek + Send> Read for ZipEntryReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.done {
            return Ok(0);
        }
        let n = self.read_body(buf)?;
        if n == 0 {
            self.finish()?;
            return Ok(0);
        }
        self.crc.update(&buf[..n]);
        self.produced += n as u64;
        if self.produced > self.expected_size {
            return Err(Error::size_mismatch(self.expected_size, self.produced).into());
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::XorScheme;
    use crate::error::ErrorKind;
    use crate::zip::update::AddOptions;
    use crate::zip::CompressionMethod;

    fn sample_archive() -> ZipArchive {
        let mut archive = ZipArchive::create_in_memory();
        archive.begin_update().unwrap();
        archive
            .add(AddOptions::bytes("a.txt", b"hello".to_vec()).method(CompressionMethod::Stored))
            .unwrap();
        archive
            .add(
                AddOptions::bytes("dir/b.txt", b"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_vec())
                    .method(CompressionMethod::Deflate),
            )
            .unwrap();
        archive.add(AddOptions::directory("empty/")).unwrap();
        archive.commit().unwrap();
        archive
    }

    #[test]
    fn test_lookup_and_read() {
        let archive = sample_archive();
        assert_eq!(archive.len(), 3);
        assert_eq!(archive.find_entry("DIR/B.TXT", true), Some(1));
        assert_eq!(archive.find_entry("DIR/B.TXT", false), None);
        assert_eq!(archive.read_entry("a.txt").unwrap(), b"hello");
        let entry = archive.get_entry("a.txt").unwrap();
        assert_eq!(entry.size(), 5);
        assert_eq!(entry.crc(), 0x3610A686);
        assert!(archive.get_entry("empty/").unwrap().is_directory());
    }

    #[test]
    fn test_missing_entry() {
        let archive = sample_archive();
        let err = archive.read_entry("nope").unwrap_err();
        assert!(matches!(err, Error::EntryNotFound(_)));
    }

    #[test]
    fn test_entries_are_copies() {
        let archive = sample_archive();
        let mut entry = archive.entry(0).unwrap();
        entry.set_comment("changed");
        assert_eq!(archive.entry(0).unwrap().comment(), "");
    }

    #[test]
    fn test_corrupt_data_fails_crc() {
        let archive = sample_archive();
        let entry = archive.get_entry("a.txt").unwrap();
        let data_offset = archive.data_offset(0).unwrap() as usize;
        let mut bytes = archive.to_bytes().unwrap();
        bytes[data_offset] ^= 0x20;
        drop(archive);

        let archive = ZipArchive::from_bytes(bytes).unwrap();
        let err = archive.read_entry(entry.name()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);

        let report = archive
            .test_archive(TestOptions {
                test_data: true,
                strategy: TestStrategy::FindAllErrors,
            })
            .unwrap();
        assert_eq!(report.entries_tested, 3);
        assert_eq!(report.problems.len(), 1);
        assert_eq!(report.problems[0].entry, "a.txt");
    }

    #[test]
    fn test_first_error_strategy_stops() {
        let archive = sample_archive();
        let mut bytes = archive.to_bytes().unwrap();
        // Break both local header signatures of the two files.
        for entry in archive.entries().iter().take(2) {
            bytes[entry.offset() as usize] = b'X';
        }
        let archive = ZipArchive::from_bytes(bytes).unwrap();
        let report = archive.test_archive(TestOptions::default()).unwrap();
        assert_eq!(report.problems.len(), 1);
        let report = archive
            .test_archive(TestOptions {
                test_data: false,
                strategy: TestStrategy::FindAllErrors,
            })
            .unwrap();
        assert_eq!(report.problems.len(), 2);
    }

    #[test]
    fn test_unsupported_method_is_reported() {
        let archive = sample_archive();
        let mut bytes = archive.to_bytes().unwrap();
        let entry = archive.get_entry("a.txt").unwrap();
        // Method field in the local header and in the central header.
        let local = entry.offset() as usize + 8;
        bytes[local] = 12;
        let eocd = archive.eocd_offset.unwrap() as usize;
        let cd_offset = u32::from_le_bytes(bytes[eocd + 16..eocd + 20].try_into().unwrap()) as usize;
        bytes[cd_offset + 10] = 12;
        let archive = ZipArchive::from_bytes(bytes).unwrap();
        let entry = archive.get_entry("a.txt").unwrap();
        assert!(!entry.can_decompress());
        assert!(matches!(
            archive.entry_reader(&entry),
            Err(Error::UnsupportedMethod(12))
        ));
    }

    #[test]
    fn test_encrypted_round_trip() {
        let mut archive = ZipArchive::create_in_memory();
        archive.set_encryption(Arc::new(XorScheme));
        archive.settings_mut().password = Some(b"secret".to_vec());
        archive.begin_update().unwrap();
        archive
            .add(AddOptions::bytes("s.txt", b"top secret payload, top secret payload".to_vec()))
            .unwrap();
        archive
            .add(AddOptions::bytes("raw.bin", vec![7u8; 40]).method(CompressionMethod::Stored))
            .unwrap();
        archive.commit().unwrap();

        let entry = archive.get_entry("s.txt").unwrap();
        assert!(entry.is_encrypted());
        assert_eq!(
            archive.read_entry("s.txt").unwrap(),
            b"top secret payload, top secret payload"
        );
        assert_eq!(archive.read_entry("raw.bin").unwrap(), vec![7u8; 40]);

        archive.settings_mut().password = Some(b"wrong!".to_vec());
        let err = archive.read_entry("s.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);

        archive.settings_mut().password = None;
        let err = archive.read_entry("s.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
    }

    #[test]
    fn test_into_inner_waits_for_readers() {
        let archive = sample_archive();
        let entry = archive.get_entry("a.txt").unwrap();
        let reader = archive.entry_reader(&entry).unwrap();
        let err = archive.into_inner().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        drop(reader);
    }

    #[test]
    fn test_open_generic_stream() {
        let bytes = sample_archive().to_bytes().unwrap();
        let archive = ZipArchive::open(io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);
        let entry = archive.get_entry("dir/b.txt").unwrap();
        let mut out = Vec::new();
        archive.entry_reader(&entry).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 32);
    }
}
