//! # zipkit
//!
//! A DEFLATE codec and a ZIP archive engine with Zip64 support and
//! transactional updates.
//!
//! The codec ([`deflate`]) implements RFC 1951 compression and
//! decompression as resumable, push-style state machines, with optional
//! zlib framing and `std::io` adapters on top. The archive engine ([`zip`])
//! reads, tests, creates and updates archives: updates are staged and then
//! committed either in place or through a temporary copy that replaces the
//! original only once it is complete.
//!
//! ## Features
//!
//! - Stored, fixed-Huffman and dynamic-Huffman blocks; levels 0 to 9
//! - Random access to entries of archives on disk, in memory or over any `Read + Seek`
//! - ZIP64 for entries and archives past 4 GiB or 65535 entries
//! - Adding and deleting entries, comment-only rewrites, self-extractor prefixes
//! - Forward-only streaming writer and reader for unseekable streams
//! - CRC-32 verification on every read and an archive integrity test
//!
//! ## Example
//!
//! ```no_run
//! use zipkit::{AddOptions, TestOptions, ZipArchive};
//!
//! fn main() -> zipkit::Result<()> {
//!     // Create an archive with one entry
//!     let mut archive = ZipArchive::create_file("archive.zip")?;
//!     archive.begin_update()?;
//!     archive.add(AddOptions::bytes("hello.txt", b"hello".to_vec()))?;
//!     archive.commit()?;
//!
//!     // Read it back and check it
//!     assert_eq!(archive.read_entry("hello.txt")?, b"hello");
//!     let report = archive.test_archive(TestOptions { test_data: true, ..Default::default() })?;
//!     assert!(report.is_ok());
//!
//!     for entry in archive.entries() {
//!         println!("{} ({} bytes)", entry.name(), entry.size());
//!     }
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod cli;
pub mod crypto;
pub mod deflate;
pub mod error;
pub mod io;
pub mod zip;

pub use checksum::{Adler32, Checksum, Crc32};
pub use cli::Cli;
pub use deflate::{CompressionLevel, DeflateStrategy, DeflateWriter, Deflater, InflateReader, Inflater};
pub use error::{Error, ErrorKind, Result};
pub use io::{ArchiveFile, ArchiveStorage, ReadAt, UpdateMode};
pub use zip::{
    AddOptions, ArchiveSettings, CompressionMethod, EntrySource, TestOptions, TestReport,
    TestStrategy, UseZip64, ZipArchive, ZipEntry, ZipExtractor, ZipStreamReader, ZipWriter,
};
