//! ZIP archive reading, writing and updating.
//!
//! This module provides random-access archives that can be read, tested
//! and updated in place or through a temporary copy, plus forward-only
//! readers and writers for streams that cannot seek.
//!
//! ## Architecture
//!
//! The module is organized into these components:
//!
//! - [`structures`]: Signatures, flags and the fixed-size records (EOCD, Zip64 EOCD, descriptors)
//! - [`entry`], [`extra`], [`dostime`], [`names`]: The entry model and its encodings
//! - `headers`: Serialization of local and central headers and the end records
//! - [`parser`]: Locating and parsing the central directory, validating local headers
//! - [`archive`]: [`ZipArchive`], the random-access read API and archive test
//! - `update`: Transactional adds and deletes on a [`ZipArchive`]
//! - [`writer`] / [`reader`]: Forward-only [`ZipWriter`] and [`ZipStreamReader`]
//! - `extractor`: [`ZipExtractor`], extraction to memory, disk or stdout
//!
//! ## ZIP Format Overview
//!
//! Each entry is a local header followed by its (possibly compressed) data
//! and, for streamed entries, a data descriptor. The central directory
//! repeats every header with the entry's offset, and the end record
//! (plus a Zip64 end record for large archives) points at the directory.
//!
//! Random access reads the EOCD first (from the end of the file), then the
//! Central Directory, and only touches an entry's local header when its
//! data is read.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for entries and archives past 4 GiB or 65535 entries
//! - STORED and DEFLATE compression methods
//! - Data descriptors, self-extractor prefixes, UTF-8 and code page 437 names
//! - Encryption through a pluggable [`EncryptionScheme`](crate::crypto::EncryptionScheme)
//!
//! ## Limitations
//!
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

pub mod archive;
pub mod dostime;
pub mod entry;
pub mod extra;
mod extractor;
mod headers;
pub mod names;
pub mod parser;
pub mod reader;
pub mod structures;
mod update;
pub mod writer;

pub use archive::{
    ArchiveSettings, TestOptions, TestProblem, TestReport, TestStrategy, UseZip64, ZipArchive,
    ZipEntryReader,
};
pub use dostime::DosDateTime;
pub use entry::ZipEntry;
pub use extractor::ZipExtractor;
pub use parser::ZipParser;
pub use reader::ZipStreamReader;
pub use structures::CompressionMethod;
pub use update::{AddOptions, EntrySource};
pub use writer::ZipWriter;
