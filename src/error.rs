//! Error types shared by the codec and the archive engine.

use std::io;

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input: signatures, header fields, Huffman codes.
    Format,
    /// Checksum or size verification failed.
    Integrity,
    /// Valid input that this engine does not support.
    Capability,
    /// The API was driven in an invalid order.
    Usage,
    /// Propagated from the underlying stream.
    Io,
}

/// Codec and archive errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Input data is malformed.
    #[error("invalid format: {0}")]
    Format(String),

    /// Compression method other than stored or deflated.
    #[error("unsupported compression method {0}")]
    UnsupportedMethod(u16),

    /// No entry with the given name exists.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// A checksum or size did not match its recorded value.
    #[error("{what} mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")]
    Integrity {
        what: &'static str,
        expected: u64,
        actual: u64,
    },

    /// Feature present in the input that is not supported.
    #[error("unsupported: {0}")]
    Capability(String),

    /// Invalid operation for the current state.
    #[error("invalid operation: {0}")]
    Usage(String),

    /// I/O error from the underlying stream.
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl Error {
    /// Create a format error.
    pub fn format(message: impl Into<String>) -> Self {
        Error::Format(message.into())
    }

    /// Create a capability error.
    pub fn capability(message: impl Into<String>) -> Self {
        Error::Capability(message.into())
    }

    /// Create a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }

    /// Create a checksum mismatch error.
    pub fn checksum_mismatch(what: &'static str, expected: u32, actual: u32) -> Self {
        Error::Integrity {
            what,
            expected: expected as u64,
            actual: actual as u64,
        }
    }

    /// Create a size mismatch error.
    pub fn size_mismatch(expected: u64, actual: u64) -> Self {
        Error::Integrity {
            what: "size",
            expected,
            actual,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Format(_) | Error::UnsupportedMethod(_) | Error::EntryNotFound(_) => {
                ErrorKind::Format
            }
            Error::Integrity { .. } => ErrorKind::Integrity,
            Error::Capability(_) => ErrorKind::Capability,
            Error::Usage(_) => ErrorKind::Usage,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        // Codec errors tunnel through Read/Write adapters wrapped in io::Error.
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(own) = inner.downcast::<Error>() {
                    return *own;
                }
            }
            return Error::format("unrecoverable wrapped error");
        }
        Error::Io(err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(inner) => inner,
            other => {
                let kind = match other.kind() {
                    ErrorKind::Usage => io::ErrorKind::InvalidInput,
                    ErrorKind::Capability => io::ErrorKind::Unsupported,
                    _ => io::ErrorKind::InvalidData,
                };
                io::Error::new(kind, other)
            }
        }
    }
}
