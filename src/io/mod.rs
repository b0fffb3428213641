//! Random-access reading over seekable streams.
//!
//! Archive parsing reads scattered ranges (the end records, the central
//! directory, each local header). [`ReadAt`] is the seam for that; it takes
//! `&self` so several readers can share one source.
//!
//! [`SharedStream`] adapts any `Read + Seek` by holding it behind a mutex:
//! every positioned read takes the lock, seeks, reads, and releases it, so
//! concurrent readers never interleave a seek with another reader's read.

mod storage;

pub use storage::{ArchiveFile, ArchiveStorage, TempOutput, UpdateMode};

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Positioned reads from a data source of known size.
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// Returns the number of bytes read, which is only short at the end of
    /// the source.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source.
    fn size(&self) -> u64;

    /// Fill `buf` completely from `offset`.
    ///
    /// # Errors
    ///
    /// Returns a `Format` error when the source ends first; a ZIP structure
    /// pointing past the end of the archive is malformed, not an I/O failure.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(Error::format(format!(
                    "unexpected end of archive reading {} bytes at offset {}",
                    buf.len(),
                    offset
                )));
            }
            filled += n;
        }
        Ok(())
    }
}

/// A seekable stream shared between readers.
pub struct SharedStream<S> {
    inner: Mutex<S>,
}

impl<S: Read + Seek + Send> SharedStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Exclusive access to the stream, for writers.
    ///
    /// A panic in another holder leaves the stream position undefined but
    /// the stream itself intact; every user seeks before touching it, so a
    /// poisoned lock is recovered rather than propagated.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn into_inner(self) -> S {
        self.inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: Read + Seek + Send> ReadAt for SharedStream<S> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut stream = self.lock();
        stream.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match stream.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn size(&self) -> u64 {
        // A stream whose end cannot be found reads as empty, which the
        // archive scanner rejects.
        self.lock().seek(SeekFrom::End(0)).unwrap_or(0)
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.len());
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.as_slice().read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

/// A `Read` view of a fixed range of a [`ReadAt`] source.
///
/// Entry streams hold one of these so they stay valid independently of the
/// archive that created them.
pub struct PartialReader<R: ReadAt + ?Sized> {
    source: Arc<R>,
    position: u64,
    end: u64,
}

impl<R: ReadAt + ?Sized> PartialReader<R> {
    pub fn new(source: Arc<R>, offset: u64, len: u64) -> Self {
        Self {
            source,
            position: offset,
            end: offset.saturating_add(len),
        }
    }

    /// Bytes left in the range.
    pub fn remaining(&self) -> u64 {
        self.end - self.position
    }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<R: ReadAt + ?Sized> Read for PartialReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = (buf.len() as u64).min(self.remaining()) as usize;
        if want == 0 {
            return Ok(0);
        }
        let n = self.source.read_at(self.position, &mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive ends inside entry data",
            ));
        }
        self.position += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::thread;

    #[test]
    fn test_shared_stream_read_at() {
        let stream = SharedStream::new(Cursor::new(b"0123456789".to_vec()));
        let mut buf = [0u8; 4];
        assert_eq!(stream.read_at(3, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"3456");
        assert_eq!(stream.read_at(8, &mut buf).unwrap(), 2);
        assert_eq!(stream.size(), 10);
    }

    #[test]
    fn test_read_exact_at_past_end_is_format_error() {
        let data = b"short".to_vec();
        let mut buf = [0u8; 8];
        let err = data.read_exact_at(0, &mut buf).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Format);
    }

    #[test]
    fn test_partial_reader_is_bounded() {
        let source = Arc::new(SharedStream::new(Cursor::new(b"headerBODYtrailer".to_vec())));
        let mut reader = PartialReader::new(source, 6, 4);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "BODY");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_concurrent_readers_do_not_interleave() {
        let data: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
        let source = Arc::new(SharedStream::new(Cursor::new(data.clone())));
        let handles: Vec<_> = (0..4u64)
            .map(|i| {
                let source = Arc::clone(&source);
                let expected = data.clone();
                thread::spawn(move || {
                    for round in 0..200u64 {
                        let offset = (i * 7919 + round * 131) % 60_000;
                        let mut buf = [0u8; 512];
                        source.read_exact_at(offset, &mut buf).unwrap();
                        assert_eq!(&buf[..], &expected[offset as usize..offset as usize + 512]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
