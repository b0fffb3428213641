//! Where an archive lives and how updates reach it.
//!
//! An updatable archive is either a file on disk or a buffer in memory
//! ([`ArchiveFile`]). A commit either rewrites the live stream in place
//! ([`UpdateMode::Direct`]) or builds the complete new archive in a
//! temporary output and swaps it in afterwards ([`UpdateMode::Safe`]).
//! [`ArchiveStorage`] decides where that temporary output lives.

use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Result;

/// How a commit reaches the archive stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Build the new archive separately, then replace the original.
    #[default]
    Safe,
    /// Rewrite the archive in place.
    Direct,
}

/// The stream behind an updatable archive.
#[derive(Debug)]
pub enum ArchiveFile {
    Disk { file: File, path: PathBuf },
    Memory(Cursor<Vec<u8>>),
}

impl ArchiveFile {
    /// Open an existing archive for reading and updating.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(ArchiveFile::Disk {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Create (or truncate) a file for a new archive.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(ArchiveFile::Disk {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn memory(data: Vec<u8>) -> Self {
        ArchiveFile::Memory(Cursor::new(data))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            ArchiveFile::Disk { path, .. } => Some(path),
            ArchiveFile::Memory(_) => None,
        }
    }

    /// Cut the stream off at `len` bytes.
    pub fn set_len(&mut self, len: u64) -> Result<()> {
        match self {
            ArchiveFile::Disk { file, .. } => file.set_len(len)?,
            ArchiveFile::Memory(cursor) => {
                let len = usize::try_from(len).unwrap_or(usize::MAX);
                cursor.get_mut().truncate(len);
            }
        }
        Ok(())
    }

    /// The archive bytes, for in-memory archives.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            ArchiveFile::Memory(cursor) => Some(cursor.into_inner()),
            ArchiveFile::Disk { .. } => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ArchiveFile::Memory(cursor) => Some(cursor.get_ref()),
            ArchiveFile::Disk { .. } => None,
        }
    }
}

impl Read for ArchiveFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ArchiveFile::Disk { file, .. } => file.read(buf),
            ArchiveFile::Memory(cursor) => cursor.read(buf),
        }
    }
}

impl Write for ArchiveFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ArchiveFile::Disk { file, .. } => file.write(buf),
            ArchiveFile::Memory(cursor) => cursor.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ArchiveFile::Disk { file, .. } => file.flush(),
            ArchiveFile::Memory(cursor) => cursor.flush(),
        }
    }
}

impl Seek for ArchiveFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            ArchiveFile::Disk { file, .. } => file.seek(pos),
            ArchiveFile::Memory(cursor) => cursor.seek(pos),
        }
    }
}

/// Scratch output for a safe commit. A temporary file is removed when this
/// value is dropped, whether or not the commit got as far as using it.
#[derive(Debug)]
pub enum TempOutput {
    Disk(NamedTempFile),
    Memory(Cursor<Vec<u8>>),
}

impl Read for TempOutput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TempOutput::Disk(file) => file.read(buf),
            TempOutput::Memory(cursor) => cursor.read(buf),
        }
    }
}

impl Write for TempOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TempOutput::Disk(file) => file.write(buf),
            TempOutput::Memory(cursor) => cursor.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TempOutput::Disk(file) => file.flush(),
            TempOutput::Memory(cursor) => cursor.flush(),
        }
    }
}

impl Seek for TempOutput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            TempOutput::Disk(file) => file.seek(pos),
            TempOutput::Memory(cursor) => cursor.seek(pos),
        }
    }
}

/// Where safe commits stage the new archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveStorage {
    /// A temporary file, next to the archive when it is on disk (so the
    /// final swap is a rename) or in `temp_dir` / the system default.
    Disk {
        mode: UpdateMode,
        temp_dir: Option<PathBuf>,
    },
    /// A growable buffer.
    Memory { mode: UpdateMode },
}

impl Default for ArchiveStorage {
    fn default() -> Self {
        ArchiveStorage::Disk {
            mode: UpdateMode::Safe,
            temp_dir: None,
        }
    }
}

impl ArchiveStorage {
    pub fn disk(mode: UpdateMode) -> Self {
        ArchiveStorage::Disk {
            mode,
            temp_dir: None,
        }
    }

    pub fn memory(mode: UpdateMode) -> Self {
        ArchiveStorage::Memory { mode }
    }

    pub fn mode(&self) -> UpdateMode {
        match self {
            ArchiveStorage::Disk { mode, .. } | ArchiveStorage::Memory { mode } => *mode,
        }
    }

    /// Fresh scratch output for building the new archive.
    pub fn get_temp_output(&self, current: &ArchiveFile) -> Result<TempOutput> {
        match self {
            ArchiveStorage::Disk { temp_dir, .. } => {
                let dir = temp_dir
                    .clone()
                    .or_else(|| {
                        current
                            .path()
                            .and_then(Path::parent)
                            .filter(|p| !p.as_os_str().is_empty())
                            .map(Path::to_path_buf)
                    });
                let file = match dir {
                    Some(dir) => NamedTempFile::new_in(dir)?,
                    None => NamedTempFile::new()?,
                };
                debug!(temp = %file.path().display(), "created temporary archive output");
                Ok(TempOutput::Disk(file))
            }
            ArchiveStorage::Memory { .. } => Ok(TempOutput::Memory(Cursor::new(Vec::new()))),
        }
    }

    /// Replace `current` with the finished temporary output. Files on disk
    /// are swapped by renaming a complete copy over the archive, and
    /// `current` is only replaced once that has succeeded.
    pub fn convert_temp_to_final(&self, temp: TempOutput, current: &mut ArchiveFile) -> Result<()> {
        let replacement = match (temp, &*current) {
            (TempOutput::Disk(temp), ArchiveFile::Disk { path, .. }) => {
                let path = path.clone();
                let file = match temp.persist(&path) {
                    Ok(file) => file,
                    // Renames fail across filesystems; stage a copy next to the archive.
                    Err(err) => {
                        let mut temp = err.file;
                        temp.seek(SeekFrom::Start(0))?;
                        let file = replace_file(&path, |out| io::copy(&mut temp, out).map(drop))?;
                        debug!(path = %path.display(), "copied temporary output next to archive");
                        file
                    }
                };
                debug!(path = %path.display(), "replaced archive with temporary output");
                ArchiveFile::Disk { file, path }
            }
            (TempOutput::Disk(mut temp), ArchiveFile::Memory(_)) => {
                let mut data = Vec::new();
                temp.seek(SeekFrom::Start(0))?;
                temp.read_to_end(&mut data)?;
                ArchiveFile::memory(data)
            }
            (TempOutput::Memory(cursor), ArchiveFile::Disk { path, .. }) => {
                let path = path.clone();
                let file = replace_file(&path, |out| out.write_all(cursor.get_ref()))?;
                debug!(path = %path.display(), "replaced archive with buffered output");
                ArchiveFile::Disk { file, path }
            }
            (TempOutput::Memory(cursor), ArchiveFile::Memory(_)) => {
                ArchiveFile::memory(cursor.into_inner())
            }
        };
        *current = replacement;
        Ok(())
    }

    /// Prepare the live stream for an in-place rewrite.
    pub fn open_for_direct_update<'a>(&self, current: &'a mut ArchiveFile) -> Result<&'a mut ArchiveFile> {
        current.seek(SeekFrom::Start(0))?;
        Ok(current)
    }
}

/// Fill a new file beside `path`, then rename it over `path`.
fn replace_file(path: &Path, fill: impl FnOnce(&mut File) -> io::Result<()>) -> Result<File> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut staged = NamedTempFile::new_in(dir)?;
    fill(staged.as_file_mut())?;
    staged.as_file_mut().flush()?;
    let file = staged.persist(path).map_err(|err| err.error)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_archive_file_truncates() {
        let mut file = ArchiveFile::memory(b"0123456789".to_vec());
        file.seek(SeekFrom::Start(4)).unwrap();
        file.write_all(b"xy").unwrap();
        file.set_len(6).unwrap();
        assert_eq!(file.into_bytes().unwrap(), b"0123xy");
    }

    #[test]
    fn test_disk_temp_replaces_disk_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        std::fs::write(&path, b"old contents").unwrap();

        let storage = ArchiveStorage::disk(UpdateMode::Safe);
        let current = ArchiveFile::open(&path).unwrap();
        let mut temp = storage.get_temp_output(&current).unwrap();
        temp.write_all(b"new").unwrap();
        let mut replaced = current;
        storage.convert_temp_to_final(temp, &mut replaced).unwrap();

        let mut data = Vec::new();
        replaced.seek(SeekFrom::Start(0)).unwrap();
        replaced.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"new");
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        // Only the archive itself is left in the directory.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_memory_temp_over_disk_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.zip");
        std::fs::write(&path, b"a much longer old archive").unwrap();

        let storage = ArchiveStorage::memory(UpdateMode::Safe);
        let mut current = ArchiveFile::open(&path).unwrap();
        let mut temp = storage.get_temp_output(&current).unwrap();
        temp.write_all(b"short").unwrap();
        storage.convert_temp_to_final(temp, &mut current).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"short");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_dropped_temp_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ArchiveStorage::Disk {
            mode: UpdateMode::Safe,
            temp_dir: Some(dir.path().to_path_buf()),
        };
        let temp = storage.get_temp_output(&ArchiveFile::memory(Vec::new())).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        drop(temp);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    fn read_all(file: &mut ArchiveFile) -> Vec<u8> {
        let mut data = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_end(&mut data).unwrap();
        data
    }

    #[test]
    fn test_failed_swap_keeps_current_archive() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let archive_dir = dir.path().join("gone");
        std::fs::create_dir(&archive_dir).unwrap();
        let path = archive_dir.join("c.zip");
        std::fs::write(&path, b"old contents").unwrap();

        let storages = [
            ArchiveStorage::Disk {
                mode: UpdateMode::Safe,
                temp_dir: Some(scratch.path().to_path_buf()),
            },
            ArchiveStorage::memory(UpdateMode::Safe),
        ];
        let mut currents: Vec<ArchiveFile> =
            storages.iter().map(|_| ArchiveFile::open(&path).unwrap()).collect();
        let mut temps: Vec<TempOutput> = storages
            .iter()
            .zip(&currents)
            .map(|(storage, current)| storage.get_temp_output(current).unwrap())
            .collect();
        for temp in &mut temps {
            temp.write_all(b"new").unwrap();
        }

        // Nowhere left to put the new archive
        std::fs::remove_dir_all(&archive_dir).unwrap();
        for ((storage, temp), current) in storages.iter().zip(temps).zip(&mut currents) {
            assert!(storage.convert_temp_to_final(temp, current).is_err());
            assert_eq!(current.path(), Some(path.as_path()));
            assert_eq!(read_all(current), b"old contents");
        }
    }
}
