use std::fs;
use std::io::{self, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::archive::ZipArchive;
use super::entry::ZipEntry;
use crate::error::{Error, Result};

/// ZIP file extractor
pub struct ZipExtractor<'a, S: Read + Seek + Send> {
    archive: &'a ZipArchive<S>,
}

impl<'a, S: Read + Seek + Send> ZipExtractor<'a, S> {
    pub fn new(archive: &'a ZipArchive<S>) -> Self {
        Self { archive }
    }

    /// List all files in the archive
    pub fn list_files(&self) -> Vec<ZipEntry> {
        self.archive.entries()
    }

    /// Extract file data to memory
    pub fn extract_to_memory(&self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(entry.size().min(64 << 20) as usize);
        self.archive.entry_reader(entry)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Where `entry` lands under `dest`. With `junk_paths` only the final
    /// name component is kept.
    ///
    /// # Errors
    ///
    /// Returns a `Usage` error for names that would escape `dest`.
    pub fn output_path(&self, entry: &ZipEntry, dest: &Path, junk_paths: bool) -> Result<PathBuf> {
        let name = entry.name().trim_end_matches('/');
        let relative = if junk_paths {
            Path::new(name.rsplit('/').next().unwrap_or(name)).to_path_buf()
        } else {
            PathBuf::from(name)
        };
        let mut out = dest.to_path_buf();
        for component in relative.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(Error::usage(format!(
                        "{}: entry name escapes the destination directory",
                        entry.name()
                    )));
                }
            }
        }
        Ok(out)
    }

    /// Extract file to disk under `dest`, creating parent directories.
    /// Directory entries create the directory. Returns the path written.
    pub fn extract_to_file(&self, entry: &ZipEntry, dest: &Path, junk_paths: bool) -> Result<PathBuf> {
        let output_path = self.output_path(entry, dest, junk_paths)?;
        if entry.is_directory() {
            if !junk_paths {
                fs::create_dir_all(&output_path)?;
            }
            return Ok(output_path);
        }

        // Create parent directories if needed
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut reader = self.archive.entry_reader(entry)?;
        let mut file = fs::File::create(&output_path)?;
        io::copy(&mut reader, &mut file)?;
        file.flush()?;
        debug!(entry = entry.name(), path = %output_path.display(), "extracted");
        Ok(output_path)
    }

    /// Extract file to stdout
    pub fn extract_to_stdout(&self, entry: &ZipEntry) -> Result<()> {
        let mut reader = self.archive.entry_reader(entry)?;
        let mut stdout = io::stdout().lock();
        io::copy(&mut reader, &mut stdout)?;
        stdout.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::update::AddOptions;

    fn archive() -> ZipArchive {
        let mut archive = ZipArchive::create_in_memory();
        archive.begin_update().unwrap();
        archive.add(AddOptions::bytes("top.txt", b"top".to_vec())).unwrap();
        archive.add(AddOptions::bytes("nested/deep/file.txt", b"deep".to_vec())).unwrap();
        archive.add(AddOptions::directory("nested/empty")).unwrap();
        archive.commit().unwrap();
        archive
    }

    #[test]
    fn test_extract_tree() {
        let archive = archive();
        let extractor = ZipExtractor::new(&archive);
        let dir = tempfile::tempdir().unwrap();
        for entry in extractor.list_files() {
            extractor.extract_to_file(&entry, dir.path(), false).unwrap();
        }
        assert_eq!(fs::read(dir.path().join("top.txt")).unwrap(), b"top");
        assert_eq!(
            fs::read(dir.path().join("nested/deep/file.txt")).unwrap(),
            b"deep"
        );
        assert!(dir.path().join("nested/empty").is_dir());
    }

    #[test]
    fn test_junk_paths() {
        let archive = archive();
        let extractor = ZipExtractor::new(&archive);
        let dir = tempfile::tempdir().unwrap();
        let entry = archive.get_entry("nested/deep/file.txt").unwrap();
        let path = extractor.extract_to_file(&entry, dir.path(), true).unwrap();
        assert_eq!(path, dir.path().join("file.txt"));
    }

    #[test]
    fn test_escaping_names_are_rejected() {
        let archive = archive();
        let extractor = ZipExtractor::new(&archive);
        let mut entry = ZipEntry::new("x");
        entry.set_name("../../etc/passwd".to_string());
        let err = extractor.output_path(&entry, Path::new("out"), false).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Usage);
        entry.set_name("/abs/path".to_string());
        assert!(extractor.output_path(&entry, Path::new("out"), false).is_err());
    }

    #[test]
    fn test_extract_to_memory() {
        let archive = archive();
        let extractor = ZipExtractor::new(&archive);
        let entry = archive.get_entry("top.txt").unwrap();
        assert_eq!(extractor.extract_to_memory(&entry).unwrap(), b"top");
    }
}
