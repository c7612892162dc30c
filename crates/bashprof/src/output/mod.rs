//! Output writers for compiled stats.
//!
//! This module handles writing data to disk in various formats:
//! - pstats files (CPython marshal, loadable by `pstats.Stats`)
//! - Record dumps for diffing two runs
//! - JSON profiles
//! - Text summaries
//!
//! Every file is written to a temporary sibling and renamed into place
//! only once it is complete, so a failed run never leaves a partial file.

pub mod json;
pub mod marshal;
pub mod pstats;
pub mod records;
pub mod table;

// Re-export main functions
pub use json::{read_profile, to_profile, write_profile, write_profile_to, Profile};
pub use pstats::{pstats_to_bytes, read_pstats, stats_from_bytes, write_pstats};
pub use records::RecordDumper;
pub use table::{format_command_table, format_function_table};

use crate::utils::error::OutputError;
use log::debug;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Common path validation for output files
pub fn validate_path(path: &Path) -> Result<(), OutputError> {
    if path.as_os_str().is_empty() {
        return Err(OutputError::InvalidPath("Path is empty".to_string()));
    }

    if path.exists() && path.is_dir() {
        return Err(OutputError::InvalidPath(format!(
            "Path is a directory: {}",
            path.display()
        )));
    }

    Ok(())
}

/// An output file that only appears at its path once committed
///
/// Dropping it without [`AtomicFile::commit`] deletes the temporary file.
#[derive(Debug)]
pub struct AtomicFile {
    path: PathBuf,
    writer: BufWriter<NamedTempFile>,
}

impl AtomicFile {
    /// Validate `path`, create its parent directories and open a
    /// temporary file next to it
    ///
    /// # Errors
    /// * `OutputError::InvalidPath` - Path is empty, a directory, or its
    ///   parent cannot be created
    /// * `OutputError::WriteFailed` - the temporary file cannot be created
    pub fn create(path: impl AsRef<Path>) -> Result<Self, OutputError> {
        let path = path.as_ref();
        validate_path(path)?;

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !parent.exists() {
            debug!("Creating parent directories: {}", parent.display());
            fs::create_dir_all(parent).map_err(|e| {
                OutputError::InvalidPath(format!(
                    "Cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let temp = NamedTempFile::new_in(parent)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(temp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and rename the temporary file to the final path
    pub fn commit(self) -> Result<(), OutputError> {
        let temp = self.writer.into_inner().map_err(|e| e.into_error())?;
        temp.persist(&self.path).map_err(|e| OutputError::WriteFailed(e.error))?;
        debug!(
            "Committed {} ({} bytes)",
            self.path.display(),
            calculate_file_size(&self.path)
        );
        Ok(())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Write a whole buffer to `path` atomically
pub fn write_atomic(path: impl AsRef<Path>, contents: &[u8]) -> Result<(), OutputError> {
    let mut file = AtomicFile::create(path)?;
    file.write_all(contents)?;
    file.commit()
}

/// Calculate file size in bytes
///
/// **Private** - internal utility
fn calculate_file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path(Path::new("")).is_err());
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_path(dir.path()).is_err());
        assert!(validate_path(&dir.path().join("out.prof")).is_ok());
    }

    #[test]
    fn test_uncommitted_file_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.txt");
        {
            let mut file = AtomicFile::create(&path).unwrap();
            file.write_all(b"partial").unwrap();
        }
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path().join("nested")).unwrap().count(), 0);
    }

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        fs::write(&path, "old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(calculate_file_size(&path), 3);
    }
}
