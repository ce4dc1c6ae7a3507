//! Positional record I/O
//!
//! Every notesfile file is read and written at explicit offsets so that
//! many processes can share one open file without coordinating a cursor.
//! `FileExt::{read_exact_at, write_all_at}` already retry calls interrupted
//! by a signal, so no EINTR handling is needed at this level.

use notesdb_common::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

/// A shared notesfile file addressed by byte offset
#[derive(Debug)]
pub struct RecordFile {
    file: File,
    path: PathBuf,
}

impl RecordFile {
    /// Open an existing file for reading and writing
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| with_path(&path, "open", e))?;
        Ok(Self { file, path })
    }

    /// Create a new file, failing if it already exists
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| with_path(&path, "create", e))?;
        Ok(Self { file, path })
    }

    /// Open a file, creating it empty if missing
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| with_path(&path, "open", e))?;
        Ok(Self { file, path })
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file size
    pub fn len(&self) -> Result<u64> {
        Ok(self
            .file
            .metadata()
            .map_err(|e| with_path(&self.path, "stat", e))?
            .len())
    }

    /// Whether the file is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Fill `buf` from `offset`; a short file is an error
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .read_exact_at(buf, offset)
            .map_err(|e| with_path(&self.path, "read", e))
    }

    /// Read the whole file
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.len()?)
            .map_err(|_| Error::storage(format!("{} is too large", self.path.display())))?;
        let mut buf = vec![0u8; len];
        self.read_at(0, &mut buf)?;
        Ok(buf)
    }

    /// Write all of `buf` at `offset`
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file
            .write_all_at(buf, offset)
            .map_err(|e| with_path(&self.path, "write", e))
    }

    /// Truncate or extend the file
    pub fn set_len(&self, len: u64) -> Result<()> {
        self.file
            .set_len(len)
            .map_err(|e| with_path(&self.path, "truncate", e))
    }

    /// Sync data and metadata to disk
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| with_path(&self.path, "sync", e))
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Attach the path and operation to an I/O error, keeping its kind
pub(crate) fn with_path(path: &Path, op: &str, e: io::Error) -> Error {
    Error::Io(io::Error::new(
        e.kind(),
        format!("{op} failed on {}: {e}", path.display()),
    ))
}
