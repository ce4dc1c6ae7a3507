//! Text blob store
//!
//! An append-only byte log. The first 8 bytes hold the free pointer, the
//! offset at which the next blob will be written; blobs start on even
//! offsets. Appenders contend only on the free pointer: each reserves its
//! range, publishes the new free pointer, drops the header lock and then
//! writes its payload under a lock on the reserved range alone.

use crate::layout::{TEXT_HEADER_SIZE, TextAddr};
use crate::lock::{LockKind, Region};
use crate::raw_io::RecordFile;
use notesdb_common::{Error, HARD_MAX_TEXT_LEN, Result};
use std::path::Path;
use tracing::debug;

/// The `text` file of a notesfile
#[derive(Debug)]
pub struct TextLog {
    file: RecordFile,
}

impl TextLog {
    /// Open an existing text log
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: RecordFile::open(path)?,
        })
    }

    /// Create an empty text log
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = RecordFile::create(path)?;
        file.write_at(0, &header_bytes(TEXT_HEADER_SIZE))?;
        Ok(Self { file })
    }

    /// Underlying file
    pub const fn file(&self) -> &RecordFile {
        &self.file
    }

    /// Current size of the log, used by the corruption heuristic
    pub fn len(&self) -> Result<u64> {
        self.file.len()
    }

    /// Whether the log holds no blobs
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.free_pointer()? <= TEXT_HEADER_SIZE)
    }

    /// Offset the next blob will be written at
    pub fn free_pointer(&self) -> Result<u64> {
        let _lock = self.file.lock(LockKind::Read, Region::TextFreePointer)?;
        self.load_free_pointer()
    }

    /// Append `data`, truncated to `max_len` bytes
    ///
    /// The returned address records the length actually stored.
    pub fn put_text(&self, data: &[u8], max_len: i32) -> Result<TextAddr> {
        let limit = usize::try_from(max_len.clamp(0, HARD_MAX_TEXT_LEN)).unwrap_or(0);
        let payload = if data.len() > limit {
            debug!("truncating {} byte text to {limit}", data.len());
            &data[..limit]
        } else {
            data
        };
        self.append(payload)
    }

    /// Read the blob at `addr`
    pub fn get_text(&self, addr: TextAddr) -> Result<Vec<u8>> {
        let (offset, len) = checked(addr)?;
        let mut buf = vec![0u8; len];
        if len > 0 {
            let _lock = self.file.lock(
                LockKind::Read,
                Region::TextRange {
                    offset,
                    len: len as u64,
                },
            )?;
            self.file.read_at(offset, &mut buf)?;
        }
        Ok(buf)
    }

    /// Copy a blob out of `source` into this log, keeping its length
    pub fn move_text(&self, source: &Self, addr: TextAddr) -> Result<TextAddr> {
        let data = source.get_text(addr)?;
        self.append(&data)
    }

    fn append(&self, payload: &[u8]) -> Result<TextAddr> {
        let len = payload.len() as u64;
        let length = i32::try_from(payload.len())
            .map_err(|_| Error::invalid_argument("text blob too large"))?;

        let header = self.file.lock(LockKind::Write, Region::TextFreePointer)?;
        let offset = self.load_free_pointer()?;
        let range = self
            .file
            .lock(LockKind::Write, Region::TextRange { offset, len })?;
        let next = (offset + len + 1) & !1;
        self.file.write_at(0, &header_bytes(next))?;
        drop(header);

        self.file.write_at(offset, payload)?;
        drop(range);

        debug!("appended {len} text bytes at {offset}");
        Ok(TextAddr {
            offset: i64::try_from(offset)
                .map_err(|_| Error::storage("text offset overflow"))?,
            length,
        })
    }

    fn load_free_pointer(&self) -> Result<u64> {
        let mut buf = [0u8; TEXT_HEADER_SIZE as usize];
        self.file.read_at(0, &mut buf)?;
        let free = i64::from_le_bytes(buf);
        u64::try_from(free)
            .ok()
            .filter(|f| *f >= TEXT_HEADER_SIZE)
            .ok_or_else(|| {
                Error::storage(format!(
                    "bad free pointer {free} in {}",
                    self.file.path().display()
                ))
            })
    }
}

fn header_bytes(free: u64) -> [u8; TEXT_HEADER_SIZE as usize] {
    i64::try_from(free).unwrap_or(i64::MAX).to_le_bytes()
}

fn checked(addr: TextAddr) -> Result<(u64, usize)> {
    match (u64::try_from(addr.offset), usize::try_from(addr.length)) {
        (Ok(offset), Ok(len)) if offset >= TEXT_HEADER_SIZE => Ok((offset, len)),
        _ => Err(Error::storage(format!(
            "bad text address {}+{}",
            addr.offset, addr.length
        ))),
    }
}
