//! Lock coordinator
//!
//! Cross-process coordination is done entirely with POSIX advisory
//! byte-range locks (`fcntl(F_SETLKW)`) over logical record regions.
//! Every acquisition returns a [`RangeLock`] guard that releases the
//! range when dropped, so early returns and `?` never leak a lock.
//!
//! Lock ordering (deadlock avoidance):
//! ```text
//! descriptor -> note record -> response header/blocks -> text free pointer -> text range
//! ```
//! A process never requests a region earlier in this order while holding
//! one later in it. Compaction is the only operation that holds the
//! descriptor write lock across the whole pass.
//!
//! POSIX record locks belong to the process, not the file descriptor:
//! ranges locked twice by one process do not conflict, and closing any
//! descriptor of a file drops every lock the process holds on it. A
//! notesfile therefore keeps exactly one open handle per file.

use crate::layout::{
    BLOCK_SIZE, BlockId, DESCRIPTOR_SIZE, NOTE_RECORD_SIZE, NoteSlot, RESP_HEADER_SIZE,
    TEXT_HEADER_SIZE,
};
use crate::raw_io::RecordFile;
use nix::errno::Errno;
use nix::fcntl::{FcntlArg, fcntl};
use notesdb_common::{Error, Result};
use std::io;
use std::os::unix::io::RawFd;
use tracing::warn;

/// Shared or exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Read,
    Write,
}

impl LockKind {
    fn l_type(self) -> libc::c_short {
        match self {
            Self::Read => libc::F_RDLCK as libc::c_short,
            Self::Write => libc::F_WRLCK as libc::c_short,
        }
    }
}

/// A logical region of one of the notesfile files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// The descriptor at the head of `note.indx`
    Descriptor,
    /// One note record in `note.indx`
    Note(NoteSlot),
    /// The next-free-block counter of `resp.indx`
    ResponseHeader,
    /// One response block
    ResponseBlock(BlockId),
    /// The free pointer of `text`
    TextFreePointer,
    /// A freshly reserved text range
    TextRange { offset: u64, len: u64 },
    /// An entire file (access list, sequencer, registry)
    WholeFile,
}

impl Region {
    /// `(offset, len)` of the region; a zero length runs to end of file
    #[must_use]
    pub const fn range(self) -> (u64, u64) {
        match self {
            Self::Descriptor => (0, DESCRIPTOR_SIZE as u64),
            Self::Note(slot) => (slot.offset(), NOTE_RECORD_SIZE as u64),
            Self::ResponseHeader => (0, RESP_HEADER_SIZE as u64),
            Self::ResponseBlock(block) => (block.offset(), BLOCK_SIZE as u64),
            Self::TextFreePointer => (0, TEXT_HEADER_SIZE),
            // Never lock an empty range: zero means "to EOF" to fcntl
            Self::TextRange { offset, len } => (offset, if len == 0 { 1 } else { len }),
            Self::WholeFile => (0, 0),
        }
    }
}

/// A held byte-range lock, released on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct RangeLock<'a> {
    file: &'a RecordFile,
    region: Region,
    kind: LockKind,
}

impl RangeLock<'_> {
    /// Region this guard covers
    pub const fn region(&self) -> Region {
        self.region
    }

    /// Shared or exclusive
    pub const fn kind(&self) -> LockKind {
        self.kind
    }
}

impl Drop for RangeLock<'_> {
    fn drop(&mut self) {
        let (offset, len) = self.region.range();
        if let Err(e) = set_lock(
            self.file.raw_fd(),
            libc::F_UNLCK as libc::c_short,
            offset,
            len,
            false,
        ) {
            warn!(
                "failed to release {:?} lock on {}: {}",
                self.region,
                self.file.path().display(),
                e
            );
        }
    }
}

impl RecordFile {
    /// Block until `region` is locked
    ///
    /// Interrupted waits are retried; there is no timeout.
    pub fn lock(&self, kind: LockKind, region: Region) -> Result<RangeLock<'_>> {
        let (offset, len) = region.range();
        loop {
            match set_lock(self.raw_fd(), kind.l_type(), offset, len, true) {
                Ok(()) => break,
                Err(Errno::EINTR) => {}
                Err(e) => return Err(self.lock_error(region, e)),
            }
        }
        Ok(RangeLock {
            file: self,
            region,
            kind,
        })
    }

    /// Lock `region` only if no other process holds a conflicting lock
    pub fn try_lock(&self, kind: LockKind, region: Region) -> Result<Option<RangeLock<'_>>> {
        let (offset, len) = region.range();
        loop {
            match set_lock(self.raw_fd(), kind.l_type(), offset, len, false) {
                Ok(()) => {
                    return Ok(Some(RangeLock {
                        file: self,
                        region,
                        kind,
                    }));
                }
                Err(Errno::EINTR) => {}
                Err(Errno::EAGAIN | Errno::EACCES) => return Ok(None),
                Err(e) => return Err(self.lock_error(region, e)),
            }
        }
    }

    fn lock_error(&self, region: Region, errno: Errno) -> Error {
        Error::Io(io::Error::new(
            io::Error::from(errno).kind(),
            format!(
                "lock {region:?} failed on {}: {errno}",
                self.path().display()
            ),
        ))
    }
}

#[allow(unsafe_code)]
fn set_lock(
    fd: RawFd,
    l_type: libc::c_short,
    offset: u64,
    len: u64,
    wait: bool,
) -> std::result::Result<(), Errno> {
    // libc::flock has platform-specific padding fields; start from zero
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = l_type;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = libc::off_t::try_from(offset).map_err(|_| Errno::EOVERFLOW)?;
    fl.l_len = libc::off_t::try_from(len).map_err(|_| Errno::EOVERFLOW)?;

    let arg = if wait {
        FcntlArg::F_SETLKW(&fl)
    } else {
        FcntlArg::F_SETLK(&fl)
    };
    fcntl(fd, arg).map(drop)
}
