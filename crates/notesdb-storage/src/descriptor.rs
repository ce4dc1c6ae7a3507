//! Descriptor store
//!
//! The descriptor lives at the head of `note.indx`. Reads take a shared
//! lock on its range; every structural change goes through a
//! [`DescriptorGuard`], which holds the lock, exposes the loaded record
//! and writes it back on [`DescriptorGuard::save`].

use crate::layout::{DESCRIPTOR_SIZE, Descriptor};
use crate::lock::{LockKind, RangeLock, Region};
use crate::raw_io::RecordFile;
use notesdb_common::{Error, Result};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use tracing::debug;

/// `note.indx`: the descriptor followed by the dense note index
#[derive(Debug)]
pub struct IndexFile {
    pub(crate) file: RecordFile,
}

impl IndexFile {
    /// Open an existing index
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: RecordFile::open(path)?,
        })
    }

    /// Create a new index seeded with `descriptor`
    pub fn create(path: impl AsRef<Path>, descriptor: &Descriptor) -> Result<Self> {
        let file = RecordFile::create(path)?;
        file.write_at(0, &descriptor.to_bytes())?;
        Ok(Self { file })
    }

    /// Underlying file
    pub const fn file(&self) -> &RecordFile {
        &self.file
    }

    /// Load the descriptor under a shared lock
    pub fn read_descriptor(&self) -> Result<Descriptor> {
        let _lock = self.file.lock(LockKind::Read, Region::Descriptor)?;
        self.load()
    }

    /// Overwrite the descriptor under an exclusive lock
    pub fn write_descriptor(&self, descriptor: &Descriptor) -> Result<()> {
        let _lock = self.file.lock(LockKind::Write, Region::Descriptor)?;
        self.file.write_at(0, &descriptor.to_bytes())
    }

    /// Hold the descriptor shared: excludes compaction and counter updates
    /// while a record further down the lock order is being changed
    pub fn share_descriptor(&self) -> Result<DescriptorGuard<'_>> {
        self.guard(LockKind::Read)
    }

    /// Hold the descriptor exclusively for a read-modify-write
    pub fn lock_descriptor(&self) -> Result<DescriptorGuard<'_>> {
        self.guard(LockKind::Write)
    }

    /// Like [`Self::lock_descriptor`], but gives up instead of waiting
    pub fn try_lock_descriptor(&self) -> Result<Option<DescriptorGuard<'_>>> {
        let Some(lock) = self.file.try_lock(LockKind::Write, Region::Descriptor)? else {
            return Ok(None);
        };
        let descriptor = self.load()?;
        Ok(Some(DescriptorGuard {
            _lock: lock,
            file: &self.file,
            kind: LockKind::Write,
            descriptor,
        }))
    }

    fn guard(&self, kind: LockKind) -> Result<DescriptorGuard<'_>> {
        let lock = self.file.lock(kind, Region::Descriptor)?;
        let descriptor = self.load()?;
        Ok(DescriptorGuard {
            _lock: lock,
            file: &self.file,
            kind,
            descriptor,
        })
    }

    fn load(&self) -> Result<Descriptor> {
        let mut buf = [0u8; DESCRIPTOR_SIZE];
        self.file.read_at(0, &mut buf)?;
        Descriptor::from_bytes(&buf)
    }
}

/// A locked, loaded descriptor
#[derive(Debug)]
pub struct DescriptorGuard<'a> {
    _lock: RangeLock<'a>,
    file: &'a RecordFile,
    kind: LockKind,
    descriptor: Descriptor,
}

impl DescriptorGuard<'_> {
    /// Write the (possibly modified) descriptor back
    pub fn save(&self) -> Result<()> {
        if self.kind != LockKind::Write {
            return Err(Error::storage("descriptor saved under a shared lock"));
        }
        self.file.write_at(0, &self.descriptor.to_bytes())?;
        debug!(
            "saved descriptor of {}: {} notes",
            self.file.path().display(),
            self.descriptor.total_notes
        );
        Ok(())
    }

    /// Fail if compaction has replaced this notesfile
    pub fn check_valid(&self, name: &str) -> Result<()> {
        if self.descriptor.flags.invalid {
            return Err(Error::NotesfileInvalid(name.to_string()));
        }
        Ok(())
    }
}

impl Deref for DescriptorGuard<'_> {
    type Target = Descriptor;

    fn deref(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl DerefMut for DescriptorGuard<'_> {
    fn deref_mut(&mut self) -> &mut Descriptor {
        &mut self.descriptor
    }
}
