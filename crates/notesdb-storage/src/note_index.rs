//! Note index store
//!
//! Dense array of fixed-size note records following the descriptor in
//! `note.indx`. Slot 0 holds the policy note; base notes occupy slots
//! `1..=total_notes` and are never moved except by compaction.

use crate::descriptor::IndexFile;
use crate::layout::{NOTE_RECORD_SIZE, NoteRecord, NoteSlot};
use crate::lock::{LockKind, RangeLock, Region};
use crate::raw_io::RecordFile;
use notesdb_common::Result;
use std::ops::{Deref, DerefMut};
use tracing::debug;

impl IndexFile {
    /// Load one note record under a shared lock
    pub fn read_note(&self, slot: NoteSlot) -> Result<NoteRecord> {
        let _lock = self.file.lock(LockKind::Read, Region::Note(slot))?;
        load(&self.file, slot)
    }

    /// Write a whole note record, typically a freshly appended one
    pub fn write_note(&self, slot: NoteSlot, record: &NoteRecord) -> Result<()> {
        let _lock = self.file.lock(LockKind::Write, Region::Note(slot))?;
        self.file.write_at(slot.offset(), &record.to_bytes())?;
        debug!("wrote note record {}", slot.ordinal());
        Ok(())
    }

    /// Hold a note record exclusively for a read-modify-write
    pub fn lock_note(&self, slot: NoteSlot) -> Result<NoteGuard<'_>> {
        let lock = self.file.lock(LockKind::Write, Region::Note(slot))?;
        let record = load(&self.file, slot)?;
        Ok(NoteGuard {
            _lock: lock,
            file: &self.file,
            slot,
            record,
        })
    }
}

fn load(file: &RecordFile, slot: NoteSlot) -> Result<NoteRecord> {
    let mut buf = [0u8; NOTE_RECORD_SIZE];
    file.read_at(slot.offset(), &mut buf)?;
    NoteRecord::from_bytes(&buf)
}

/// A write-locked, loaded note record
#[derive(Debug)]
pub struct NoteGuard<'a> {
    _lock: RangeLock<'a>,
    file: &'a RecordFile,
    slot: NoteSlot,
    record: NoteRecord,
}

impl NoteGuard<'_> {
    /// Slot this guard covers
    pub const fn slot(&self) -> NoteSlot {
        self.slot
    }

    /// Write the record back
    pub fn save(&self) -> Result<()> {
        self.file
            .write_at(self.slot.offset(), &self.record.to_bytes())?;
        debug!("updated note record {}", self.slot.ordinal());
        Ok(())
    }
}

impl Deref for NoteGuard<'_> {
    type Target = NoteRecord;

    fn deref(&self) -> &NoteRecord {
        &self.record
    }
}

impl DerefMut for NoteGuard<'_> {
    fn deref_mut(&mut self) -> &mut NoteRecord {
        &mut self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Descriptor, ItemRecord};
    use notesdb_common::Error;
    use std::io;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, IndexFile) {
        let dir = TempDir::new().unwrap();
        let desc = Descriptor::new("General", 1, 1000, 0);
        let index = IndexFile::create(dir.path().join("note.indx"), &desc).unwrap();
        (dir, index)
    }

    fn titled(title: &str) -> NoteRecord {
        NoteRecord {
            item: ItemRecord {
                title: title.into(),
                ..ItemRecord::default()
            },
            ..NoteRecord::default()
        }
    }

    #[test]
    fn test_write_then_read() {
        let (_dir, index) = scratch();
        index
            .write_note(NoteSlot::Ordinal(1), &titled("first"))
            .unwrap();
        index
            .write_note(NoteSlot::Ordinal(2), &titled("second"))
            .unwrap();
        index.write_note(NoteSlot::Policy, &titled("policy")).unwrap();

        assert_eq!(
            index.read_note(NoteSlot::Ordinal(2)).unwrap().item.title,
            "second"
        );
        assert_eq!(index.read_note(NoteSlot::Policy).unwrap().item.title, "policy");
        // the descriptor is untouched by note writes
        assert_eq!(index.read_descriptor().unwrap().title, "General");
    }

    #[test]
    fn test_guard_updates_in_place() {
        let (_dir, index) = scratch();
        index
            .write_note(NoteSlot::Ordinal(1), &titled("first"))
            .unwrap();
        {
            let mut note = index.lock_note(NoteSlot::Ordinal(1)).unwrap();
            note.response_count = 4;
            note.item.status.deleted = true;
            note.save().unwrap();
        }
        let note = index.read_note(NoteSlot::Ordinal(1)).unwrap();
        assert_eq!(note.response_count, 4);
        assert!(note.item.status.deleted);
    }

    #[test]
    fn test_missing_record() {
        let (_dir, index) = scratch();
        match index.read_note(NoteSlot::Ordinal(5)) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected short read, got {other:?}"),
        }
    }
}
