//! Sequencer store
//!
//! One file per reader under the sequencer directory, holding a
//! (notesfile key, last-seen timestamp) row for every notesfile that
//! reader has visited. Rows are updated in place; new keys append.

use crate::layout::{SEQ_ENTRY_SIZE, SEQ_KEY_LEN, SequencerEntry};
use crate::lock::{LockKind, Region};
use crate::raw_io::{RecordFile, with_path};
use notesdb_common::{Error, NotesfileId, NotesfileName, Result, Timestamp};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Watermarks of one reader
#[derive(Debug, Clone)]
pub struct Sequencer {
    path: PathBuf,
}

impl Sequencer {
    /// Sequencer of `reader` (a login name, or an alternate sequencer
    /// name) stored under `dir`
    pub fn new(dir: impl AsRef<Path>, reader: &str) -> Result<Self> {
        let reader = NotesfileName::new(reader)?;
        Ok(Self {
            path: dir.as_ref().join(reader.as_str()),
        })
    }

    /// Path of the sequencer file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last time the reader looked at `notesfile`
    pub fn get(&self, notesfile: &NotesfileId) -> Result<Option<Timestamp>> {
        let key = key_of(notesfile)?;
        if !self.path.exists() {
            return Ok(None);
        }
        let file = RecordFile::open(&self.path)?;
        let _lock = file.lock(LockKind::Read, Region::WholeFile)?;
        Ok(read_entries(&file)?
            .into_iter()
            .find(|e| e.key == key)
            .map(|e| e.last_seen))
    }

    /// Record that the reader has seen `notesfile` up to `last_seen`
    pub fn set(&self, notesfile: &NotesfileId, last_seen: Timestamp) -> Result<()> {
        let key = key_of(notesfile)?;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| with_path(dir, "create", e))?;
        }
        let file = RecordFile::open_or_create(&self.path)?;
        let _lock = file.lock(LockKind::Write, Region::WholeFile)?;

        let entries = read_entries(&file)?;
        let index = entries
            .iter()
            .position(|e| e.key == key)
            .unwrap_or(entries.len());
        let entry = SequencerEntry { key, last_seen };
        file.write_at((index * SEQ_ENTRY_SIZE) as u64, &entry.to_bytes())?;
        debug!(
            "sequencer {}: {} seen at {last_seen}",
            self.path.display(),
            entry.key
        );
        Ok(())
    }

    /// Every row of the sequencer file
    pub fn entries(&self) -> Result<Vec<SequencerEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = RecordFile::open(&self.path)?;
        let _lock = file.lock(LockKind::Read, Region::WholeFile)?;
        read_entries(&file)
    }
}

fn key_of(notesfile: &NotesfileId) -> Result<String> {
    let key = notesfile.key();
    if key.len() >= SEQ_KEY_LEN {
        return Err(Error::invalid_argument(format!(
            "sequencer key {key} is too long"
        )));
    }
    Ok(key)
}

fn read_entries(file: &RecordFile) -> Result<Vec<SequencerEntry>> {
    file.read_all()?
        .chunks_exact(SEQ_ENTRY_SIZE)
        .map(SequencerEntry::from_bytes)
        .collect()
}
