//! Search and scan
//!
//! Linear scans over the note index: backward substring searches by
//! author, title or text, and the forward watermark scans used to find
//! what a reader has not seen yet. Deleted, hidden and corrupted records
//! are skipped; one bad record never stops a scan.

use crate::engine::Note;
use crate::layout::{NoteRecord, NoteSlot, Permissions};
use crate::notesfile::Notesfile;
use crate::sanity;
use notesdb_common::{Error, Identity, Result, Timestamp, now};
use tracing::warn;

/// What a search compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Author,
    Title,
}

impl Notesfile {
    /// Newest note at or before `start` whose author name contains `needle`
    pub fn search_author(&self, identity: &Identity, start: i32, needle: &str) -> Result<Option<i32>> {
        self.search_field(identity, start, needle, Field::Author)
    }

    /// Newest note at or before `start` whose title contains `needle`
    pub fn search_title(&self, identity: &Identity, start: i32, needle: &str) -> Result<Option<i32>> {
        self.search_field(identity, start, needle, Field::Title)
    }

    /// Newest note at or before `start` whose text, or the text of one of
    /// its responses, contains `needle`
    ///
    /// Returns `(note, response)`, with response 0 for a base-note match.
    pub fn search_text(
        &self,
        identity: &Identity,
        start: i32,
        needle: &str,
    ) -> Result<Option<(i32, i32)>> {
        let perms = self.require(identity, Permissions::READ, "search")?;
        let needle = needle.to_lowercase();
        let text_size = self.text.len()?;
        let now = now();

        for note in (1..=self.scan_start(start)?).rev() {
            let Some(record) = self.scannable(note, identity, perms, text_size, now)? else {
                continue;
            };
            if self.text_matches(&record.item.text, &needle)? {
                return Ok(Some((note, 0)));
            }
            let chain = self.responses.load_chain(note, &record)?;
            for entry in chain.responses() {
                if sanity::check(entry.item, None, text_size, now).is_err() {
                    continue;
                }
                if self.text_matches(&entry.item.text, &needle)? {
                    return Ok(Some((note, entry.number)));
                }
            }
        }
        Ok(None)
    }

    /// First note after `after` modified since `since`, if any
    pub fn next_note(&self, identity: &Identity, after: i32, since: Timestamp) -> Result<Option<i32>> {
        let perms = self.require(identity, Permissions::READ, "read")?;
        let total = self.refresh()?.total_notes;
        let text_size = self.text.len()?;
        let now = now();

        for note in after.max(0) + 1..=total {
            if let Some(record) = self.scannable(note, identity, perms, text_size, now)? {
                if record.item.last_modified > since {
                    return Ok(Some(note));
                }
            }
        }
        Ok(None)
    }

    /// First response to `note` after `after` received since `since`
    pub fn next_response(
        &self,
        identity: &Identity,
        note: i32,
        after: i32,
        since: Timestamp,
    ) -> Result<Option<i32>> {
        let perms = self.require(identity, Permissions::READ, "read")?;
        let record = self.index.read_note(self.note_slot(note)?)?;
        if !self.visible(&record.item, identity, perms) {
            return Err(Error::NoteNotFound { note });
        }
        let chain = self.responses.load_chain(note, &record)?;
        Ok(chain
            .responses()
            .into_iter()
            .find(|entry| entry.number > after && entry.item.received > since)
            .map(|entry| entry.number))
    }

    /// Every live response to `note`, in order
    ///
    /// Corrupted responses appear as placeholders.
    pub fn list_responses(&self, identity: &Identity, note: i32) -> Result<Vec<Note>> {
        let perms = self.require(identity, Permissions::READ, "read")?;
        let record = self.index.read_note(self.note_slot(note)?)?;
        if !self.visible(&record.item, identity, perms) {
            return Err(Error::NoteNotFound { note });
        }

        let chain = self.responses.load_chain(note, &record)?;
        let mut out = Vec::new();
        for entry in chain.responses() {
            match self.verify(note, entry.number, entry.item, None) {
                Ok(()) => {
                    let body = self.text.get_text(entry.item.text)?;
                    out.push(Note::new(note, entry.number, entry.item.clone(), 0, body));
                }
                Err(e) if e.is_corrupted() => out.push(Note::placeholder(note, entry.number)),
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    fn search_field(
        &self,
        identity: &Identity,
        start: i32,
        needle: &str,
        field: Field,
    ) -> Result<Option<i32>> {
        let perms = self.require(identity, Permissions::READ, "search")?;
        let needle = needle.to_lowercase();
        let text_size = self.text.len()?;
        let now = now();

        for note in (1..=self.scan_start(start)?).rev() {
            let Some(record) = self.scannable(note, identity, perms, text_size, now)? else {
                continue;
            };
            let haystack = match field {
                Field::Author => &record.item.author.name,
                Field::Title => &record.item.title,
            };
            if haystack.to_lowercase().contains(&needle) {
                return Ok(Some(note));
            }
        }
        Ok(None)
    }

    fn scan_start(&self, start: i32) -> Result<i32> {
        let total = self.refresh()?.total_notes;
        Ok(if start < 1 { total } else { start.min(total) })
    }

    /// Load note `note` if a scan should look at it
    fn scannable(
        &self,
        note: i32,
        identity: &Identity,
        perms: Permissions,
        text_size: u64,
        now: Timestamp,
    ) -> Result<Option<NoteRecord>> {
        let record = self.index.read_note(NoteSlot::note(note)?)?;
        if record.item.status.deleted || !self.visible(&record.item, identity, perms) {
            return Ok(None);
        }
        if let Err(defect) = sanity::check(&record.item, Some(record.response_count), text_size, now) {
            warn!("{}: skipping corrupted note {note}: {defect}", self.id);
            return Ok(None);
        }
        Ok(Some(record))
    }

    fn text_matches(&self, addr: &crate::layout::TextAddr, needle: &str) -> Result<bool> {
        let body = self.text.get_text(*addr)?;
        Ok(String::from_utf8_lossy(&body).to_lowercase().contains(needle))
    }
}
