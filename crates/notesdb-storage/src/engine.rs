//! Note and response lifecycle
//!
//! Writers put text first, outside any index lock, then take index locks
//! in the usual order (descriptor, note, response blocks). A crash
//! between the two steps leaves only unreferenced text, which the next
//! compaction drops.

use crate::layout::{
    Author, Descriptor, ExpirationPolicy, GlobalId, ItemRecord, ItemStatus, NoteRecord, NoteSlot,
    Permissions, TextAddr, UsageStats,
};
use crate::notesfile::Notesfile;
use crate::sanity;
use notesdb_common::{Error, HARD_MAX_TEXT_LEN, Identity, Result, Timestamp, now};
use serde::Serialize;
use std::borrow::Cow;
use tracing::{debug, info, warn};

/// Author uid recorded on anonymous posts
pub const ANONYMOUS_UID: i32 = -1;

/// A fully materialized note or response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Note {
    /// Base note ordinal (0 for the policy note)
    pub note: i32,
    /// Logical response number, 0 for the base note itself
    pub response: i32,
    pub id: GlobalId,
    pub title: String,
    pub author: Author,
    pub authored: Timestamp,
    pub received: Timestamp,
    pub last_modified: Timestamp,
    pub status: ItemStatus,
    /// Live responses (base notes only)
    pub response_count: i32,
    pub body: Vec<u8>,
    /// Stand-in for a record that failed the sanity check
    pub corrupted: bool,
}

impl Note {
    pub(crate) fn new(
        note: i32,
        response: i32,
        item: ItemRecord,
        response_count: i32,
        body: Vec<u8>,
    ) -> Self {
        Self {
            note,
            response,
            id: item.id,
            title: item.title,
            author: item.author,
            authored: item.authored,
            received: item.received,
            last_modified: item.last_modified,
            status: item.status,
            response_count,
            body,
            corrupted: false,
        }
    }

    /// Placeholder handed out instead of a corrupted record
    #[must_use]
    pub fn placeholder(note: i32, response: i32) -> Self {
        let body = if response == 0 {
            format!("Note {note} is damaged and cannot be displayed.\n")
        } else {
            format!("Response {response} to note {note} is damaged and cannot be displayed.\n")
        };
        Self {
            note,
            response,
            id: GlobalId::default(),
            title: "damaged note".to_string(),
            author: Author::default(),
            authored: 0,
            received: 0,
            last_modified: 0,
            status: ItemStatus {
                deleted: true,
                ..ItemStatus::default()
            },
            response_count: 0,
            body: body.into_bytes(),
            corrupted: true,
        }
    }

    /// Body as text, replacing invalid UTF-8
    #[must_use]
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Where a copied note came from; kept instead of drawing a new id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub id: GlobalId,
    pub author: Author,
    pub authored: Timestamp,
}

/// A note or response to be written
#[derive(Debug, Clone, Default)]
pub struct NewNote {
    pub title: String,
    pub body: Vec<u8>,
    /// Post under the configured anonymous name
    pub anonymous: bool,
    /// Honored for directors only
    pub director_message: bool,
    pub write_only: bool,
    pub origin: Option<Origin>,
}

impl NewNote {
    pub fn new(title: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ..Self::default()
        }
    }
}

/// Metadata changes for an existing note or response
#[derive(Debug, Clone, Default)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub director_message: Option<bool>,
    pub write_only: Option<bool>,
    pub deleted: Option<bool>,
}

/// Director changes to notesfile-wide settings
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub title: Option<String>,
    pub director_msg: Option<String>,
    pub anonymous: Option<bool>,
    pub locked: Option<bool>,
    pub archive: Option<bool>,
    pub moderated: Option<bool>,
    pub expiration: Option<ExpirationPolicy>,
    pub max_note_len: Option<i32>,
}

/// Usage and size summary of a notesfile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotesfileStats {
    pub title: String,
    pub nf_number: i32,
    pub total_notes: i32,
    pub deleted_notes: i32,
    pub deleted_responses: i32,
    pub created: Timestamp,
    pub last_modified: Timestamp,
    pub usage: UsageStats,
    pub text_bytes: u64,
    pub response_blocks: u32,
}

impl Notesfile {
    /// Read note `note`, or its response `response` when non-zero
    ///
    /// A record that fails the sanity check comes back as a
    /// [`Note::placeholder`].
    pub fn get_note(&self, identity: &Identity, note: i32, response: i32) -> Result<Note> {
        match self.fetch_note(identity, note, response) {
            Err(Error::Corrupted { note, response }) => Ok(Note::placeholder(note, response)),
            other => other,
        }
    }

    /// Like [`Self::get_note`], but reports corruption as
    /// [`Error::Corrupted`]
    pub fn fetch_note(&self, identity: &Identity, note: i32, response: i32) -> Result<Note> {
        let perms = self.require(identity, Permissions::READ, "read")?;
        let slot = self.note_slot(note)?;
        let record = self.index.read_note(slot)?;
        if !self.visible(&record.item, identity, perms) {
            return Err(Error::NoteNotFound { note });
        }

        let (item, count) = if response == 0 {
            (record.item.clone(), record.response_count)
        } else {
            let item = self.responses.read_response(note, &record, response)?;
            (item, 0)
        };
        self.verify(note, response, &item, (response == 0).then_some(count))?;
        let body = self.text.get_text(item.text)?;
        self.count_read()?;
        Ok(Note::new(note, response, item, count, body))
    }

    /// Append a base note; returns its ordinal
    pub fn put_note(&self, identity: &Identity, new: NewNote) -> Result<i32> {
        let perms = self.require(identity, Permissions::WRITE, "write notes in")?;
        let director = perms.contains(Permissions::DIRECTOR);
        let snapshot = self.descriptor();
        self.check_writable(&snapshot, director)?;
        let author = self.author_for(identity, &new, &snapshot)?;
        let addr = self.text.put_text(&new.body, snapshot.max_note_len)?;

        let now = now();
        let mut desc = self.index.lock_descriptor()?;
        desc.check_valid(&self.id.key())?;
        self.check_writable(&desc, director)?;

        let ordinal = desc.total_notes + 1;
        let mut item = self.new_item(&mut desc, new, author, addr, director, now);
        item.status.pending = desc.flags.moderated && !director;
        let record = NoteRecord {
            item,
            response_count: 0,
            first_block: None,
        };
        self.index.write_note(NoteSlot::note(ordinal)?, &record)?;

        desc.total_notes = ordinal;
        desc.last_modified = now;
        desc.stats.notes_written += 1;
        desc.save()?;
        *self.cached.write() = (*desc).clone();
        debug!("{}: note {ordinal} written by {}", self.id, identity.name);
        Ok(ordinal)
    }

    /// Append a response to note `note`; returns its logical number
    pub fn put_resp(&self, identity: &Identity, note: i32, new: NewNote) -> Result<i32> {
        let perms = self.require(identity, Permissions::REPLY, "reply in")?;
        let director = perms.contains(Permissions::DIRECTOR);
        let snapshot = self.descriptor();
        self.check_writable(&snapshot, director)?;
        let slot = self.note_slot(note)?;
        let current = self.index.read_note(slot)?;
        if current.item.status.deleted || !self.visible(&current.item, identity, perms) {
            return Err(Error::NoteNotFound { note });
        }
        let author = self.author_for(identity, &new, &snapshot)?;
        let addr = self.text.put_text(&new.body, snapshot.max_note_len)?;

        let now = now();
        let item = {
            let mut desc = self.index.lock_descriptor()?;
            desc.check_valid(&self.id.key())?;
            self.check_writable(&desc, director)?;
            let item = self.new_item(&mut desc, new, author, addr, director, now);
            desc.last_modified = now;
            desc.stats.notes_written += 1;
            desc.save()?;
            *self.cached.write() = (*desc).clone();
            item
        };

        let desc = self.index.share_descriptor()?;
        desc.check_valid(&self.id.key())?;
        let mut record = self.index.lock_note(slot)?;
        if record.item.status.deleted {
            return Err(Error::NoteNotFound { note });
        }
        let number = self.responses.append(note, &mut record, item)?;
        record.item.last_modified = now;
        record.save()?;
        debug!(
            "{}: response {number} to note {note} written by {}",
            self.id, identity.name
        );
        Ok(number)
    }

    /// Soft-delete a base note
    pub fn delete_note(&self, identity: &Identity, note: i32) -> Result<()> {
        let perms = self.permissions(identity)?;
        let director = perms.contains(Permissions::DIRECTOR);
        let slot = self.note_slot(note)?;
        {
            let desc = self.index.share_descriptor()?;
            desc.check_valid(&self.id.key())?;
            self.check_writable(&desc, director)?;
            let mut record = self.index.lock_note(slot)?;
            if record.item.status.deleted {
                return if director {
                    Ok(())
                } else {
                    Err(Error::NoteNotFound { note })
                };
            }
            self.check_owner(&record.item, identity, perms, "delete")?;
            record.item.status.deleted = true;
            record.save()?;
        }
        self.bump_counters(|d| d.deleted_notes += 1)?;
        info!("{}: note {note} deleted by {}", self.id, identity.name);
        Ok(())
    }

    /// Soft-delete a response; later responses move down one number
    pub fn delete_response(&self, identity: &Identity, note: i32, response: i32) -> Result<()> {
        let perms = self.permissions(identity)?;
        let director = perms.contains(Permissions::DIRECTOR);
        let slot = self.note_slot(note)?;
        {
            let desc = self.index.share_descriptor()?;
            desc.check_valid(&self.id.key())?;
            self.check_writable(&desc, director)?;
            let mut record = self.index.lock_note(slot)?;
            if record.item.status.deleted && !director {
                return Err(Error::NoteNotFound { note });
            }
            let item = self.responses.read_response(note, &record, response)?;
            self.check_owner(&item, identity, perms, "delete")?;
            self.responses.delete(note, &mut record, response)?;
            record.save()?;
        }
        self.bump_counters(|d| d.deleted_responses += 1)?;
        info!(
            "{}: response {response} to note {note} deleted by {}",
            self.id, identity.name
        );
        Ok(())
    }

    /// Rewrite the metadata of a note or response in place
    ///
    /// The record is re-checked for corruption first. Setting `deleted`
    /// on a response deletes it; deleted responses cannot be restored.
    pub fn update_note(
        &self,
        identity: &Identity,
        note: i32,
        response: i32,
        update: NoteUpdate,
    ) -> Result<()> {
        if response != 0 && update.deleted == Some(false) {
            return Err(Error::invalid_argument(
                "deleted responses cannot be restored",
            ));
        }
        let perms = self.permissions(identity)?;
        let director = perms.contains(Permissions::DIRECTOR);
        let slot = self.note_slot(note)?;
        let text_size = self.text.len()?;

        let deleted_delta = {
            let desc = self.index.share_descriptor()?;
            desc.check_valid(&self.id.key())?;
            self.check_writable(&desc, director)?;
            let mut record = self.index.lock_note(slot)?;
            if record.item.status.deleted && !director {
                return Err(Error::NoteNotFound { note });
            }

            if response == 0 {
                self.check_owner(&record.item, identity, perms, "modify")?;
                check_sane(note, 0, &record.item, Some(record.response_count), text_size)?;
                let was_deleted = record.item.status.deleted;
                apply(&mut record.item, &update, director);
                if let Some(deleted) = update.deleted {
                    record.item.status.deleted = deleted;
                }
                record.item.last_modified = now();
                record.save()?;
                i32::from(record.item.status.deleted) - i32::from(was_deleted)
            } else {
                let (block, index) = self.responses.logical_resp(note, &record, response)?;
                let item = self.responses.read_block(block)?.slots[index].clone();
                self.check_owner(&item, identity, perms, "modify")?;
                check_sane(note, response, &item, None, text_size)?;
                self.responses.update_slot(block, index, |item| {
                    apply(item, &update, director);
                    item.last_modified = now();
                })?;
                0
            }
        };

        if deleted_delta != 0 {
            self.bump_counters(|d| d.deleted_notes += deleted_delta)?;
        }
        if response != 0 && update.deleted == Some(true) {
            self.delete_response(identity, note, response)?;
        }
        debug!("{}: note {note}.{response} updated", self.id);
        Ok(())
    }

    /// Replace the text of a note, or of the last response to it
    ///
    /// The new text is appended; the old blob stays until compaction.
    pub fn modify_text(
        &self,
        identity: &Identity,
        note: i32,
        response: i32,
        body: &[u8],
    ) -> Result<()> {
        let perms = self.permissions(identity)?;
        let director = perms.contains(Permissions::DIRECTOR);
        let slot = self.note_slot(note)?;
        let snapshot = self.descriptor();
        self.check_writable(&snapshot, director)?;

        let current = self.index.read_note(slot)?;
        if current.item.status.deleted && !director {
            return Err(Error::NoteNotFound { note });
        }
        let target = if response == 0 {
            current.item.clone()
        } else {
            check_last_response(note, response, current.response_count)?;
            self.responses.read_response(note, &current, response)?
        };
        self.check_owner(&target, identity, perms, "modify")?;

        let addr = self.text.put_text(body, snapshot.max_note_len)?;
        let now = now();

        let desc = self.index.share_descriptor()?;
        desc.check_valid(&self.id.key())?;
        let mut record = self.index.lock_note(slot)?;
        if response == 0 {
            record.item.text = addr;
            record.item.last_modified = now;
            record.save()?;
        } else {
            // a response may have been appended since the first look
            check_last_response(note, response, record.response_count)?;
            let (block, index) = self.responses.logical_resp(note, &record, response)?;
            self.responses.update_slot(block, index, |item| {
                item.text = addr;
                item.last_modified = now;
            })?;
        }
        debug!("{}: text of note {note}.{response} replaced", self.id);
        Ok(())
    }

    /// Release a note held for moderation
    pub fn approve_note(&self, identity: &Identity, note: i32) -> Result<()> {
        self.require(identity, Permissions::DIRECTOR, "approve notes in")?;
        let slot = self.note_slot(note)?;
        let desc = self.index.share_descriptor()?;
        desc.check_valid(&self.id.key())?;
        let mut record = self.index.lock_note(slot)?;
        if record.item.status.pending {
            record.item.status.pending = false;
            record.item.last_modified = now();
            record.save()?;
            info!("{}: note {note} approved by {}", self.id, identity.name);
        }
        Ok(())
    }

    /// Write or replace the policy note
    pub fn put_policy(&self, identity: &Identity, new: NewNote) -> Result<()> {
        self.require(identity, Permissions::DIRECTOR, "set the policy of")?;
        let snapshot = self.descriptor();
        let author = self.author_for(identity, &new, &snapshot)?;
        let addr = self.text.put_text(&new.body, snapshot.max_note_len)?;

        let now = now();
        let mut desc = self.index.lock_descriptor()?;
        desc.check_valid(&self.id.key())?;
        let item = self.new_item(&mut desc, new, author, addr, true, now);
        let record = NoteRecord {
            item,
            response_count: 0,
            first_block: None,
        };
        self.index.write_note(NoteSlot::Policy, &record)?;
        desc.policy_exists = true;
        desc.last_modified = now;
        desc.save()?;
        *self.cached.write() = (*desc).clone();
        info!("{}: policy note replaced by {}", self.id, identity.name);
        Ok(())
    }

    /// Read the policy note
    pub fn get_policy(&self, identity: &Identity) -> Result<Note> {
        self.require(identity, Permissions::READ, "read")?;
        if !self.refresh()?.policy_exists {
            return Err(Error::NoteNotFound { note: 0 });
        }
        let record = self.index.read_note(NoteSlot::Policy)?;
        let text_size = self.text.len()?;
        if check_sane(0, 0, &record.item, Some(record.response_count), text_size).is_err() {
            return Ok(Note::placeholder(0, 0));
        }
        let body = self.text.get_text(record.item.text)?;
        Ok(Note::new(0, 0, record.item, 0, body))
    }

    /// Copy note `note` and its live responses into `dest`, keeping their
    /// global ids and authors; returns the new ordinal in `dest`
    pub fn copy_note(&self, identity: &Identity, note: i32, dest: &Self) -> Result<i32> {
        let base = self.fetch_note(identity, note, 0)?;
        if base.status.deleted {
            return Err(Error::NoteNotFound { note });
        }
        let responses = self.list_responses(identity, note)?;

        let ordinal = dest.put_note(identity, copy_of(&base))?;
        for response in responses.iter().filter(|r| !r.corrupted) {
            dest.put_resp(identity, ordinal, copy_of(response))?;
        }
        info!(
            "{}: note {note} copied to {} as note {ordinal}",
            self.id, dest.id
        );
        Ok(ordinal)
    }

    /// Change notesfile-wide settings
    pub fn set_config(&self, identity: &Identity, update: ConfigUpdate) -> Result<Descriptor> {
        self.require(identity, Permissions::DIRECTOR, "configure")?;
        if let Some(len) = update.max_note_len {
            if !(1..=HARD_MAX_TEXT_LEN).contains(&len) {
                return Err(Error::invalid_argument(format!(
                    "maximum note length must be in 1..={HARD_MAX_TEXT_LEN}"
                )));
            }
        }

        let mut desc = self.index.lock_descriptor()?;
        desc.check_valid(&self.id.key())?;
        if let Some(title) = update.title {
            desc.title = title;
        }
        if let Some(msg) = update.director_msg {
            desc.director_msg = msg;
        }
        if let Some(anonymous) = update.anonymous {
            desc.flags.anonymous = anonymous;
        }
        if let Some(locked) = update.locked {
            desc.flags.locked = locked;
        }
        if let Some(archive) = update.archive {
            desc.flags.archive = archive;
        }
        if let Some(moderated) = update.moderated {
            desc.flags.moderated = moderated;
        }
        if let Some(expiration) = update.expiration {
            desc.expiration = expiration;
        }
        if let Some(len) = update.max_note_len {
            desc.max_note_len = len;
        }
        desc.last_modified = now();
        desc.save()?;
        let updated = (*desc).clone();
        *self.cached.write() = updated.clone();
        info!("{}: configuration changed by {}", self.id, identity.name);
        Ok(updated)
    }

    /// Account for one visit lasting `seconds`
    pub fn record_entry(&self, seconds: i64) -> Result<()> {
        let mut desc = self.index.lock_descriptor()?;
        desc.check_valid(&self.id.key())?;
        desc.stats.entries += 1;
        desc.stats.walltime += seconds.max(0);
        desc.stats.last_entered = now();
        desc.save()?;
        *self.cached.write() = (*desc).clone();
        Ok(())
    }

    /// Current usage statistics
    pub fn stats(&self) -> Result<NotesfileStats> {
        let desc = self.refresh()?;
        Ok(NotesfileStats {
            title: desc.title,
            nf_number: desc.nf_number,
            total_notes: desc.total_notes,
            deleted_notes: desc.deleted_notes,
            deleted_responses: desc.deleted_responses,
            created: desc.created,
            last_modified: desc.last_modified,
            usage: desc.stats,
            text_bytes: self.text.free_pointer()?,
            response_blocks: self.responses.block_count()?,
        })
    }

    /// Slot of base note `note`, which must exist
    pub(crate) fn note_slot(&self, note: i32) -> Result<NoteSlot> {
        let slot = NoteSlot::note(note)?;
        if note > self.cached.read().total_notes && note > self.refresh()?.total_notes {
            return Err(Error::NoteNotFound { note });
        }
        Ok(slot)
    }

    /// Whether `identity` may see this base note at all
    pub(crate) fn visible(&self, item: &ItemRecord, identity: &Identity, perms: Permissions) -> bool {
        if perms.contains(Permissions::DIRECTOR) {
            return true;
        }
        !item.status.deleted && (!item.status.pending || is_author(item, identity))
    }

    /// Run the sanity check against the current text size
    pub(crate) fn verify(
        &self,
        note: i32,
        response: i32,
        item: &ItemRecord,
        response_count: Option<i32>,
    ) -> Result<()> {
        let text_size = self.text.len()?;
        check_sane(note, response, item, response_count, text_size)
    }

    fn count_read(&self) -> Result<()> {
        if !self.config.record_read_stats {
            return Ok(());
        }
        // Skip the bump rather than wait behind a compaction
        if let Some(mut desc) = self.index.try_lock_descriptor()? {
            if !desc.flags.invalid {
                desc.stats.notes_read += 1;
                desc.save()?;
            }
        }
        Ok(())
    }

    fn bump_counters(&self, update: impl FnOnce(&mut Descriptor)) -> Result<()> {
        let mut desc = self.index.lock_descriptor()?;
        // Compaction already dropped whatever we just changed
        if desc.flags.invalid {
            return Ok(());
        }
        update(&mut *desc);
        desc.last_modified = now();
        desc.save()?;
        *self.cached.write() = (*desc).clone();
        Ok(())
    }

    fn check_writable(&self, desc: &Descriptor, director: bool) -> Result<()> {
        if director {
            return Ok(());
        }
        if desc.flags.archive {
            return Err(Error::permission_denied(format!(
                "{} is an archive",
                self.id
            )));
        }
        if desc.flags.locked {
            return Err(Error::permission_denied(format!("{} is locked", self.id)));
        }
        Ok(())
    }

    fn check_owner(
        &self,
        item: &ItemRecord,
        identity: &Identity,
        perms: Permissions,
        action: &str,
    ) -> Result<()> {
        if perms.contains(Permissions::DIRECTOR) || is_author(item, identity) {
            Ok(())
        } else {
            Err(Error::permission_denied(format!(
                "{} may not {action} another author's note in {}",
                identity.name, self.id
            )))
        }
    }

    fn author_for(&self, identity: &Identity, new: &NewNote, desc: &Descriptor) -> Result<Author> {
        if !new.anonymous {
            return Ok(Author {
                name: identity.name.clone(),
                system: identity.system.clone(),
                uid: identity.uid,
            });
        }
        if !desc.flags.anonymous {
            return Err(Error::permission_denied(format!(
                "{} does not allow anonymous notes",
                self.id
            )));
        }
        Ok(Author {
            name: self.config.anonymous_name.clone(),
            system: self.system.clone(),
            uid: ANONYMOUS_UID,
        })
    }

    fn new_item(
        &self,
        desc: &mut Descriptor,
        new: NewNote,
        author: Author,
        text: TextAddr,
        director: bool,
        now: Timestamp,
    ) -> ItemRecord {
        let (id, author, authored) = match new.origin {
            Some(origin) => (origin.id, origin.author, origin.authored.min(now)),
            None => (
                GlobalId {
                    system: self.system.clone(),
                    number: desc.next_unique_id(),
                },
                author,
                now,
            ),
        };
        ItemRecord {
            id,
            title: new.title,
            author,
            authored,
            received: now,
            last_modified: now,
            status: ItemStatus {
                director_message: new.director_message && director,
                write_only: new.write_only,
                ..ItemStatus::default()
            },
            text,
        }
    }
}

fn is_author(item: &ItemRecord, identity: &Identity) -> bool {
    item.author.uid != ANONYMOUS_UID
        && item.author.name == identity.name
        && item.author.system == identity.system
}

fn apply(item: &mut ItemRecord, update: &NoteUpdate, director: bool) {
    if let Some(title) = &update.title {
        item.title.clone_from(title);
    }
    if let Some(flag) = update.director_message {
        item.status.director_message = flag && director;
    }
    if let Some(flag) = update.write_only {
        item.status.write_only = flag;
    }
}

fn check_sane(
    note: i32,
    response: i32,
    item: &ItemRecord,
    response_count: Option<i32>,
    text_size: u64,
) -> Result<()> {
    sanity::check(item, response_count, text_size, now()).map_err(|defect| {
        warn!("note {note} response {response} is corrupted: {defect}");
        Error::Corrupted { note, response }
    })
}

fn check_last_response(note: i32, response: i32, count: i32) -> Result<()> {
    if response < 1 || response > count {
        return Err(Error::ResponseNotFound { note, response });
    }
    if response < count {
        return Err(Error::Immutable(format!(
            "response {response} to note {note} has later responses"
        )));
    }
    Ok(())
}

fn copy_of(note: &Note) -> NewNote {
    NewNote {
        title: note.title.clone(),
        body: note.body.clone(),
        anonymous: false,
        director_message: note.status.director_message,
        write_only: note.status.write_only,
        origin: Some(Origin {
            id: note.id.clone(),
            author: note.author.clone(),
            authored: note.authored,
        }),
    }
}
