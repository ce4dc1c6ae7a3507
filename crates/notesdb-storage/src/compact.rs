//! Compactor
//!
//! Rebuilds a notesfile into fresh files, dropping deleted and corrupted
//! notes and responses and the text they referenced, then swaps the new
//! files into place.
//!
//! The descriptor write lock on the original is held for the whole
//! rebuild, so writers block while readers of the original keep going.
//! Once the copy is complete the original is marked invalid and each of
//! the three rebuilt files replaces its original with
//! unlink, hard link, unlink. Each swap is atomic on its own; the three
//! together are not, and a crash between swaps leaves a mix of old and
//! new files that must be repaired by hand. The access list is not
//! rebuilt.

use crate::descriptor::IndexFile;
use crate::layout::{NoteRecord, NoteSlot, Permissions};
use crate::notesfile::{INDEX_FILE, Notesfile, RESPONSE_FILE, TEXT_FILE};
use crate::raw_io::with_path;
use crate::response::ResponseIndex;
use crate::sanity;
use crate::text::TextLog;
use notesdb_common::{Error, Identity, Result, now};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const STAGING_SUFFIX: &str = ".new";

/// Outcome of a compaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// Notes carried over
    pub notes: i32,
    /// Responses carried over
    pub responses: i64,
    pub dropped_notes: i32,
    pub dropped_responses: i64,
    pub text_bytes_before: u64,
    pub text_bytes_after: u64,
}

/// The three rebuilt files, next to the originals
struct Staged {
    dir: PathBuf,
    index: IndexFile,
    responses: ResponseIndex,
    text: TextLog,
}

impl Staged {
    fn create(dir: &Path, descriptor: &crate::layout::Descriptor) -> Result<Self> {
        // Leftovers of a compaction that died; the descriptor lock is ours
        for name in [INDEX_FILE, RESPONSE_FILE, TEXT_FILE] {
            let path = staged_path(dir, name);
            match fs::remove_file(&path) {
                Ok(()) => warn!("removed stale {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(with_path(&path, "remove", e)),
            }
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            index: IndexFile::create(staged_path(dir, INDEX_FILE), descriptor)?,
            responses: ResponseIndex::create(staged_path(dir, RESPONSE_FILE))?,
            text: TextLog::create(staged_path(dir, TEXT_FILE))?,
        })
    }

    fn sync(&self) -> Result<()> {
        self.index.file().sync()?;
        self.responses.file().sync()?;
        self.text.file().sync()
    }

    /// Replace each original with its rebuilt file
    fn swap(self) -> Result<()> {
        let dir = self.dir.clone();
        drop(self);
        for name in [INDEX_FILE, RESPONSE_FILE, TEXT_FILE] {
            let original = dir.join(name);
            let staged = staged_path(&dir, name);
            fs::remove_file(&original).map_err(|e| with_path(&original, "unlink", e))?;
            fs::hard_link(&staged, &original).map_err(|e| with_path(&original, "link", e))?;
            fs::remove_file(&staged).map_err(|e| with_path(&staged, "unlink", e))?;
            debug!("swapped in {}", original.display());
        }
        Ok(())
    }
}

fn staged_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}{STAGING_SUFFIX}"))
}

impl Notesfile {
    /// Rebuild this notesfile without its deleted and corrupted entries
    ///
    /// Consumes the handle: once the files are swapped it refers to the
    /// old, unlinked files. Reopen to keep working.
    pub fn compact(self, identity: &Identity) -> Result<CompactionReport> {
        self.require(identity, Permissions::DIRECTOR, "compact")?;
        let key = self.id.key();

        let mut original = self.index.lock_descriptor()?;
        if original.flags.invalid {
            return Err(Error::AlreadyCompressing(key));
        }
        info!("compacting {key}: {} notes", original.total_notes);

        let mut fresh = (*original).clone();
        fresh.total_notes = 0;
        fresh.deleted_notes = 0;
        fresh.deleted_responses = 0;
        let staged = Staged::create(&self.dir, &fresh)?;

        let text_size = self.text.len()?;
        let now = now();
        let mut report = CompactionReport {
            text_bytes_before: self.text.free_pointer()?,
            dropped_responses: i64::from(original.deleted_responses),
            ..CompactionReport::default()
        };

        if original.policy_exists {
            let mut policy = self.index.read_note(NoteSlot::Policy)?;
            match staged.text.move_text(&self.text, policy.item.text) {
                Ok(addr) => {
                    policy.item.text = addr;
                    staged.index.write_note(NoteSlot::Policy, &policy)?;
                }
                Err(e) => {
                    warn!("{key}: dropping unreadable policy note: {e}");
                    fresh.policy_exists = false;
                }
            }
        }

        for note in 1..=original.total_notes {
            let record = self.index.read_note(NoteSlot::note(note)?)?;
            if record.item.status.deleted {
                report.dropped_notes += 1;
                report.dropped_responses += i64::from(record.response_count.max(0));
                continue;
            }
            if let Err(defect) = sanity::check(&record.item, Some(record.response_count), text_size, now) {
                warn!("{key}: dropping corrupted note {note}: {defect}");
                report.dropped_notes += 1;
                continue;
            }

            let ordinal = fresh.total_notes + 1;
            let mut copy = NoteRecord {
                item: record.item.clone(),
                response_count: 0,
                first_block: None,
            };
            copy.item.text = staged.text.move_text(&self.text, record.item.text)?;

            for response in 1..=record.response_count {
                let mut item = match self.responses.read_response(note, &record, response) {
                    Ok(item) => item,
                    Err(e) if e.is_corrupted() || e.is_not_found() => {
                        warn!("{key}: dropping response {response} of note {note}: {e}");
                        report.dropped_responses += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if let Err(defect) = sanity::check(&item, None, text_size, now) {
                    warn!("{key}: dropping corrupted response {response} of note {note}: {defect}");
                    report.dropped_responses += 1;
                    continue;
                }
                item.text = staged.text.move_text(&self.text, item.text)?;
                staged.responses.append(ordinal, &mut copy, item)?;
                report.responses += 1;
            }

            staged.index.write_note(NoteSlot::note(ordinal)?, &copy)?;
            fresh.total_notes = ordinal;
            report.notes += 1;
        }

        staged.index.write_descriptor(&fresh)?;
        report.text_bytes_after = staged.text.free_pointer()?;
        staged.sync()?;

        original.flags.invalid = true;
        original.save()?;
        self.index.file().sync()?;
        drop(original);

        staged.swap()?;
        info!(
            "compacted {key}: kept {} notes and {} responses, dropped {} notes and {} responses",
            report.notes, report.responses, report.dropped_notes, report.dropped_responses
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NewNote;
    use notesdb_common::{HARD_MAX_TEXT_LEN, NotesfileId, StoreConfig};
    use tempfile::TempDir;

    const HOST: &str = "alpha";

    fn setup() -> (TempDir, StoreConfig, NotesfileId, Identity) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            system_name: Some(HOST.into()),
            ..StoreConfig::with_root(dir.path())
        };
        let id = NotesfileId::public("test").unwrap();
        (dir, config, id, Identity::new("alice", 1001, HOST))
    }

    #[test]
    fn test_compaction_scenario() {
        let (_dir, config, id, alice) = setup();
        let nf = Notesfile::create(&config, &id, "Test", &alice).unwrap();
        let n = nf.put_note(&alice, NewNote::new("Hello", "Hello")).unwrap();
        nf.put_resp(&alice, n, NewNote::new("", "World")).unwrap();
        nf.delete_response(&alice, n, 1).unwrap();
        assert!(nf.get_note(&alice, 1, 1).unwrap_err().is_not_found());

        let report = nf.compact(&alice).unwrap();
        assert_eq!(report.notes, 1);
        assert_eq!(report.responses, 0);

        let nf = Notesfile::open(&config, &id).unwrap();
        let desc = nf.descriptor();
        assert_eq!(desc.total_notes, 1);
        assert_eq!(desc.deleted_responses, 0);
        assert_eq!(nf.get_note(&alice, 1, 0).unwrap().response_count, 0);
        assert_eq!(nf.get_note(&alice, 1, 0).unwrap().body, b"Hello");
    }

    #[test]
    fn test_compaction_preserves_live_data() {
        let (_dir, config, id, alice) = setup();
        let bob = Identity::new("bob", 1002, HOST);
        let nf = Notesfile::create(&config, &id, "Test", &alice).unwrap();
        nf.put_policy(&alice, NewNote::new("rules", "be nice"))
            .unwrap();
        for i in 1..=6 {
            let n = nf
                .put_note(&bob, NewNote::new(format!("note {i}"), format!("text {i}")))
                .unwrap();
            for r in 1..=7 {
                nf.put_resp(&alice, n, NewNote::new("", format!("resp {i}.{r}")))
                    .unwrap();
            }
        }
        nf.delete_note(&alice, 2).unwrap();
        nf.delete_note(&alice, 5).unwrap();
        nf.delete_response(&alice, 1, 3).unwrap();
        nf.delete_response(&alice, 6, 7).unwrap();
        nf.modify_text(&bob, 4, 0, b"rewritten").unwrap();

        let before: Vec<(String, String, Vec<String>)> = [1, 3, 4, 6]
            .iter()
            .map(|&n| {
                let note = nf.get_note(&alice, n, 0).unwrap();
                let responses = nf
                    .list_responses(&alice, n)
                    .unwrap()
                    .into_iter()
                    .map(|r| r.body_text().into_owned())
                    .collect();
                (note.title.clone(), note.body_text().into_owned(), responses)
            })
            .collect();
        let text_before = nf.stats().unwrap().text_bytes;

        let report = nf.compact(&alice).unwrap();
        assert_eq!(report.notes, 4);
        assert_eq!(report.dropped_notes, 2);
        assert_eq!(report.responses, 26);
        assert!(report.text_bytes_after < text_before);

        let nf = Notesfile::open(&config, &id).unwrap();
        let stats = nf.stats().unwrap();
        assert_eq!(stats.total_notes, 4);
        assert_eq!(stats.deleted_notes, 0);
        assert_eq!(stats.deleted_responses, 0);

        let after: Vec<(String, String, Vec<String>)> = (1..=4)
            .map(|n| {
                let note = nf.get_note(&alice, n, 0).unwrap();
                let responses = nf
                    .list_responses(&alice, n)
                    .unwrap()
                    .into_iter()
                    .map(|r| r.body_text().into_owned())
                    .collect();
                (note.title.clone(), note.body_text().into_owned(), responses)
            })
            .collect();
        assert_eq!(after, before);
        assert_eq!(nf.get_policy(&bob).unwrap().body, b"be nice");
        assert_eq!(nf.get_note(&alice, 3, 0).unwrap().author.name, "bob");

        // compacting again changes nothing
        let report = nf.compact(&alice).unwrap();
        assert_eq!((report.notes, report.responses), (4, 26));
        assert_eq!(report.dropped_notes, 0);
        assert_eq!(report.text_bytes_before, report.text_bytes_after);
    }

    #[test]
    fn test_corrupted_notes_are_dropped() {
        let (_dir, config, id, alice) = setup();
        let nf = Notesfile::create(&config, &id, "Test", &alice).unwrap();
        for i in 1..=3 {
            nf.put_note(&alice, NewNote::new(format!("n{i}"), "x")).unwrap();
        }
        {
            let mut record = nf.index.lock_note(NoteSlot::note(2).unwrap()).unwrap();
            record.item.text.length = HARD_MAX_TEXT_LEN * 2;
            record.save().unwrap();
        }
        let report = nf.compact(&alice).unwrap();
        assert_eq!(report.notes, 2);
        assert_eq!(report.dropped_notes, 1);

        let nf = Notesfile::open(&config, &id).unwrap();
        assert_eq!(nf.get_note(&alice, 2, 0).unwrap().title, "n3");
    }

    #[test]
    fn test_stale_handles_see_invalid() {
        let (_dir, config, id, alice) = setup();
        let nf = Notesfile::create(&config, &id, "Test", &alice).unwrap();
        nf.put_note(&alice, NewNote::new("t", "x")).unwrap();
        let stale = Notesfile::open(&config, &id).unwrap();

        nf.compact(&alice).unwrap();
        assert!(matches!(
            stale.put_note(&alice, NewNote::new("late", "x")),
            Err(Error::NotesfileInvalid(_))
        ));
        // a second compaction through the stale handle is refused
        assert!(matches!(
            stale.compact(&alice),
            Err(Error::AlreadyCompressing(_))
        ));

        let fresh = Notesfile::open(&config, &id).unwrap();
        assert!(fresh.put_note(&alice, NewNote::new("ok", "x")).is_ok());
        assert!(!fresh.dir().join("note.indx.new").exists());
    }

    #[test]
    fn test_only_directors_compact() {
        let (_dir, config, id, alice) = setup();
        let nf = Notesfile::create(&config, &id, "Test", &alice).unwrap();
        let bob = Identity::new("bob", 1002, HOST);
        assert!(nf.compact(&bob).unwrap_err().is_permission_denied());
    }
}
