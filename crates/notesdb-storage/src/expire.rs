//! Expiration
//!
//! Soft-deletes notes that have not changed for longer than the
//! notesfile's threshold, optionally archiving them first. The space is
//! reclaimed by the next compaction.

use crate::layout::{DirMsgMode, ExpireAction, NoteSlot, Permissions};
use crate::notesfile::Notesfile;
use crate::sanity;
use notesdb_common::{Error, Identity, Result, Timestamp};
use tracing::{info, warn};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

impl Notesfile {
    /// Expire notes older than the notesfile's threshold as of `now`
    ///
    /// Oldest notes go first, and never so many that fewer than the
    /// policy's minimum stay live. With the archive action each note and
    /// its responses are copied into `archive` before being deleted.
    /// Returns the number of notes expired.
    pub fn expire(
        &self,
        identity: &Identity,
        now: Timestamp,
        archive: Option<&Self>,
    ) -> Result<usize> {
        self.require(identity, Permissions::DIRECTOR, "expire notes in")?;
        let desc = self.refresh()?;
        let policy = desc.expiration;

        let days = match policy.days {
            0 => self.config.default_expire_days,
            days => days,
        };
        if days < 0 {
            return Ok(0);
        }
        let archive = match (policy.action, archive) {
            (ExpireAction::Archive, None) => {
                return Err(Error::invalid_argument(format!(
                    "{} archives expired notes but no archive was given",
                    self.id
                )));
            }
            (ExpireAction::Archive, Some(archive)) => Some(archive),
            _ => None,
        };
        let cutoff = now - i64::from(days) * SECONDS_PER_DAY;

        let text_size = self.text.len()?;
        let mut live = 0;
        let mut candidates = Vec::new();
        for note in 1..=desc.total_notes {
            let record = self.index.read_note(NoteSlot::note(note)?)?;
            if record.item.status.deleted {
                continue;
            }
            live += 1;
            if let Err(defect) =
                sanity::check(&record.item, Some(record.response_count), text_size, now)
            {
                warn!("{}: not expiring corrupted note {note}: {defect}", self.id);
                continue;
            }
            let dirmsg = record.item.status.director_message;
            let eligible = match policy.by_dirmsg {
                DirMsgMode::Ignore => true,
                DirMsgMode::OnlyWith => dirmsg,
                DirMsgMode::OnlyWithout => !dirmsg,
            };
            if eligible && record.item.last_modified < cutoff {
                candidates.push((record.item.last_modified, note));
            }
        }

        candidates.sort_unstable();
        let budget = usize::try_from(live - policy.min_notes.max(0)).unwrap_or(0);
        let mut expired = 0;
        for (_, note) in candidates.into_iter().take(budget) {
            if let Some(archive) = archive {
                self.copy_note(identity, note, archive)?;
            }
            self.delete_note(identity, note)?;
            expired += 1;
        }

        if expired > 0 {
            info!(
                "{}: expired {expired} notes older than {days} days",
                self.id
            );
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConfigUpdate, NewNote};
    use crate::layout::ExpirationPolicy;
    use notesdb_common::{NotesfileId, StoreConfig, now};
    use tempfile::TempDir;

    const HOST: &str = "alpha";

    struct Fixture {
        _dir: TempDir,
        config: StoreConfig,
        nf: Notesfile,
        alice: Identity,
    }

    fn fixture(policy: ExpirationPolicy) -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            system_name: Some(HOST.into()),
            ..StoreConfig::with_root(dir.path())
        };
        let alice = Identity::new("alice", 1001, HOST);
        let nf = Notesfile::create(
            &config,
            &NotesfileId::public("test").unwrap(),
            "Test",
            &alice,
        )
        .unwrap();
        nf.set_config(
            &alice,
            ConfigUpdate {
                expiration: Some(policy),
                ..ConfigUpdate::default()
            },
        )
        .unwrap();
        Fixture {
            _dir: dir,
            config,
            nf,
            alice,
        }
    }

    fn later(days: i64) -> Timestamp {
        now() + days * SECONDS_PER_DAY
    }

    #[test]
    fn test_expire_keeps_minimum() {
        let f = fixture(ExpirationPolicy {
            days: 1,
            action: ExpireAction::Delete,
            min_notes: 1,
            ..ExpirationPolicy::default()
        });
        for i in 1..=3 {
            f.nf.put_note(&f.alice, NewNote::new(format!("n{i}"), "x"))
                .unwrap();
        }
        // nothing is old enough yet
        assert_eq!(f.nf.expire(&f.alice, now(), None).unwrap(), 0);

        assert_eq!(f.nf.expire(&f.alice, later(3), None).unwrap(), 2);
        assert_eq!(f.nf.descriptor().deleted_notes, 2);
        assert!(f.nf.get_note(&f.alice, 1, 0).unwrap().status.deleted);
        assert!(!f.nf.get_note(&f.alice, 3, 0).unwrap().status.deleted);

        // the minimum holds on later runs too
        assert_eq!(f.nf.expire(&f.alice, later(30), None).unwrap(), 0);
    }

    #[test]
    fn test_default_and_never() {
        let f = fixture(ExpirationPolicy::default());
        f.nf.put_note(&f.alice, NewNote::new("old", "x")).unwrap();
        let default_days = i64::from(f.config.default_expire_days);
        assert_eq!(f.nf.expire(&f.alice, later(default_days - 1), None).unwrap(), 0);
        assert_eq!(f.nf.expire(&f.alice, later(default_days + 1), None).unwrap(), 1);

        let f = fixture(ExpirationPolicy {
            days: -1,
            ..ExpirationPolicy::default()
        });
        f.nf.put_note(&f.alice, NewNote::new("old", "x")).unwrap();
        assert_eq!(f.nf.expire(&f.alice, later(10_000), None).unwrap(), 0);
    }

    #[test]
    fn test_director_message_filter() {
        let f = fixture(ExpirationPolicy {
            days: 1,
            action: ExpireAction::Delete,
            by_dirmsg: DirMsgMode::OnlyWithout,
            min_notes: 0,
        });
        f.nf.put_note(&f.alice, NewNote::new("plain", "x")).unwrap();
        f.nf.put_note(
            &f.alice,
            NewNote {
                director_message: true,
                ..NewNote::new("pinned", "x")
            },
        )
        .unwrap();

        assert_eq!(f.nf.expire(&f.alice, later(5), None).unwrap(), 1);
        assert!(f.nf.get_note(&f.alice, 1, 0).unwrap().status.deleted);
        assert!(!f.nf.get_note(&f.alice, 2, 0).unwrap().status.deleted);
    }

    #[test]
    fn test_archive_action() {
        let f = fixture(ExpirationPolicy {
            days: 1,
            action: ExpireAction::Archive,
            ..ExpirationPolicy::default()
        });
        let n = f.nf.put_note(&f.alice, NewNote::new("old", "body")).unwrap();
        f.nf.put_resp(&f.alice, n, NewNote::new("", "reply")).unwrap();

        assert!(matches!(
            f.nf.expire(&f.alice, later(5), None),
            Err(Error::InvalidArgument(_))
        ));

        let archive = Notesfile::create(
            &f.config,
            &NotesfileId::public("test-archive").unwrap(),
            "Test archive",
            &f.alice,
        )
        .unwrap();
        assert_eq!(f.nf.expire(&f.alice, later(5), Some(&archive)).unwrap(), 1);

        let original = f.nf.get_note(&f.alice, 1, 0).unwrap();
        let copied = archive.get_note(&f.alice, 1, 0).unwrap();
        assert!(original.status.deleted);
        assert_eq!(copied.id, original.id);
        assert_eq!(copied.body, b"body");
        assert_eq!(copied.response_count, 1);
        assert_eq!(archive.get_note(&f.alice, 1, 1).unwrap().body, b"reply");
    }

    #[test]
    fn test_only_directors_expire() {
        let f = fixture(ExpirationPolicy::default());
        let bob = Identity::new("bob", 1002, HOST);
        assert!(f.nf.expire(&bob, now(), None).unwrap_err().is_permission_denied());
    }
}
