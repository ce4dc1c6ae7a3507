//! Notesfile handles and lifecycle
//!
//! A notesfile is a directory holding four files:
//! ```text
//! <root>/<name>/            public notesfile
//! <root>/~<owner>/<name>/   owned notesfile
//!     note.indx   descriptor + note index
//!     resp.indx   response blocks
//!     text        text log
//!     access      access list
//! ```
//! A [`Notesfile`] keeps exactly one open handle per file for its
//! lifetime, since closing any descriptor of a file would drop every
//! byte-range lock this process holds on it.

use crate::access::{self, AccessList};
use crate::descriptor::IndexFile;
use crate::layout::{Descriptor, Permissions};
use crate::lock::{LockKind, Region};
use crate::raw_io::{RecordFile, with_path};
use crate::response::ResponseIndex;
use crate::text::TextLog;
use notesdb_common::{Error, Identity, NotesfileId, NotesfileName, Result, StoreConfig, now};
use parking_lot::RwLock;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Descriptor and note index
pub const INDEX_FILE: &str = "note.indx";
/// Response blocks
pub const RESPONSE_FILE: &str = "resp.indx";
/// Text log
pub const TEXT_FILE: &str = "text";
/// Access list
pub const ACCESS_FILE: &str = "access";
/// Installation-wide notesfile number counter, in the spool root
pub const REGISTRY_FILE: &str = ".SEQ";

/// Directory of notesfile `id` under `root`
#[must_use]
pub fn notesfile_dir(root: &Path, id: &NotesfileId) -> PathBuf {
    match &id.owner {
        Some(owner) => root.join(format!("~{owner}")).join(id.name.as_str()),
        None => root.join(id.name.as_str()),
    }
}

/// An open notesfile
#[derive(Debug)]
pub struct Notesfile {
    pub(crate) id: NotesfileId,
    pub(crate) dir: PathBuf,
    pub(crate) config: StoreConfig,
    pub(crate) system: String,
    pub(crate) index: IndexFile,
    pub(crate) responses: ResponseIndex,
    pub(crate) text: TextLog,
    pub(crate) access: RecordFile,
    /// Descriptor as of the last time this handle read or wrote it
    pub(crate) cached: RwLock<Descriptor>,
}

impl Notesfile {
    /// Create a new, empty notesfile owned (directed) by `creator`
    pub fn create(
        config: &StoreConfig,
        id: &NotesfileId,
        title: &str,
        creator: &Identity,
    ) -> Result<Self> {
        config.validate()?;
        let dir = notesfile_dir(&config.root, id);
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).map_err(|e| with_path(parent, "create", e))?;
        }
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(id.key()));
            }
            Err(e) => return Err(with_path(&dir, "create", e)),
        }

        if let Err(e) = Self::populate(config, &dir, title, creator) {
            // Leave nothing half-built behind for open() to trip over
            let _ = fs::remove_dir_all(&dir);
            return Err(e);
        }
        info!("created notesfile {id} in {}", dir.display());
        Self::open(config, id)
    }

    fn populate(config: &StoreConfig, dir: &Path, title: &str, creator: &Identity) -> Result<()> {
        let number = next_notesfile_number(&config.root)?;
        let descriptor = Descriptor::new(title, number, config.default_max_note_len, now());
        IndexFile::create(dir.join(INDEX_FILE), &descriptor)?;
        ResponseIndex::create(dir.join(RESPONSE_FILE))?;
        TextLog::create(dir.join(TEXT_FILE))?;
        let access_file = RecordFile::create(dir.join(ACCESS_FILE))?;
        access::save(&access_file, &AccessList::default_for(&creator.name))?;
        debug!("notesfile {} drew number {number}", dir.display());
        Ok(())
    }

    /// Open an existing notesfile
    pub fn open(config: &StoreConfig, id: &NotesfileId) -> Result<Self> {
        let dir = notesfile_dir(&config.root, id);
        if !dir.join(INDEX_FILE).is_file() {
            return Err(Error::NotesfileNotFound(id.key()));
        }

        let index = IndexFile::open(dir.join(INDEX_FILE))?;
        let descriptor = index.read_descriptor()?;
        if descriptor.flags.invalid {
            return Err(Error::NotesfileInvalid(id.key()));
        }

        let notesfile = Self {
            id: id.clone(),
            responses: ResponseIndex::open(dir.join(RESPONSE_FILE))?,
            text: TextLog::open(dir.join(TEXT_FILE))?,
            access: RecordFile::open(dir.join(ACCESS_FILE))?,
            index,
            dir,
            config: config.clone(),
            system: config.system_name(),
            cached: RwLock::new(descriptor),
        };
        debug!(
            "opened notesfile {id}: {} notes",
            notesfile.cached.read().total_notes
        );
        Ok(notesfile)
    }

    /// Remove a notesfile and everything in it
    pub fn destroy(config: &StoreConfig, id: &NotesfileId, identity: &Identity) -> Result<()> {
        let notesfile = Self::open(config, id)?;
        notesfile.require(identity, Permissions::DIRECTOR, "destroy")?;
        let dir = notesfile.dir.clone();
        drop(notesfile);

        fs::remove_dir_all(&dir).map_err(|e| with_path(&dir, "remove", e))?;
        info!("destroyed notesfile {id}");
        Ok(())
    }

    /// Every notesfile under the spool root, public ones first
    pub fn list(config: &StoreConfig) -> Result<Vec<NotesfileId>> {
        let mut public = Vec::new();
        let mut owned = Vec::new();
        for (name, path) in subdirs(&config.root)? {
            if let Some(owner) = name.strip_prefix('~') {
                let Ok(owner) = NotesfileName::new(owner) else {
                    continue;
                };
                for (name, path) in subdirs(&path)? {
                    if let (Ok(name), true) = (NotesfileName::new(name), is_notesfile(&path)) {
                        owned.push(NotesfileId {
                            owner: Some(owner.clone()),
                            name,
                        });
                    }
                }
            } else if let (Ok(name), true) = (NotesfileName::new(name), is_notesfile(&path)) {
                public.push(NotesfileId { owner: None, name });
            }
        }
        public.sort_by(|a, b| a.name.cmp(&b.name));
        owned.sort_by(|a, b| (&a.owner, &a.name).cmp(&(&b.owner, &b.name)));
        public.extend(owned);
        Ok(public)
    }

    /// Notesfile identifier
    pub const fn id(&self) -> &NotesfileId {
        &self.id
    }

    /// Directory holding the notesfile
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// System name stamped into new global ids
    pub fn system(&self) -> &str {
        &self.system
    }

    /// Descriptor as last seen by this handle
    pub fn descriptor(&self) -> Descriptor {
        self.cached.read().clone()
    }

    /// Re-read the descriptor from disk
    pub fn refresh(&self) -> Result<Descriptor> {
        let descriptor = self.index.read_descriptor()?;
        if descriptor.flags.invalid {
            return Err(Error::NotesfileInvalid(self.id.key()));
        }
        *self.cached.write() = descriptor.clone();
        Ok(descriptor)
    }

    /// Effective permissions of `identity` on this notesfile
    pub fn permissions(&self, identity: &Identity) -> Result<Permissions> {
        let list = access::load(&self.access)?;
        Ok(list.allow(identity, &self.config.superuser, &self.system))
    }

    /// The access list
    pub fn access_list(&self, identity: &Identity) -> Result<AccessList> {
        self.require(identity, Permissions::READ, "read the access list of")?;
        access::load(&self.access)
    }

    /// Replace the access list
    pub fn replace_access(&self, identity: &Identity, list: &AccessList) -> Result<()> {
        self.require(identity, Permissions::DIRECTOR, "change the access list of")?;
        access::save(&self.access, list)?;
        info!("access list of {} replaced by {}", self.id, identity.name);
        Ok(())
    }

    /// Fail unless `identity` holds `needed`; returns everything it holds
    pub(crate) fn require(
        &self,
        identity: &Identity,
        needed: Permissions,
        action: &str,
    ) -> Result<Permissions> {
        let perms = self.permissions(identity)?;
        if perms.contains(needed) {
            Ok(perms)
        } else {
            Err(Error::permission_denied(format!(
                "{} may not {action} {}",
                identity.name, self.id
            )))
        }
    }
}

/// Draw the next notesfile number from the installation registry
///
/// Global ids are `nf_number * 100_000_000 + unique_seq`, so they are
/// unique across notesfiles only as long as every notesfile of the
/// installation draws its number here. The counter only grows and the
/// file is never truncated; numbers are never reused.
pub fn next_notesfile_number(root: &Path) -> Result<i32> {
    fs::create_dir_all(root).map_err(|e| with_path(root, "create", e))?;
    let registry = RecordFile::open_or_create(root.join(REGISTRY_FILE))?;
    let _lock = registry.lock(LockKind::Write, Region::WholeFile)?;

    let mut buf = [0u8; 4];
    let last = if registry.len()? >= 4 {
        registry.read_at(0, &mut buf)?;
        i32::from_le_bytes(buf)
    } else {
        0
    };
    let next = last
        .checked_add(1)
        .ok_or_else(|| Error::storage("notesfile number registry exhausted"))?;
    registry.write_at(0, &next.to_le_bytes())?;
    registry.sync()?;
    Ok(next)
}

fn subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(with_path(dir, "list", e)),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| with_path(dir, "list", e))?;
        let path = entry.path();
        if path.is_dir() {
            out.push((entry.file_name().to_string_lossy().into_owned(), path));
        }
    }
    Ok(out)
}

fn is_notesfile(dir: &Path) -> bool {
    dir.join(INDEX_FILE).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{FORMAT_VERSION, OTHER, Scope};
    use tempfile::TempDir;

    const HOST: &str = "alpha";

    fn setup() -> (TempDir, StoreConfig, Identity) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            system_name: Some(HOST.into()),
            ..StoreConfig::with_root(dir.path())
        };
        (dir, config, Identity::new("alice", 1001, HOST))
    }

    #[test]
    fn test_create_and_open() {
        let (_dir, config, alice) = setup();
        let id = NotesfileId::public("general").unwrap();
        let nf = Notesfile::create(&config, &id, "General chatter", &alice).unwrap();

        let desc = nf.descriptor();
        assert_eq!(desc.version, FORMAT_VERSION);
        assert_eq!(desc.title, "General chatter");
        assert_eq!(desc.total_notes, 0);
        assert_eq!(desc.nf_number, 1);
        assert_eq!(nf.dir(), config.root.join("general"));
        assert_eq!(nf.text.free_pointer().unwrap(), 8);
        assert_eq!(nf.responses.block_count().unwrap(), 0);

        let reopened = Notesfile::open(&config, &id).unwrap();
        assert_eq!(reopened.descriptor(), desc);
    }

    #[test]
    fn test_create_refuses_duplicates() {
        let (_dir, config, alice) = setup();
        let id = NotesfileId::public("general").unwrap();
        Notesfile::create(&config, &id, "first", &alice).unwrap();
        assert!(matches!(
            Notesfile::create(&config, &id, "second", &alice),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_numbers_are_unique() {
        let (_dir, config, alice) = setup();
        let a = Notesfile::create(&config, &NotesfileId::public("a").unwrap(), "a", &alice).unwrap();
        let b = Notesfile::create(&config, &NotesfileId::owned("bob", "b").unwrap(), "b", &alice)
            .unwrap();
        assert_eq!(a.descriptor().nf_number, 1);
        assert_eq!(b.descriptor().nf_number, 2);
        assert_eq!(next_notesfile_number(&config.root).unwrap(), 3);
    }

    #[test]
    fn test_open_missing() {
        let (_dir, config, _) = setup();
        let id = NotesfileId::public("nowhere").unwrap();
        assert!(matches!(
            Notesfile::open(&config, &id),
            Err(Error::NotesfileNotFound(name)) if name == "nowhere"
        ));
    }

    #[test]
    fn test_open_rejects_other_versions() {
        let (_dir, config, alice) = setup();
        let id = NotesfileId::public("old").unwrap();
        let nf = Notesfile::create(&config, &id, "old", &alice).unwrap();
        let mut desc = nf.descriptor();
        desc.version = 5;
        nf.index.write_descriptor(&desc).unwrap();

        assert!(matches!(
            Notesfile::open(&config, &id),
            Err(Error::VersionMismatch {
                expected: 6,
                found: 5
            })
        ));
    }

    #[test]
    fn test_default_access() {
        let (_dir, config, alice) = setup();
        let id = NotesfileId::public("general").unwrap();
        let nf = Notesfile::create(&config, &id, "General", &alice).unwrap();

        assert_eq!(nf.permissions(&alice).unwrap(), Permissions::all());
        let bob = Identity::new("bob", 1002, HOST);
        assert_eq!(
            nf.permissions(&bob).unwrap(),
            Permissions::READ | Permissions::WRITE | Permissions::REPLY
        );

        let list = nf.access_list(&bob).unwrap();
        assert!(list.entries().iter().any(|e| e.scope == Scope::System && e.name == OTHER));
    }

    #[test]
    fn test_only_directors_replace_access() {
        let (_dir, config, alice) = setup();
        let id = NotesfileId::public("general").unwrap();
        let nf = Notesfile::create(&config, &id, "General", &alice).unwrap();
        let bob = Identity::new("bob", 1002, HOST);

        let mut list = nf.access_list(&alice).unwrap();
        list.set(crate::layout::AccessEntry::new(
            Scope::User,
            "bob",
            Permissions::READ,
        ))
        .unwrap();
        assert!(nf.replace_access(&bob, &list).unwrap_err().is_permission_denied());
        nf.replace_access(&alice, &list).unwrap();
        assert_eq!(nf.permissions(&bob).unwrap(), Permissions::READ);
    }

    #[test]
    fn test_list_and_destroy() {
        let (_dir, config, alice) = setup();
        let general = NotesfileId::public("general").unwrap();
        let todo = NotesfileId::owned("alice", "todo").unwrap();
        Notesfile::create(&config, &todo, "todo", &alice).unwrap();
        Notesfile::create(&config, &general, "General", &alice).unwrap();

        assert_eq!(
            Notesfile::list(&config).unwrap(),
            vec![general.clone(), todo.clone()]
        );

        let bob = Identity::new("bob", 1002, HOST);
        assert!(Notesfile::destroy(&config, &general, &bob)
            .unwrap_err()
            .is_permission_denied());
        Notesfile::destroy(&config, &general, &alice).unwrap();
        assert_eq!(Notesfile::list(&config).unwrap(), vec![todo]);
        assert!(Notesfile::open(&config, &general).unwrap_err().is_not_found());
    }
}
