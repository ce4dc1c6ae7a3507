//! Access list store
//!
//! The `access` file is a bounded array of [`AccessEntry`] rows. It is
//! read whole under a shared lock and replaced whole under an exclusive
//! one.

use crate::layout::{
    ACCESS_ENTRY_SIZE, ACCESS_NAME_LEN, AccessEntry, MAX_ACCESS_ENTRIES, OTHER, Permissions,
    Scope,
};
use crate::lock::{LockKind, Region};
use crate::raw_io::RecordFile;
use notesdb_common::{Error, Identity, Result};
use tracing::debug;

/// A notesfile's permission table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessList {
    entries: Vec<AccessEntry>,
}

impl AccessList {
    /// Build from entries, rejecting oversized tables
    pub fn new(entries: Vec<AccessEntry>) -> Result<Self> {
        if entries.len() > MAX_ACCESS_ENTRIES {
            return Err(Error::invalid_argument(format!(
                "access list holds at most {MAX_ACCESS_ENTRIES} entries"
            )));
        }
        for entry in &entries {
            check_name(entry)?;
        }
        Ok(Self { entries })
    }

    /// Table given to a new notesfile: the creator directs, everyone
    /// else may read, write and reply
    #[must_use]
    pub fn default_for(creator: &str) -> Self {
        let everyone = Permissions::READ | Permissions::WRITE | Permissions::REPLY;
        Self {
            entries: vec![
                AccessEntry::new(Scope::User, creator, Permissions::all()),
                AccessEntry::new(Scope::Group, OTHER, everyone),
                AccessEntry::new(Scope::System, OTHER, everyone),
            ],
        }
    }

    /// All entries
    #[must_use]
    pub fn entries(&self) -> &[AccessEntry] {
        &self.entries
    }

    /// Add or replace the entry for `(scope, name)`
    pub fn set(&mut self, entry: AccessEntry) -> Result<()> {
        check_name(&entry)?;
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.scope == entry.scope && e.name == entry.name)
        {
            existing.perms = entry.perms;
            return Ok(());
        }
        if self.entries.len() >= MAX_ACCESS_ENTRIES {
            return Err(Error::invalid_argument(format!(
                "access list holds at most {MAX_ACCESS_ENTRIES} entries"
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Remove the entry for `(scope, name)`; returns whether one existed
    pub fn remove(&mut self, scope: Scope, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !(e.scope == scope && e.name == name));
        self.entries.len() != before
    }

    /// Effective permissions of `identity`
    ///
    /// The superuser holds everything. A caller on another system is
    /// judged by system entries only. A local caller starts from the
    /// group `other` row, gains every group row they belong to, and an
    /// exact user row replaces the result outright.
    #[must_use]
    pub fn allow(&self, identity: &Identity, superuser: &str, local_system: &str) -> Permissions {
        if identity.name == superuser && identity.system == local_system {
            return Permissions::all();
        }

        if identity.system != local_system {
            let mut perms = Permissions::empty();
            for entry in self.entries.iter().filter(|e| e.scope == Scope::System) {
                if entry.name == identity.system {
                    return entry.perms.effective();
                }
                if entry.is_other() {
                    perms = entry.perms;
                }
            }
            return perms.effective();
        }

        let mut perms = Permissions::empty();
        for entry in &self.entries {
            match entry.scope {
                Scope::User if entry.name == identity.name => return entry.perms.effective(),
                Scope::Group if entry.is_other() || identity.in_group(&entry.name) => {
                    perms |= entry.perms;
                }
                _ => {}
            }
        }
        perms.effective()
    }
}

/// Read the access list under a shared lock
pub fn load(file: &RecordFile) -> Result<AccessList> {
    let _lock = file.lock(LockKind::Read, Region::WholeFile)?;
    let data = file.read_all()?;
    let entries = data
        .chunks_exact(ACCESS_ENTRY_SIZE)
        .take(MAX_ACCESS_ENTRIES)
        .map(AccessEntry::from_bytes)
        .collect::<Result<Vec<_>>>()?;
    Ok(AccessList { entries })
}

/// Replace the access list under an exclusive lock
pub fn save(file: &RecordFile, list: &AccessList) -> Result<()> {
    let mut data = Vec::with_capacity(list.entries.len() * ACCESS_ENTRY_SIZE);
    for entry in &list.entries {
        data.extend_from_slice(&entry.to_bytes());
    }

    let _lock = file.lock(LockKind::Write, Region::WholeFile)?;
    file.set_len(0)?;
    file.write_at(0, &data)?;
    debug!(
        "saved {} access entries to {}",
        list.entries.len(),
        file.path().display()
    );
    Ok(())
}

/// Names are stored NUL-terminated in a fixed field
fn check_name(entry: &AccessEntry) -> Result<()> {
    if entry.name.len() >= ACCESS_NAME_LEN {
        return Err(Error::invalid_argument(format!(
            "access name {:?} is longer than {} bytes",
            entry.name,
            ACCESS_NAME_LEN - 1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HOST: &str = "alpha";

    fn rwr() -> Permissions {
        Permissions::READ | Permissions::WRITE | Permissions::REPLY
    }

    #[test]
    fn test_default_access() {
        let list = AccessList::default_for("alice");
        let alice = Identity::new("alice", 1001, HOST);
        let bob = Identity::new("bob", 1002, HOST);

        assert_eq!(list.allow(&alice, "notes", HOST), Permissions::all());
        let perms = list.allow(&bob, "notes", HOST);
        assert_eq!(perms, rwr());
        assert!(!perms.contains(Permissions::DIRECTOR));
    }

    #[test]
    fn test_long_names_are_rejected() {
        let longest = "g".repeat(ACCESS_NAME_LEN - 1);
        let too_long = "g".repeat(ACCESS_NAME_LEN);

        let mut list = AccessList::default_for("alice");
        list.set(AccessEntry::new(Scope::Group, longest.clone(), rwr()))
            .unwrap();
        assert!(matches!(
            list.set(AccessEntry::new(Scope::Group, too_long.clone(), rwr())),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(list.entries().len(), 4);
        assert!(matches!(
            AccessList::new(vec![AccessEntry::new(Scope::User, too_long, rwr())]),
            Err(Error::InvalidArgument(_))
        ));

        let dir = TempDir::new().unwrap();
        let file = RecordFile::create(dir.path().join("access")).unwrap();
        save(&file, &list).unwrap();
        assert_eq!(load(&file).unwrap(), list);
        assert!(list.entries().iter().any(|e| e.name == longest));
    }

    #[test]
    fn test_superuser_holds_everything() {
        let list = AccessList::new(Vec::new()).unwrap();
        let notes = Identity::new("notes", 10, HOST);
        assert_eq!(list.allow(&notes, "notes", HOST), Permissions::all());
        assert_eq!(
            list.allow(&Identity::new("bob", 1, HOST), "notes", HOST),
            Permissions::empty()
        );
    }

    #[test]
    fn test_user_entry_overrides_groups() {
        let mut list = AccessList::default_for("alice");
        list.set(AccessEntry::new(Scope::Group, "staff", Permissions::DIRECTOR))
            .unwrap();
        list.set(AccessEntry::new(Scope::User, "mallory", Permissions::READ))
            .unwrap();

        let carol = Identity::new("carol", 1003, HOST).with_group("staff");
        assert_eq!(list.allow(&carol, "notes", HOST), Permissions::all());

        let mallory = Identity::new("mallory", 1004, HOST).with_group("staff");
        assert_eq!(list.allow(&mallory, "notes", HOST), Permissions::READ);
    }

    #[test]
    fn test_write_does_not_imply_reply() {
        let list = AccessList::new(vec![AccessEntry::new(
            Scope::Group,
            OTHER,
            Permissions::WRITE,
        )])
        .unwrap();
        let perms = list.allow(&Identity::new("bob", 1, HOST), "notes", HOST);
        assert!(perms.contains(Permissions::WRITE));
        assert!(!perms.contains(Permissions::REPLY));
        assert!(!perms.contains(Permissions::READ));
    }

    #[test]
    fn test_remote_callers_use_system_entries() {
        let mut list = AccessList::default_for("alice");
        list.set(AccessEntry::new(Scope::System, "beta", Permissions::READ))
            .unwrap();

        // a remote "alice" is not the local alice
        let remote_alice = Identity::new("alice", 1001, "beta");
        assert_eq!(list.allow(&remote_alice, "notes", HOST), Permissions::READ);

        let gamma = Identity::new("bob", 1, "gamma");
        assert_eq!(list.allow(&gamma, "notes", HOST), rwr());

        // and a remote superuser name carries no special weight
        let remote_notes = Identity::new("notes", 10, "gamma");
        assert_eq!(list.allow(&remote_notes, "notes", HOST), rwr());
    }

    #[test]
    fn test_set_replaces_and_bounds() {
        let mut list = AccessList::default_for("alice");
        list.set(AccessEntry::new(Scope::User, "alice", Permissions::READ))
            .unwrap();
        assert_eq!(list.entries().len(), 3);
        assert_eq!(list.entries()[0].perms, Permissions::READ);

        for i in 3..MAX_ACCESS_ENTRIES {
            list.set(AccessEntry::new(Scope::User, format!("u{i}"), Permissions::READ))
                .unwrap();
        }
        assert!(
            list.set(AccessEntry::new(Scope::User, "one-too-many", Permissions::READ))
                .is_err()
        );
        assert!(list.remove(Scope::User, "u3"));
        assert!(!list.remove(Scope::User, "u3"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let file = RecordFile::create(dir.path().join("access")).unwrap();

        let mut list = AccessList::default_for("alice");
        save(&file, &list).unwrap();
        assert_eq!(load(&file).unwrap(), list);

        // a shorter table truncates the file
        list.remove(Scope::System, OTHER);
        save(&file, &list).unwrap();
        assert_eq!(file.len().unwrap(), 2 * ACCESS_ENTRY_SIZE as u64);
        assert_eq!(load(&file).unwrap().entries().len(), 2);
    }
}
