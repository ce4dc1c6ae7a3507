//! Core type definitions for notesdb
//!
//! Notesfile names and identifiers, the request-scoped caller identity,
//! and the timestamp helpers shared by the engine and its tools.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a notesfile or owner name, in bytes
pub const MAX_NAME_LEN: usize = 32;

/// Seconds since the Unix epoch, as stored in every on-disk timestamp
pub type Timestamp = i64;

/// Current wall-clock time as a [`Timestamp`]
#[must_use]
pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

/// Render a timestamp for humans (UTC, minute resolution)
#[must_use]
pub fn format_timestamp(ts: Timestamp) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map_or_else(|| format!("@{ts}"), |dt| dt.format("%Y-%m-%d %H:%M").to_string())
}

/// A validated notesfile (or owner) name
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct NotesfileName(String);

impl NotesfileName {
    /// Create a new name, rejecting anything that cannot be a directory entry
    pub fn new(name: impl Into<String>) -> Result<Self, NotesfileNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<(), NotesfileNameError> {
        if name.is_empty() {
            return Err(NotesfileNameError::Empty);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(NotesfileNameError::TooLong);
        }
        if name.starts_with('.') || name.starts_with('~') {
            return Err(NotesfileNameError::ReservedPrefix);
        }
        if let Some(c) = name
            .chars()
            .find(|c| *c == '/' || c.is_whitespace() || c.is_control())
        {
            return Err(NotesfileNameError::InvalidChar(c));
        }
        Ok(())
    }
}

impl fmt::Debug for NotesfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotesfileName({:?})", self.0)
    }
}

/// Errors that can occur when creating a notesfile name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotesfileNameError {
    #[error("name must not be empty")]
    Empty,
    #[error("name must be at most 32 bytes")]
    TooLong,
    #[error("name must not begin with '.' or '~'")]
    ReservedPrefix,
    #[error("name contains invalid character: {0:?}")]
    InvalidChar(char),
}

/// A notesfile: an optional owner plus a name
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotesfileId {
    pub owner: Option<NotesfileName>,
    pub name: NotesfileName,
}

impl NotesfileId {
    /// A public notesfile
    pub fn public(name: impl Into<String>) -> Result<Self, NotesfileNameError> {
        Ok(Self {
            owner: None,
            name: NotesfileName::new(name)?,
        })
    }

    /// A notesfile owned by `owner`
    pub fn owned(
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, NotesfileNameError> {
        Ok(Self {
            owner: Some(NotesfileName::new(owner)?),
            name: NotesfileName::new(name)?,
        })
    }

    /// Parse `name` or `owner/name`
    pub fn parse(spec: &str) -> Result<Self, NotesfileNameError> {
        match spec.split_once('/') {
            Some((owner, name)) => Self::owned(owner, name),
            None => Self::public(spec),
        }
    }

    /// Key used in sequencer files and log lines
    #[must_use]
    pub fn key(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{owner}/{}", self.name),
            None => self.name.to_string(),
        }
    }
}

impl fmt::Display for NotesfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// The caller of an engine operation
///
/// Resolved once per request and threaded through explicitly; the engine
/// never caches identity process-wide.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Login name
    pub name: String,
    /// Numeric user id (-1 for anonymous)
    pub uid: i32,
    /// Names of the groups the caller belongs to
    pub groups: Vec<String>,
    /// System the caller is on
    pub system: String,
}

impl Identity {
    /// Build an identity by hand
    pub fn new(name: impl Into<String>, uid: i32, system: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid,
            groups: Vec::new(),
            system: system.into(),
        }
    }

    /// Add a group membership
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Resolve the effective identity of the calling process
    pub fn current(system: impl Into<String>) -> std::io::Result<Self> {
        use nix::unistd::{Group, User, geteuid, getegid};

        let uid = geteuid();
        let user = User::from_uid(uid)?
            .ok_or_else(|| std::io::Error::other(format!("no passwd entry for uid {uid}")))?;

        let mut gids = vec![getegid()];
        #[cfg(target_os = "linux")]
        gids.extend(nix::unistd::getgroups()?);
        gids.sort_unstable_by_key(|gid| gid.as_raw());
        gids.dedup();

        let mut groups = Vec::with_capacity(gids.len());
        for gid in gids {
            if let Some(group) = Group::from_gid(gid)? {
                groups.push(group.name);
            }
        }

        Ok(Self {
            name: user.name,
            uid: i32::try_from(uid.as_raw()).unwrap_or(i32::MAX),
            groups,
            system: system.into(),
        })
    }

    /// Whether the caller belongs to `group`
    #[must_use]
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Name of the local system
#[must_use]
pub fn local_system_name() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(NotesfileName::new("general").is_ok());
        assert!(NotesfileName::new("net.unix-wizards").is_ok());
        assert!(NotesfileName::new("a").is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert_eq!(NotesfileName::new(""), Err(NotesfileNameError::Empty));
        assert_eq!(
            NotesfileName::new("x".repeat(MAX_NAME_LEN + 1)),
            Err(NotesfileNameError::TooLong)
        );
        assert_eq!(
            NotesfileName::new(".SEQ"),
            Err(NotesfileNameError::ReservedPrefix)
        );
        assert_eq!(
            NotesfileName::new("~alice"),
            Err(NotesfileNameError::ReservedPrefix)
        );
        assert_eq!(
            NotesfileName::new("a/b"),
            Err(NotesfileNameError::InvalidChar('/'))
        );
        assert_eq!(
            NotesfileName::new("a b"),
            Err(NotesfileNameError::InvalidChar(' '))
        );
    }

    #[test]
    fn test_notesfile_id_parse_and_key() {
        let public = NotesfileId::parse("general").unwrap();
        assert!(public.owner.is_none());
        assert_eq!(public.key(), "general");

        let owned = NotesfileId::parse("alice/todo").unwrap();
        assert_eq!(owned.owner.as_ref().unwrap().as_str(), "alice");
        assert_eq!(owned.key(), "alice/todo");
        assert_eq!(owned.to_string(), "alice/todo");

        assert!(NotesfileId::parse("alice/").is_err());
    }

    #[test]
    fn test_identity_groups() {
        let id = Identity::new("bob", 1001, "host").with_group("staff");
        assert!(id.in_group("staff"));
        assert!(!id.in_group("wheel"));
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00");
    }
}
