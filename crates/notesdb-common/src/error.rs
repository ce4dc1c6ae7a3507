//! Error types for notesdb
//!
//! Every engine operation returns one of these kinds so callers can tell
//! "no such note" from "not allowed" from "I/O broke".

use crate::types::NotesfileNameError;
use thiserror::Error;

/// Common result type for notesdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for notesdb
#[derive(Debug, Error)]
pub enum Error {
    // Storage errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("format version mismatch: engine speaks {expected}, notesfile has {found}")]
    VersionMismatch { expected: i32, found: i32 },

    #[error("corrupted record: note {note}, response {response}")]
    Corrupted { note: i32, response: i32 },

    // Lookup errors
    #[error("notesfile not found: {0}")]
    NotesfileNotFound(String),

    #[error("notesfile already exists: {0}")]
    AlreadyExists(String),

    #[error("note not found: {note}")]
    NoteNotFound { note: i32 },

    #[error("response not found: note {note}, response {response}")]
    ResponseNotFound { note: i32, response: i32 },

    #[error("invalid notesfile name: {0}")]
    InvalidName(#[from] NotesfileNameError),

    // Access errors
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // Lifecycle errors
    #[error("notesfile {0} is already being compressed")]
    AlreadyCompressing(String),

    #[error("notesfile {0} was invalidated by compaction; reopen it")]
    NotesfileInvalid(String),

    #[error("record is immutable: {0}")]
    Immutable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotesfileNotFound(_) | Self::NoteNotFound { .. } | Self::ResponseNotFound { .. }
        )
    }

    /// Check if this is the soft, single-record corruption error
    #[must_use]
    pub const fn is_corrupted(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }

    /// Check if this is a permission error
    #[must_use]
    pub const fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_not_found() {
        assert!(Error::NoteNotFound { note: 3 }.is_not_found());
        assert!(
            Error::ResponseNotFound {
                note: 1,
                response: 2
            }
            .is_not_found()
        );
        assert!(Error::NotesfileNotFound("general".into()).is_not_found());
        assert!(!Error::permission_denied("write").is_not_found());
    }

    #[test]
    fn test_error_kinds_are_distinct() {
        let corrupted = Error::Corrupted {
            note: 4,
            response: 0,
        };
        assert!(corrupted.is_corrupted());
        assert!(!corrupted.is_not_found());
        assert!(Error::permission_denied("reply").is_permission_denied());
    }

    #[test]
    fn test_io_error_converts() {
        let err: Error = std::io::Error::other("disk gone").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("disk gone"));
    }
}
