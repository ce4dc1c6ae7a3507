//! notesdb Storage Engine - Flat-file notesfiles
//!
//! This crate implements the on-disk notesfile engine, shared safely by
//! many processes through POSIX byte-range locks:
//! - Fixed-layout record codec
//! - Descriptor, note index, response chains and the append-only text log
//! - Note and response lifecycle (write, read, delete, modify, copy)
//! - Per-record corruption detection
//! - Offline compaction and expiration
//! - Access lists and per-reader sequencer files
//! - Search and watermark scans

pub mod access;
pub mod compact;
pub mod descriptor;
pub mod engine;
pub mod expire;
pub mod layout;
pub mod lock;
pub mod note_index;
pub mod notesfile;
pub mod raw_io;
pub mod response;
pub mod sanity;
pub mod search;
pub mod sequencer;
pub mod text;

// Re-exports
pub use access::AccessList;
pub use compact::CompactionReport;
pub use descriptor::{DescriptorGuard, IndexFile};
pub use engine::{ANONYMOUS_UID, ConfigUpdate, NewNote, Note, NoteUpdate, NotesfileStats, Origin};
pub use layout::{
    AccessEntry, Author, BlockId, Descriptor, DirMsgMode, ExpirationPolicy, ExpireAction,
    FORMAT_VERSION, GlobalId, ItemRecord, ItemStatus, NoteRecord, NoteSlot, NotesfileFlags,
    OTHER, Permissions, ResponseBlock, Scope, SequencerEntry, TextAddr, UsageStats,
};
pub use lock::{LockKind, RangeLock, Region};
pub use note_index::NoteGuard;
pub use notesfile::{Notesfile, next_notesfile_number, notesfile_dir};
pub use raw_io::RecordFile;
pub use response::{BlockGuard, ChainEntry, ResponseChain, ResponseIndex};
pub use sanity::Defect;
pub use sequencer::Sequencer;
pub use text::TextLog;
