//! Record codec
//!
//! Fixed-layout encode/decode for every on-disk record. All integers are
//! little-endian, records are packed, and fixed-width strings are NUL
//! padded.
//!
//! File layout of one notesfile directory:
//! ```text
//! note.indx  +--------------+-------------+-------------+-----+
//!            | Descriptor   | policy note | note 1      | ... |
//!            | 208B         | 184B        | 184B        |     |
//!            +--------------+-------------+-------------+-----+
//! resp.indx  +------------------+----------+----------+-----+
//!            | next free block  | block 0  | block 1  | ... |
//!            | i32              | 880B     | 880B     |     |
//!            +------------------+----------+----------+-----+
//! text       +--------------+---------------------------------+
//!            | free pointer | append-only blobs (2B aligned)  |
//!            | i64          |                                 |
//!            +--------------+---------------------------------+
//! access     +----------+----------+-----+   (at most 35 entries)
//!            | entry    | entry    | ... |
//!            | 41B      | 41B      |     |
//!            +----------+----------+-----+
//! ```
//!
//! Status and flag words keep their legacy bit layout here; everything
//! above this module sees named booleans.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use notesdb_common::{Error, MAX_NAME_LEN, Result, Timestamp};
use serde::{Deserialize, Serialize};

/// Current notesfile format version
pub const FORMAT_VERSION: i32 = 6;

/// Notesfile title width in the descriptor
pub const NF_TITLE_LEN: usize = 40;
/// Director message width in the descriptor
pub const DIRMSG_LEN: usize = 40;
/// Note title width
pub const TITLE_LEN: usize = 36;
/// Author name width
pub const AUTHOR_NAME_LEN: usize = 17;
/// System name width (global ids and authors)
pub const SYSTEM_NAME_LEN: usize = 33;

/// Descriptor record size
pub const DESCRIPTOR_SIZE: usize = 208;
/// Shared note/response item size
pub const ITEM_SIZE: usize = 171;
/// Note record size
pub const NOTE_RECORD_SIZE: usize = 184;
/// Response slots per block
pub const BLOCK_CAPACITY: usize = 5;
/// Response block size
pub const BLOCK_SIZE: usize = 880;
/// Size of the next-free-block counter at the head of `resp.indx`
pub const RESP_HEADER_SIZE: usize = 4;
/// Size of the free pointer at the head of `text`
pub const TEXT_HEADER_SIZE: u64 = 8;
/// Access entry size
pub const ACCESS_ENTRY_SIZE: usize = 41;
/// Maximum number of access entries per notesfile
pub const MAX_ACCESS_ENTRIES: usize = 35;
/// Access entry name width
pub const ACCESS_NAME_LEN: usize = 33;
/// Sequencer key width: the longest `owner/name` plus its NUL
pub const SEQ_KEY_LEN: usize = 2 * MAX_NAME_LEN + 2;
/// Sequencer entry size
pub const SEQ_ENTRY_SIZE: usize = SEQ_KEY_LEN + 8;

/// Global ids are `nf_number * UNIQUE_ID_MULTIPLIER + unique_seq`
pub const UNIQUE_ID_MULTIPLIER: i64 = 100_000_000;

const LINK_NONE: i32 = -1;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct StatusBits: u32 {
        const DELETED = 0x01;
        const DIRECTOR_MESSAGE = 0x02;
        const WRITE_ONLY = 0x04;
        const PENDING = 0x08;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct DescriptorBits: u32 {
        const ANONYMOUS = 0x01;
        const LOCKED = 0x02;
        const INVALID = 0x04;
        const ARCHIVE = 0x08;
        const MODERATED = 0x10;
    }
}

bitflags! {
    /// Access permissions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permissions: u32 {
        const READ = 0x01;
        const WRITE = 0x02;
        const DIRECTOR = 0x04;
        const REPLY = 0x08;
    }
}

impl Permissions {
    /// Permissions actually granted once implications are applied:
    /// director implies read, write and reply
    #[must_use]
    pub fn effective(self) -> Self {
        if self.contains(Self::DIRECTOR) {
            self | Self::READ | Self::WRITE | Self::REPLY
        } else {
            self
        }
    }
}

fn put_fixed(buf: &mut impl BufMut, s: &str, width: usize) {
    // Always leave room for the terminating NUL, and never split a char
    let mut end = s.len().min(width - 1);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_slice(&s.as_bytes()[..end]);
    buf.put_bytes(0, width - end);
}

fn get_fixed(buf: &mut impl Buf, width: usize) -> String {
    let mut raw = vec![0u8; width];
    buf.copy_to_slice(&mut raw);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn check_len(data: &[u8], need: usize, what: &str) -> Result<()> {
    if data.len() < need {
        return Err(Error::storage(format!(
            "{what} too small: {} bytes, need {need}",
            data.len()
        )));
    }
    Ok(())
}

/// Ordinal of a response block in `resp.indx`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    fn encode_link(link: Option<Self>) -> i32 {
        link.map_or(LINK_NONE, |b| i32::try_from(b.0).unwrap_or(LINK_NONE))
    }

    fn decode_link(raw: i32) -> Option<Self> {
        u32::try_from(raw).ok().map(Self)
    }

    /// Byte offset of this block in `resp.indx`
    #[must_use]
    pub const fn offset(self) -> u64 {
        RESP_HEADER_SIZE as u64 + self.0 as u64 * BLOCK_SIZE as u64
    }
}

/// Slot of a note record in `note.indx`
///
/// The policy note has its own variant instead of borrowing ordinal 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteSlot {
    Policy,
    Ordinal(u32),
}

impl NoteSlot {
    /// Slot for a base note ordinal; ordinals start at 1
    pub fn note(ordinal: i32) -> Result<Self> {
        match u32::try_from(ordinal) {
            Ok(n) if n >= 1 => Ok(Self::Ordinal(n)),
            _ => Err(Error::NoteNotFound { note: ordinal }),
        }
    }

    /// Ordinal as exposed to callers (0 for the policy note)
    #[must_use]
    pub fn ordinal(self) -> i32 {
        match self {
            Self::Policy => 0,
            Self::Ordinal(n) => i32::try_from(n).unwrap_or(i32::MAX),
        }
    }

    /// Byte offset of this record in `note.indx`
    #[must_use]
    pub const fn offset(self) -> u64 {
        let index = match self {
            Self::Policy => 0,
            Self::Ordinal(n) => n as u64,
        };
        DESCRIPTOR_SIZE as u64 + index * NOTE_RECORD_SIZE as u64
    }
}

/// Status of a note or response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatus {
    pub deleted: bool,
    pub director_message: bool,
    pub write_only: bool,
    pub pending: bool,
}

impl ItemStatus {
    fn to_bits(self) -> u32 {
        let mut bits = StatusBits::empty();
        bits.set(StatusBits::DELETED, self.deleted);
        bits.set(StatusBits::DIRECTOR_MESSAGE, self.director_message);
        bits.set(StatusBits::WRITE_ONLY, self.write_only);
        bits.set(StatusBits::PENDING, self.pending);
        bits.bits()
    }

    fn from_bits(raw: u32) -> Self {
        let bits = StatusBits::from_bits_truncate(raw);
        Self {
            deleted: bits.contains(StatusBits::DELETED),
            director_message: bits.contains(StatusBits::DIRECTOR_MESSAGE),
            write_only: bits.contains(StatusBits::WRITE_ONLY),
            pending: bits.contains(StatusBits::PENDING),
        }
    }
}

/// Cross-instance unique id: origin system plus number
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalId {
    pub system: String,
    pub number: i64,
}

/// Who wrote a note or response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub system: String,
    pub uid: i32,
}

/// Address of a text blob
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextAddr {
    pub offset: i64,
    pub length: i32,
}

/// Fields shared by note records and response slots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: GlobalId,
    pub title: String,
    pub author: Author,
    pub authored: Timestamp,
    pub received: Timestamp,
    pub last_modified: Timestamp,
    pub status: ItemStatus,
    pub text: TextAddr,
}

impl ItemRecord {
    fn encode(&self, buf: &mut impl BufMut) {
        put_fixed(buf, &self.id.system, SYSTEM_NAME_LEN);
        buf.put_i64_le(self.id.number);
        put_fixed(buf, &self.title, TITLE_LEN);
        put_fixed(buf, &self.author.name, AUTHOR_NAME_LEN);
        put_fixed(buf, &self.author.system, SYSTEM_NAME_LEN);
        buf.put_i32_le(self.author.uid);
        buf.put_i64_le(self.authored);
        buf.put_i64_le(self.received);
        buf.put_i64_le(self.last_modified);
        buf.put_u32_le(self.status.to_bits());
        buf.put_i64_le(self.text.offset);
        buf.put_i32_le(self.text.length);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        let id = GlobalId {
            system: get_fixed(buf, SYSTEM_NAME_LEN),
            number: buf.get_i64_le(),
        };
        let title = get_fixed(buf, TITLE_LEN);
        let author = Author {
            name: get_fixed(buf, AUTHOR_NAME_LEN),
            system: get_fixed(buf, SYSTEM_NAME_LEN),
            uid: buf.get_i32_le(),
        };
        Self {
            id,
            title,
            author,
            authored: buf.get_i64_le(),
            received: buf.get_i64_le(),
            last_modified: buf.get_i64_le(),
            status: ItemStatus::from_bits(buf.get_u32_le()),
            text: TextAddr {
                offset: buf.get_i64_le(),
                length: buf.get_i32_le(),
            },
        }
    }

    /// Whether this slot was ever written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id.number == 0 && self.author.name.is_empty()
    }
}

/// One record of the dense note index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub item: ItemRecord,
    pub response_count: i32,
    pub first_block: Option<BlockId>,
}

impl NoteRecord {
    /// Serialize to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(NOTE_RECORD_SIZE);
        self.item.encode(&mut buf);
        buf.put_i32_le(self.response_count);
        buf.put_i32_le(BlockId::encode_link(self.first_block));
        buf.resize(NOTE_RECORD_SIZE, 0);
        buf.freeze()
    }

    /// Parse from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, NOTE_RECORD_SIZE, "note record")?;
        let mut buf = data;
        let item = ItemRecord::decode(&mut buf);
        let response_count = buf.get_i32_le();
        let first_block = BlockId::decode_link(buf.get_i32_le());
        Ok(Self {
            item,
            response_count,
            first_block,
        })
    }
}

/// A fixed-capacity block of responses in one note's chain
///
/// `first..=last` are the logical response numbers currently covered;
/// `used` counts physical slots ever filled, including deleted ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBlock {
    pub first: i32,
    pub last: i32,
    pub next: Option<BlockId>,
    pub prev: Option<BlockId>,
    pub used: i32,
    pub slots: [ItemRecord; BLOCK_CAPACITY],
}

impl Default for ResponseBlock {
    fn default() -> Self {
        Self {
            first: 1,
            last: 0,
            next: None,
            prev: None,
            used: 0,
            slots: std::array::from_fn(|_| ItemRecord::default()),
        }
    }
}

impl ResponseBlock {
    /// An empty block whose first response will be logical number `first`
    #[must_use]
    pub fn starting_at(first: i32, prev: Option<BlockId>) -> Self {
        Self {
            first,
            last: first - 1,
            prev,
            ..Self::default()
        }
    }

    /// Whether every physical slot has been filled
    #[must_use]
    pub fn is_full(&self) -> bool {
        usize::try_from(self.used).map_or(true, |u| u >= BLOCK_CAPACITY)
    }

    /// Serialize to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(BLOCK_SIZE);
        buf.put_i32_le(self.first);
        buf.put_i32_le(self.last);
        buf.put_i32_le(BlockId::encode_link(self.next));
        buf.put_i32_le(BlockId::encode_link(self.prev));
        buf.put_i32_le(self.used);
        for slot in &self.slots {
            slot.encode(&mut buf);
        }
        buf.resize(BLOCK_SIZE, 0);
        buf.freeze()
    }

    /// Parse from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, BLOCK_SIZE, "response block")?;
        let mut buf = data;
        let first = buf.get_i32_le();
        let last = buf.get_i32_le();
        let next = BlockId::decode_link(buf.get_i32_le());
        let prev = BlockId::decode_link(buf.get_i32_le());
        let used = buf.get_i32_le();
        let slots = std::array::from_fn(|_| ItemRecord::decode(&mut buf));
        Ok(Self {
            first,
            last,
            next,
            prev,
            used,
            slots,
        })
    }
}

/// What expiration does to an old note
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpireAction {
    /// Use the installation default (delete)
    #[default]
    Default,
    /// Copy into an archive notesfile, then delete
    Archive,
    /// Delete only
    Delete,
}

impl ExpireAction {
    const fn to_raw(self) -> i32 {
        match self {
            Self::Default => 0,
            Self::Archive => 1,
            Self::Delete => 2,
        }
    }

    const fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Archive,
            2 => Self::Delete,
            _ => Self::Default,
        }
    }
}

/// How the director-message flag filters expiration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirMsgMode {
    #[default]
    Ignore,
    OnlyWith,
    OnlyWithout,
}

impl DirMsgMode {
    const fn to_raw(self) -> i32 {
        match self {
            Self::Ignore => 0,
            Self::OnlyWith => 1,
            Self::OnlyWithout => -1,
        }
    }

    const fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::OnlyWith,
            -1 => Self::OnlyWithout,
            _ => Self::Ignore,
        }
    }
}

/// Expiration policy stored in the descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationPolicy {
    /// Age threshold in days; 0 means "installation default", -1 never
    pub days: i32,
    pub action: ExpireAction,
    pub by_dirmsg: DirMsgMode,
    /// Never expire below this many live notes
    pub min_notes: i32,
}

/// Notesfile-wide switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesfileFlags {
    pub anonymous: bool,
    pub locked: bool,
    /// Set on the original while it is being replaced by compaction
    pub invalid: bool,
    pub archive: bool,
    pub moderated: bool,
}

impl NotesfileFlags {
    fn to_bits(self) -> u32 {
        let mut bits = DescriptorBits::empty();
        bits.set(DescriptorBits::ANONYMOUS, self.anonymous);
        bits.set(DescriptorBits::LOCKED, self.locked);
        bits.set(DescriptorBits::INVALID, self.invalid);
        bits.set(DescriptorBits::ARCHIVE, self.archive);
        bits.set(DescriptorBits::MODERATED, self.moderated);
        bits.bits()
    }

    fn from_bits(raw: u32) -> Self {
        let bits = DescriptorBits::from_bits_truncate(raw);
        Self {
            anonymous: bits.contains(DescriptorBits::ANONYMOUS),
            locked: bits.contains(DescriptorBits::LOCKED),
            invalid: bits.contains(DescriptorBits::INVALID),
            archive: bits.contains(DescriptorBits::ARCHIVE),
            moderated: bits.contains(DescriptorBits::MODERATED),
        }
    }
}

/// Usage statistics kept in the descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub last_entered: Timestamp,
    pub notes_read: i64,
    pub notes_written: i64,
    pub entries: i64,
    /// Seconds spent in the notesfile across all entries
    pub walltime: i64,
}

/// The per-notesfile metadata record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub version: i32,
    pub title: String,
    pub director_msg: String,
    pub flags: NotesfileFlags,
    /// Number drawn from the installation `.SEQ` registry
    pub nf_number: i32,
    pub total_notes: i32,
    pub deleted_notes: i32,
    pub deleted_responses: i32,
    pub policy_exists: bool,
    pub expiration: ExpirationPolicy,
    pub max_note_len: i32,
    /// Monotonic per-notesfile counter feeding global ids
    pub unique_seq: i64,
    pub last_modified: Timestamp,
    pub created: Timestamp,
    pub stats: UsageStats,
}

impl Descriptor {
    /// A fresh descriptor for a new notesfile
    #[must_use]
    pub fn new(title: &str, nf_number: i32, max_note_len: i32, now: Timestamp) -> Self {
        Self {
            version: FORMAT_VERSION,
            title: title.to_string(),
            director_msg: String::new(),
            flags: NotesfileFlags::default(),
            nf_number,
            total_notes: 0,
            deleted_notes: 0,
            deleted_responses: 0,
            policy_exists: false,
            expiration: ExpirationPolicy::default(),
            max_note_len,
            unique_seq: 0,
            last_modified: now,
            created: now,
            stats: UsageStats::default(),
        }
    }

    /// Draw the next global id number
    pub fn next_unique_id(&mut self) -> i64 {
        self.unique_seq += 1;
        i64::from(self.nf_number) * UNIQUE_ID_MULTIPLIER + self.unique_seq
    }

    /// Serialize to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DESCRIPTOR_SIZE);
        buf.put_i32_le(self.version);
        put_fixed(&mut buf, &self.title, NF_TITLE_LEN);
        put_fixed(&mut buf, &self.director_msg, DIRMSG_LEN);
        buf.put_u32_le(self.flags.to_bits());
        buf.put_i32_le(self.nf_number);
        buf.put_i32_le(self.total_notes);
        buf.put_i32_le(self.deleted_notes);
        buf.put_i32_le(self.deleted_responses);
        buf.put_i32_le(i32::from(self.policy_exists));
        buf.put_i32_le(self.expiration.days);
        buf.put_i32_le(self.expiration.action.to_raw());
        buf.put_i32_le(self.expiration.by_dirmsg.to_raw());
        buf.put_i32_le(self.expiration.min_notes);
        buf.put_i32_le(self.max_note_len);
        buf.put_i64_le(self.unique_seq);
        buf.put_i64_le(self.last_modified);
        buf.put_i64_le(self.created);
        buf.put_i64_le(self.stats.last_entered);
        buf.put_i64_le(self.stats.notes_read);
        buf.put_i64_le(self.stats.notes_written);
        buf.put_i64_le(self.stats.entries);
        buf.put_i64_le(self.stats.walltime);
        buf.resize(DESCRIPTOR_SIZE, 0);
        buf.freeze()
    }

    /// Parse from bytes, rejecting other format versions
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, DESCRIPTOR_SIZE, "descriptor")?;
        let mut buf = data;

        let version = buf.get_i32_le();
        if version != FORMAT_VERSION {
            return Err(Error::VersionMismatch {
                expected: FORMAT_VERSION,
                found: version,
            });
        }

        let title = get_fixed(&mut buf, NF_TITLE_LEN);
        let director_msg = get_fixed(&mut buf, DIRMSG_LEN);
        let flags = NotesfileFlags::from_bits(buf.get_u32_le());
        let nf_number = buf.get_i32_le();
        let total_notes = buf.get_i32_le();
        let deleted_notes = buf.get_i32_le();
        let deleted_responses = buf.get_i32_le();
        let policy_exists = buf.get_i32_le() != 0;
        let expiration = ExpirationPolicy {
            days: buf.get_i32_le(),
            action: ExpireAction::from_raw(buf.get_i32_le()),
            by_dirmsg: DirMsgMode::from_raw(buf.get_i32_le()),
            min_notes: buf.get_i32_le(),
        };
        let max_note_len = buf.get_i32_le();
        let unique_seq = buf.get_i64_le();
        let last_modified = buf.get_i64_le();
        let created = buf.get_i64_le();
        let stats = UsageStats {
            last_entered: buf.get_i64_le(),
            notes_read: buf.get_i64_le(),
            notes_written: buf.get_i64_le(),
            entries: buf.get_i64_le(),
            walltime: buf.get_i64_le(),
        };

        Ok(Self {
            version,
            title,
            director_msg,
            flags,
            nf_number,
            total_notes,
            deleted_notes,
            deleted_responses,
            policy_exists,
            expiration,
            max_note_len,
            unique_seq,
            last_modified,
            created,
            stats,
        })
    }
}

/// Scope of an access entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    User,
    Group,
    System,
}

impl Scope {
    const fn to_raw(self) -> i32 {
        match self {
            Self::User => 1,
            Self::Group => 2,
            Self::System => 3,
        }
    }

    fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            1 => Ok(Self::User),
            2 => Ok(Self::Group),
            3 => Ok(Self::System),
            other => Err(Error::storage(format!("invalid access scope {other}"))),
        }
    }
}

/// Name matching every caller not otherwise listed in a scope
pub const OTHER: &str = "other";

/// One row of a notesfile's access list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEntry {
    pub scope: Scope,
    pub name: String,
    pub perms: Permissions,
}

impl AccessEntry {
    pub fn new(scope: Scope, name: impl Into<String>, perms: Permissions) -> Self {
        Self {
            scope,
            name: name.into(),
            perms,
        }
    }

    /// Whether this is the `other` default of its scope
    #[must_use]
    pub fn is_other(&self) -> bool {
        self.name == OTHER
    }

    /// Serialize to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ACCESS_ENTRY_SIZE);
        buf.put_i32_le(self.scope.to_raw());
        put_fixed(&mut buf, &self.name, ACCESS_NAME_LEN);
        buf.put_u32_le(self.perms.bits());
        buf.freeze()
    }

    /// Parse from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, ACCESS_ENTRY_SIZE, "access entry")?;
        let mut buf = data;
        let scope = Scope::from_raw(buf.get_i32_le())?;
        let name = get_fixed(&mut buf, ACCESS_NAME_LEN);
        let perms = Permissions::from_bits_truncate(buf.get_u32_le());
        Ok(Self { scope, name, perms })
    }
}

/// One (notesfile, last-seen) row of a sequencer file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerEntry {
    pub key: String,
    pub last_seen: Timestamp,
}

impl SequencerEntry {
    /// Serialize to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SEQ_ENTRY_SIZE);
        put_fixed(&mut buf, &self.key, SEQ_KEY_LEN);
        buf.put_i64_le(self.last_seen);
        buf.freeze()
    }

    /// Parse from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_len(data, SEQ_ENTRY_SIZE, "sequencer entry")?;
        let mut buf = data;
        let key = get_fixed(&mut buf, SEQ_KEY_LEN);
        let last_seen = buf.get_i64_le();
        Ok(Self { key, last_seen })
    }
}
