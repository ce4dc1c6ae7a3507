//! Response store
//!
//! `resp.indx` starts with the next-free-block counter, followed by
//! fixed-size blocks of [`BLOCK_CAPACITY`] response slots. Each note owns
//! a chain of blocks linked through `next`/`prev`. Logical response
//! numbers stay dense (`1..=response_count`) while physical slots keep
//! their holes: deleting a response flags its slot and shifts the
//! `first`/`last` bounds of every later block down by one.
//!
//! Every chain mutation happens while the caller holds the owning note's
//! record lock, so a chain never changes shape under a writer.

use crate::layout::{
    BLOCK_CAPACITY, BLOCK_SIZE, BlockId, ItemRecord, NoteRecord, RESP_HEADER_SIZE, ResponseBlock,
};
use crate::lock::{LockKind, RangeLock, Region};
use crate::raw_io::RecordFile;
use notesdb_common::{Error, Result};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use tracing::{debug, warn};

/// The `resp.indx` file of a notesfile
#[derive(Debug)]
pub struct ResponseIndex {
    file: RecordFile,
}

impl ResponseIndex {
    /// Open an existing response index
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: RecordFile::open(path)?,
        })
    }

    /// Create an empty response index
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = RecordFile::create(path)?;
        file.write_at(0, &0i32.to_le_bytes())?;
        Ok(Self { file })
    }

    /// Underlying file
    pub const fn file(&self) -> &RecordFile {
        &self.file
    }

    /// Number of blocks ever allocated
    pub fn block_count(&self) -> Result<u32> {
        let _lock = self.file.lock(LockKind::Read, Region::ResponseHeader)?;
        self.load_block_count()
    }

    /// Load one block under a shared lock
    pub fn read_block(&self, id: BlockId) -> Result<ResponseBlock> {
        let _lock = self.file.lock(LockKind::Read, Region::ResponseBlock(id))?;
        self.load_block(id)
    }

    /// Hold a block exclusively for a read-modify-write
    pub fn lock_block(&self, id: BlockId) -> Result<BlockGuard<'_>> {
        let lock = self.file.lock(LockKind::Write, Region::ResponseBlock(id))?;
        let block = self.load_block(id)?;
        Ok(BlockGuard {
            _lock: lock,
            file: &self.file,
            id,
            block,
        })
    }

    /// Resolve logical response `response` of note `note` to its
    /// physical `(block, slot)`
    ///
    /// Walks the chain from the note's first block, taking a shared lock
    /// on each block visited. A chain that loops or ends early reports
    /// the response as not found; bounds that disagree with the slots
    /// report the response as corrupted.
    pub fn logical_resp(
        &self,
        note: i32,
        record: &NoteRecord,
        response: i32,
    ) -> Result<(BlockId, usize)> {
        let not_found = || Error::ResponseNotFound { note, response };
        if response < 1 || response > record.response_count {
            return Err(not_found());
        }

        let limit = self.block_count()?;
        let mut current = record.first_block.ok_or_else(not_found)?;
        let mut visited = 0u32;
        loop {
            if current.0 >= limit || visited >= limit {
                warn!("response chain of note {note} is broken at block {}", current.0);
                return Err(not_found());
            }
            visited += 1;

            let block = self.read_block(current)?;
            if response > block.last {
                match block.next {
                    Some(next) if next != current => {
                        current = next;
                        continue;
                    }
                    _ => return Err(not_found()),
                }
            }

            let target = response - block.first;
            if target >= 0 {
                let mut live = 0;
                for (index, slot) in block.slots.iter().enumerate().take(used_slots(&block)) {
                    if slot.status.deleted {
                        continue;
                    }
                    if live == target {
                        return Ok((current, index));
                    }
                    live += 1;
                }
            }
            warn!(
                "block {} of note {note} does not hold response {response}",
                current.0
            );
            return Err(Error::Corrupted { note, response });
        }
    }

    /// Load logical response `response`
    pub fn read_response(&self, note: i32, record: &NoteRecord, response: i32) -> Result<ItemRecord> {
        let (id, slot) = self.logical_resp(note, record, response)?;
        let block = self.read_block(id)?;
        Ok(block.slots[slot].clone())
    }

    /// Rewrite one slot in place
    pub fn update_slot(
        &self,
        id: BlockId,
        slot: usize,
        update: impl FnOnce(&mut ItemRecord),
    ) -> Result<ItemRecord> {
        let mut block = self.lock_block(id)?;
        let item = block
            .slots
            .get_mut(slot)
            .ok_or_else(|| Error::storage(format!("slot {slot} out of range")))?;
        update(item);
        let updated = item.clone();
        block.save()?;
        Ok(updated)
    }

    /// Append `item` to the end of the note's chain
    ///
    /// Updates the caller's copy of the note record (response count and,
    /// for the first response, the head link) and returns the new
    /// response's logical number. The caller persists the record.
    pub fn append(&self, note: i32, record: &mut NoteRecord, item: ItemRecord) -> Result<i32> {
        let number = record.response_count + 1;
        match record.first_block {
            None => {
                let id = self.allocate()?;
                let mut block = ResponseBlock::starting_at(number, None);
                place(&mut block, item);
                self.write_block(id, &block)?;
                record.first_block = Some(id);
            }
            Some(head) => {
                let tail = self.tail(note, head)?;
                let mut guard = self.lock_block(tail)?;
                if guard.is_full() {
                    let id = self.allocate()?;
                    let mut block = ResponseBlock::starting_at(guard.last + 1, Some(tail));
                    place(&mut block, item);
                    self.write_block(id, &block)?;
                    guard.next = Some(id);
                } else {
                    place(&mut guard, item);
                }
                guard.save()?;
            }
        }
        record.response_count = number;
        debug!("appended response {number} to note {note}");
        Ok(number)
    }

    /// Soft-delete logical response `response` and renumber the rest
    ///
    /// Returns the deleted item. The caller persists the note record,
    /// whose response count has been decremented.
    pub fn delete(&self, note: i32, record: &mut NoteRecord, response: i32) -> Result<ItemRecord> {
        let (id, slot) = self.logical_resp(note, record, response)?;
        let limit = self.block_count()?;

        let mut block = self.lock_block(id)?;
        block.slots[slot].status.deleted = true;
        block.last -= 1;
        block.save()?;
        let removed = block.slots[slot].clone();
        let mut next = block.next.filter(|n| *n != id);
        drop(block);

        let mut visited = 0u32;
        while let Some(current) = next {
            visited += 1;
            if visited > limit {
                warn!("response chain of note {note} loops; renumbering stopped");
                break;
            }
            let mut block = self.lock_block(current)?;
            block.first -= 1;
            block.last -= 1;
            block.save()?;
            next = block.next.filter(|n| *n != current);
        }

        record.response_count -= 1;
        debug!("deleted response {response} of note {note}");
        Ok(removed)
    }

    /// Load a note's whole chain into an arena
    pub fn load_chain(&self, note: i32, record: &NoteRecord) -> Result<ResponseChain> {
        let mut chain = ResponseChain {
            head: record.first_block,
            blocks: HashMap::new(),
        };
        let limit = self.block_count()?;
        let mut next = record.first_block;
        while let Some(current) = next {
            if current.0 >= limit || chain.blocks.contains_key(&current) {
                warn!("response chain of note {note} is broken at block {}", current.0);
                break;
            }
            let block = self.read_block(current)?;
            next = block.next;
            chain.blocks.insert(current, block);
        }
        Ok(chain)
    }

    fn tail(&self, note: i32, head: BlockId) -> Result<BlockId> {
        let limit = self.block_count()?;
        let mut current = head;
        for _ in 0..limit {
            match self.read_block(current)?.next {
                Some(next) if next != current => current = next,
                Some(_) => break,
                None => return Ok(current),
            }
        }
        Err(Error::storage(format!(
            "response chain of note {note} does not terminate"
        )))
    }

    fn allocate(&self) -> Result<BlockId> {
        let _lock = self.file.lock(LockKind::Write, Region::ResponseHeader)?;
        let count = self.load_block_count()?;
        let next = i32::try_from(count + 1)
            .map_err(|_| Error::storage("response index is full"))?;
        self.file.write_at(0, &next.to_le_bytes())?;
        debug!("allocated response block {count}");
        Ok(BlockId(count))
    }

    fn write_block(&self, id: BlockId, block: &ResponseBlock) -> Result<()> {
        let _lock = self.file.lock(LockKind::Write, Region::ResponseBlock(id))?;
        self.file.write_at(id.offset(), &block.to_bytes())
    }

    fn load_block(&self, id: BlockId) -> Result<ResponseBlock> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        self.file.read_at(id.offset(), &mut buf)?;
        ResponseBlock::from_bytes(&buf)
    }

    fn load_block_count(&self) -> Result<u32> {
        let mut buf = [0u8; RESP_HEADER_SIZE];
        self.file.read_at(0, &mut buf)?;
        let raw = i32::from_le_bytes(buf);
        u32::try_from(raw).map_err(|_| {
            Error::storage(format!(
                "bad block counter {raw} in {}",
                self.file.path().display()
            ))
        })
    }
}

fn used_slots(block: &ResponseBlock) -> usize {
    usize::try_from(block.used).map_or(0, |u| u.min(BLOCK_CAPACITY))
}

fn place(block: &mut ResponseBlock, item: ItemRecord) {
    let index = used_slots(block);
    block.slots[index] = item;
    block.used += 1;
    block.last += 1;
}

/// A write-locked, loaded response block
#[derive(Debug)]
pub struct BlockGuard<'a> {
    _lock: RangeLock<'a>,
    file: &'a RecordFile,
    id: BlockId,
    block: ResponseBlock,
}

impl BlockGuard<'_> {
    /// Block this guard covers
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// Write the block back
    pub fn save(&self) -> Result<()> {
        self.file.write_at(self.id.offset(), &self.block.to_bytes())
    }
}

impl Deref for BlockGuard<'_> {
    type Target = ResponseBlock;

    fn deref(&self) -> &ResponseBlock {
        &self.block
    }
}

impl DerefMut for BlockGuard<'_> {
    fn deref_mut(&mut self) -> &mut ResponseBlock {
        &mut self.block
    }
}

/// One live response as seen through a [`ResponseChain`]
#[derive(Debug, Clone, Copy)]
pub struct ChainEntry<'a> {
    /// Logical response number
    pub number: i32,
    pub block: BlockId,
    pub slot: usize,
    pub item: &'a ItemRecord,
}

/// A note's response blocks, keyed by block ordinal
#[derive(Debug, Default)]
pub struct ResponseChain {
    head: Option<BlockId>,
    blocks: HashMap<BlockId, ResponseBlock>,
}

impl ResponseChain {
    /// Number of blocks loaded
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// A loaded block
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&ResponseBlock> {
        self.blocks.get(&id)
    }

    /// Live responses in logical order
    #[must_use]
    pub fn responses(&self) -> Vec<ChainEntry<'_>> {
        let mut out = Vec::new();
        let mut next = self.head;
        let mut seen = 0;
        while let Some(id) = next {
            let Some(block) = self.blocks.get(&id) else {
                break;
            };
            seen += 1;
            if seen > self.blocks.len() {
                break;
            }
            let mut number = block.first;
            for (slot, item) in block.slots.iter().enumerate().take(used_slots(block)) {
                if item.status.deleted {
                    continue;
                }
                out.push(ChainEntry {
                    number,
                    block: id,
                    slot,
                    item,
                });
                number += 1;
            }
            next = block.next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, ResponseIndex) {
        let dir = TempDir::new().unwrap();
        let index = ResponseIndex::create(dir.path().join("resp.indx")).unwrap();
        (dir, index)
    }

    fn item(title: &str) -> ItemRecord {
        ItemRecord {
            title: title.into(),
            ..ItemRecord::default()
        }
    }

    fn titles(index: &ResponseIndex, record: &NoteRecord) -> Vec<String> {
        (1..=record.response_count)
            .map(|r| index.read_response(1, record, r).unwrap().title)
            .collect()
    }

    fn with_responses(index: &ResponseIndex, count: usize) -> NoteRecord {
        let mut record = NoteRecord::default();
        for i in 1..=count {
            let number = index
                .append(1, &mut record, item(&format!("r{i}")))
                .unwrap();
            assert_eq!(number as usize, i);
        }
        record
    }

    #[test]
    fn test_append_spills_into_new_blocks() {
        let (_dir, index) = scratch();
        let record = with_responses(&index, 12);

        assert_eq!(record.response_count, 12);
        assert_eq!(index.block_count().unwrap(), 3);
        let head = record.first_block.unwrap();
        assert_eq!(head, BlockId(0));

        let first = index.read_block(head).unwrap();
        assert_eq!((first.first, first.last, first.used), (1, 5, 5));
        assert_eq!(first.next, Some(BlockId(1)));

        let third = index.read_block(BlockId(2)).unwrap();
        assert_eq!((third.first, third.last, third.used), (11, 12, 2));
        assert_eq!(third.prev, Some(BlockId(1)));
        assert_eq!(third.next, None);
    }

    #[test]
    fn test_logical_resp_across_blocks() {
        let (_dir, index) = scratch();
        let record = with_responses(&index, 12);
        for r in 1..=12 {
            let (block, slot) = index.logical_resp(1, &record, r).unwrap();
            assert_eq!(block, BlockId(((r - 1) / 5) as u32));
            assert_eq!(slot, ((r - 1) % 5) as usize);
        }
        assert!(matches!(
            index.logical_resp(1, &record, 13),
            Err(Error::ResponseNotFound { note: 1, response: 13 })
        ));
        assert!(index.logical_resp(1, &record, 0).unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_keeps_numbering_dense() {
        let (_dir, index) = scratch();
        let mut record = with_responses(&index, 12);

        let removed = index.delete(1, &mut record, 3).unwrap();
        assert_eq!(removed.title, "r3");
        assert!(removed.status.deleted);
        index.delete(1, &mut record, 6).unwrap(); // originally r7

        assert_eq!(record.response_count, 10);
        let expected: Vec<String> = [1, 2, 4, 5, 6, 8, 9, 10, 11, 12]
            .iter()
            .map(|i| format!("r{i}"))
            .collect();
        assert_eq!(titles(&index, &record), expected);

        let second = index.read_block(BlockId(1)).unwrap();
        assert_eq!((second.first, second.last), (5, 8));
        let third = index.read_block(BlockId(2)).unwrap();
        assert_eq!((third.first, third.last), (9, 10));
    }

    #[test]
    fn test_delete_every_response_in_a_block() {
        let (_dir, index) = scratch();
        let mut record = with_responses(&index, 7);
        for _ in 0..5 {
            index.delete(1, &mut record, 1).unwrap();
        }
        assert_eq!(titles(&index, &record), vec!["r6", "r7"]);

        // appending after deletions continues in the tail block
        assert_eq!(index.append(1, &mut record, item("r8")).unwrap(), 3);
        assert_eq!(titles(&index, &record), vec!["r6", "r7", "r8"]);
    }

    #[test]
    fn test_self_referential_chain_is_not_found() {
        let (_dir, index) = scratch();
        let mut record = with_responses(&index, 2);
        {
            let mut block = index.lock_block(BlockId(0)).unwrap();
            block.next = Some(BlockId(0));
            block.save().unwrap();
        }
        record.response_count = 4;
        assert!(matches!(
            index.logical_resp(1, &record, 4),
            Err(Error::ResponseNotFound { .. })
        ));
        // loading the chain stops at the loop instead of spinning
        let chain = index.load_chain(1, &record).unwrap();
        assert_eq!(chain.block_count(), 1);
        assert_eq!(chain.responses().len(), 2);
    }

    #[test]
    fn test_inconsistent_bounds_are_corrupted() {
        let (_dir, index) = scratch();
        let record = with_responses(&index, 3);
        {
            let mut block = index.lock_block(BlockId(0)).unwrap();
            block.last = 9;
            block.save().unwrap();
        }
        let mut record = record;
        record.response_count = 9;
        assert!(index.logical_resp(1, &record, 8).unwrap_err().is_corrupted());
    }

    #[test]
    fn test_chain_arena_matches_addressing() {
        let (_dir, index) = scratch();
        let mut record = with_responses(&index, 11);
        index.delete(1, &mut record, 5).unwrap();
        index.delete(1, &mut record, 1).unwrap();

        let chain = index.load_chain(1, &record).unwrap();
        assert_eq!(chain.block_count(), 3);
        let entries = chain.responses();
        assert_eq!(entries.len(), 9);
        for entry in &entries {
            assert_eq!(
                index.logical_resp(1, &record, entry.number).unwrap(),
                (entry.block, entry.slot)
            );
        }
        assert_eq!(entries[0].item.title, "r2");
        assert_eq!(entries[8].item.title, "r11");
    }

    #[test]
    fn test_update_slot() {
        let (_dir, index) = scratch();
        let record = with_responses(&index, 2);
        let (block, slot) = index.logical_resp(1, &record, 2).unwrap();
        let updated = index
            .update_slot(block, slot, |item| item.title = "edited".into())
            .unwrap();
        assert_eq!(updated.title, "edited");
        assert_eq!(index.read_response(1, &record, 2).unwrap().title, "edited");
    }
}
