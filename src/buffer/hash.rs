//! Chained hash index on page identifiers.
//!
//! Grounded on `original_source/project2/EduBfM_64bit/edubfm_Hash.c`:
//! `hash(pid) = (vol_no + page_no) mod hash_table_size`, collisions resolved
//! by chaining through each frame's `next_hash_entry` field.

use super::frame::{BufferFrame, NIL_HASH_ENTRY};
use crate::types::PageId;
use std::cell::RefCell;

/// Fixed-size bucket array; each bucket holds the index of the first frame
/// in its chain (or [`NIL_HASH_ENTRY`]).
pub struct BufHashTable {
    buckets: Vec<i32>,
}

impl BufHashTable {
    pub fn new(size: usize) -> Self {
        Self {
            buckets: vec![NIL_HASH_ENTRY; size.max(1)],
        }
    }

    fn hash(&self, pid: PageId) -> usize {
        (pid.vol_no as u64 + pid.page_no as u64) as usize % self.buckets.len()
    }

    /// Look up `pid`, returning its frame index if resident.
    pub fn lookup(&self, pid: PageId, frames: &[RefCell<BufferFrame>]) -> Option<usize> {
        let mut idx = self.buckets[self.hash(pid)];
        while idx != NIL_HASH_ENTRY {
            let i = idx as usize;
            let frame = frames[i].borrow();
            if frame.key == pid {
                return Some(i);
            }
            idx = frame.next_hash_entry;
        }
        None
    }

    /// Insert `frame_index` (already carrying `pid` as its key) at the head
    /// of `pid`'s chain.
    pub fn insert(&mut self, pid: PageId, frame_index: usize, frames: &[RefCell<BufferFrame>]) {
        let bucket = self.hash(pid);
        frames[frame_index].borrow_mut().next_hash_entry = self.buckets[bucket];
        self.buckets[bucket] = frame_index as i32;
    }

    /// Remove `pid` from the index. The removed frame's own
    /// `next_hash_entry` is left as-is (the caller is about to repurpose or
    /// discard that frame); only the chain that pointed to it is rewired.
    pub fn delete(&mut self, pid: PageId, frames: &[RefCell<BufferFrame>]) {
        let bucket = self.hash(pid);
        let mut idx = self.buckets[bucket];
        let mut prev: Option<usize> = None;
        while idx != NIL_HASH_ENTRY {
            let i = idx as usize;
            let (found, next) = {
                let frame = frames[i].borrow();
                (frame.key == pid, frame.next_hash_entry)
            };
            if found {
                match prev {
                    Some(p) => frames[p].borrow_mut().next_hash_entry = next,
                    None => self.buckets[bucket] = next,
                }
                return;
            }
            prev = Some(i);
            idx = next;
        }
    }

    /// Clear every bucket head. Only the per-bucket heads are cleared here;
    /// the chain links inside frames are left intact because a bulk
    /// frame discard clears the frames themselves.
    pub fn delete_all(&mut self) {
        for b in self.buckets.iter_mut() {
            *b = NIL_HASH_ENTRY;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_key(pid: PageId) -> RefCell<BufferFrame> {
        let mut f = BufferFrame::empty();
        f.key = pid;
        RefCell::new(f)
    }

    #[test]
    fn insert_then_lookup_finds_colliding_keys() {
        let mut table = BufHashTable::new(4);
        let frames = vec![
            frame_with_key(PageId::new(0, 0)),
            frame_with_key(PageId::new(0, 4)),
        ];
        // Both hash to the same bucket with a table size of 4.
        table.insert(PageId::new(0, 0), 0, &frames);
        table.insert(PageId::new(0, 4), 1, &frames);

        assert_eq!(table.lookup(PageId::new(0, 0), &frames), Some(0));
        assert_eq!(table.lookup(PageId::new(0, 4), &frames), Some(1));
        assert_eq!(table.lookup(PageId::new(0, 9), &frames), None);
    }

    #[test]
    fn delete_rewires_chain_around_removed_entry() {
        let mut table = BufHashTable::new(4);
        let frames = vec![
            frame_with_key(PageId::new(0, 0)),
            frame_with_key(PageId::new(0, 4)),
            frame_with_key(PageId::new(0, 8)),
        ];
        table.insert(PageId::new(0, 0), 0, &frames);
        table.insert(PageId::new(0, 4), 1, &frames);
        table.insert(PageId::new(0, 8), 2, &frames);

        table.delete(PageId::new(0, 4), &frames);

        assert_eq!(table.lookup(PageId::new(0, 4), &frames), None);
        assert_eq!(table.lookup(PageId::new(0, 0), &frames), Some(0));
        assert_eq!(table.lookup(PageId::new(0, 8), &frames), Some(2));
    }

    #[test]
    fn delete_all_clears_lookups_without_touching_frames() {
        let mut table = BufHashTable::new(4);
        let frames = vec![frame_with_key(PageId::new(0, 0))];
        table.insert(PageId::new(0, 0), 0, &frames);

        table.delete_all();
        assert_eq!(table.lookup(PageId::new(0, 0), &frames), None);
        assert_eq!(frames[0].borrow().key, PageId::new(0, 0));
    }
}
