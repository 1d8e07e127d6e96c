//! A single buffer pool: Second-Chance replacement over a fixed array of
//! frames, backed by a chained hash index.
//!
//! Each pin is wrapped as a scoped acquisition with guaranteed release
//! (`PageGuard`/`PageGuardMut`, releasing on `Drop`). Victim selection walks
//! frames in a circular scan, clearing a frame's REFER bit on the first
//! pass and evicting it on the second if still unreferenced and unpinned,
//! bounded at `2*N` frames scanned.

use super::frame::{BufferFrame, FrameBits};
use super::hash::BufHashTable;
use crate::error::{Result, StorageError};
use crate::raw::RawDiskManager;
use crate::types::{PageId, PAGE_SIZE};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

pub struct BufferPool {
    frames: Vec<RefCell<BufferFrame>>,
    hash: RefCell<BufHashTable>,
    next_victim: Cell<usize>,
    disk: Rc<RefCell<dyn RawDiskManager>>,
}

impl BufferPool {
    pub fn new(
        capacity: usize,
        hash_table_size: usize,
        disk: Rc<RefCell<dyn RawDiskManager>>,
    ) -> Self {
        assert!(capacity > 0, "a buffer pool needs at least one frame");
        let frames = (0..capacity)
            .map(|_| RefCell::new(BufferFrame::empty()))
            .collect();
        Self {
            frames,
            hash: RefCell::new(BufHashTable::new(hash_table_size)),
            next_victim: Cell::new(0),
            disk,
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Pin `pid`, loading it from disk if not already resident.
    pub fn get(&self, pid: PageId) -> Result<PagePin<'_>> {
        if let Some(idx) = self.hash.borrow().lookup(pid, &self.frames) {
            let mut frame = self.frames[idx].borrow_mut();
            frame.fixed += 1;
            frame.bits.set(FrameBits::REFER);
            drop(frame);
            return Ok(PagePin { pool: self, idx, pid });
        }

        let idx = self.allocate_frame()?;
        {
            let mut buf = [0u8; PAGE_SIZE];
            if let Err(e) = self.disk.borrow_mut().read_train(pid, &mut buf) {
                self.frames[idx].borrow_mut().discard();
                return Err(e);
            }
            let mut frame = self.frames[idx].borrow_mut();
            *frame.data = buf;
        }
        self.hash.borrow_mut().insert(pid, idx, &self.frames);
        {
            let mut frame = self.frames[idx].borrow_mut();
            frame.key = pid;
            frame.fixed = 1;
            frame.bits.clear_all();
            frame.bits.set(FrameBits::VALID);
            frame.bits.set(FrameBits::REFER);
        }
        Ok(PagePin { pool: self, idx, pid })
    }

    /// Pin a fresh frame for `pid` without reading from disk. Callers are
    /// obliged to initialize the page before unpinning.
    pub fn get_new(&self, pid: PageId) -> Result<PagePin<'_>> {
        if self.hash.borrow().lookup(pid, &self.frames).is_some() {
            return Err(StorageError::invalid_operation(format!(
                "get_new on already-resident page {}",
                pid
            )));
        }
        let idx = self.allocate_frame()?;
        self.hash.borrow_mut().insert(pid, idx, &self.frames);
        {
            let mut frame = self.frames[idx].borrow_mut();
            *frame.data = [0u8; PAGE_SIZE];
            frame.key = pid;
            frame.fixed = 1;
            frame.bits.clear_all();
            frame.bits.set(FrameBits::VALID);
            frame.bits.set(FrameBits::NEW);
            frame.bits.set(FrameBits::REFER);
        }
        Ok(PagePin { pool: self, idx, pid })
    }

    /// OR the frame's `DIRTY` bit. Fails with `BadHashKey` if the caller
    /// asserted a page resident that is not.
    pub fn set_dirty(&self, pid: PageId) -> Result<()> {
        let idx = self
            .hash
            .borrow()
            .lookup(pid, &self.frames)
            .ok_or(StorageError::BadHashKey(pid))?;
        self.frames[idx].borrow_mut().bits.set(FrameBits::DIRTY);
        Ok(())
    }

    /// Decrement `pid`'s pin count. Underflow is a programmer error and
    /// must be surfaced. Ordinary callers should
    /// prefer letting a [`PagePin`] drop; this is for the rare case of
    /// releasing a pin without holding the guard value.
    pub fn free(&self, pid: PageId) -> Result<()> {
        let idx = self
            .hash
            .borrow()
            .lookup(pid, &self.frames)
            .ok_or(StorageError::BadHashKey(pid))?;
        let mut frame = self.frames[idx].borrow_mut();
        if frame.fixed == 0 {
            return Err(StorageError::invalid_operation(format!(
                "unpin underflow on page {}",
                pid
            )));
        }
        frame.fixed -= 1;
        Ok(())
    }

    /// Iterate every frame; write back and clear `DIRTY` for each that is
    /// set.
    pub fn flush_all(&self) -> Result<()> {
        for frame_cell in &self.frames {
            let (key, dirty) = {
                let f = frame_cell.borrow();
                (f.key, f.bits.is_set(FrameBits::DIRTY))
            };
            if dirty && !key.is_nil() {
                let data = frame_cell.borrow().data.clone();
                self.disk.borrow_mut().write_train(key, &*data)?;
                frame_cell.borrow_mut().bits.clear(FrameBits::DIRTY);
            }
        }
        Ok(())
    }

    /// Flush and evict one specific resident page, if present. Used by OM
    /// when a page is about to be deallocated so no stale frame lingers.
    pub fn flush_one(&self, pid: PageId) -> Result<()> {
        if let Some(idx) = self.hash.borrow().lookup(pid, &self.frames) {
            let dirty = self.frames[idx].borrow().bits.is_set(FrameBits::DIRTY);
            if dirty {
                let data = self.frames[idx].borrow().data.clone();
                self.disk.borrow_mut().write_train(pid, &*data)?;
            }
            self.hash.borrow_mut().delete(pid, &self.frames);
            self.frames[idx].borrow_mut().discard();
        }
        Ok(())
    }

    /// Clear every frame (fixed=0, bits=ALL_0, key=NIL) and every hash
    /// bucket, without writing dirty frames back.
    pub fn discard_all(&self) {
        for frame_cell in &self.frames {
            frame_cell.borrow_mut().discard();
        }
        self.hash.borrow_mut().delete_all();
        self.next_victim.set(0);
    }

    /// Allocate a free or evicted frame (not yet linked into the hash table
    /// or marked resident — callers finish setup).
    fn allocate_frame(&self) -> Result<usize> {
        if let Some(idx) = self.find_free_frame() {
            return Ok(idx);
        }
        let victim = self.find_victim()?;
        self.evict(victim)?;
        Ok(victim)
    }

    fn find_free_frame(&self) -> Option<usize> {
        self.frames.iter().position(|f| f.borrow().key.is_nil())
    }

    /// Second-Chance victim scan: scan at most `2*N` frames from the
    /// circular cursor; skip pinned frames; clear `REFER` and advance past
    /// unpinned-but-referenced frames; stop at the first unpinned,
    /// unreferenced frame.
    fn find_victim(&self) -> Result<usize> {
        let n = self.frames.len();
        let mut i = self.next_victim.get();
        for _ in 0..(2 * n) {
            let mut frame = self.frames[i].borrow_mut();
            if frame.fixed == 0 {
                if frame.bits.is_set(FrameBits::REFER) {
                    frame.bits.clear(FrameBits::REFER);
                } else {
                    drop(frame);
                    self.next_victim.set((i + 1) % n);
                    return Ok(i);
                }
            }
            drop(frame);
            i = (i + 1) % n;
        }
        Err(StorageError::NoUnfixedBuf)
    }

    fn evict(&self, idx: usize) -> Result<()> {
        let (key, dirty) = {
            let f = self.frames[idx].borrow();
            (f.key, f.bits.is_set(FrameBits::DIRTY))
        };
        if dirty {
            let data = self.frames[idx].borrow().data.clone();
            self.disk.borrow_mut().write_train(key, &*data)?;
        }
        if !key.is_nil() {
            self.hash.borrow_mut().delete(key, &self.frames);
        }
        Ok(())
    }
}

/// RAII pin: releases the frame's pin count on drop, regardless of which
/// exit path is taken, so every pin is paired with exactly one unpin on
/// every code path including the error path.
pub struct PagePin<'a> {
    pool: &'a BufferPool,
    idx: usize,
    pid: PageId,
}

impl<'a> PagePin<'a> {
    pub fn page_id(&self) -> PageId {
        self.pid
    }

    pub fn bytes(&self) -> Ref<'_, [u8; PAGE_SIZE]> {
        Ref::map(self.pool.frames[self.idx].borrow(), |f| &*f.data)
    }

    /// Mutable access to the page bytes. Does not itself set `DIRTY` —
    /// callers must call [`PagePin::set_dirty`] once their mutations are
    /// complete.
    pub fn bytes_mut(&self) -> RefMut<'_, [u8; PAGE_SIZE]> {
        RefMut::map(self.pool.frames[self.idx].borrow_mut(), |f| &mut *f.data)
    }

    pub fn set_dirty(&self) {
        self.pool.frames[self.idx]
            .borrow_mut()
            .bits
            .set(FrameBits::DIRTY);
    }

    pub fn is_new(&self) -> bool {
        self.pool.frames[self.idx]
            .borrow()
            .bits
            .is_set(FrameBits::NEW)
    }
}

impl<'a> Drop for PagePin<'a> {
    fn drop(&mut self) {
        let mut frame = self.pool.frames[self.idx].borrow_mut();
        debug_assert!(frame.fixed > 0, "unpin underflow on page {}", self.pid);
        frame.fixed = frame.fixed.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::FileRawDiskManager;
    use tempfile::tempdir;

    fn test_pool(
        capacity: usize,
    ) -> (BufferPool, Rc<RefCell<dyn RawDiskManager>>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol0.db");
        let disk: Rc<RefCell<dyn RawDiskManager>> =
            Rc::new(RefCell::new(FileRawDiskManager::open(0, &path).unwrap()));
        let pool = BufferPool::new(capacity, 7, Rc::clone(&disk));
        (pool, disk, dir)
    }

    #[test]
    fn get_new_then_get_round_trips_bytes() {
        let (pool, disk, _dir) = test_pool(4);
        let pid = disk
            .borrow_mut()
            .alloc_trains(0, PageId::NIL, 100, 1)
            .unwrap();
        {
            let pin = pool.get_new(pid).unwrap();
            pin.bytes_mut()[0..5].copy_from_slice(b"hello");
            pin.set_dirty();
        }
        pool.flush_all().unwrap();
        pool.discard_all();

        let pin = pool.get(pid).unwrap();
        assert_eq!(&pin.bytes()[0..5], b"hello");
    }

    #[test]
    fn second_chance_evicts_in_expected_order() {
        // Pool of 3 frames; pin A, unpin; pin B, unpin; pin C, unpin; all
        // get REFER. Pin D clears A,B,C's REFER on the first sweep and
        // evicts A on the second; pin E then evicts B.
        let (pool, disk, _dir) = test_pool(3);
        let mut pids = Vec::new();
        for _ in 0..5 {
            pids.push(
                disk.borrow_mut()
                    .alloc_trains(0, PageId::NIL, 100, 1)
                    .unwrap(),
            );
        }
        for &pid in &pids[0..3] {
            drop(pool.get(pid).unwrap());
        }
        assert!(pool.hash.borrow().lookup(pids[0], &pool.frames).is_some());

        drop(pool.get(pids[3]).unwrap());
        assert!(pool.hash.borrow().lookup(pids[0], &pool.frames).is_none());
        assert!(pool.hash.borrow().lookup(pids[1], &pool.frames).is_some());

        drop(pool.get(pids[4]).unwrap());
        assert!(pool.hash.borrow().lookup(pids[1], &pool.frames).is_none());
    }

    #[test]
    fn pool_exhaustion_reports_no_unfixed_buf() {
        let (pool, disk, _dir) = test_pool(2);
        let p0 = disk
            .borrow_mut()
            .alloc_trains(0, PageId::NIL, 100, 1)
            .unwrap();
        let p1 = disk
            .borrow_mut()
            .alloc_trains(0, PageId::NIL, 100, 1)
            .unwrap();
        let p2 = disk
            .borrow_mut()
            .alloc_trains(0, PageId::NIL, 100, 1)
            .unwrap();

        let _pin0 = pool.get(p0).unwrap();
        let _pin1 = pool.get(p1).unwrap();
        let err = pool.get(p2).unwrap_err();
        assert!(matches!(err, StorageError::NoUnfixedBuf));
    }

    #[test]
    fn set_dirty_on_absent_page_is_bad_hash_key() {
        let (pool, _disk, _dir) = test_pool(2);
        let err = pool.set_dirty(PageId::new(0, 42)).unwrap_err();
        assert!(matches!(err, StorageError::BadHashKey(_)));
    }
}
