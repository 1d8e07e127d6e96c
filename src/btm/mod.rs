//! B+-Tree Manager: create/insert/delete/fetch/fetch_next over a clustered
//! index keyed by a composite [`KeyDescriptor`], leaves linked
//! bidirectionally, internal nodes in `p0`-plus-slots layout.
//!
//! Recursive descent over [`page::BtmPage`]'s slotted layout, reading and
//! writing pages through [`crate::buffer::BufferPoolSet`]'s pin discipline.

pub mod cursor;
pub mod key;
pub mod page;
mod split;
mod underflow;

use crate::buffer::BufferPoolSet;
use crate::catalog::BtreeFileCatalog;
use crate::dealloc::{DeallocElem, DeallocSink};
use crate::error::{Result, StorageError};
use crate::raw::RawDiskManager;
use crate::types::{comp_op, BufferType, KeyDescriptor, ObjectId, PageId};
use cursor::{binary_search_internal, binary_search_leaf, Cursor, CursorFlag};
use key::{key_compare, KeyVal};
use page::{BtmPage, FLAG_FREEPAGE, FLAG_INTERNAL, FLAG_LEAF, FLAG_ROOT};
use std::cell::RefCell;
use std::rc::Rc;

type Disk = Rc<RefCell<dyn RawDiskManager>>;

/// An entry promoted to the parent after a split: the new page's id and
/// the key that now separates it from its left sibling.
#[derive(Debug, Clone)]
pub struct InternalItem {
    pub spid: PageId,
    pub key: Vec<u8>,
}

pub struct BtreeManager<'p> {
    pool: &'p BufferPoolSet,
}

impl<'p> BtreeManager<'p> {
    pub fn new(pool: &'p BufferPoolSet) -> Self {
        Self { pool }
    }

    /// Allocates a fresh page and initializes it as a root/leaf, returning
    /// the new tree's catalog entry.
    pub fn create_index(&self, disk: &Disk, vol_no: u16) -> Result<BtreeFileCatalog> {
        let pid = disk.borrow_mut().alloc_trains(vol_no, PageId::NIL, 100, 1)?;
        let pin = self.pool.get_new(pid, BufferType::Btree)?;
        let mut bytes = pin.bytes_mut();
        BtmPage::new(&mut bytes).init_leaf(pid, FLAG_ROOT);
        pin.set_dirty();
        Ok(BtreeFileCatalog::new(pid, pid))
    }

    fn header_of(&self, pid: PageId) -> Result<page::BtmPageHeader> {
        let pin = self.pool.get(pid, BufferType::Btree)?;
        let mut bytes = *pin.bytes();
        Ok(BtmPage::new(&mut bytes).header())
    }

    fn is_leaf(&self, pid: PageId) -> Result<bool> {
        Ok(self.header_of(pid)?.is(FLAG_LEAF))
    }

    // ---- insert -----------------------------------------------------

    /// Inserts `(kval, oid)`, descending to the target leaf and splitting
    /// pages (up to growing a new root) as needed to make room.
    pub fn insert(
        &self,
        disk: &Disk,
        vol_no: u16,
        root: PageId,
        kdesc: &KeyDescriptor,
        kval: &KeyVal,
        oid: ObjectId,
    ) -> Result<()> {
        if let Some(item) = self.insert_rec(disk, vol_no, root, kdesc, kval, oid)? {
            self.root_insert(disk, vol_no, root, item)?;
        }
        Ok(())
    }

    fn insert_rec(
        &self,
        disk: &Disk,
        vol_no: u16,
        pid: PageId,
        kdesc: &KeyDescriptor,
        kval: &KeyVal,
        oid: ObjectId,
    ) -> Result<Option<InternalItem>> {
        if self.is_leaf(pid)? {
            self.insert_leaf(disk, vol_no, pid, kdesc, kval, oid)
        } else {
            let child = self.choose_child(pid, kdesc, kval)?;
            let promoted = self.insert_rec(disk, vol_no, child, kdesc, kval, oid)?;
            match promoted {
                None => Ok(None),
                Some(item) => self.insert_internal(disk, vol_no, pid, kdesc, item),
            }
        }
    }

    fn choose_child(&self, pid: PageId, kdesc: &KeyDescriptor, kval: &KeyVal) -> Result<PageId> {
        let pin = self.pool.get(pid, BufferType::Btree)?;
        let mut bytes = *pin.bytes();
        let page = BtmPage::new(&mut bytes);
        let header = page.header();
        let (idx, _) = binary_search_internal(&page, kdesc, kval);
        Ok(match idx {
            None => header.p0,
            Some(i) => page.internal_entry(i).spid,
        })
    }

    /// Position to insert `(key, oid)` among a leaf's entries, erroring
    /// with `DuplicatedObjectId` if that exact pair is already present.
    fn find_leaf_insert_pos(
        page: &BtmPage,
        kdesc: &KeyDescriptor,
        kval: &KeyVal,
        oid: ObjectId,
    ) -> Result<u16> {
        let (mut idx, found) = binary_search_leaf(page, kdesc, kval);
        if found {
            let n = page.header().n_slots;
            while idx < n {
                let entry = page.leaf_entry(idx);
                let ekey = KeyVal::decode(kdesc, &entry.key);
                if key_compare(kdesc, &ekey, kval) != crate::types::CompResult::Equal {
                    break;
                }
                if entry.oid == oid {
                    return Err(StorageError::DuplicatedObjectId);
                }
                if entry.oid > oid {
                    break;
                }
                idx += 1;
            }
        }
        Ok(idx)
    }

    fn insert_leaf(
        &self,
        disk: &Disk,
        vol_no: u16,
        pid: PageId,
        kdesc: &KeyDescriptor,
        kval: &KeyVal,
        oid: ObjectId,
    ) -> Result<Option<InternalItem>> {
        let key_bytes = kval.encode();
        let cost = BtmPage::leaf_entry_cost(key_bytes.len());

        let (slot, cfree, total_free) = {
            let pin = self.pool.get(pid, BufferType::Btree)?;
            let mut bytes = *pin.bytes();
            let page = BtmPage::new(&mut bytes);
            let slot = Self::find_leaf_insert_pos(&page, kdesc, kval, oid)?;
            let h = page.header();
            (slot, h.cfree(), h.total_free())
        };

        if cfree >= cost {
            let pin = self.pool.get(pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            BtmPage::new(&mut bytes).insert_leaf_entry(slot, &key_bytes, oid);
            pin.set_dirty();
            return Ok(None);
        }
        if total_free >= cost {
            {
                let pin = self.pool.get(pid, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                BtmPage::new(&mut bytes).compact(None);
                pin.set_dirty();
            }
            let pin = self.pool.get(pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            BtmPage::new(&mut bytes).insert_leaf_entry(slot, &key_bytes, oid);
            pin.set_dirty();
            return Ok(None);
        }

        Ok(Some(self.split_leaf(disk, vol_no, pid, slot, key_bytes, oid)?))
    }

    fn insert_internal(
        &self,
        disk: &Disk,
        vol_no: u16,
        pid: PageId,
        kdesc: &KeyDescriptor,
        item: InternalItem,
    ) -> Result<Option<InternalItem>> {
        let kval = KeyVal::decode(kdesc, &item.key);
        let cost = BtmPage::internal_entry_cost(item.key.len());

        let (idx, cfree, total_free) = {
            let pin = self.pool.get(pid, BufferType::Btree)?;
            let mut bytes = *pin.bytes();
            let page = BtmPage::new(&mut bytes);
            let (i, _) = binary_search_internal(&page, kdesc, &kval);
            // insert immediately after the covering entry (i.e. at i+1), or
            // at 0 if the new key sorts before every existing entry.
            let insert_at = i.map(|x| x + 1).unwrap_or(0);
            let h = page.header();
            (insert_at, h.cfree(), h.total_free())
        };

        if cfree >= cost {
            let pin = self.pool.get(pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            BtmPage::new(&mut bytes).insert_internal_entry(idx, &item.key, item.spid);
            pin.set_dirty();
            return Ok(None);
        }
        if total_free >= cost {
            {
                let pin = self.pool.get(pid, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                BtmPage::new(&mut bytes).compact(None);
                pin.set_dirty();
            }
            let pin = self.pool.get(pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            BtmPage::new(&mut bytes).insert_internal_entry(idx, &item.key, item.spid);
            pin.set_dirty();
            return Ok(None);
        }

        Ok(Some(self.split_internal(disk, vol_no, pid, Some(idx), item.key, item.spid)?))
    }

    // ---- delete -------------------------------------------------------

    /// Deletes `(kval, oid)`, descending to the target leaf and resolving
    /// any underflow left behind.
    pub fn delete(
        &self,
        disk: &Disk,
        vol_no: u16,
        root: PageId,
        kdesc: &KeyDescriptor,
        kval: &KeyVal,
        oid: ObjectId,
        dealloc: &mut dyn DeallocSink,
    ) -> Result<()> {
        self.delete_rec(disk, vol_no, root, kdesc, kval, oid, dealloc)?;
        self.maybe_shrink_root(root, dealloc)?;
        Ok(())
    }

    fn delete_rec(
        &self,
        disk: &Disk,
        vol_no: u16,
        pid: PageId,
        kdesc: &KeyDescriptor,
        kval: &KeyVal,
        oid: ObjectId,
        dealloc: &mut dyn DeallocSink,
    ) -> Result<bool> {
        if self.is_leaf(pid)? {
            self.delete_leaf(pid, kdesc, kval, oid)
        } else {
            let (pos, child) = self.choose_child_pos(pid, kdesc, kval)?;
            let child_underflowed = self.delete_rec(disk, vol_no, child, kdesc, kval, oid, dealloc)?;
            if child_underflowed {
                self.fix_underflow(disk, vol_no, pid, pos, dealloc)
            } else {
                Ok(false)
            }
        }
    }

    fn choose_child_pos(
        &self,
        pid: PageId,
        kdesc: &KeyDescriptor,
        kval: &KeyVal,
    ) -> Result<(usize, PageId)> {
        let pin = self.pool.get(pid, BufferType::Btree)?;
        let mut bytes = *pin.bytes();
        let page = BtmPage::new(&mut bytes);
        let header = page.header();
        let (idx, _) = binary_search_internal(&page, kdesc, kval);
        Ok(match idx {
            None => (0, header.p0),
            Some(i) => (i as usize + 1, page.internal_entry(i).spid),
        })
    }

    fn delete_leaf(
        &self,
        pid: PageId,
        kdesc: &KeyDescriptor,
        kval: &KeyVal,
        oid: ObjectId,
    ) -> Result<bool> {
        let pin = self.pool.get(pid, BufferType::Btree)?;
        let mut bytes = pin.bytes_mut();
        let mut page = BtmPage::new(&mut bytes);
        let (mut idx, found) = binary_search_leaf(&page, kdesc, kval);
        let mut located = None;
        if found {
            let n = page.header().n_slots;
            while idx < n {
                let entry = page.leaf_entry(idx);
                let ekey = KeyVal::decode(kdesc, &entry.key);
                if key_compare(kdesc, &ekey, kval) != crate::types::CompResult::Equal {
                    break;
                }
                if entry.oid == oid {
                    located = Some(idx);
                    break;
                }
                idx += 1;
            }
        }
        let slot = located.ok_or(StorageError::NotFound)?;
        page.remove_entry(slot);
        pin.set_dirty();
        Ok(page.header().total_free() > page::half_threshold())
    }

    fn maybe_shrink_root(&self, root: PageId, dealloc: &mut dyn DeallocSink) -> Result<()> {
        let header = self.header_of(root)?;
        if !(header.is(FLAG_INTERNAL) && header.n_slots == 0 && !header.p0.is_nil()) {
            return Ok(());
        }
        let child_pid = header.p0;
        let mut child_bytes = {
            let pin = self.pool.get(child_pid, BufferType::Btree)?;
            *pin.bytes()
        };
        let (is_leaf, prev, next) = {
            let mut ch = BtmPage::new(&mut child_bytes);
            let mut ch_header = ch.header();
            ch_header.pid = root;
            ch_header.flags |= FLAG_ROOT;
            ch.set_header(&ch_header);
            (ch_header.is(FLAG_LEAF), ch_header.prev_page, ch_header.next_page)
        };

        {
            let pin = self.pool.get(root, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            bytes.copy_from_slice(&child_bytes);
            pin.set_dirty();
        }
        if is_leaf {
            if !prev.is_nil() {
                let pin = self.pool.get(prev, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                let mut p = BtmPage::new(&mut bytes);
                let mut h = p.header();
                h.next_page = root;
                p.set_header(&h);
                pin.set_dirty();
            }
            if !next.is_nil() {
                let pin = self.pool.get(next, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                let mut p = BtmPage::new(&mut bytes);
                let mut h = p.header();
                h.prev_page = root;
                p.set_header(&h);
                pin.set_dirty();
            }
        }
        {
            let pin = self.pool.get(child_pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut p = BtmPage::new(&mut bytes);
            let mut h = p.header();
            h.flags = FLAG_FREEPAGE;
            p.set_header(&h);
            pin.set_dirty();
        }
        dealloc.push(DeallocElem::Page(child_pid));
        Ok(())
    }

    /// Recursively descends every child of `pid`'s subtree, marking each
    /// `FREEPAGE` and enqueueing it on the dealloc list.
    pub fn free_pages(&self, pid: PageId, dealloc: &mut dyn DeallocSink) -> Result<()> {
        let (is_internal, p0, children) = {
            let pin = self.pool.get(pid, BufferType::Btree)?;
            let mut bytes = *pin.bytes();
            let page = BtmPage::new(&mut bytes);
            let h = page.header();
            if h.is(FLAG_INTERNAL) {
                let kids: Vec<PageId> = (0..h.n_slots).map(|i| page.internal_entry(i).spid).collect();
                (true, h.p0, kids)
            } else {
                (false, PageId::NIL, Vec::new())
            }
        };
        if is_internal {
            self.free_pages(p0, dealloc)?;
            for child in children {
                self.free_pages(child, dealloc)?;
            }
        }
        let pin = self.pool.get(pid, BufferType::Btree)?;
        let mut bytes = pin.bytes_mut();
        let mut page = BtmPage::new(&mut bytes);
        let mut h = page.header();
        h.flags = FLAG_FREEPAGE;
        page.set_header(&h);
        pin.set_dirty();
        dealloc.push(DeallocElem::Page(pid));
        Ok(())
    }

    // ---- fetch / fetch_next -------------------------------------------

    fn leaf_n_slots(&self, pid: PageId) -> Result<u16> {
        Ok(self.header_of(pid)?.n_slots)
    }

    fn slot_cursor(&self, kdesc: &KeyDescriptor, pid: PageId, idx: u16) -> Result<Cursor> {
        let pin = self.pool.get(pid, BufferType::Btree)?;
        let mut bytes = *pin.bytes();
        let page = BtmPage::new(&mut bytes);
        if idx >= page.header().n_slots {
            return Ok(Cursor::eos());
        }
        let entry = page.leaf_entry(idx);
        Ok(Cursor {
            flag: CursorFlag::On,
            oid: entry.oid,
            key: KeyVal::decode(kdesc, &entry.key),
            leaf_pid: pid,
            slot_no: idx,
        })
    }

    /// Walk to the previous leaf's last slot. `prev_page`/`next_page` are
    /// read straight from the header, which is already `NIL`-initialized
    /// by construction, so this never needs to special-case an
    /// uninitialized sentinel.
    fn slot_before(&self, kdesc: &KeyDescriptor, pid: PageId, idx: u16) -> Result<Cursor> {
        if idx > 0 {
            return self.slot_cursor(kdesc, pid, idx - 1);
        }
        let prev = self.header_of(pid)?.prev_page;
        if prev.is_nil() {
            return Ok(Cursor::eos());
        }
        let n = self.leaf_n_slots(prev)?;
        if n == 0 {
            return Ok(Cursor::eos());
        }
        self.slot_cursor(kdesc, prev, n - 1)
    }

    fn slot_at_or_roll(&self, kdesc: &KeyDescriptor, pid: PageId, idx: u16, n: u16) -> Result<Cursor> {
        if idx < n {
            return self.slot_cursor(kdesc, pid, idx);
        }
        let next = self.header_of(pid)?.next_page;
        if next.is_nil() {
            return Ok(Cursor::eos());
        }
        self.slot_cursor(kdesc, next, 0)
    }

    fn leftmost_leaf(&self, root: PageId) -> Result<PageId> {
        let mut pid = root;
        loop {
            let h = self.header_of(pid)?;
            if h.is(FLAG_LEAF) {
                return Ok(pid);
            }
            pid = h.p0;
        }
    }

    fn rightmost_leaf(&self, root: PageId) -> Result<PageId> {
        let mut pid = root;
        loop {
            let pin = self.pool.get(pid, BufferType::Btree)?;
            let mut bytes = *pin.bytes();
            let page = BtmPage::new(&mut bytes);
            let h = page.header();
            if h.is(FLAG_LEAF) {
                return Ok(pid);
            }
            pid = if h.n_slots == 0 {
                h.p0
            } else {
                page.internal_entry(h.n_slots - 1).spid
            };
        }
    }

    fn descend_to_leaf(&self, root: PageId, kdesc: &KeyDescriptor, kval: &KeyVal) -> Result<PageId> {
        let mut pid = root;
        loop {
            if self.is_leaf(pid)? {
                return Ok(pid);
            }
            pid = self.choose_child(pid, kdesc, kval)?;
        }
    }

    fn qualifies_stop(
        &self,
        kdesc: &KeyDescriptor,
        key: &KeyVal,
        stop_kval: Option<&KeyVal>,
        stop_op: u8,
    ) -> bool {
        match stop_kval {
            None => true,
            Some(bound) => key_compare(kdesc, key, bound).qualifies(stop_op),
        }
    }

    fn position_in_leaf(
        &self,
        leaf_pid: PageId,
        kdesc: &KeyDescriptor,
        start_kval: Option<&KeyVal>,
        start_op: u8,
    ) -> Result<Cursor> {
        if start_op == comp_op::SM_BOF {
            return self.slot_cursor(kdesc, leaf_pid, 0);
        }
        if start_op == comp_op::SM_EOF {
            let n = self.leaf_n_slots(leaf_pid)?;
            if n == 0 {
                return Ok(Cursor::eos());
            }
            return self.slot_cursor(kdesc, leaf_pid, n - 1);
        }
        let kval = start_kval
            .ok_or_else(|| StorageError::invalid_operation("start_kval required for this start_op"))?;
        let (idx, found) = {
            let pin = self.pool.get(leaf_pid, BufferType::Btree)?;
            let mut bytes = *pin.bytes();
            let page = BtmPage::new(&mut bytes);
            binary_search_leaf(&page, kdesc, kval)
        };
        let n = self.leaf_n_slots(leaf_pid)?;

        match start_op {
            comp_op::SM_EQ => {
                if found {
                    self.slot_cursor(kdesc, leaf_pid, idx)
                } else {
                    Ok(Cursor::eos())
                }
            }
            comp_op::SM_LT => self.slot_before(kdesc, leaf_pid, idx),
            comp_op::SM_LE => {
                if found {
                    self.slot_cursor(kdesc, leaf_pid, idx)
                } else {
                    self.slot_before(kdesc, leaf_pid, idx)
                }
            }
            comp_op::SM_GE => self.slot_at_or_roll(kdesc, leaf_pid, idx, n),
            comp_op::SM_GT => {
                if found {
                    self.slot_at_or_roll(kdesc, leaf_pid, idx + 1, n)
                } else {
                    self.slot_at_or_roll(kdesc, leaf_pid, idx, n)
                }
            }
            op => Err(StorageError::BadCompOp(op)),
        }
    }

    /// Positions a cursor at the first entry satisfying `start_op`
    /// relative to `start_kval` (or a tree boundary for `SM_BOF`/`SM_EOF`),
    /// marking it past-the-end if it fails `stop_op`/`stop_kval`.
    pub fn fetch(
        &self,
        root: PageId,
        kdesc: &KeyDescriptor,
        start_kval: Option<&KeyVal>,
        start_op: u8,
        stop_kval: Option<&KeyVal>,
        stop_op: u8,
    ) -> Result<Cursor> {
        let leaf_pid = match start_op {
            comp_op::SM_BOF => self.leftmost_leaf(root)?,
            comp_op::SM_EOF => self.rightmost_leaf(root)?,
            _ => {
                let kval = start_kval.ok_or_else(|| {
                    StorageError::invalid_operation("start_kval required for this start_op")
                })?;
                self.descend_to_leaf(root, kdesc, kval)?
            }
        };
        let mut cursor = self.position_in_leaf(leaf_pid, kdesc, start_kval, start_op)?;
        if cursor.flag == CursorFlag::On && !self.qualifies_stop(kdesc, &cursor.key, stop_kval, stop_op) {
            cursor.flag = CursorFlag::Eos;
        }
        Ok(cursor)
    }

    /// Advances `current` to the next qualifying entry, or marks it
    /// past-the-end.
    pub fn fetch_next(
        &self,
        kdesc: &KeyDescriptor,
        stop_kval: Option<&KeyVal>,
        stop_op: u8,
        current: &Cursor,
    ) -> Result<Cursor> {
        if current.flag != CursorFlag::On {
            return Ok(Cursor::eos());
        }
        let ascending = matches!(stop_op, comp_op::SM_LT | comp_op::SM_LE | comp_op::SM_EOF);
        let mut next = if ascending {
            let n = self.leaf_n_slots(current.leaf_pid)?;
            self.slot_at_or_roll(kdesc, current.leaf_pid, current.slot_no + 1, n)?
        } else {
            self.slot_before(kdesc, current.leaf_pid, current.slot_no)?
        };
        if next.flag == CursorFlag::On {
            next.key = KeyVal::decode(kdesc, &next.key.encode());
            if !self.qualifies_stop(kdesc, &next.key, stop_kval, stop_op) {
                next.flag = CursorFlag::Eos;
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferPoolConfig, BufferPoolSet};
    use crate::dealloc::VecDeallocList;
    use crate::raw::FileRawDiskManager;
    use crate::types::KeyPartType;
    use tempfile::tempdir;

    fn env() -> (BufferPoolSet, Disk, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol0.db");
        let disk: Disk = Rc::new(RefCell::new(FileRawDiskManager::open(0, &path).unwrap()));
        let pool = BufferPoolSet::new(
            [
                BufferPoolConfig { capacity: 32, hash_table_size: 31 },
                BufferPoolConfig { capacity: 32, hash_table_size: 31 },
            ],
            disk.clone(),
        );
        (pool, disk, dir)
    }

    fn oid_for(i: i32) -> ObjectId {
        ObjectId::new(PageId::new(0, 100), (i % 100) as u16, i as u32)
    }

    #[test]
    fn insert_and_point_fetch_round_trip() {
        let (pool, disk, _dir) = env();
        let btm = BtreeManager::new(&pool);
        let cat = btm.create_index(&disk, 0).unwrap();
        let desc = KeyDescriptor::single(KeyPartType::Int, true);

        for k in [10, 20, 30] {
            btm.insert(&disk, 0, cat.root_page(), &desc, &KeyVal::single_int(k), oid_for(k))
                .unwrap();
        }

        let cursor = btm
            .fetch(cat.root_page(), &desc, Some(&KeyVal::single_int(20)), comp_op::SM_EQ, None, comp_op::SM_EOF)
            .unwrap();
        assert_eq!(cursor.flag, CursorFlag::On);
        assert_eq!(cursor.oid, oid_for(20));

        let miss = btm
            .fetch(cat.root_page(), &desc, Some(&KeyVal::single_int(25)), comp_op::SM_EQ, None, comp_op::SM_EOF)
            .unwrap();
        assert_eq!(miss.flag, CursorFlag::Eos);
    }

    #[test]
    fn insert_until_split_then_range_scan_is_ordered() {
        let (pool, disk, _dir) = env();
        let btm = BtreeManager::new(&pool);
        let cat = btm.create_index(&disk, 0).unwrap();
        let desc = KeyDescriptor::single(KeyPartType::Int, true);

        for k in (10..=2000).step_by(10) {
            btm.insert(&disk, 0, cat.root_page(), &desc, &KeyVal::single_int(k), oid_for(k))
                .unwrap();
        }

        let mut cursor = btm
            .fetch(
                cat.root_page(),
                &desc,
                Some(&KeyVal::single_int(500)),
                comp_op::SM_GE,
                Some(&KeyVal::single_int(700)),
                comp_op::SM_LE,
            )
            .unwrap();

        let mut seen = Vec::new();
        while cursor.flag == CursorFlag::On {
            if let crate::btm::key::KeyPartVal::Int(v) = cursor.key.0[0] {
                seen.push(v);
            }
            cursor = btm
                .fetch_next(&desc, Some(&KeyVal::single_int(700)), comp_op::SM_LE, &cursor)
                .unwrap();
        }
        let expected: Vec<i32> = (500..=700).step_by(10).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn delete_then_fetch_reports_eos() {
        let (pool, disk, _dir) = env();
        let btm = BtreeManager::new(&pool);
        let cat = btm.create_index(&disk, 0).unwrap();
        let desc = KeyDescriptor::single(KeyPartType::Int, true);
        let mut dealloc = VecDeallocList::new();

        for k in [10, 20, 30, 40] {
            btm.insert(&disk, 0, cat.root_page(), &desc, &KeyVal::single_int(k), oid_for(k))
                .unwrap();
        }
        btm.delete(&disk, 0, cat.root_page(), &desc, &KeyVal::single_int(20), oid_for(20), &mut dealloc)
            .unwrap();

        let cursor = btm
            .fetch(cat.root_page(), &desc, Some(&KeyVal::single_int(20)), comp_op::SM_EQ, None, comp_op::SM_EOF)
            .unwrap();
        assert_eq!(cursor.flag, CursorFlag::Eos);
    }

    #[test]
    fn delete_missing_key_is_not_found() {
        let (pool, disk, _dir) = env();
        let btm = BtreeManager::new(&pool);
        let cat = btm.create_index(&disk, 0).unwrap();
        let desc = KeyDescriptor::single(KeyPartType::Int, true);
        let mut dealloc = VecDeallocList::new();

        let err = btm
            .delete(&disk, 0, cat.root_page(), &desc, &KeyVal::single_int(5), oid_for(5), &mut dealloc)
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }
}
