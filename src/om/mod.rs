//! Object Manager: slotted-page object storage, the doubly-linked page
//! list per file, available-space lists, and create/destroy/read/iterate
//! of `ObjectId`-addressed objects.
//!
//! Placement follows a try-as-is -> compact -> allocate-a-fresh-page-linked-in
//! order. Slot/page mechanics live in [`page`]; available-space bucketing in
//! [`avail`].

pub mod avail;
pub mod page;

use crate::buffer::BufferPoolSet;
use crate::catalog::DataFileCatalog;
use crate::dealloc::{DeallocElem, DeallocSink};
use crate::error::{Result, StorageError};
use crate::raw::RawDiskManager;
use crate::types::{BufferType, ObjectId, PageId};
use page::{needed_for, ObjectHdr, SlottedPage, PAGE_CAPACITY};
use std::cell::RefCell;
use std::rc::Rc;

/// Seed for a new object's header: if present, its `tag`/`properties` are
/// copied into the new object; if absent, both are set to zero. Never
/// derived from a null pointer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectHeaderSeed {
    pub properties: u32,
    pub tag: u32,
}

/// Sentinel meaning "read to the end of the object", passed as `read_object`'s
/// length.
pub const REMAINDER: Option<usize> = None;

type Disk = Rc<RefCell<dyn RawDiskManager>>;

pub struct ObjectManager<'p> {
    pool: &'p BufferPoolSet,
}

impl<'p> ObjectManager<'p> {
    pub fn new(pool: &'p BufferPoolSet) -> Self {
        Self { pool }
    }

    /// Create a fresh, empty data file: allocates its first page and
    /// returns the catalog overlay a caller persists.
    pub fn init_file(&self, disk: &Disk, vol_no: u16) -> Result<DataFileCatalog> {
        let pid = disk.borrow_mut().alloc_trains(vol_no, PageId::NIL, 100, 1)?;
        {
            let pin = self.pool.get_new(pid, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let mut page = SlottedPage::new(&mut bytes);
            page.init(pid, pid);
            pin.set_dirty();
        }
        Ok(DataFileCatalog::new(pid, pid))
    }

    fn header_of(&self, pid: PageId) -> Result<page::SlottedPageHeader> {
        let pin = self.pool.get(pid, BufferType::Data)?;
        let mut bytes = *pin.bytes();
        Ok(SlottedPage::new(&mut bytes).header())
    }

    /// Remove `pid` from whichever available-space list it's currently on
    /// (a no-op if it's on none).
    fn avail_unlink(&self, file_cat: &mut DataFileCatalog, pid: PageId) -> Result<()> {
        let header = {
            let pin = self.pool.get(pid, BufferType::Data)?;
            SlottedPage::new(&mut pin.bytes_mut()).header()
        };
        let Some(idx) = header.avail_list_idx else {
            return Ok(());
        };
        let (prev, next) = (header.avail_prev, header.avail_next);

        if !prev.is_nil() {
            let pin = self.pool.get(prev, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let mut p = SlottedPage::new(&mut bytes);
            let mut h = p.header();
            h.avail_next = next;
            p.set_header(&h);
            pin.set_dirty();
        } else {
            file_cat.avail_list_heads[idx as usize] = next;
        }
        if !next.is_nil() {
            let pin = self.pool.get(next, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let mut p = SlottedPage::new(&mut bytes);
            let mut h = p.header();
            h.avail_prev = prev;
            p.set_header(&h);
            pin.set_dirty();
        }

        let pin = self.pool.get(pid, BufferType::Data)?;
        let mut bytes = pin.bytes_mut();
        let mut p = SlottedPage::new(&mut bytes);
        let mut h = p.header();
        h.avail_list_idx = None;
        h.avail_prev = PageId::NIL;
        h.avail_next = PageId::NIL;
        p.set_header(&h);
        pin.set_dirty();
        Ok(())
    }

    /// Insert `pid` at the head of the bucket matching its current `FREE`,
    /// provided it still has at least one live object.
    fn avail_insert(&self, file_cat: &mut DataFileCatalog, pid: PageId) -> Result<()> {
        let (header, has_objects) = {
            let pin = self.pool.get(pid, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let page = SlottedPage::new(&mut bytes);
            let h = page.header();
            let any = page.all_slots().iter().any(|s| !s.is_empty());
            (h, any)
        };
        if !has_objects {
            return Ok(());
        }
        let Some(bucket) = avail::bucket_for(header.total_free(), PAGE_CAPACITY) else {
            return Ok(());
        };
        let old_head = file_cat.avail_list_heads[bucket as usize];

        {
            let pin = self.pool.get(pid, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let mut p = SlottedPage::new(&mut bytes);
            let mut h = p.header();
            h.avail_list_idx = Some(bucket);
            h.avail_prev = PageId::NIL;
            h.avail_next = old_head;
            p.set_header(&h);
            pin.set_dirty();
        }
        if !old_head.is_nil() {
            let pin = self.pool.get(old_head, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let mut p = SlottedPage::new(&mut bytes);
            let mut h = p.header();
            h.avail_prev = pid;
            p.set_header(&h);
            pin.set_dirty();
        }
        file_cat.avail_list_heads[bucket as usize] = pid;
        Ok(())
    }

    /// Allocate a fresh page and link it into the file's page list
    /// immediately after `after` (or at the tail, if `after` is `None`).
    fn link_new_page(
        &self,
        disk: &Disk,
        vol_no: u16,
        file_cat: &mut DataFileCatalog,
        after: Option<PageId>,
    ) -> Result<PageId> {
        let near = after.unwrap_or(file_cat.last_page);
        let new_pid = disk
            .borrow_mut()
            .alloc_trains(vol_no, near, file_cat.extent_fill_factor, 1)?;

        let after_pid = after.unwrap_or(file_cat.last_page);
        let next_of_after = if after_pid.is_nil() {
            PageId::NIL
        } else {
            self.header_of(after_pid)?.next_page
        };

        {
            let pin = self.pool.get_new(new_pid, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let mut page = SlottedPage::new(&mut bytes);
            page.init(new_pid, file_cat.file_id);
            let mut h = page.header();
            h.prev_page = after_pid;
            h.next_page = next_of_after;
            page.set_header(&h);
            pin.set_dirty();
        }

        if !after_pid.is_nil() {
            let pin = self.pool.get(after_pid, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let mut p = SlottedPage::new(&mut bytes);
            let mut h = p.header();
            h.next_page = new_pid;
            p.set_header(&h);
            pin.set_dirty();
        } else {
            file_cat.first_page = new_pid;
        }

        if !next_of_after.is_nil() {
            let pin = self.pool.get(next_of_after, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let mut p = SlottedPage::new(&mut bytes);
            let mut h = p.header();
            h.prev_page = new_pid;
            p.set_header(&h);
            pin.set_dirty();
        } else {
            file_cat.last_page = new_pid;
        }

        Ok(new_pid)
    }

    /// Stores `data` as a new object, preferring a page near `near_oid` if
    /// one has room, and returns the stable `ObjectId` it was placed at.
    pub fn create_object(
        &self,
        disk: &Disk,
        vol_no: u16,
        file_cat: &mut DataFileCatalog,
        near_oid: Option<ObjectId>,
        header_seed: Option<ObjectHeaderSeed>,
        data: &[u8],
    ) -> Result<ObjectId> {
        let length = data.len();
        let needed = needed_for(length);
        if needed > PAGE_CAPACITY {
            return Err(StorageError::not_supported(
                "object exceeds a single page (large objects are out of scope)",
            ));
        }

        let target = self.find_placement(file_cat, near_oid, needed)?;
        let pid = match target {
            Placement::Existing(pid, needs_compact) => {
                self.avail_unlink(file_cat, pid)?;
                if needs_compact {
                    let pin = self.pool.get(pid, BufferType::Data)?;
                    let mut bytes = pin.bytes_mut();
                    SlottedPage::new(&mut bytes).compact(None);
                    pin.set_dirty();
                }
                pid
            }
            Placement::NewAfter(after) => self.link_new_page(disk, vol_no, file_cat, after)?,
        };

        let seed = header_seed.unwrap_or_default();
        let oid = {
            let pin = self.pool.get(pid, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let mut page = SlottedPage::new(&mut bytes);
            let mut header = page.header();

            if header.unique >= file_cat.unique_limit {
                return Err(StorageError::not_supported(
                    "page unique counter would exceed the file's unique_limit",
                ));
            }
            let unique = header.unique;
            header.unique += 1;
            page.set_header(&header);

            let slot_no = page.find_empty_slot().unwrap_or(header.n_slots);
            let hdr = ObjectHdr {
                properties: seed.properties,
                tag: seed.tag,
                length: length as u32,
            };
            page.put_object(slot_no, hdr, data, unique);
            pin.set_dirty();
            ObjectId::new(pid, slot_no, unique)
        };

        self.avail_insert(file_cat, pid)?;
        Ok(oid)
    }

    fn find_placement(
        &self,
        file_cat: &DataFileCatalog,
        near_oid: Option<ObjectId>,
        needed: usize,
    ) -> Result<Placement> {
        if let Some(near) = near_oid {
            if near.is_nil() {
                return Err(StorageError::BadObjectID("nil near_oid".into()));
            }
            let header = self.header_of(near.page_id)?;
            if header.cfree() >= needed {
                return Ok(Placement::Existing(near.page_id, false));
            }
            if header.total_free() >= needed {
                return Ok(Placement::Existing(near.page_id, true));
            }
            return Ok(Placement::NewAfter(Some(near.page_id)));
        }

        for bucket in 0..crate::types::NUM_AVAIL_LISTS {
            let mut pid = file_cat.avail_list_heads[bucket];
            while !pid.is_nil() {
                let header = self.header_of(pid)?;
                if header.total_free() >= needed {
                    let needs_compact = header.cfree() < needed;
                    return Ok(Placement::Existing(pid, needs_compact));
                }
                pid = header.avail_next;
            }
        }

        if !file_cat.last_page.is_nil() {
            let header = self.header_of(file_cat.last_page)?;
            if header.total_free() >= needed {
                let needs_compact = header.cfree() < needed;
                return Ok(Placement::Existing(file_cat.last_page, needs_compact));
            }
        }

        Ok(Placement::NewAfter(None))
    }

    /// Removes the object at `oid`, frees its slot, and updates the page's
    /// available-space-list membership.
    pub fn destroy_object(
        &self,
        file_cat: &mut DataFileCatalog,
        oid: ObjectId,
        dealloc: &mut dyn DeallocSink,
    ) -> Result<()> {
        self.validate_oid(oid)?;
        self.avail_unlink(file_cat, oid.page_id)?;

        let (now_empty, next_page, prev_page) = {
            let pin = self.pool.get(oid.page_id, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let mut page = SlottedPage::new(&mut bytes);
            page.remove_object(oid.slot_no);
            pin.set_dirty();
            let h = page.header();
            let empty = page.all_slots().iter().all(|s| s.is_empty());
            (empty, h.next_page, h.prev_page)
        };

        if now_empty && oid.page_id != file_cat.first_page {
            if !prev_page.is_nil() {
                let pin = self.pool.get(prev_page, BufferType::Data)?;
                let mut bytes = pin.bytes_mut();
                let mut p = SlottedPage::new(&mut bytes);
                let mut h = p.header();
                h.next_page = next_page;
                p.set_header(&h);
                pin.set_dirty();
            }
            if !next_page.is_nil() {
                let pin = self.pool.get(next_page, BufferType::Data)?;
                let mut bytes = pin.bytes_mut();
                let mut p = SlottedPage::new(&mut bytes);
                let mut h = p.header();
                h.prev_page = prev_page;
                p.set_header(&h);
                pin.set_dirty();
            } else {
                file_cat.last_page = prev_page;
            }
            dealloc.push(DeallocElem::Page(oid.page_id));
        } else {
            self.avail_insert(file_cat, oid.page_id)?;
        }
        Ok(())
    }

    fn validate_oid(&self, oid: ObjectId) -> Result<()> {
        if oid.is_nil() {
            return Err(StorageError::BadObjectID("nil object id".into()));
        }
        let pin = self.pool.get(oid.page_id, BufferType::Data)?;
        let mut bytes = pin.bytes_mut();
        let page = SlottedPage::new(&mut bytes);
        let header = page.header();
        if oid.slot_no >= header.n_slots {
            return Err(StorageError::BadObjectID(format!(
                "slot {} out of range (n_slots={})",
                oid.slot_no, header.n_slots
            )));
        }
        let slot = page.slot(oid.slot_no);
        if slot.is_empty() || slot.unique != oid.unique {
            return Err(StorageError::BadObjectID(format!(
                "stale object id {}",
                oid
            )));
        }
        Ok(())
    }

    /// Length in bytes of the object named by `oid`, without reading its
    /// data. Lets a caller size a buffer before calling `read_object` with
    /// [`REMAINDER`].
    pub fn object_len(&self, oid: ObjectId) -> Result<usize> {
        self.validate_oid(oid)?;
        let pin = self.pool.get(oid.page_id, BufferType::Data)?;
        let mut bytes_copy = *pin.bytes();
        let page = SlottedPage::new(&mut bytes_copy);
        Ok(page.object_header(oid.slot_no).length as usize)
    }

    /// Reads `length` bytes starting at `start` within the object at
    /// `oid`. `length` of [`REMAINDER`] reads to the end of the object.
    pub fn read_object(
        &self,
        oid: ObjectId,
        start: usize,
        length: Option<usize>,
        buf: Option<&mut [u8]>,
    ) -> Result<usize> {
        self.validate_oid(oid)?;
        let pin = self.pool.get(oid.page_id, BufferType::Data)?;
        let mut bytes_copy = *pin.bytes();
        let page = SlottedPage::new(&mut bytes_copy);
        let hdr = page.object_header(oid.slot_no);
        let total = hdr.length as usize;

        if start > total {
            return Err(StorageError::bad_start(format!(
                "start {} beyond object length {}",
                start, total
            )));
        }
        let want = length.unwrap_or(total - start);
        if start + want > total {
            return Err(StorageError::bad_length(format!(
                "start {} + length {} exceeds object length {}",
                start, want, total
            )));
        }
        if want > 0 && buf.is_none() {
            return Err(StorageError::BadUserBuf);
        }
        let data = page.object_bytes(oid.slot_no);
        if let Some(buf) = buf {
            if buf.len() < want {
                return Err(StorageError::BadUserBuf);
            }
            buf[..want].copy_from_slice(&data[start..start + want]);
        }
        Ok(want)
    }

    fn first_slot_from(&self, pid: PageId) -> Result<Option<ObjectId>> {
        let pin = self.pool.get(pid, BufferType::Data)?;
        let mut bytes = pin.bytes_mut();
        let page = SlottedPage::new(&mut bytes);
        let n = page.header().n_slots;
        for i in 0..n {
            let slot = page.slot(i);
            if !slot.is_empty() {
                return Ok(Some(ObjectId::new(pid, i, slot.unique)));
            }
        }
        Ok(None)
    }

    fn last_slot_from(&self, pid: PageId) -> Result<Option<ObjectId>> {
        let pin = self.pool.get(pid, BufferType::Data)?;
        let mut bytes = pin.bytes_mut();
        let page = SlottedPage::new(&mut bytes);
        let n = page.header().n_slots;
        for i in (0..n).rev() {
            let slot = page.slot(i);
            if !slot.is_empty() {
                return Ok(Some(ObjectId::new(pid, i, slot.unique)));
            }
        }
        Ok(None)
    }

    /// Returns the object immediately after `anchor` in page/slot order.
    /// With no anchor, returns the file's first object;
    /// [`StorageError::EndOfScan`] signals the traversal's end.
    pub fn next_object(
        &self,
        file_cat: &DataFileCatalog,
        cur: Option<ObjectId>,
    ) -> Result<ObjectId> {
        let Some(cur) = cur else {
            let mut pid = file_cat.first_page;
            while !pid.is_nil() {
                if let Some(oid) = self.first_slot_from(pid)? {
                    return Ok(oid);
                }
                pid = self.header_of(pid)?.next_page;
            }
            return Err(StorageError::EndOfScan);
        };
        self.validate_oid(cur)?;

        let (n_slots, next_page) = {
            let pin = self.pool.get(cur.page_id, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let page = SlottedPage::new(&mut bytes);
            (page.header().n_slots, page.header().next_page)
        };
        {
            let pin = self.pool.get(cur.page_id, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let page = SlottedPage::new(&mut bytes);
            for i in (cur.slot_no + 1)..n_slots {
                let slot = page.slot(i);
                if !slot.is_empty() {
                    return Ok(ObjectId::new(cur.page_id, i, slot.unique));
                }
            }
        }
        let mut pid = next_page;
        while !pid.is_nil() {
            if let Some(oid) = self.first_slot_from(pid)? {
                return Ok(oid);
            }
            pid = self.header_of(pid)?.next_page;
        }
        Err(StorageError::EndOfScan)
    }

    /// Returns the object immediately before `anchor` in page/slot order.
        &self,
        file_cat: &DataFileCatalog,
        cur: Option<ObjectId>,
    ) -> Result<ObjectId> {
        let Some(cur) = cur else {
            let mut pid = file_cat.last_page;
            while !pid.is_nil() {
                if let Some(oid) = self.last_slot_from(pid)? {
                    return Ok(oid);
                }
                pid = self.header_of(pid)?.prev_page;
            }
            return Err(StorageError::EndOfScan);
        };
        self.validate_oid(cur)?;

        let prev_page = self.header_of(cur.page_id)?.prev_page;
        {
            let pin = self.pool.get(cur.page_id, BufferType::Data)?;
            let mut bytes = pin.bytes_mut();
            let page = SlottedPage::new(&mut bytes);
            for i in (0..cur.slot_no).rev() {
                let slot = page.slot(i);
                if !slot.is_empty() {
                    return Ok(ObjectId::new(cur.page_id, i, slot.unique));
                }
            }
        }
        let mut pid = prev_page;
        while !pid.is_nil() {
            if let Some(oid) = self.last_slot_from(pid)? {
                return Ok(oid);
            }
            pid = self.header_of(pid)?.prev_page;
        }
        Err(StorageError::EndOfScan)
    }
}

enum Placement {
    Existing(PageId, bool),
    NewAfter(Option<PageId>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferPoolConfig, BufferPoolSet};
    use crate::dealloc::VecDeallocList;
    use crate::raw::FileRawDiskManager;
    use tempfile::tempdir;

    fn env() -> (BufferPoolSet, Disk, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol0.db");
        let disk: Disk = Rc::new(RefCell::new(FileRawDiskManager::open(0, &path).unwrap()));
        let pool = BufferPoolSet::new(
            [
                BufferPoolConfig {
                    capacity: 16,
                    hash_table_size: 17,
                },
                BufferPoolConfig {
                    capacity: 16,
                    hash_table_size: 17,
                },
            ],
            disk.clone(),
        );
        (pool, disk, dir)
    }

    #[test]
    fn create_read_destroy_round_trip() {
        let (pool, disk, _dir) = env();
        let om = ObjectManager::new(&pool);
        let mut cat = om.init_file(&disk, 0).unwrap();

        let o1 = om
            .create_object(&disk, 0, &mut cat, None, None, &[1u8; 50])
            .unwrap();
        let o2 = om
            .create_object(&disk, 0, &mut cat, None, None, &[2u8; 100])
            .unwrap();
        let o3 = om
            .create_object(&disk, 0, &mut cat, None, None, &[3u8; 30])
            .unwrap();

        let mut buf = vec![0u8; 100];
        let n = om.read_object(o2, 0, REMAINDER, Some(&mut buf)).unwrap();
        assert_eq!(n, 100);
        assert_eq!(&buf[..n], &[2u8; 100][..]);

        let mut dealloc = VecDeallocList::new();
        om.destroy_object(&mut cat, o2, &mut dealloc).unwrap();
        assert!(om.read_object(o2, 0, REMAINDER, Some(&mut buf)).is_err());

        let o4 = om
            .create_object(&disk, 0, &mut cat, None, None, &[4u8; 40])
            .unwrap();
        assert_eq!(o4.slot_no, o2.slot_no, "slot 1 is reused");
        let _ = (o1, o3);
    }

    #[test]
    fn next_object_visits_every_oid_once() {
        let (pool, disk, _dir) = env();
        let om = ObjectManager::new(&pool);
        let mut cat = om.init_file(&disk, 0).unwrap();

        let mut oids = Vec::new();
        for i in 0..20u8 {
            oids.push(
                om.create_object(&disk, 0, &mut cat, None, None, &[i; 20])
                    .unwrap(),
            );
        }

        let mut seen = Vec::new();
        let mut cur = None;
        loop {
            match om.next_object(&cat, cur) {
                Ok(oid) => {
                    seen.push(oid);
                    cur = Some(oid);
                }
                Err(StorageError::EndOfScan) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(seen.len(), oids.len());

        let mut rev = Vec::new();
        let mut cur = None;
        loop {
            match om.prev_object(&cat, cur) {
                Ok(oid) => {
                    rev.push(oid);
                    cur = Some(oid);
                }
                Err(StorageError::EndOfScan) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        rev.reverse();
        assert_eq!(rev, seen);
    }

    #[test]
    fn destroy_last_object_on_non_first_page_unlinks_it() {
        let (pool, disk, _dir) = env();
        let om = ObjectManager::new(&pool);
        let mut cat = om.init_file(&disk, 0).unwrap();

        // Force a second page via near_oid pointed at a page with no room.
        let first = om
            .create_object(&disk, 0, &mut cat, None, None, &vec![0u8; 3000])
            .unwrap();
        let second = om
            .create_object(&disk, 0, &mut cat, Some(first), None, &vec![1u8; 3000])
            .unwrap();
        assert_ne!(first.page_id, second.page_id);

        let mut dealloc = VecDeallocList::new();
        om.destroy_object(&mut cat, second, &mut dealloc).unwrap();
        assert_eq!(dealloc.len(), 1);
        assert_eq!(cat.last_page, first.page_id);
    }
}
