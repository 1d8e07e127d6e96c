//! Leaf/internal page splitting and root growth: the overflowing page's
//! entries (old plus the one new arrival) are redistributed across the
//! old page and a freshly allocated sibling by accumulated byte cost
//! against [`page::half_threshold`], rather than by entry count, since
//! entries are variable-length.

use super::page::{self, BtmPage, FLAG_LEAF, FLAG_ROOT};
use super::{BtreeManager, Disk, InternalItem};
use crate::error::Result;
use crate::types::{BufferType, ObjectId, PageId};

impl<'p> BtreeManager<'p> {
    /// Split an overflowing leaf: `insert_slot` is where `(new_key, new_oid)`
    /// belongs among the page's existing entries. Returns the promoted item
    /// for the parent: the key of the right page's first entry.
    pub(super) fn split_leaf(
        &self,
        disk: &Disk,
        vol_no: u16,
        pid: PageId,
        insert_slot: u16,
        new_key: Vec<u8>,
        new_oid: ObjectId,
    ) -> Result<InternalItem> {
        let (old_entries, old_header) = {
            let pin = self.pool.get(pid, BufferType::Btree)?;
            let mut bytes = *pin.bytes();
            let page = BtmPage::new(&mut bytes);
            let n = page.header().n_slots;
            let entries: Vec<page::LeafEntry> = (0..n).map(|i| page.leaf_entry(i)).collect();
            (entries, page.header())
        };

        let mut combined: Vec<(Vec<u8>, ObjectId)> = Vec::with_capacity(old_entries.len() + 1);
        let mut inserted = false;
        for (i, e) in old_entries.into_iter().enumerate() {
            if !inserted && i as u16 == insert_slot {
                combined.push((new_key.clone(), new_oid));
                inserted = true;
            }
            combined.push((e.key, e.oid));
        }
        if !inserted {
            combined.push((new_key, new_oid));
        }

        let half = page::half_threshold();
        let mut split_at = combined.len() / 2;
        let mut running = 0usize;
        for (i, (k, _)) in combined.iter().enumerate() {
            running += BtmPage::leaf_entry_cost(k.len());
            if running >= half {
                split_at = i + 1;
                break;
            }
        }
        split_at = split_at.clamp(1, combined.len() - 1);

        let new_pid = disk.borrow_mut().alloc_trains(vol_no, pid, 100, 1)?;
        let old_next = old_header.next_page;
        let new_flags = old_header.flags & !FLAG_ROOT;

        {
            let pin = self.pool.get_new(new_pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut page = BtmPage::new(&mut bytes);
            page.init_leaf(new_pid, new_flags);
            let mut h = page.header();
            h.prev_page = pid;
            h.next_page = old_next;
            page.set_header(&h);
            for (slot, (key, oid)) in combined[split_at..].iter().enumerate() {
                page.insert_leaf_entry(slot as u16, key, *oid);
            }
            pin.set_dirty();
        }

        {
            let pin = self.pool.get(pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut page = BtmPage::new(&mut bytes);
            page.init_leaf(pid, old_header.flags);
            let mut h = page.header();
            h.prev_page = old_header.prev_page;
            h.next_page = new_pid;
            page.set_header(&h);
            for (slot, (key, oid)) in combined[..split_at].iter().enumerate() {
                page.insert_leaf_entry(slot as u16, key, *oid);
            }
            pin.set_dirty();
        }

        if !old_next.is_nil() {
            let pin = self.pool.get(old_next, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut p = BtmPage::new(&mut bytes);
            let mut h = p.header();
            h.prev_page = new_pid;
            p.set_header(&h);
            pin.set_dirty();
        }

        let first_right_key = combined[split_at].0.clone();
        Ok(InternalItem {
            spid: new_pid,
            key: first_right_key,
        })
    }

    /// Split an overflowing internal page. `insert_idx` names where
    /// `(new_key, new_spid)` belongs among the page's existing entries
    /// (`None` only ever arises transiently; `insert_internal` always passes
    /// `Some`). The median entry's key is promoted and does not survive in
    /// either child; its `spid` becomes the new right page's `p0`.
    pub(super) fn split_internal(
        &self,
        disk: &Disk,
        vol_no: u16,
        pid: PageId,
        insert_idx: Option<u16>,
        new_key: Vec<u8>,
        new_spid: PageId,
    ) -> Result<InternalItem> {
        let insert_idx = insert_idx.unwrap_or(0);
        let (old_entries, old_header) = {
            let pin = self.pool.get(pid, BufferType::Btree)?;
            let mut bytes = *pin.bytes();
            let page = BtmPage::new(&mut bytes);
            let n = page.header().n_slots;
            let entries: Vec<page::InternalEntry> = (0..n).map(|i| page.internal_entry(i)).collect();
            (entries, page.header())
        };

        let mut combined: Vec<(Vec<u8>, PageId)> = Vec::with_capacity(old_entries.len() + 1);
        let mut inserted = false;
        for (i, e) in old_entries.into_iter().enumerate() {
            if !inserted && i as u16 == insert_idx {
                combined.push((new_key.clone(), new_spid));
                inserted = true;
            }
            combined.push((e.key, e.spid));
        }
        if !inserted {
            combined.push((new_key, new_spid));
        }

        let half = page::half_threshold();
        let mut median = combined.len() / 2;
        let mut running = 0usize;
        for (i, (k, _)) in combined.iter().enumerate() {
            running += BtmPage::internal_entry_cost(k.len());
            if running >= half {
                median = i;
                break;
            }
        }
        median = median.min(combined.len().saturating_sub(2));

        let new_pid = disk.borrow_mut().alloc_trains(vol_no, pid, 100, 1)?;
        let (median_key, median_spid) = combined[median].clone();
        let new_flags = old_header.flags & !FLAG_ROOT;

        {
            let pin = self.pool.get_new(new_pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut page = BtmPage::new(&mut bytes);
            page.init_internal(new_pid, median_spid, new_flags);
            for (slot, (key, spid)) in combined[median + 1..].iter().enumerate() {
                page.insert_internal_entry(slot as u16, key, *spid);
            }
            pin.set_dirty();
        }

        {
            let pin = self.pool.get(pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut page = BtmPage::new(&mut bytes);
            page.init_internal(pid, old_header.p0, old_header.flags);
            for (slot, (key, spid)) in combined[..median].iter().enumerate() {
                page.insert_internal_entry(slot as u16, key, *spid);
            }
            pin.set_dirty();
        }

        Ok(InternalItem {
            spid: new_pid,
            key: median_key,
        })
    }

    /// Grow the tree by one level: the root's current contents move to a
    /// freshly allocated page, and the root is re-initialized as an internal
    /// page with `p0` pointing at that copy and the single promoted `item`
    /// as its sole entry. The root page id never changes, so catalogs and
    /// outstanding cursors stay valid across a root split.
    pub(super) fn root_insert(&self, disk: &Disk, vol_no: u16, root: PageId, item: InternalItem) -> Result<()> {
        let old_bytes = {
            let pin = self.pool.get(root, BufferType::Btree)?;
            *pin.bytes()
        };
        let old_header = {
            let mut b = old_bytes;
            BtmPage::new(&mut b).header()
        };
        let is_leaf = old_header.is(FLAG_LEAF);

        let copied_pid = disk.borrow_mut().alloc_trains(vol_no, root, 100, 1)?;
        {
            let pin = self.pool.get_new(copied_pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            *bytes = old_bytes;
            let mut page = BtmPage::new(&mut bytes);
            let mut h = page.header();
            h.pid = copied_pid;
            h.flags &= !FLAG_ROOT;
            page.set_header(&h);
            pin.set_dirty();
        }

        if is_leaf && !old_header.next_page.is_nil() {
            let pin = self.pool.get(old_header.next_page, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut p = BtmPage::new(&mut bytes);
            let mut h = p.header();
            h.prev_page = copied_pid;
            p.set_header(&h);
            pin.set_dirty();
        }

        {
            let pin = self.pool.get(root, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut page = BtmPage::new(&mut bytes);
            page.init_internal(root, copied_pid, FLAG_ROOT);
            page.insert_internal_entry(0, &item.key, item.spid);
            pin.set_dirty();
        }
        Ok(())
    }
}
