//! Underflow resolution after a delete: prefer the left sibling, merge
//! when the two pages' live entries fit in one, otherwise redistribute by
//! moving a single entry across the separator.

use super::page::{self, BtmPage};
use super::{BtreeManager, Disk};
use crate::dealloc::{DeallocElem, DeallocSink};
use crate::error::Result;
use crate::types::{BufferType, PageId};

impl<'p> BtreeManager<'p> {
    /// `parent_pid`'s child at `child_pos` underflowed; `child_pos == 0`
    /// means `parent`'s `p0`, `child_pos == i + 1` means its `i`-th entry's
    /// `spid` (the encoding `choose_child_pos` returns). Returns whether
    /// `parent_pid` itself now underflows, so `delete_rec` keeps propagating
    /// upward.
    pub(super) fn fix_underflow(
        &self,
        _disk: &Disk,
        _vol_no: u16,
        parent_pid: PageId,
        child_pos: usize,
        dealloc: &mut dyn DeallocSink,
    ) -> Result<bool> {
        let n = self.header_of(parent_pid)?.n_slots as usize;
        let (left_pos, right_pos) = if child_pos > 0 {
            (child_pos - 1, child_pos)
        } else {
            (child_pos, child_pos + 1)
        };
        if right_pos > n {
            // Parent has only p0 and no siblings to redistribute with or
            // merge into; nothing to do here (only the root may legitimately
            // end up in this state, and `maybe_shrink_root` handles that).
            return Ok(false);
        }
        let sep_idx = left_pos as u16;

        let (left_pid, right_pid) = {
            let pin = self.pool.get(parent_pid, BufferType::Btree)?;
            let mut bytes = *pin.bytes();
            let page = BtmPage::new(&mut bytes);
            let h = page.header();
            let child_at = |pos: usize| -> PageId {
                if pos == 0 {
                    h.p0
                } else {
                    page.internal_entry((pos - 1) as u16).spid
                }
            };
            (child_at(left_pos), child_at(right_pos))
        };

        let leaf = self.is_leaf(left_pid)?;
        let left_used = page::PAGE_CAPACITY - self.header_of(left_pid)?.total_free();
        let right_used = page::PAGE_CAPACITY - self.header_of(right_pid)?.total_free();

        if left_used + right_used <= page::PAGE_CAPACITY {
            if leaf {
                self.merge_leaves(left_pid, right_pid)?;
            } else {
                self.merge_internal(left_pid, right_pid, parent_pid, sep_idx)?;
            }

            {
                let pin = self.pool.get(parent_pid, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                let mut page = BtmPage::new(&mut bytes);
                page.remove_entry(sep_idx);
                pin.set_dirty();
            }
            {
                let pin = self.pool.get(right_pid, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                let mut p = BtmPage::new(&mut bytes);
                let mut h = p.header();
                h.flags = page::FLAG_FREEPAGE;
                p.set_header(&h);
                pin.set_dirty();
            }
            dealloc.push(DeallocElem::Page(right_pid));

            let parent_free = self.header_of(parent_pid)?.total_free();
            Ok(parent_free > page::half_threshold())
        } else {
            let child_is_right = child_pos == right_pos;
            if leaf {
                self.redistribute_leaves(left_pid, right_pid, parent_pid, sep_idx, child_is_right)?;
            } else {
                self.redistribute_internal(left_pid, right_pid, parent_pid, sep_idx, child_is_right)?;
            }
            Ok(false)
        }
    }

    fn merge_leaves(&self, left_pid: PageId, right_pid: PageId) -> Result<()> {
        let right_entries: Vec<page::LeafEntry> = {
            let pin = self.pool.get(right_pid, BufferType::Btree)?;
            let mut bytes = *pin.bytes();
            let page = BtmPage::new(&mut bytes);
            let n = page.header().n_slots;
            (0..n).map(|i| page.leaf_entry(i)).collect()
        };
        let right_next = self.header_of(right_pid)?.next_page;

        {
            let pin = self.pool.get(left_pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut page = BtmPage::new(&mut bytes);
            page.compact(None);
            let mut next_slot = page.header().n_slots;
            for e in &right_entries {
                page.insert_leaf_entry(next_slot, &e.key, e.oid);
                next_slot += 1;
            }
            let mut h = page.header();
            h.next_page = right_next;
            page.set_header(&h);
            pin.set_dirty();
        }

        if !right_next.is_nil() {
            let pin = self.pool.get(right_next, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut p = BtmPage::new(&mut bytes);
            let mut h = p.header();
            h.prev_page = left_pid;
            p.set_header(&h);
            pin.set_dirty();
        }
        Ok(())
    }

    fn merge_internal(&self, left_pid: PageId, right_pid: PageId, parent_pid: PageId, sep_idx: u16) -> Result<()> {
        let sep_key = {
            let pin = self.pool.get(parent_pid, BufferType::Btree)?;
            let mut bytes = *pin.bytes();
            let page = BtmPage::new(&mut bytes);
            page.internal_entry(sep_idx).key
        };
        let right_p0 = self.header_of(right_pid)?.p0;
        let right_entries: Vec<page::InternalEntry> = {
            let pin = self.pool.get(right_pid, BufferType::Btree)?;
            let mut bytes = *pin.bytes();
            let page = BtmPage::new(&mut bytes);
            let n = page.header().n_slots;
            (0..n).map(|i| page.internal_entry(i)).collect()
        };

        let pin = self.pool.get(left_pid, BufferType::Btree)?;
        let mut bytes = pin.bytes_mut();
        let mut page = BtmPage::new(&mut bytes);
        page.compact(None);
        let mut next_slot = page.header().n_slots;
        page.insert_internal_entry(next_slot, &sep_key, right_p0);
        next_slot += 1;
        for e in &right_entries {
            page.insert_internal_entry(next_slot, &e.key, e.spid);
            next_slot += 1;
        }
        pin.set_dirty();
        Ok(())
    }

    /// Move one entry across the leaf boundary: from the richer sibling's
    /// edge nearest `left_pid`/`right_pid`'s shared boundary into the poorer
    /// child, then update the parent's separator key to the new boundary.
    fn redistribute_leaves(
        &self,
        left_pid: PageId,
        right_pid: PageId,
        parent_pid: PageId,
        sep_idx: u16,
        child_is_right: bool,
    ) -> Result<()> {
        if child_is_right {
            // left is the donor (richer): its last entry becomes right's new
            // first entry.
            let moved = {
                let pin = self.pool.get(left_pid, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                let mut page = BtmPage::new(&mut bytes);
                let last = page.header().n_slots - 1;
                let e = page.leaf_entry(last);
                page.remove_entry(last);
                pin.set_dirty();
                e
            };
            {
                let pin = self.pool.get(right_pid, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                BtmPage::new(&mut bytes).insert_leaf_entry(0, &moved.key, moved.oid);
                pin.set_dirty();
            }
            let pin = self.pool.get(parent_pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut page = BtmPage::new(&mut bytes);
            let old_spid = page.internal_entry(sep_idx).spid;
            page.remove_entry(sep_idx);
            page.insert_internal_entry(sep_idx, &moved.key, old_spid);
            pin.set_dirty();
        } else {
            // right is the donor (richer): its first entry becomes left's
            // new last entry.
            let moved = {
                let pin = self.pool.get(right_pid, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                let mut page = BtmPage::new(&mut bytes);
                let e = page.leaf_entry(0);
                page.remove_entry(0);
                pin.set_dirty();
                e
            };
            {
                let pin = self.pool.get(left_pid, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                let mut page = BtmPage::new(&mut bytes);
                let n = page.header().n_slots;
                page.insert_leaf_entry(n, &moved.key, moved.oid);
                pin.set_dirty();
            }
            let new_sep_key = {
                let pin = self.pool.get(right_pid, BufferType::Btree)?;
                let mut bytes = *pin.bytes();
                let page = BtmPage::new(&mut bytes);
                page.leaf_entry(0).key
            };
            let pin = self.pool.get(parent_pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut page = BtmPage::new(&mut bytes);
            let old_spid = page.internal_entry(sep_idx).spid;
            page.remove_entry(sep_idx);
            page.insert_internal_entry(sep_idx, &new_sep_key, old_spid);
            pin.set_dirty();
        }
        Ok(())
    }

    /// Rotate one child pointer through the parent's separator key (classic
    /// B+-tree internal-node redistribution).
    fn redistribute_internal(
        &self,
        left_pid: PageId,
        right_pid: PageId,
        parent_pid: PageId,
        sep_idx: u16,
        child_is_right: bool,
    ) -> Result<()> {
        let parent_sep_key = {
            let pin = self.pool.get(parent_pid, BufferType::Btree)?;
            let mut bytes = *pin.bytes();
            let page = BtmPage::new(&mut bytes);
            page.internal_entry(sep_idx).key
        };

        if child_is_right {
            // left donates its last child pointer; that pointer's separator
            // key (the old parent separator) comes down with it, and right's
            // old p0 is promoted in its place.
            let (moved_spid, moved_key) = {
                let pin = self.pool.get(left_pid, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                let mut page = BtmPage::new(&mut bytes);
                let last = page.header().n_slots - 1;
                let e = page.internal_entry(last);
                page.remove_entry(last);
                pin.set_dirty();
                (e.spid, e.key)
            };
            {
                let pin = self.pool.get(right_pid, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                let mut page = BtmPage::new(&mut bytes);
                let mut h = page.header();
                let old_p0 = h.p0;
                h.p0 = moved_spid;
                page.set_header(&h);
                page.insert_internal_entry(0, &parent_sep_key, old_p0);
                pin.set_dirty();
            }
            let pin = self.pool.get(parent_pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut page = BtmPage::new(&mut bytes);
            let old_spid = page.internal_entry(sep_idx).spid;
            page.remove_entry(sep_idx);
            page.insert_internal_entry(sep_idx, &moved_key, old_spid);
            pin.set_dirty();
        } else {
            // right donates its p0 (its former first child); its first
            // entry's key is promoted to the parent, and its spid becomes
            // right's new p0.
            let (moved_spid, moved_key) = {
                let pin = self.pool.get(right_pid, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                let mut page = BtmPage::new(&mut bytes);
                let e = page.internal_entry(0);
                let mut h = page.header();
                let old_p0 = h.p0;
                h.p0 = e.spid;
                page.set_header(&h);
                page.remove_entry(0);
                pin.set_dirty();
                (old_p0, e.key)
            };
            {
                let pin = self.pool.get(left_pid, BufferType::Btree)?;
                let mut bytes = pin.bytes_mut();
                let mut page = BtmPage::new(&mut bytes);
                let n = page.header().n_slots;
                page.insert_internal_entry(n, &parent_sep_key, moved_spid);
                pin.set_dirty();
            }
            let pin = self.pool.get(parent_pid, BufferType::Btree)?;
            let mut bytes = pin.bytes_mut();
            let mut page = BtmPage::new(&mut bytes);
            let old_spid = page.internal_entry(sep_idx).spid;
            page.remove_entry(sep_idx);
            page.insert_internal_entry(sep_idx, &moved_key, old_spid);
            pin.set_dirty();
        }
        Ok(())
    }
}
