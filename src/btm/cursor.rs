//! Scan position and the two binary searches descent/leaf-positioning use.
//!
//! Sibling `PageId`s are initialized to `NIL` up front rather than left
//! lazily/conditionally set; this is carried out where these are
//! consumed, in [`super::BtreeManager`]'s leaf-walk helpers.

use super::key::{key_compare, KeyVal};
use crate::types::{CompResult, KeyDescriptor, ObjectId, PageId};
use page::BtmPage;

use super::page;

/// Where a fetch left the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorFlag {
    /// Positioned at a live entry.
    On,
    /// Never positioned (a fresh cursor that hasn't been fetched into).
    Off,
    /// End of scan: start condition unsatisfiable or stop condition failed.
    Eos,
    /// The position this cursor names is no longer valid (entries moved
    /// underneath it by a later insert/delete).
    Invalid,
}

/// `{flag, oid, key, leaf_pid, slot_no}`.
#[derive(Debug, Clone)]
pub struct Cursor {
    pub flag: CursorFlag,
    pub oid: ObjectId,
    pub key: KeyVal,
    pub leaf_pid: PageId,
    pub slot_no: u16,
}

impl Cursor {
    pub fn eos() -> Self {
        Self {
            flag: CursorFlag::Eos,
            oid: ObjectId::NIL,
            key: KeyVal(Vec::new()),
            leaf_pid: PageId::NIL,
            slot_no: 0,
        }
    }

    pub fn off() -> Self {
        Self {
            flag: CursorFlag::Off,
            ..Self::eos()
        }
    }
}

/// Lower bound over a leaf's entries: the smallest index whose key is `>=
/// kval`, and whether that entry's key is exactly equal.
pub fn binary_search_leaf(page: &BtmPage, kdesc: &KeyDescriptor, kval: &KeyVal) -> (u16, bool) {
    let n = page.header().n_slots;
    let mut lo = 0u16;
    let mut hi = n;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let entry = page.leaf_entry(mid);
        let ekey = KeyVal::decode(kdesc, &entry.key);
        match key_compare(kdesc, &ekey, kval) {
            CompResult::Less => lo = mid + 1,
            _ => hi = mid,
        }
    }
    let found = lo < n && {
        let entry = page.leaf_entry(lo);
        let ekey = KeyVal::decode(kdesc, &entry.key);
        key_compare(kdesc, &ekey, kval) == CompResult::Equal
    };
    (lo, found)
}

/// Internal-page descent: the largest index whose key is `<= kval`, or
/// `None` meaning "descend through `p0`" (`kval` is less than every
/// entry's key).
pub fn binary_search_internal(
    page: &BtmPage,
    kdesc: &KeyDescriptor,
    kval: &KeyVal,
) -> (Option<u16>, bool) {
    let n = page.header().n_slots;
    let mut lo = 0u16;
    let mut hi = n;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let entry = page.internal_entry(mid);
        let ekey = KeyVal::decode(kdesc, &entry.key);
        match key_compare(kdesc, &ekey, kval) {
            CompResult::Less | CompResult::Equal => lo = mid + 1,
            _ => hi = mid,
        }
    }
    if lo == 0 {
        (None, false)
    } else {
        let idx = lo - 1;
        let entry = page.internal_entry(idx);
        let ekey = KeyVal::decode(kdesc, &entry.key);
        let found = key_compare(kdesc, &ekey, kval) == CompResult::Equal;
        (Some(idx), found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KeyPartType, ObjectId, PageId, PAGE_SIZE};

    fn leaf_with(keys: &[i32]) -> [u8; PAGE_SIZE] {
        let mut buf = [0u8; PAGE_SIZE];
        let mut page = BtmPage::new(&mut buf);
        page.init_leaf(PageId::new(0, 1), 0);
        for (i, k) in keys.iter().enumerate() {
            let kv = KeyVal::single_int(*k);
            page.insert_leaf_entry(i as u16, &kv.encode(), ObjectId::new(PageId::new(0, 9), i as u16, 0));
        }
        buf
    }

    #[test]
    fn binary_search_leaf_finds_lower_bound() {
        let mut buf = leaf_with(&[10, 20, 30, 40]);
        let page = BtmPage::new(&mut buf);
        let desc = KeyDescriptor::single(KeyPartType::Int, true);
        assert_eq!(binary_search_leaf(&page, &desc, &KeyVal::single_int(20)), (1, true));
        assert_eq!(binary_search_leaf(&page, &desc, &KeyVal::single_int(25)), (2, false));
        assert_eq!(binary_search_leaf(&page, &desc, &KeyVal::single_int(5)), (0, false));
        assert_eq!(binary_search_leaf(&page, &desc, &KeyVal::single_int(99)), (4, false));
    }

    #[test]
    fn binary_search_internal_picks_covering_child() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut page = BtmPage::new(&mut buf);
        page.init_internal(PageId::new(0, 1), PageId::new(0, 10), 0);
        page.insert_internal_entry(0, &KeyVal::single_int(20).encode(), PageId::new(0, 11));
        page.insert_internal_entry(1, &KeyVal::single_int(40).encode(), PageId::new(0, 12));
        let desc = KeyDescriptor::single(KeyPartType::Int, true);

        assert_eq!(binary_search_internal(&page, &desc, &KeyVal::single_int(10)), (None, false));
        assert_eq!(binary_search_internal(&page, &desc, &KeyVal::single_int(20)), (Some(0), true));
        assert_eq!(binary_search_internal(&page, &desc, &KeyVal::single_int(30)), (Some(0), false));
        assert_eq!(binary_search_internal(&page, &desc, &KeyVal::single_int(50)), (Some(1), false));
    }
}
