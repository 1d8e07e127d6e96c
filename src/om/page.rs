//! Slotted-page layout for the object manager.
//!
//! Data area grows forward from the header; the slot array grows backward
//! from the end of the page, so slot numbers stay stable across deletes.

use crate::types::{aligned_len, PageId, PAGE_SIZE};

/// Sentinel `offset` value for an empty slot.
pub const EMPTYSLOT: u16 = u16::MAX;

/// `(offset, unique)` — one entry of the slot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u16,
    pub unique: u32,
}

impl Slot {
    pub const EMPTY: Slot = Slot {
        offset: EMPTYSLOT,
        unique: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.offset == EMPTYSLOT
    }
}

/// Bytes a slot occupies in the slot array.
pub const SLOT_SIZE: usize = 6; // offset: u16 + unique: u32

/// `(properties, tag, length)` object header, followed by `length` bytes
/// padded to `aligned_len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHdr {
    pub properties: u32,
    pub tag: u32,
    pub length: u32,
}

pub const OBJECT_HDR_SIZE: usize = 12;

impl ObjectHdr {
    pub fn read(bytes: &[u8]) -> Self {
        Self {
            properties: u32::from_be_bytes(bytes[0..4].try_into().unwrap()),
            tag: u32::from_be_bytes(bytes[4..8].try_into().unwrap()),
            length: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.properties.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.tag.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_be_bytes());
    }

    /// Total aligned footprint of this object, header included.
    pub fn footprint(&self) -> usize {
        OBJECT_HDR_SIZE + aligned_len(self.length as usize)
    }
}

/// Bytes needed to store an object of logical `length`, including its
/// header and slot-array entry.
pub fn needed_for(length: usize) -> usize {
    OBJECT_HDR_SIZE + aligned_len(length) + SLOT_SIZE
}

/// Fixed page header for an OM slotted page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlottedPageHeader {
    pub pid: PageId,
    pub owner: PageId,
    pub prev_page: PageId,
    pub next_page: PageId,
    pub n_slots: u16,
    pub free: u16,
    pub unused: u16,
    pub unique: u32,
    /// Which of the file's `NUM_AVAIL_LISTS` buckets this page is currently
    /// threaded into, or `None` if it's on no list.
    pub avail_list_idx: Option<u8>,
    pub avail_prev: PageId,
    pub avail_next: PageId,
}

const OFF_SELF_PID: usize = 0; // 6 bytes
const OFF_OWNER: usize = 6; // 6 bytes
const OFF_PREV: usize = 12; // 6 bytes
const OFF_NEXT: usize = 18; // 6 bytes
const OFF_N_SLOTS: usize = 24; // 2
const OFF_FREE: usize = 26; // 2
const OFF_UNUSED: usize = 28; // 2
const OFF_UNIQUE: usize = 30; // 4
const OFF_AVAIL_IDX: usize = 34; // 1 (0xFF = none)
const OFF_AVAIL_PREV: usize = 35; // 6
const OFF_AVAIL_NEXT: usize = 41; // 6

/// Bytes consumed by the fixed page header.
pub const HEADER_SIZE: usize = 48;

/// Usable space for the data area + slot array combined:
/// `header.free + slot_array_size <= page_capacity` always holds.
pub const PAGE_CAPACITY: usize = PAGE_SIZE - HEADER_SIZE;

fn write_pid(bytes: &mut [u8], off: usize, pid: PageId) {
    bytes[off..off + 2].copy_from_slice(&pid.vol_no.to_be_bytes());
    bytes[off + 2..off + 6].copy_from_slice(&pid.page_no.to_be_bytes());
}

fn read_pid(bytes: &[u8], off: usize) -> PageId {
    let vol_no = u16::from_be_bytes(bytes[off..off + 2].try_into().unwrap());
    let page_no = u32::from_be_bytes(bytes[off + 2..off + 6].try_into().unwrap());
    PageId::new(vol_no, page_no)
}

impl SlottedPageHeader {
    pub fn empty(pid: PageId, owner: PageId) -> Self {
        Self {
            pid,
            owner,
            prev_page: PageId::NIL,
            next_page: PageId::NIL,
            n_slots: 0,
            free: 0,
            unused: 0,
            unique: 0,
            avail_list_idx: None,
            avail_prev: PageId::NIL,
            avail_next: PageId::NIL,
        }
    }

    pub fn read(bytes: &[u8]) -> Self {
        let avail_idx_byte = bytes[OFF_AVAIL_IDX];
        Self {
            pid: read_pid(bytes, OFF_SELF_PID),
            owner: read_pid(bytes, OFF_OWNER),
            prev_page: read_pid(bytes, OFF_PREV),
            next_page: read_pid(bytes, OFF_NEXT),
            n_slots: u16::from_be_bytes(bytes[OFF_N_SLOTS..OFF_N_SLOTS + 2].try_into().unwrap()),
            free: u16::from_be_bytes(bytes[OFF_FREE..OFF_FREE + 2].try_into().unwrap()),
            unused: u16::from_be_bytes(bytes[OFF_UNUSED..OFF_UNUSED + 2].try_into().unwrap()),
            unique: u32::from_be_bytes(bytes[OFF_UNIQUE..OFF_UNIQUE + 4].try_into().unwrap()),
            avail_list_idx: if avail_idx_byte == 0xFF {
                None
            } else {
                Some(avail_idx_byte)
            },
            avail_prev: read_pid(bytes, OFF_AVAIL_PREV),
            avail_next: read_pid(bytes, OFF_AVAIL_NEXT),
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        write_pid(bytes, OFF_SELF_PID, self.pid);
        write_pid(bytes, OFF_OWNER, self.owner);
        write_pid(bytes, OFF_PREV, self.prev_page);
        write_pid(bytes, OFF_NEXT, self.next_page);
        bytes[OFF_N_SLOTS..OFF_N_SLOTS + 2].copy_from_slice(&self.n_slots.to_be_bytes());
        bytes[OFF_FREE..OFF_FREE + 2].copy_from_slice(&self.free.to_be_bytes());
        bytes[OFF_UNUSED..OFF_UNUSED + 2].copy_from_slice(&self.unused.to_be_bytes());
        bytes[OFF_UNIQUE..OFF_UNIQUE + 4].copy_from_slice(&self.unique.to_be_bytes());
        bytes[OFF_AVAIL_IDX] = self.avail_list_idx.unwrap_or(0xFF);
        write_pid(bytes, OFF_AVAIL_PREV, self.avail_prev);
        write_pid(bytes, OFF_AVAIL_NEXT, self.avail_next);
    }

    /// Contiguous free area between the data area and the slot array.
    pub fn cfree(&self) -> usize {
        PAGE_CAPACITY
            .saturating_sub(self.free as usize)
            .saturating_sub(self.n_slots as usize * SLOT_SIZE)
    }

    /// Total free area including holes left by deleted objects.
    pub fn total_free(&self) -> usize {
        self.cfree() + self.unused as usize
    }

    pub fn is_empty_of_objects(&self, slots: &[Slot]) -> bool {
        slots.iter().all(Slot::is_empty)
    }
}

/// View over one page's raw bytes as an OM slotted page.
pub struct SlottedPage<'a> {
    bytes: &'a mut [u8; PAGE_SIZE],
}

impl<'a> SlottedPage<'a> {
    pub fn new(bytes: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn header(&self) -> SlottedPageHeader {
        SlottedPageHeader::read(&self.bytes[..])
    }

    pub fn set_header(&mut self, header: &SlottedPageHeader) {
        header.write(&mut self.bytes[..]);
    }

    pub fn init(&mut self, pid: PageId, owner: PageId) {
        self.bytes.fill(0);
        self.set_header(&SlottedPageHeader::empty(pid, owner));
    }

    fn slot_byte_offset(slot_no: u16) -> usize {
        PAGE_SIZE - (slot_no as usize + 1) * SLOT_SIZE
    }

    pub fn slot(&self, slot_no: u16) -> Slot {
        let off = Self::slot_byte_offset(slot_no);
        let offset = u16::from_be_bytes(self.bytes[off..off + 2].try_into().unwrap());
        let unique = u32::from_be_bytes(self.bytes[off + 2..off + 6].try_into().unwrap());
        Slot { offset, unique }
    }

    fn set_slot(&mut self, slot_no: u16, slot: Slot) {
        let off = Self::slot_byte_offset(slot_no);
        self.bytes[off..off + 2].copy_from_slice(&slot.offset.to_be_bytes());
        self.bytes[off + 2..off + 6].copy_from_slice(&slot.unique.to_be_bytes());
    }

    /// Lowest empty slot number, if any exists below `n_slots`.
    pub fn find_empty_slot(&self) -> Option<u16> {
        let n = self.header().n_slots;
        (0..n).find(|&i| self.slot(i).is_empty())
    }

    pub fn object_header(&self, slot_no: u16) -> ObjectHdr {
        let slot = self.slot(slot_no);
        let off = HEADER_SIZE + slot.offset as usize;
        ObjectHdr::read(&self.bytes[off..off + OBJECT_HDR_SIZE])
    }

    pub fn object_bytes(&self, slot_no: u16) -> &[u8] {
        let slot = self.slot(slot_no);
        let off = HEADER_SIZE + slot.offset as usize;
        let hdr = ObjectHdr::read(&self.bytes[off..off + OBJECT_HDR_SIZE]);
        let data_off = off + OBJECT_HDR_SIZE;
        &self.bytes[data_off..data_off + hdr.length as usize]
    }

    /// Append a new object at the current high-water mark (`header.free`),
    /// writing into `slot_no` (which must already be empty or one past
    /// `n_slots`). Does not enforce space/placement policy — callers
    /// (`om::create_object`) decide when compaction or a fresh page is
    /// needed first.
    pub fn put_object(&mut self, slot_no: u16, hdr: ObjectHdr, data: &[u8], unique: u32) {
        let mut header = self.header();
        let off = HEADER_SIZE + header.free as usize;
        hdr.write(&mut self.bytes[off..off + OBJECT_HDR_SIZE]);
        let data_off = off + OBJECT_HDR_SIZE;
        self.bytes[data_off..data_off + data.len()].copy_from_slice(data);

        self.set_slot(slot_no, Slot {
            offset: header.free,
            unique,
        });
        header.free += hdr.footprint() as u16;
        if slot_no >= header.n_slots {
            header.n_slots = slot_no + 1;
        }
        self.set_header(&header);
    }

    /// Remove `slot_no`'s object: mark the slot empty, return its freed
    /// bytes to `unused`, and trim `n_slots` if the removed slot was the
    /// last one.
    pub fn remove_object(&mut self, slot_no: u16) {
        let hdr = self.object_header(slot_no);
        let mut header = self.header();
        self.set_slot(slot_no, Slot::EMPTY);
        header.unused += hdr.footprint() as u16;
        if slot_no + 1 == header.n_slots {
            let mut n = header.n_slots;
            while n > 0 && self.slot(n - 1).is_empty() {
                n -= 1;
            }
            header.n_slots = n;
        }
        self.set_header(&header);
    }

    pub fn all_slots(&self) -> Vec<Slot> {
        let n = self.header().n_slots;
        (0..n).map(|i| self.slot(i)).collect()
    }

    /// Compact the data area in place: copy every non-empty object
    /// (skipping `preferred_last_slot`) to a contiguous run starting at
    /// offset 0, in slot-number order, then — if given — place the
    /// preferred slot's object last so it ends up at the highest offset.
    /// Updates `header.free` and zeroes `header.unused`.
    pub fn compact(&mut self, preferred_last_slot: Option<u16>) {
        let header = self.header();
        let n = header.n_slots;

        let mut order: Vec<u16> = (0..n).filter(|&s| Some(s) != preferred_last_slot).collect();
        if let Some(preferred) = preferred_last_slot {
            if preferred < n {
                order.push(preferred);
            }
        }

        let mut scratch = vec![0u8; PAGE_CAPACITY];
        let mut write_off = 0usize;
        let mut new_slots: Vec<(u16, Slot)> = Vec::new();

        for slot_no in order {
            let slot = self.slot(slot_no);
            if slot.is_empty() {
                continue;
            }
            let src_off = HEADER_SIZE + slot.offset as usize;
            let hdr = ObjectHdr::read(&self.bytes[src_off..src_off + OBJECT_HDR_SIZE]);
            let total = hdr.footprint();
            scratch[write_off..write_off + total]
                .copy_from_slice(&self.bytes[src_off..src_off + total]);
            new_slots.push((
                slot_no,
                Slot {
                    offset: write_off as u16,
                    unique: slot.unique,
                },
            ));
            write_off += total;
        }

        self.bytes[HEADER_SIZE..HEADER_SIZE + write_off].copy_from_slice(&scratch[..write_off]);
        for (slot_no, slot) in new_slots {
            self.set_slot(slot_no, slot);
        }
        let mut header = self.header();
        header.free = write_off as u16;
        header.unused = 0;
        self.set_header(&header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_page(pid: PageId) -> [u8; PAGE_SIZE] {
        let mut buf = [0u8; PAGE_SIZE];
        let mut page = SlottedPage::new(&mut buf);
        page.init(pid, PageId::new(0, 0));
        buf
    }

    #[test]
    fn put_then_read_round_trips() {
        let mut buf = fresh_page(PageId::new(0, 1));
        let mut page = SlottedPage::new(&mut buf);
        let hdr = ObjectHdr {
            properties: 0,
            tag: 7,
            length: 5,
        };
        page.put_object(0, hdr, b"hello", 1);
        assert_eq!(page.object_bytes(0), b"hello");
        assert_eq!(page.header().n_slots, 1);
    }

    #[test]
    fn remove_trims_trailing_empty_slots_only() {
        let mut buf = fresh_page(PageId::new(0, 1));
        let mut page = SlottedPage::new(&mut buf);
        let hdr = ObjectHdr {
            properties: 0,
            tag: 0,
            length: 4,
        };
        page.put_object(0, hdr, b"aaaa", 1);
        page.put_object(1, hdr, b"bbbb", 2);
        page.put_object(2, hdr, b"cccc", 3);

        page.remove_object(1);
        assert_eq!(page.header().n_slots, 3, "middle delete keeps n_slots");
        assert!(page.slot(1).is_empty());

        page.remove_object(2);
        assert_eq!(
            page.header().n_slots,
            1,
            "trailing deletes trim back past the earlier hole"
        );
    }

    #[test]
    fn compact_reclaims_holes_and_parks_preferred_last() {
        let mut buf = fresh_page(PageId::new(0, 1));
        let mut page = SlottedPage::new(&mut buf);
        let hdr = ObjectHdr {
            properties: 0,
            tag: 0,
            length: 4,
        };
        page.put_object(0, hdr, b"aaaa", 1);
        page.put_object(1, hdr, b"bbbb", 2);
        page.put_object(2, hdr, b"cccc", 3);
        page.remove_object(1);
        let free_before = page.header().free;

        page.compact(Some(2));
        assert_eq!(page.header().unused, 0);
        assert!(page.header().free < free_before);
        assert_eq!(page.object_bytes(0), b"aaaa");
        assert_eq!(page.object_bytes(2), b"cccc");
        // slot 2's object now sits at the highest offset among live slots.
        assert!(page.slot(2).offset > page.slot(0).offset);
    }
}
