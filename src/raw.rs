//! Stand-in for the raw disk/extent allocator (`RDsM`): volume, extent, and
//! train allocation, modeled as a trait with one file-backed implementation
//! (a `File` plus a page-granular free list), addressed by `(vol_no,
//! page_no)` with extent-shaped allocation. A single [`FileRawDiskManager`]
//! instance owns exactly one volume; multi-volume databases are out of
//! scope here.

use crate::types::{PageId, PhysicalFileId, PAGE_SIZE};
use crate::Result;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// The four operations the core consumes from the raw disk manager.
pub trait RawDiskManager {
    /// Read one page (`train`) into `buf`, which must be exactly
    /// [`PAGE_SIZE`] bytes.
    fn read_train(&mut self, pid: PageId, buf: &mut [u8]) -> Result<()>;

    /// Write one page (`train`) from `buf`, which must be exactly
    /// [`PAGE_SIZE`] bytes.
    fn write_train(&mut self, pid: PageId, buf: &[u8]) -> Result<()>;

    /// Allocate `n_trains` contiguous new pages in an extent near `near_pid`
    /// (a placement hint only — this stand-in has a single free-list and
    /// does not model true extent geometry), returning the id of the first
    /// page allocated.
    fn alloc_trains(
        &mut self,
        vol_no: u16,
        near_pid: PageId,
        fill_factor: u8,
        n_trains: u32,
    ) -> Result<PageId>;

    /// Return a page to the volume's free list.
    fn dealloc_train(&mut self, pid: PageId) -> Result<()>;

    /// Locate the extent of a physical file's first page. This stand-in has
    /// no extent index; it reports `0` for any resident page, matching the
    /// degenerate single-extent-per-volume layout this implementation uses.
    fn page_id_to_ext_no(&self, pfid: PhysicalFileId) -> Result<u32>;

    fn sync(&mut self) -> Result<()>;
}

/// File-backed `RawDiskManager` for a single volume.
pub struct FileRawDiskManager {
    vol_no: u16,
    file: File,
    page_count: u32,
    free_list: VecDeque<u32>,
}

impl FileRawDiskManager {
    pub fn open(vol_no: u16, path: &Path) -> Result<Self> {
        let exists = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let page_count = if exists {
            (file.metadata()?.len() / PAGE_SIZE as u64) as u32
        } else {
            0
        };

        Ok(Self {
            vol_no,
            file,
            page_count,
            free_list: VecDeque::new(),
        })
    }

    fn check_volume(&self, pid: PageId) -> Result<()> {
        if pid.vol_no != self.vol_no {
            return Err(crate::error::StorageError::invalid_operation(format!(
                "page {} does not belong to volume {}",
                pid, self.vol_no
            )));
        }
        Ok(())
    }

    fn extend_by_one(&mut self) -> Result<u32> {
        let page_no = self.page_count;
        let offset = page_no as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&[0u8; PAGE_SIZE])?;
        self.page_count += 1;
        Ok(page_no)
    }
}

impl RawDiskManager for FileRawDiskManager {
    fn read_train(&mut self, pid: PageId, buf: &mut [u8]) -> Result<()> {
        self.check_volume(pid)?;
        if buf.len() != PAGE_SIZE {
            return Err(crate::error::StorageError::invalid_operation(
                "train buffer must be PAGE_SIZE bytes",
            ));
        }
        if pid.page_no >= self.page_count {
            return Err(crate::error::StorageError::PageNotFound(pid));
        }
        let offset = pid.page_no as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_train(&mut self, pid: PageId, buf: &[u8]) -> Result<()> {
        self.check_volume(pid)?;
        if buf.len() != PAGE_SIZE {
            return Err(crate::error::StorageError::invalid_operation(
                "train buffer must be PAGE_SIZE bytes",
            ));
        }
        let offset = pid.page_no as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn alloc_trains(
        &mut self,
        vol_no: u16,
        _near_pid: PageId,
        _fill_factor: u8,
        n_trains: u32,
    ) -> Result<PageId> {
        if vol_no != self.vol_no {
            return Err(crate::error::StorageError::invalid_operation(
                "volume mismatch in alloc_trains",
            ));
        }
        // Only single-train allocation is exercised by OM/BtM in this core
        // (large objects spanning multiple trains are out of scope).
        if n_trains != 1 {
            return Err(crate::error::StorageError::not_supported(
                "multi-train extents (large objects are out of scope)",
            ));
        }
        let page_no = match self.free_list.pop_front() {
            Some(p) => p,
            None => self.extend_by_one()?,
        };
        Ok(PageId::new(self.vol_no, page_no))
    }

    fn dealloc_train(&mut self, pid: PageId) -> Result<()> {
        self.check_volume(pid)?;
        self.free_list.push_back(pid.page_no);
        Ok(())
    }

    fn page_id_to_ext_no(&self, pfid: PhysicalFileId) -> Result<u32> {
        self.check_volume(pfid)?;
        Ok(0)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn alloc_then_read_write_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol0.db");
        let mut rd = FileRawDiskManager::open(0, &path).unwrap();

        let pid = rd.alloc_trains(0, PageId::NIL, 100, 1).unwrap();
        assert_eq!(pid, PageId::new(0, 0));

        let mut buf = [0u8; PAGE_SIZE];
        buf[0..5].copy_from_slice(b"hello");
        rd.write_train(pid, &buf).unwrap();

        let mut readback = [0u8; PAGE_SIZE];
        rd.read_train(pid, &mut readback).unwrap();
        assert_eq!(&readback[0..5], b"hello");
    }

    #[test]
    fn dealloc_then_alloc_reuses_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol0.db");
        let mut rd = FileRawDiskManager::open(0, &path).unwrap();

        let p0 = rd.alloc_trains(0, PageId::NIL, 100, 1).unwrap();
        let p1 = rd.alloc_trains(0, PageId::NIL, 100, 1).unwrap();
        assert_ne!(p0, p1);

        rd.dealloc_train(p0).unwrap();
        let p2 = rd.alloc_trains(0, PageId::NIL, 100, 1).unwrap();
        assert_eq!(p2, p0);
    }

    #[test]
    fn volume_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol0.db");
        let mut rd = FileRawDiskManager::open(0, &path).unwrap();
        let foreign = PageId::new(9, 0);
        let mut buf = [0u8; PAGE_SIZE];
        assert!(rd.read_train(foreign, &mut buf).is_err());
    }
}
