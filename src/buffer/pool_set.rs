//! The process-wide set of `NUM_BUF_TYPES` independent buffer pools.
//!
//! There are NUM_BUF_TYPES independent pools (e.g. one for data pages and
//! one for B+-tree pages), each with its own size, hash table, and
//! Second-Chance cursor.

use super::pool::{BufferPool, PagePin};
use crate::error::{Result, StorageError};
use crate::raw::RawDiskManager;
use crate::types::{BufferType, PageId, NUM_BUF_TYPES};
use std::cell::RefCell;
use std::rc::Rc;

/// Per-pool-type sizing: capacity and hash-table size, chosen at
/// construction time for each pool.
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub capacity: usize,
    pub hash_table_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            hash_table_size: 37,
        }
    }
}

pub struct BufferPoolSet {
    pools: [BufferPool; NUM_BUF_TYPES],
}

impl BufferPoolSet {
    pub fn new(
        configs: [BufferPoolConfig; NUM_BUF_TYPES],
        disk: Rc<RefCell<dyn RawDiskManager>>,
    ) -> Self {
        let pools = configs.map(|cfg| {
            BufferPool::new(cfg.capacity, cfg.hash_table_size, Rc::clone(&disk))
        });
        Self { pools }
    }

    fn pool(&self, ty: BufferType) -> &BufferPool {
        &self.pools[ty.index()]
    }

    pub fn get(&self, pid: PageId, ty: BufferType) -> Result<PagePin<'_>> {
        self.pool(ty).get(pid)
    }

    pub fn get_new(&self, pid: PageId, ty: BufferType) -> Result<PagePin<'_>> {
        self.pool(ty).get_new(pid)
    }

    pub fn set_dirty(&self, pid: PageId, ty: BufferType) -> Result<()> {
        self.pool(ty).set_dirty(pid)
    }

    pub fn free(&self, pid: PageId, ty: BufferType) -> Result<()> {
        self.pool(ty).free(pid)
    }

    pub fn flush_one(&self, pid: PageId, ty: BufferType) -> Result<()> {
        self.pool(ty).flush_one(pid)
    }

    /// Iterate every frame across *all* pools.
    pub fn flush_all(&self) -> Result<()> {
        for pool in &self.pools {
            pool.flush_all()?;
        }
        Ok(())
    }

    /// Clears every frame and hash bucket in every pool without touching
    /// disk.
    pub fn discard_all(&self) {
        for pool in &self.pools {
            pool.discard_all();
        }
    }

    pub fn capacity(&self, ty: BufferType) -> usize {
        self.pool(ty).capacity()
    }
}

/// Unknown pool selector surfaces as `BadBufferType`; since [`BufferType`]
/// is a closed enum every value is valid, so this exists only as the
/// documented failure mode for callers constructing a selector from an
/// external/serialized index.
pub fn buffer_type_from_index(idx: usize) -> Result<BufferType> {
    BufferType::ALL
        .get(idx)
        .copied()
        .ok_or(StorageError::BadBufferType)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::FileRawDiskManager;
    use tempfile::tempdir;

    #[test]
    fn data_and_btree_pools_are_independent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol0.db");
        let disk: Rc<RefCell<dyn RawDiskManager>> =
            Rc::new(RefCell::new(FileRawDiskManager::open(0, &path).unwrap()));
        let set = BufferPoolSet::new(
            [
                BufferPoolConfig {
                    capacity: 1,
                    hash_table_size: 3,
                },
                BufferPoolConfig {
                    capacity: 1,
                    hash_table_size: 3,
                },
            ],
            disk.clone(),
        );

        let pid = disk
            .borrow_mut()
            .alloc_trains(0, PageId::NIL, 100, 1)
            .unwrap();
        // Pinning the same page in both pools at once must not conflict —
        // they are fully independent pools.
        let data_pin = set.get_new(pid, BufferType::Data).unwrap();
        let btree_pin = set.get_new(pid, BufferType::Btree).unwrap();
        drop(data_pin);
        drop(btree_pin);
    }

    #[test]
    fn buffer_type_from_index_rejects_out_of_range() {
        assert!(buffer_type_from_index(0).is_ok());
        assert!(buffer_type_from_index(1).is_ok());
        assert!(matches!(
            buffer_type_from_index(2),
            Err(StorageError::BadBufferType)
        ));
    }
}
