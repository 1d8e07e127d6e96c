//! # Object Storage Engine
//!
//! A single-threaded, on-disk object storage engine built from three
//! cooperating subsystems:
//!
//! - **Buffer Manager** (`buffer`): Second-Chance page replacement over
//!   `NUM_BUF_TYPES` independent pools, pin/unpin discipline via RAII guards.
//! - **Object Manager** (`om`): slotted-page storage of variable-length
//!   objects addressed by a stable `ObjectId`, with available-space lists.
//! - **B+-Tree Manager** (`btm`): a clustered index over composite keys,
//!   with split/merge/redistribute and bidirectionally linked leaves.
//!
//! `raw`, `recovery`, `catalog`, and `dealloc` model the external
//! collaborators this core consults but does not own (volume/extent
//! allocation, transaction rollback, the file-naming layer, and the
//! end-of-transaction deallocation sweep, respectively).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objstore::{Db, Config};
//!
//! let config = Config::new("my_database.db");
//! let db = Db::open(config)?;
//!
//! db.put(b"hello", b"world")?;
//! let value = db.get(b"hello")?;
//! db.delete(b"hello")?;
//!
//! for result in db.range(Some(b"a"), Some(b"z"))? {
//!     let (key, value) = result;
//!     println!("{:?} -> {:?}", key, value);
//! }
//! ```

pub mod btm;
pub mod buffer;
pub mod catalog;
pub mod dealloc;
pub mod error;
pub mod om;
pub mod raw;
pub mod recovery;
pub mod types;

pub use error::{Result, StorageError};
pub use types::{KeyDescriptor, KeyPart, KeyPartType, PageId, PAGE_SIZE};

pub use btm::BtreeManager;
pub use buffer::{BufferPoolConfig, BufferPoolSet};
pub use om::ObjectManager;
pub use raw::{FileRawDiskManager, RawDiskManager};
pub use recovery::{NoRollbackRequired, RecoveryManager};

use btm::cursor::CursorFlag;
use btm::key::KeyVal;
use catalog::{BtreeFileCatalog, DataFileCatalog};
use dealloc::VecDeallocList;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use types::{BufferType, ObjectId, NUM_AVAIL_LISTS};

type Disk = Rc<RefCell<dyn RawDiskManager>>;

/// The data file's catalog overlay lives on this well-known page; the
/// B+-tree file's catalog overlay lives on the page right after it. Every
/// other page is allocated by the object/B+-tree managers themselves.
const DATA_CATALOG_PAGE_NO: u32 = 0;
const BTREE_CATALOG_PAGE_NO: u32 = 1;

/// Tuning for the clustered index `Db::open` creates over a volume's
/// objects: the composite key shape used by the index's comparisons, and
/// the fill factor new B+-tree pages are allocated with.
#[derive(Debug, Clone, Copy)]
pub struct BTreeConfig {
    /// Shape of the keys stored in the index. `Db`'s byte-slice API
    /// (`put`/`get`/`delete`/`range`) assumes a single `VarString` part;
    /// override only when driving [`btm::BtreeManager`] directly.
    pub key_desc: KeyDescriptor,
    pub extent_fill_factor: u8,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        Self {
            key_desc: KeyDescriptor::single(KeyPartType::VarString, true),
            extent_fill_factor: 100,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the database's single backing volume file.
    pub path: PathBuf,
    /// Sizing for the object-manager's data-page buffer pool.
    pub data_pool: BufferPoolConfig,
    /// Sizing for the B+-tree manager's index-page buffer pool.
    pub btree_pool: BufferPoolConfig,
    /// Whether to `sync` the volume after every mutating operation.
    pub sync_on_write: bool,
    /// Index tuning (key shape, B+-tree page fill factor).
    pub btree_config: BTreeConfig,
}

impl Config {
    /// Create a new configuration with default settings.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            data_pool: BufferPoolConfig::default(),
            btree_pool: BufferPoolConfig::default(),
            sync_on_write: false,
            btree_config: BTreeConfig::default(),
        }
    }

    /// Set both pools' capacity (in pages) to the same size.
    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.data_pool.capacity = size;
        self.btree_pool.capacity = size;
        self
    }

    /// Enable `sync` after every mutating operation.
    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }

    /// Set the index tuning.
    pub fn btree_config(mut self, config: BTreeConfig) -> Self {
        self.btree_config = config;
        self
    }
}

/// Node type for B+-tree visualization, analogous to the page/catalog
/// layout `dump_index` walks. Diagnostic only, not part of the on-disk
/// format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub page_id: String,
    pub is_leaf: bool,
    pub keys: Vec<String>,
    pub object_ids: Vec<String>,
    pub children: Vec<TreeNode>,
}

/// Main database handle: one volume holding one object-manager data file
/// clustered by one B+-tree index.
///
/// Every entry point first consults the configured [`RecoveryManager`]:
/// if it reports a rollback is required, the operation fails with
/// [`StorageError::NotSupported`] rather than attempt anything this core
/// cannot undo.
pub struct Db {
    pool: BufferPoolSet,
    disk: Disk,
    recovery: Box<dyn RecoveryManager>,
    data_cat: RefCell<DataFileCatalog>,
    data_catalog_pid: PageId,
    btree_cat: BtreeFileCatalog,
    key_desc: KeyDescriptor,
    vol_no: u16,
    config: Config,
}

impl Db {
    /// Open or create a database at the given path, with no rollback
    /// requirement ever asserted (the default [`NoRollbackRequired`]).
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_recovery(config, Box::new(NoRollbackRequired))
    }

    /// Open or create a database, consulting a caller-supplied recovery
    /// manager instead of the default stub.
    pub fn open_with_recovery(config: Config, recovery: Box<dyn RecoveryManager>) -> Result<Self> {
        let is_new = std::fs::metadata(&config.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let vol_no: u16 = 0;
        let disk: Disk = Rc::new(RefCell::new(FileRawDiskManager::open(vol_no, &config.path)?));
        let pool = BufferPoolSet::new([config.data_pool, config.btree_pool], disk.clone());

        let data_catalog_pid = PageId::new(vol_no, DATA_CATALOG_PAGE_NO);
        let btree_catalog_pid = PageId::new(vol_no, BTREE_CATALOG_PAGE_NO);

        let (data_cat, btree_cat) = if is_new {
            let claimed = disk.borrow_mut().alloc_trains(vol_no, PageId::NIL, 100, 1)?;
            debug_assert_eq!(claimed, data_catalog_pid);
            let claimed = disk.borrow_mut().alloc_trains(vol_no, PageId::NIL, 100, 1)?;
            debug_assert_eq!(claimed, btree_catalog_pid);

            let om = ObjectManager::new(&pool);
            let data_cat = om.init_file(&disk, vol_no)?;
            let btm = BtreeManager::new(&pool);
            let btree_cat = btm.create_index(&disk, vol_no)?;

            {
                let pin = pool.get_new(data_catalog_pid, BufferType::Data)?;
                let mut bytes = pin.bytes_mut();
                data_cat.write(&mut bytes);
                pin.set_dirty();
            }
            {
                let pin = pool.get_new(btree_catalog_pid, BufferType::Data)?;
                let mut bytes = pin.bytes_mut();
                btree_cat.write(&mut bytes);
                pin.set_dirty();
            }
            pool.flush_all()?;
            (data_cat, btree_cat)
        } else {
            let data_cat = {
                let pin = pool.get(data_catalog_pid, BufferType::Data)?;
                let bytes = pin.bytes();
                DataFileCatalog::read(&bytes)?
            };
            let btree_cat = {
                let pin = pool.get(btree_catalog_pid, BufferType::Data)?;
                let bytes = pin.bytes();
                BtreeFileCatalog::read(&bytes)?
            };
            (data_cat, btree_cat)
        };

        let key_desc = config.btree_config.key_desc;
        Ok(Self {
            pool,
            disk,
            recovery,
            data_cat: RefCell::new(data_cat),
            data_catalog_pid,
            btree_cat,
            key_desc,
            vol_no,
            config,
        })
    }

    fn check_rollback(&self) -> Result<()> {
        if self.recovery.is_rollback_required() {
            return Err(StorageError::not_supported(
                "rollback required (transactions are out of scope for this core)",
            ));
        }
        Ok(())
    }

    fn persist_data_catalog(&self) -> Result<()> {
        let pin = self.pool.get(self.data_catalog_pid, BufferType::Data)?;
        let mut bytes = pin.bytes_mut();
        self.data_cat.borrow().write(&mut bytes);
        pin.set_dirty();
        Ok(())
    }

    fn maybe_sync(&self) -> Result<()> {
        if self.config.sync_on_write {
            self.disk.borrow_mut().sync()?;
        }
        Ok(())
    }

    fn lookup_oid(&self, kval: &KeyVal) -> Result<Option<ObjectId>> {
        let btm = BtreeManager::new(&self.pool);
        let cursor = btm.fetch(
            self.btree_cat.root_page(),
            &self.key_desc,
            Some(kval),
            types::comp_op::SM_EQ,
            None,
            types::comp_op::SM_EOF,
        )?;
        Ok(match cursor.flag {
            CursorFlag::On => Some(cursor.oid),
            _ => None,
        })
    }

    /// Get the current B+-tree configuration.
    pub fn btree_config(&self) -> BTreeConfig {
        self.config.btree_config
    }

    /// Get a value by key. Returns `None` if the key does not exist.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let kval = KeyVal::single_str(key.to_vec());
        let Some(oid) = self.lookup_oid(&kval)? else {
            return Ok(None);
        };
        let om = ObjectManager::new(&self.pool);
        let len = om.object_len(oid)?;
        let mut buf = vec![0u8; len];
        om.read_object(oid, 0, om::REMAINDER, Some(&mut buf))?;
        Ok(Some(buf))
    }

    /// Insert or update a key-value pair.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_rollback()?;
        let kval = KeyVal::single_str(key.to_vec());

        if let Some(old_oid) = self.lookup_oid(&kval)? {
            self.remove_indexed_object(&kval, old_oid)?;
        }

        let om = ObjectManager::new(&self.pool);
        let oid = {
            let mut cat = self.data_cat.borrow_mut();
            om.create_object(&self.disk, self.vol_no, &mut cat, None, None, value)?
        };

        let btm = BtreeManager::new(&self.pool);
        if let Err(e) = btm.insert(
            &self.disk,
            self.vol_no,
            self.btree_cat.root_page(),
            &self.key_desc,
            &kval,
            oid,
        ) {
            let mut cat = self.data_cat.borrow_mut();
            let mut dealloc = VecDeallocList::new();
            if om.destroy_object(&mut cat, oid, &mut dealloc).is_ok() {
                for elem in dealloc.drain() {
                    if let dealloc::DeallocElem::Page(pid) = elem {
                        let _ = self.disk.borrow_mut().dealloc_train(pid);
                    }
                }
            }
            return Err(e);
        }

        self.persist_data_catalog()?;
        self.maybe_sync()?;
        Ok(())
    }

    fn remove_indexed_object(&self, kval: &KeyVal, oid: ObjectId) -> Result<()> {
        let mut dealloc = VecDeallocList::new();
        let btm = BtreeManager::new(&self.pool);
        btm.delete(
            &self.disk,
            self.vol_no,
            self.btree_cat.root_page(),
            &self.key_desc,
            kval,
            oid,
            &mut dealloc,
        )?;
        let om = ObjectManager::new(&self.pool);
        let mut cat = self.data_cat.borrow_mut();
        om.destroy_object(&mut cat, oid, &mut dealloc)?;
        for elem in dealloc.drain() {
            if let dealloc::DeallocElem::Page(pid) = elem {
                self.disk.borrow_mut().dealloc_train(pid)?;
            }
        }
        Ok(())
    }

    /// Delete a key-value pair. Returns `true` if the key existed and was
    /// deleted.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.check_rollback()?;
        let kval = KeyVal::single_str(key.to_vec());
        let Some(oid) = self.lookup_oid(&kval)? else {
            return Ok(false);
        };
        self.remove_indexed_object(&kval, oid)?;
        self.persist_data_catalog()?;
        self.maybe_sync()?;
        Ok(true)
    }

    /// Check if a key exists.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        let kval = KeyVal::single_str(key.to_vec());
        Ok(self.lookup_oid(&kval)?.is_some())
    }

    /// Iterate over all key-value pairs in sorted order.
    pub fn iter(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.range(None, None)
    }

    /// Iterate over key-value pairs in a range. Both bounds are optional;
    /// `None` means unbounded on that side.
    pub fn range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let btm = BtreeManager::new(&self.pool);
        let om = ObjectManager::new(&self.pool);

        let start_kval = start.map(|s| KeyVal::single_str(s.to_vec()));
        let stop_kval = end.map(|s| KeyVal::single_str(s.to_vec()));
        let (start_op, stop_op) = (types::comp_op::SM_GE, types::comp_op::SM_LE);

        let mut cursor = btm.fetch(
            self.btree_cat.root_page(),
            &self.key_desc,
            start_kval.as_ref(),
            if start_kval.is_some() { start_op } else { types::comp_op::SM_BOF },
            stop_kval.as_ref(),
            stop_op,
        )?;

        let mut out = Vec::new();
        while cursor.flag == CursorFlag::On {
            let btm::key::KeyPartVal::Str(key_bytes) = &cursor.key.0[0] else {
                return Err(StorageError::invalid_operation(
                    "range scan requires a single VarString key part",
                ));
            };
            let len = om.object_len(cursor.oid)?;
            let mut buf = vec![0u8; len];
            om.read_object(cursor.oid, 0, om::REMAINDER, Some(&mut buf))?;
            out.push((key_bytes.clone(), buf));

            cursor = btm.fetch_next(&self.key_desc, stop_kval.as_ref(), stop_op, &cursor)?;
        }
        Ok(out)
    }

    /// Flush all dirty pages to disk and sync the volume.
    pub fn flush(&self) -> Result<()> {
        self.persist_data_catalog()?;
        self.pool.flush_all()?;
        self.disk.borrow_mut().sync()?;
        Ok(())
    }

    /// Get statistics about the database.
    pub fn stats(&self) -> DbStats {
        DbStats {
            data_pages_capacity: self.pool.capacity(BufferType::Data),
            btree_pages_capacity: self.pool.capacity(BufferType::Btree),
            avail_list_heads: self.data_cat.borrow().avail_list_heads.map(|p| p.page_no),
        }
    }

    /// Export the index structure for visualization (analogous to a debug
    /// dump, not part of the on-disk format).
    pub fn dump_index(&self) -> Result<TreeNode> {
        self.dump_node(self.btree_cat.root_page())
    }

    /// JSON rendering of [`Db::dump_index`]'s tree, for diagnostic tooling.
    /// Not part of the on-disk format.
    pub fn dump_index_json(&self) -> Result<String> {
        let tree = self.dump_index()?;
        serde_json::to_string_pretty(&tree)
            .map_err(|e| StorageError::invalid_operation(format!("failed to serialize index: {e}")))
    }

    fn dump_node(&self, pid: PageId) -> Result<TreeNode> {
        let pin = self.pool.get(pid, BufferType::Btree)?;
        let mut bytes = *pin.bytes();
        drop(pin);
        let page = btm::page::BtmPage::new(&mut bytes);
        let header = page.header();

        if header.is(btm::page::FLAG_LEAF) {
            let mut keys = Vec::new();
            let mut object_ids = Vec::new();
            for i in 0..header.n_slots {
                let entry = page.leaf_entry(i);
                keys.push(describe_key(&self.key_desc, &entry.key));
                object_ids.push(entry.oid.to_string());
            }
            return Ok(TreeNode {
                page_id: pid.to_string(),
                is_leaf: true,
                keys,
                object_ids,
                children: Vec::new(),
            });
        }

        let mut keys = Vec::new();
        let mut child_ids = vec![header.p0];
        for i in 0..header.n_slots {
            let entry = page.internal_entry(i);
            keys.push(describe_key(&self.key_desc, &entry.key));
            child_ids.push(entry.spid);
        }

        let mut children = Vec::with_capacity(child_ids.len());
        for child in child_ids {
            children.push(self.dump_node(child)?);
        }

        Ok(TreeNode {
            page_id: pid.to_string(),
            is_leaf: false,
            keys,
            object_ids: Vec::new(),
            children,
        })
    }
}

fn describe_key(desc: &KeyDescriptor, raw: &[u8]) -> String {
    let kval = KeyVal::decode(desc, raw);
    kval.0
        .iter()
        .map(|part| match part {
            btm::key::KeyPartVal::Int(v) => v.to_string(),
            btm::key::KeyPartVal::Str(s) => String::from_utf8_lossy(s).to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Database statistics.
#[derive(Debug, Clone)]
pub struct DbStats {
    pub data_pages_capacity: usize,
    pub btree_pages_capacity: usize,
    pub avail_list_heads: [u32; NUM_AVAIL_LISTS],
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_basic_operations() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let config = Config::new(&path);
        let db = Db::open(config)?;

        db.put(b"key1", b"value1")?;
        assert_eq!(db.get(b"key1")?, Some(b"value1".to_vec()));

        db.put(b"key1", b"value2")?;
        assert_eq!(db.get(b"key1")?, Some(b"value2".to_vec()));

        assert!(db.delete(b"key1")?);
        assert_eq!(db.get(b"key1")?, None);

        assert_eq!(db.get(b"nonexistent")?, None);
        assert!(!db.delete(b"nonexistent")?);

        Ok(())
    }

    #[test]
    fn test_range_scan() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let config = Config::new(&path);
        let db = Db::open(config)?;

        db.put(b"apple", b"1")?;
        db.put(b"banana", b"2")?;
        db.put(b"cherry", b"3")?;
        db.put(b"date", b"4")?;

        let all = db.iter()?;
        assert_eq!(all.len(), 4);

        let range = db.range(Some(b"banana"), Some(b"date"))?;
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].0, b"banana".to_vec());
        assert_eq!(range[1].0, b"cherry".to_vec());

        Ok(())
    }

    #[test]
    fn reopen_recovers_data_through_persisted_catalogs() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let db = Db::open(Config::new(&path))?;
            db.put(b"a", b"1")?;
            db.put(b"b", b"2")?;
            db.flush()?;
        }
        {
            let db = Db::open(Config::new(&path))?;
            assert_eq!(db.get(b"a")?, Some(b"1".to_vec()));
            assert_eq!(db.get(b"b")?, Some(b"2".to_vec()));
            db.put(b"c", b"3")?;
            assert_eq!(db.get(b"c")?, Some(b"3".to_vec()));
        }
        Ok(())
    }

    #[test]
    fn rollback_required_refuses_mutation() {
        struct AlwaysRollback;
        impl RecoveryManager for AlwaysRollback {
            fn is_rollback_required(&self) -> bool {
                true
            }
        }

        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open_with_recovery(Config::new(&path), Box::new(AlwaysRollback)).unwrap();

        let err = db.put(b"k", b"v").unwrap_err();
        assert!(matches!(err, StorageError::NotSupported(_)));
    }

    #[test]
    fn dump_index_reflects_inserted_keys() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(Config::new(&path))?;

        for i in 0..5 {
            db.put(format!("k{i}").as_bytes(), b"v")?;
        }
        let root = db.dump_index()?;
        assert!(root.is_leaf || !root.children.is_empty());
        Ok(())
    }

    #[test]
    fn dump_index_json_round_trips_through_serde() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(Config::new(&path))?;

        for i in 0..5 {
            db.put(format!("k{i}").as_bytes(), b"v")?;
        }
        let json = db.dump_index_json()?;
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed.get("isLeaf").is_some());
        Ok(())
    }

    #[test]
    fn randomized_insert_delete_matches_model() -> Result<()> {
        use rand::seq::SliceRandom;
        use rand::Rng;
        use std::collections::BTreeMap;

        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Db::open(Config::new(&path))?;

        let mut rng = rand::thread_rng();
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let mut keys: Vec<Vec<u8>> = (0..200).map(|i| format!("key{i:04}").into_bytes()).collect();
        keys.shuffle(&mut rng);

        for key in &keys {
            let value: Vec<u8> = (0..8).map(|_| rng.gen::<u8>()).collect();
            db.put(key, &value)?;
            model.insert(key.clone(), value);
        }

        let mut to_delete = keys.clone();
        to_delete.shuffle(&mut rng);
        for key in to_delete.into_iter().take(80) {
            assert!(db.delete(&key)?);
            model.remove(&key);
        }

        for (key, value) in &model {
            assert_eq!(db.get(key)?.as_ref(), Some(value));
        }
        let expected: Vec<(Vec<u8>, Vec<u8>)> = model.into_iter().collect();
        assert_eq!(db.iter()?, expected);
        Ok(())
    }
}
