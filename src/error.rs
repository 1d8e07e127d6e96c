//! Error types for the storage engine.
//!
//! Every public operation returns [`Result`]; errors propagate verbatim to
//! the caller (no internal retries). `EndOfScan` is the sole variant that
//! callers are expected to fold back into normal control flow rather than
//! treat as a failure.

use crate::types::PageId;
use thiserror::Error;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage engine.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page was not found.
    #[error("page {0} not found")]
    PageNotFound(PageId),

    /// Page does not have enough space for the operation.
    #[error("page {page_id} is full, need {needed} bytes but only {available} available")]
    PageFull {
        page_id: PageId,
        needed: usize,
        available: usize,
    },

    /// Data corruption detected (e.g. checksum mismatch).
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// Invalid page format or type (generic catch-all; prefer `BadPageType`
    /// for the tag-mismatch case).
    #[error("invalid page: {0}")]
    InvalidPage(String),

    /// Invalid operation for the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Database file is corrupted or has invalid format.
    #[error("invalid database file: {0}")]
    InvalidDatabaseFile(String),

    // --- Buffer manager ---
    /// Unknown pool selector passed to a buffer-manager call.
    #[error("bad buffer type")]
    BadBufferType,

    /// A nil out-buffer pointer was supplied where one was required.
    #[error("bad buffer: nil output buffer")]
    BadBuffer,

    /// Second-Chance replacement found no unpinned candidate.
    #[error("no unfixed buffer available (pool saturated with pinned pages)")]
    NoUnfixedBuf,

    /// Caller asserted a page resident in the buffer pool that is not.
    #[error("bad hash key: page {0} not resident")]
    BadHashKey(PageId),

    // --- Object manager ---
    /// Nil file-catalog pointer.
    #[error("bad catalog object")]
    BadCatalogObject,

    /// Nil OID, slot out of range, or `unique` mismatch.
    #[error("bad object id: {0}")]
    BadObjectID(String),

    /// Negative length or length exceeding the object.
    #[error("bad length: {0}")]
    BadLength(String),

    /// `start` beyond the object's length.
    #[error("bad start offset: {0}")]
    BadStart(String),

    /// Non-nil length with a nil user buffer.
    #[error("bad user buffer")]
    BadUserBuf,

    // --- B+-tree manager ---
    /// Page header indicates a type incompatible with the B+-tree operation.
    #[error("bad btree page: {0}")]
    BadBtreePage(String),

    /// A page's tag does not match the operation's expected variant.
    #[error("bad page type: {0}")]
    BadPageType(String),

    /// Generic page-layout inconsistency.
    #[error("bad page: {0}")]
    BadPage(String),

    /// Unknown comparison-operator bitmask.
    #[error("bad comparison operator: {0:#x}")]
    BadCompOp(u8),

    /// Insert of a `(key, oid)` pair that already exists.
    #[error("duplicated object id")]
    DuplicatedObjectId,

    /// Insert of a key that already exists where uniqueness is required.
    #[error("duplicated key")]
    DuplicatedKey,

    /// Delete (or fetch) of a missing key.
    #[error("not found")]
    NotFound,

    /// Cursor reached the end of the scan. Not a failure — a control
    /// signal callers are expected to fold into loop termination.
    #[error("end of scan")]
    EndOfScan,

    /// Feature excluded from this core (rollback required, large objects,
    /// key types beyond INT/VARSTRING, unique-counter rollover, ...).
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl StorageError {
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    pub fn invalid_page(msg: impl Into<String>) -> Self {
        Self::InvalidPage(msg.into())
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub fn invalid_db(msg: impl Into<String>) -> Self {
        Self::InvalidDatabaseFile(msg.into())
    }

    pub fn bad_object_id(msg: impl Into<String>) -> Self {
        Self::BadObjectID(msg.into())
    }

    pub fn bad_length(msg: impl Into<String>) -> Self {
        Self::BadLength(msg.into())
    }

    pub fn bad_start(msg: impl Into<String>) -> Self {
        Self::BadStart(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }
}
