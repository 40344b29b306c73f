//! Error kinds for the storage engine, per `spec.md` §7.
//!
//! The teacher's `errors.rs` was a bare enum with no `Display`/`Error` impl;
//! we use `thiserror` instead so the kinds stay explicit `Result` variants
//! (never a silent catch-all) while still being printable/loggable.

use thiserror::Error;

use crate::bufferpool::PageKey;
use crate::types::Rid;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Record, key, index entry, or frame missing. Not fatal.
    #[error("not found: {0}")]
    NotFound(String),

    /// Insert/update would violate primary-key uniqueness.
    #[error("duplicate primary key: {0}")]
    Duplicate(i64),

    /// Buffer pool has no unpinned frame available to evict.
    #[error("buffer pool capacity exhausted trying to load {0:?}")]
    CapacityExhausted(PageKey),

    /// Corrupted or unreadable persisted page; the engine refuses to start.
    #[error("serialization fault reading {path}: {reason}")]
    SerializationFault { path: String, reason: String },

    /// A no-wait lock request failed because of an incompatible holder.
    #[error("lock conflict on resource {0}")]
    LockConflict(String),

    /// Indicates an engine bug: an unallocated RID was addressed, or a
    /// logical RID lookup missed its directory entry.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl StorageError {
    pub fn not_found(what: impl Into<String>) -> Self {
        StorageError::NotFound(what.into())
    }

    pub fn invariant(what: impl Into<String>) -> Self {
        StorageError::Invariant(what.into())
    }

    pub fn missing_rid(rid: Rid) -> Self {
        StorageError::NotFound(format!("rid {rid}"))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
