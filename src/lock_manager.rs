//! Hierarchical, no-wait two-phase locking, per `spec.md` §9.
//!
//! Shared across every table of a database (unlike the buffer pool, which
//! each `Table` owns for itself) since deadlock avoidance and commit
//! ordering need one global view of who holds what. Locking follows the
//! standard intention-lock protocol: a row-level `S`/`X` lock is only
//! granted after the matching table-level intent (`IS`/`IX`) is held, so a
//! transaction that wants the whole table (a full scan, say) can still
//! detect conflicts with row-level holders elsewhere.
//!
//! No-wait: a request that conflicts with an existing incompatible holder
//! fails immediately rather than blocking, so the caller aborts and retries
//! instead of risking a deadlock. This mirrors the primary-key conflict
//! bookkeeping in the teacher's `transactions.rs` `TransactionManager`
//! (`pkeys_in_process`), generalized from "one key, one effect" to the full
//! IS/IX/S/X hierarchy `spec.md` calls for.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::types::Rid;

pub type TransactionId = u64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LockMode {
    IS,
    IX,
    S,
    X,
}

impl LockMode {
    /// True if `self` compatible with `other` held by a different
    /// transaction on the same resource (the standard hierarchical-lock
    /// compatibility matrix).
    fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        matches!(
            (self, other),
            (IS, IS) | (IS, IX) | (IX, IS) | (IX, IX) | (IS, S) | (S, IS)
        )
    }

    /// True if already holding `self` satisfies a request for `requested`
    /// (so no additional grant is needed).
    fn subsumes(self, requested: LockMode) -> bool {
        use LockMode::*;
        self == requested || matches!((self, requested), (IX, IS) | (X, S))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum Resource {
    Table(u64),
    Row(u64, Rid),
}

/// Resources are keyed by a caller-supplied numeric table id rather than a
/// `String`, so hot-path locking avoids allocating on every call; `Table`
/// picks its id once at creation.
pub struct LockManager {
    holders: Mutex<HashMap<Resource, Vec<(TransactionId, LockMode)>>>,
    next_transaction_id: std::sync::atomic::AtomicU64,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        LockManager {
            holders: Mutex::new(HashMap::new()),
            next_transaction_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Mints a fresh, globally unique transaction id, mirroring the
    /// teacher's `TransactionManager::next_transaction_id` counter.
    pub fn next_transaction_id(&self) -> TransactionId {
        self.next_transaction_id.fetch_add(1, std::sync::atomic::Ordering::AcqRel)
    }

    fn acquire(&self, txn: TransactionId, resource: Resource, mode: LockMode) -> StorageResult<()> {
        let mut holders = self.holders.lock();
        let entry = holders.entry(resource).or_default();

        if let Some(&(_, held)) = entry.iter().find(|(t, _)| *t == txn) {
            if held.subsumes(mode) {
                return Ok(());
            }
        }

        for &(holder, held_mode) in entry.iter() {
            if holder != txn && !mode.compatible_with(held_mode) {
                return Err(StorageError::LockConflict(format!("{resource:?} held as {held_mode:?}")));
            }
        }

        entry.retain(|(t, _)| *t != txn);
        entry.push((txn, mode));
        Ok(())
    }

    /// Acquire a shared (read) lock on a record, after the matching `IS`
    /// table intent lock.
    pub fn acquire_shared(&self, txn: TransactionId, table: u64, rid: Rid) -> StorageResult<()> {
        self.acquire(txn, Resource::Table(table), LockMode::IS)?;
        self.acquire(txn, Resource::Row(table, rid), LockMode::S)
    }

    /// Acquire an exclusive (write) lock on a record, after the matching
    /// `IX` table intent lock. Upgrades a held `S` to `X` in place if the
    /// transaction is the row's sole holder.
    pub fn acquire_exclusive(&self, txn: TransactionId, table: u64, rid: Rid) -> StorageResult<()> {
        self.acquire(txn, Resource::Table(table), LockMode::IX)?;
        self.acquire(txn, Resource::Row(table, rid), LockMode::X)
    }

    /// Acquire an `IS` lock on the whole table, for a full-table scan
    /// (`sum`/`sum_version` over a primary-key range).
    pub fn acquire_table_shared(&self, txn: TransactionId, table: u64) -> StorageResult<()> {
        self.acquire(txn, Resource::Table(table), LockMode::IS)
    }

    /// Acquire an `IX` lock on the whole table, for an insert, which has no
    /// existing row to lock individually.
    pub fn acquire_table_exclusive(&self, txn: TransactionId, table: u64) -> StorageResult<()> {
        self.acquire(txn, Resource::Table(table), LockMode::IX)
    }

    /// Release every lock held by `txn`, across every table and row. Called
    /// on both commit and abort.
    pub fn release_all(&self, txn: TransactionId) {
        let mut holders = self.holders.lock();
        holders.retain(|_, entry| {
            entry.retain(|(t, _)| *t != txn);
            !entry.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_readers_share_a_row() {
        let lm = LockManager::new();
        lm.acquire_shared(1, 0, 10).unwrap();
        lm.acquire_shared(2, 0, 10).unwrap();
    }

    #[test]
    fn writer_conflicts_with_reader() {
        let lm = LockManager::new();
        lm.acquire_shared(1, 0, 10).unwrap();
        assert!(lm.acquire_exclusive(2, 0, 10).is_err());
    }

    #[test]
    fn sole_reader_upgrades_to_writer() {
        let lm = LockManager::new();
        lm.acquire_shared(1, 0, 10).unwrap();
        lm.acquire_exclusive(1, 0, 10).unwrap();
    }

    #[test]
    fn release_all_frees_every_row() {
        let lm = LockManager::new();
        lm.acquire_exclusive(1, 0, 10).unwrap();
        lm.release_all(1);
        lm.acquire_exclusive(2, 0, 10).unwrap();
    }

    #[test]
    fn table_intent_locks_never_conflict_with_each_other() {
        // Intent locks only signal "a lock exists somewhere below"; the
        // actual conflict happens at the row S/X level, not here.
        let lm = LockManager::new();
        lm.acquire_table_shared(1, 0).unwrap();
        lm.acquire_table_exclusive(2, 0).unwrap();
    }

    #[test]
    fn transaction_ids_are_minted_sequentially_and_uniquely() {
        let lm = LockManager::new();
        let ids: Vec<_> = (0..5).map(|_| lm.next_transaction_id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn distinct_rows_do_not_conflict() {
        let lm = LockManager::new();
        lm.acquire_exclusive(1, 0, 10).unwrap();
        lm.acquire_exclusive(2, 0, 11).unwrap();
    }
}
