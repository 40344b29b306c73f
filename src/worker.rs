//! Runs a batch of transactions serially against a database, per
//! `spec.md` §9 and the teacher's `xact_worker.rs` `TransactionWorker`.
//!
//! The teacher's sketch spawned a background thread and only ever printed
//! debug output per transaction, never actually recording which committed.
//! This version keeps the same pyclass shape (`add_transaction`, `run`,
//! `join`) but runs synchronously against the real lock/execute/commit
//! path in `transaction.rs`, since `Database` and `Table` are `unsendable`
//! pyclasses and can't be handed across the thread boundary the teacher's
//! version used.

use pyo3::prelude::*;

use crate::database::Database;
use crate::transaction::Transaction;

#[pyclass(unsendable)]
pub struct TransactionWorker {
    transactions: Vec<Transaction>,
    committed: u32,
}

impl Default for TransactionWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[pymethods]
impl TransactionWorker {
    #[new]
    pub fn new() -> Self {
        TransactionWorker { transactions: Vec::new(), committed: 0 }
    }

    pub fn add_transaction(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    /// Runs every queued transaction against `db`, in the order they were
    /// added. No-wait locking means a conflicting transaction aborts and
    /// is counted as not committed rather than retried or requeued.
    pub fn run(&mut self, db: &Database) -> PyResult<()> {
        let lock_manager = db.lock_manager();
        let mut committed = 0;

        for transaction in &self.transactions {
            let txn_id = lock_manager.next_transaction_id();
            if transaction.run(db, &lock_manager, txn_id)? {
                committed += 1;
            }
        }

        self.committed = committed;
        Ok(())
    }

    pub fn join(&self) -> PyResult<u32> {
        Ok(self.committed)
    }
}
