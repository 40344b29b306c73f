//! End-to-end scenarios exercising `Database`/`Table`/`Transaction`/
//! `TransactionWorker` together, the way the external Python driver would.

use std::fs;

use lstore_engine::database::Database;
use lstore_engine::transaction::Transaction;
use lstore_engine::worker::TransactionWorker;

fn scratch_db(name: &str) -> Database {
    let directory = format!("./target/test-scratch-engine-{name}");
    let _ = fs::remove_dir_all(&directory);
    let mut db = Database::new();
    db.open(directory).unwrap();
    db
}

#[test]
fn insert_update_select_round_trip_through_the_database() {
    let mut db = scratch_db("round-trip");
    db.create_table("grades".to_string(), 4, 0).unwrap();
    let table = db.table("grades").unwrap();

    table.insert(vec![1, 90, 85, 95]).unwrap();
    table.update(1, vec![None, Some(91), None, None]).unwrap();

    let rows = table.select(1, 0, &[0, 1, 2, 3]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns, vec![91, 85, 95]);
}

#[test]
fn transaction_commits_every_query_atomically() {
    let mut db = scratch_db("txn-commit");
    db.create_table("accounts".to_string(), 2, 0).unwrap();

    let mut txn = Transaction::new();
    txn.add_insert("accounts".to_string(), vec![1, 100]);
    txn.add_insert("accounts".to_string(), vec![2, 200]);
    txn.add_update("accounts".to_string(), 1, vec![None, Some(150)]);

    let mut worker = TransactionWorker::new();
    worker.add_transaction(txn);
    worker.run(&db).unwrap();
    assert_eq!(worker.join().unwrap(), 1);

    let table = db.table("accounts").unwrap();
    assert_eq!(table.select(1, 0, &[0, 1]).unwrap()[0].columns, vec![150]);
    assert_eq!(table.select(2, 0, &[0, 1]).unwrap()[0].columns, vec![200]);
}

#[test]
fn transaction_rolls_back_every_prior_query_when_a_later_one_fails() {
    let mut db = scratch_db("txn-rollback");
    db.create_table("accounts".to_string(), 2, 0).unwrap();

    // Seed a row with primary key 5, then have the transaction try to
    // insert it again after a successful first insert; the duplicate-key
    // failure should undo the first insert rather than leave it applied.
    let table = db.table("accounts").unwrap();
    table.insert(vec![5, 500]).unwrap();

    let mut txn = Transaction::new();
    txn.add_insert("accounts".to_string(), vec![9, 900]);
    txn.add_insert("accounts".to_string(), vec![5, 999]); // duplicate key, must fail

    let mut worker = TransactionWorker::new();
    worker.add_transaction(txn);
    worker.run(&db).unwrap();
    assert_eq!(worker.join().unwrap(), 0);

    // The pre-existing row survives; the transaction's own insert of 9 is
    // undone.
    assert_eq!(table.select(5, 0, &[0, 1]).unwrap()[0].columns, vec![500]);
    assert!(table.select(9, 0, &[0, 1]).unwrap().is_empty());
}

#[test]
fn transaction_worker_counts_mixed_commits_and_aborts() {
    let mut db = scratch_db("txn-mixed");
    db.create_table("widgets".to_string(), 2, 0).unwrap();
    db.table("widgets").unwrap().insert(vec![1, 10]).unwrap();

    let mut committing = Transaction::new();
    committing.add_update("widgets".to_string(), 1, vec![None, Some(20)]);

    let mut aborting = Transaction::new();
    aborting.add_update("widgets".to_string(), 404, vec![None, Some(1)]); // no such key, update errors

    let mut worker = TransactionWorker::new();
    worker.add_transaction(committing);
    worker.add_transaction(aborting);
    worker.run(&db).unwrap();

    // The update to a missing key fails outright, so only the first
    // transaction commits; this exercises the worker counting commits and
    // aborts independently rather than all-or-nothing across the batch.
    assert_eq!(worker.join().unwrap(), 1);
    assert_eq!(db.table("widgets").unwrap().select(1, 0, &[0, 1]).unwrap()[0].columns, vec![20]);
}

#[test]
fn concurrent_update_under_hierarchical_locks_aborts_the_loser() {
    let mut db = scratch_db("concurrent-lock");
    db.create_table("accounts".to_string(), 2, 0).unwrap();
    db.table("accounts").unwrap().insert(vec![100, 40]).unwrap();

    let lock_manager = db.lock_manager();
    let table_id = db.table_id("accounts").unwrap();

    // Simulate transaction A already mid-flight, holding the row's
    // exclusive lock the way its own lock phase would before transaction B
    // starts concurrently.
    let txn_a = lock_manager.next_transaction_id();
    lock_manager.acquire_exclusive(txn_a, table_id, 100).unwrap();

    let mut txn_b = Transaction::new();
    txn_b.add_update("accounts".to_string(), 100, vec![None, Some(60)]);
    let txn_b_id = lock_manager.next_transaction_id();
    let committed_b = txn_b.run(&db, &lock_manager, txn_b_id).unwrap();
    assert!(!committed_b, "B must abort: A already holds the row exclusively");

    // A finishes its own update and commits, releasing the lock it was
    // holding as part of the same run.
    lock_manager.release_all(txn_a);
    let mut txn_a_finish = Transaction::new();
    txn_a_finish.add_update("accounts".to_string(), 100, vec![None, Some(50)]);
    let txn_a_finish_id = lock_manager.next_transaction_id();
    assert!(txn_a_finish.run(&db, &lock_manager, txn_a_finish_id).unwrap());

    // Exactly one of the two concurrent updates is reflected; B's is not.
    let table = db.table("accounts").unwrap();
    assert_eq!(table.select(100, 0, &[0, 1]).unwrap()[0].columns, vec![50]);
}

#[test]
fn dropping_a_table_removes_it_from_the_database() {
    let mut db = scratch_db("drop-table");
    db.create_table("temp".to_string(), 2, 0).unwrap();
    assert!(db.table("temp").is_some());

    db.drop_table("temp".to_string()).unwrap();
    assert!(db.table("temp").is_none());
}
