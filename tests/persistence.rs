//! Verifies that closing and reopening a database preserves its tables,
//! their rows, and their secondary indices.

use std::fs;

use lstore_engine::database::Database;

fn scratch_dir(name: &str) -> String {
    let directory = format!("./target/test-scratch-persistence-{name}");
    let _ = fs::remove_dir_all(&directory);
    directory
}

#[test]
fn reopening_a_database_restores_every_table_and_its_rows() {
    let directory = scratch_dir("reopen");

    {
        let mut db = Database::new();
        db.open(directory.clone()).unwrap();
        db.create_table("students".to_string(), 3, 0).unwrap();
        db.create_table("courses".to_string(), 2, 0).unwrap();

        let students = db.table("students").unwrap();
        students.insert(vec![1, 90, 3]).unwrap();
        students.insert(vec![2, 75, 4]).unwrap();
        students.create_index(1).unwrap();

        db.table("courses").unwrap().insert(vec![100, 4]).unwrap();

        db.close().unwrap();
    }

    let mut reopened = Database::new();
    reopened.open(directory).unwrap();

    let students = reopened.table("students").unwrap();
    assert_eq!(students.select(1, 0, &[0, 1, 2]).unwrap()[0].columns, vec![90, 3]);
    assert_eq!(students.select(2, 0, &[0, 1, 2]).unwrap()[0].columns, vec![75, 4]);
    // The secondary index on column 1 should still answer a non-key lookup
    // without falling back to a full scan.
    assert_eq!(students.select(90, 1, &[0]).unwrap()[0].columns, vec![1]);

    let courses = reopened.table("courses").unwrap();
    assert_eq!(courses.select(100, 0, &[0, 1]).unwrap()[0].columns, vec![100, 4]);
}

#[test]
fn updates_and_deletes_survive_a_reopen() {
    let directory = scratch_dir("survive-mutations");

    {
        let mut db = Database::new();
        db.open(directory.clone()).unwrap();
        db.create_table("accounts".to_string(), 2, 0).unwrap();
        let accounts = db.table("accounts").unwrap();
        accounts.insert(vec![1, 100]).unwrap();
        accounts.insert(vec![2, 200]).unwrap();
        accounts.update(1, vec![None, Some(150)]).unwrap();
        accounts.delete(2).unwrap();
        db.close().unwrap();
    }

    let mut reopened = Database::new();
    reopened.open(directory).unwrap();
    let accounts = reopened.table("accounts").unwrap();

    assert_eq!(accounts.select(1, 0, &[0, 1]).unwrap()[0].columns, vec![150]);
    assert!(accounts.select(2, 0, &[0, 1]).unwrap().is_empty());
}
