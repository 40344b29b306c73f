//! Random insert/update/select workload against a scratch table, used to
//! eyeball throughput and catch obvious regressions by hand. Not part of
//! the test suite; run with `cargo run --release --bin lstore_profile`.

use std::collections::HashSet;
use std::fs;

use rand::prelude::*;

use lstore_engine::table::Table;

const NUM_COLUMNS: usize = 8;
const KEY_COLUMN: usize = 0;
const OPERATIONS: u32 = 250_000;

fn main() {
    let directory = "./lstore_profile_scratch";
    let _ = fs::remove_dir_all(directory);

    let table = Table::open(directory, "prof_tbl", NUM_COLUMNS, KEY_COLUMN).expect("open scratch table");

    let mut primary_keys: HashSet<i64> = HashSet::new();
    let mut rng = rand::thread_rng();

    for i in 0..OPERATIONS {
        match rng.gen_range(0..3) {
            0 => {
                let row: Vec<i64> = (0..NUM_COLUMNS).map(|_| rng.gen_range(1..=100)).collect();
                if table.insert(row.clone()).is_ok() {
                    primary_keys.insert(row[KEY_COLUMN]);
                }
            }
            1 => {
                let key: Vec<i64> = primary_keys.iter().copied().collect();
                if let Some(&key) = key.choose(&mut rng) {
                    let row: Vec<Option<i64>> = (0..NUM_COLUMNS)
                        .map(|col| if col == KEY_COLUMN { None } else { Some(rng.gen_range(1..=100)) })
                        .collect();
                    let _ = table.update(key, row);
                }
            }
            2 => {
                let key: Vec<i64> = primary_keys.iter().copied().collect();
                if let Some(&key) = key.choose(&mut rng) {
                    let projected: Vec<usize> = (0..NUM_COLUMNS).collect();
                    let _ = table.select(key, KEY_COLUMN, &projected);
                }
            }
            _ => unreachable!(),
        }

        if i % 10_000 == 0 {
            println!("{i}/{OPERATIONS}");
        }
    }

    table.persist().expect("persist scratch table");
    println!("done, {} distinct keys inserted", primary_keys.len());
}
