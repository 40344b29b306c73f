//! Secondary and primary indices over a table's user columns, per
//! `spec.md` §4.4.
//!
//! The primary key column is always indexed and additionally cached in
//! `value_mapper` for O(1) exact-match lookups, since every insert and
//! point update needs a duplicate/membership check against it. Other
//! columns are indexed lazily via `create_index` and may be dropped again,
//! except the primary key column, which can never lose its index.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::types::Rid;

struct ColumnIndex {
    tree: Mutex<Option<BTreeMap<i64, HashSet<Rid>>>>,
}

pub struct Index {
    key_column: usize,
    columns: Vec<ColumnIndex>,
    /// Fast path for the primary key: value -> RID. Kept in lockstep with
    /// `columns[key_column]`'s tree, which still serves range scans on the
    /// primary key.
    value_mapper: Mutex<HashMap<i64, Rid>>,
}

impl Index {
    pub fn new(num_columns: usize, key_column: usize) -> Self {
        let columns = (0..num_columns)
            .map(|c| ColumnIndex {
                tree: Mutex::new(if c == key_column { Some(BTreeMap::new()) } else { None }),
            })
            .collect();

        Index {
            key_column,
            columns,
            value_mapper: Mutex::new(HashMap::new()),
        }
    }

    pub fn key_column(&self) -> usize {
        self.key_column
    }

    pub fn is_indexed(&self, column: usize) -> bool {
        self.columns[column].tree.lock().is_some()
    }

    pub fn create_index(&self, column: usize) -> StorageResult<()> {
        let mut tree = self.columns[column].tree.lock();
        if tree.is_none() {
            *tree = Some(BTreeMap::new());
        }
        Ok(())
    }

    pub fn drop_index(&self, column: usize) -> StorageResult<()> {
        if column == self.key_column {
            return Err(StorageError::invariant("cannot drop the index over the primary key column"));
        }
        *self.columns[column].tree.lock() = None;
        Ok(())
    }

    /// O(1) primary-key lookup, bypassing the B-tree.
    pub fn primary_lookup(&self, value: i64) -> Option<Rid> {
        self.value_mapper.lock().get(&value).copied()
    }

    pub fn locate(&self, column: usize, value: i64) -> Vec<Rid> {
        match self.columns[column].tree.lock().as_ref() {
            Some(tree) => tree.get(&value).map(|set| set.iter().copied().collect()).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub fn locate_range(&self, column: usize, begin: i64, end: i64) -> Vec<Rid> {
        match self.columns[column].tree.lock().as_ref() {
            Some(tree) => tree
                .range(begin..=end)
                .flat_map(|(_, set)| set.iter().copied())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Register a brand-new record's projected column values. Rejects a
    /// duplicate primary key.
    pub fn insert_in_all_indices(&self, projected_columns: &[i64], rid: Rid) -> StorageResult<()> {
        let key_value = projected_columns[self.key_column];
        {
            let mut mapper = self.value_mapper.lock();
            if mapper.contains_key(&key_value) {
                return Err(StorageError::Duplicate(key_value));
            }
            mapper.insert(key_value, rid);
        }

        for (column, value) in projected_columns.iter().enumerate() {
            if let Some(tree) = self.columns[column].tree.lock().as_mut() {
                tree.entry(*value).or_default().insert(rid);
            }
        }
        Ok(())
    }

    pub fn delete_from_all_indices(&self, projected_columns: &[i64], rid: Rid) {
        self.value_mapper.lock().remove(&projected_columns[self.key_column]);

        for (column, value) in projected_columns.iter().enumerate() {
            if let Some(tree) = self.columns[column].tree.lock().as_mut() {
                if let Some(set) = tree.get_mut(value) {
                    set.remove(&rid);
                    if set.is_empty() {
                        tree.remove(value);
                    }
                }
            }
        }
    }

    /// Re-bucket every column whose value actually changed. `new_columns[i]
    /// == None` means column `i` was not touched by the update.
    pub fn update_all_indices(&self, old_columns: &[i64], new_columns: &[Option<i64>], rid: Rid) {
        for (column, new_value) in new_columns.iter().enumerate() {
            let Some(new_value) = new_value else { continue };
            if *new_value == old_columns[column] {
                continue;
            }

            if column == self.key_column {
                let mut mapper = self.value_mapper.lock();
                mapper.remove(&old_columns[column]);
                mapper.insert(*new_value, rid);
            }

            if let Some(tree) = self.columns[column].tree.lock().as_mut() {
                if let Some(set) = tree.get_mut(&old_columns[column]) {
                    set.remove(&rid);
                    if set.is_empty() {
                        tree.remove(&old_columns[column]);
                    }
                }
                tree.entry(*new_value).or_default().insert(rid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_duplicate_is_rejected() {
        let index = Index::new(2, 0);
        index.insert_in_all_indices(&[1, 100], 0).unwrap();
        let err = index.insert_in_all_indices(&[1, 200], 1).unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(1)));
    }

    #[test]
    fn secondary_index_is_opt_in() {
        let index = Index::new(2, 0);
        index.insert_in_all_indices(&[1, 100], 0).unwrap();
        assert!(index.locate(1, 100).is_empty());

        index.create_index(1).unwrap();
        index.insert_in_all_indices(&[2, 100], 1).unwrap();
        let mut found = index.locate(1, 100);
        found.sort();
        assert_eq!(found, vec![1]);
    }

    #[test]
    fn drop_index_on_primary_key_is_forbidden() {
        let index = Index::new(2, 0);
        assert!(index.drop_index(0).is_err());
    }

    #[test]
    fn update_moves_bucket_membership() {
        let index = Index::new(2, 0);
        index.create_index(1).unwrap();
        index.insert_in_all_indices(&[1, 100], 0).unwrap();

        index.update_all_indices(&[1, 100], &[None, Some(200)], 0);
        assert!(index.locate(1, 100).is_empty());
        assert_eq!(index.locate(1, 200), vec![0]);
    }

    #[test]
    fn delete_clears_primary_key_and_buckets() {
        let index = Index::new(2, 0);
        index.insert_in_all_indices(&[1, 100], 0).unwrap();
        index.delete_from_all_indices(&[1, 100], 0);
        assert_eq!(index.primary_lookup(1), None);
        assert!(index.locate_range(0, 0, 10).is_empty());
    }
}
