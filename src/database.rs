//! Database handle: directory management and table lifecycle, per
//! `spec.md` §4.6.
//!
//! Unlike the teacher's version (a single buffer pool shared by every
//! table), each table here owns its buffer pool; the resource actually
//! shared database-wide is the `LockManager`, since transactions spanning
//! several tables need one global view of who holds what.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::info;
use pyo3::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::lock_manager::LockManager;
use crate::table::Table;

const CATALOG_FILE: &str = "tables.json";

#[derive(Serialize, Deserialize)]
struct TableCatalogEntry {
    name: String,
    num_columns: usize,
    key_column: usize,
    table_id: u64,
}

#[pyclass(unsendable)]
pub struct Database {
    directory: Option<PathBuf>,
    tables: HashMap<String, Arc<Table>>,
    table_ids: HashMap<String, u64>,
    next_table_id: AtomicU64,
    lock_manager: Arc<LockManager>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

#[pymethods]
impl Database {
    #[new]
    pub fn new() -> Self {
        Database {
            directory: None,
            tables: HashMap::new(),
            table_ids: HashMap::new(),
            next_table_id: AtomicU64::new(0),
            lock_manager: Arc::new(LockManager::new()),
        }
    }

    /// Point the database at `path`, loading its catalog if one exists.
    pub fn open(&mut self, path: String) -> PyResult<()> {
        let directory = PathBuf::from(path);
        fs::create_dir_all(&directory).map_err(|e| StorageError::SerializationFault {
            path: directory.display().to_string(),
            reason: e.to_string(),
        })?;

        let catalog_path = directory.join(CATALOG_FILE);
        if catalog_path.exists() {
            let bytes = fs::read(&catalog_path).map_err(|e| StorageError::SerializationFault {
                path: catalog_path.display().to_string(),
                reason: e.to_string(),
            })?;
            let entries: Vec<TableCatalogEntry> =
                serde_json::from_slice(&bytes).map_err(|e| StorageError::SerializationFault {
                    path: catalog_path.display().to_string(),
                    reason: e.to_string(),
                })?;

            let mut highest_id = 0;
            for entry in entries {
                let table = Table::open(directory.clone(), entry.name.clone(), entry.num_columns, entry.key_column)?;
                self.tables.insert(entry.name.clone(), Arc::new(table));
                self.table_ids.insert(entry.name, entry.table_id);
                highest_id = highest_id.max(entry.table_id + 1);
            }
            self.next_table_id.store(highest_id, Ordering::Release);
        }

        self.directory = Some(directory);
        Ok(())
    }

    /// Persist every open table and the catalog describing them.
    pub fn close(&self) -> PyResult<()> {
        let Some(directory) = &self.directory else {
            return Ok(());
        };

        let mut entries = Vec::new();
        for (name, table) in &self.tables {
            table.persist()?;
            entries.push(TableCatalogEntry {
                name: name.clone(),
                num_columns: table.num_columns(),
                key_column: table.key_column(),
                table_id: self.table_ids[name],
            });
        }

        let bytes = serde_json::to_vec_pretty(&entries).map_err(|e| StorageError::SerializationFault {
            path: CATALOG_FILE.to_string(),
            reason: e.to_string(),
        })?;
        fs::write(directory.join(CATALOG_FILE), bytes).map_err(|e| StorageError::SerializationFault {
            path: directory.join(CATALOG_FILE).display().to_string(),
            reason: e.to_string(),
        })?;

        info!("closed database at {}", directory.display());
        Ok(())
    }

    pub fn create_table(&mut self, name: String, num_columns: usize, key_index: usize) -> PyResult<()> {
        let directory = self
            .directory
            .clone()
            .ok_or_else(|| StorageError::invariant("create_table called before open"))?;

        if self.tables.contains_key(&name) {
            return Err(StorageError::invariant(format!("table {name} already exists")).into());
        }

        let table = Table::open(directory, name.clone(), num_columns, key_index)?;
        let table_id = self.next_table_id.fetch_add(1, Ordering::AcqRel);
        self.tables.insert(name.clone(), Arc::new(table));
        self.table_ids.insert(name, table_id);
        Ok(())
    }

    pub fn drop_table(&mut self, name: String) -> PyResult<()> {
        self.tables
            .remove(&name)
            .ok_or_else(|| StorageError::not_found(format!("table {name}")))?;
        self.table_ids.remove(&name);

        if let Some(directory) = &self.directory {
            let _ = fs::remove_dir_all(directory.join(&name));
        }
        Ok(())
    }
}

impl Database {
    /// Non-pyo3 accessor used by `query`/`transaction`, which need the
    /// underlying `Arc<Table>` rather than a by-value copy.
    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.get(name).cloned()
    }

    pub fn table_id(&self, name: &str) -> Option<u64> {
        self.table_ids.get(name).copied()
    }

    pub fn lock_manager(&self) -> Arc<LockManager> {
        self.lock_manager.clone()
    }
}
