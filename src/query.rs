//! Single-table query facade, per `spec.md` §5 and the original Python
//! driver's `lstore/query.py`.
//!
//! A thin wrapper around a `Table` handle: every method here is a direct
//! pass-through to the matching `Table` operation, plus `increment`, which
//! the teacher never had a Rust equivalent for (only `table.rs`'s own
//! pyo3 methods) but the original driver exposes as read-modify-write on
//! top of `select`/`update`.

use pyo3::prelude::*;

use crate::error::StorageError;
use crate::table::{PyRecord, Table};

#[pyclass(unsendable)]
pub struct Query {
    table: Py<Table>,
}

#[pymethods]
impl Query {
    #[new]
    pub fn new(table: Py<Table>) -> Self {
        Query { table }
    }

    #[pyo3(name = "insert")]
    pub fn py_insert(&self, py: Python<'_>, columns: Vec<i64>) -> PyResult<i64> {
        let table = self.table.borrow(py);
        table.insert(columns).map_err(Into::into)
    }

    #[pyo3(name = "update")]
    pub fn py_update(&self, py: Python<'_>, primary_key: i64, columns: Vec<Option<i64>>) -> PyResult<()> {
        let table = self.table.borrow(py);
        table.update(primary_key, columns).map_err(Into::into)
    }

    #[pyo3(name = "delete")]
    pub fn py_delete(&self, py: Python<'_>, primary_key: i64) -> PyResult<()> {
        let table = self.table.borrow(py);
        table.delete(primary_key).map_err(Into::into)
    }

    #[pyo3(name = "select")]
    pub fn py_select(&self, py: Python<'_>, search_key: i64, search_key_index: usize, projected_columns: Vec<usize>) -> PyResult<Vec<PyRecord>> {
        let table = self.table.borrow(py);
        table.select(search_key, search_key_index, &projected_columns).map_err(Into::into)
    }

    #[pyo3(name = "select_version")]
    pub fn py_select_version(
        &self,
        py: Python<'_>,
        search_key: i64,
        search_key_index: usize,
        projected_columns: Vec<usize>,
        relative_version: usize,
    ) -> PyResult<Vec<PyRecord>> {
        let table = self.table.borrow(py);
        table
            .select_version(search_key, search_key_index, &projected_columns, relative_version)
            .map_err(Into::into)
    }

    #[pyo3(name = "sum")]
    pub fn py_sum(&self, py: Python<'_>, start_range: i64, end_range: i64, column_index: usize) -> PyResult<i64> {
        let table = self.table.borrow(py);
        table.sum(start_range, end_range, column_index).map_err(Into::into)
    }

    #[pyo3(name = "sum_version")]
    pub fn py_sum_version(
        &self,
        py: Python<'_>,
        start_range: i64,
        end_range: i64,
        column_index: usize,
        relative_version: usize,
    ) -> PyResult<i64> {
        let table = self.table.borrow(py);
        table.sum_version(start_range, end_range, column_index, relative_version).map_err(Into::into)
    }

    /// Reads a record's current value for `column`, adds one, and writes
    /// it back. Returns `false` (rather than erroring) when no record
    /// matches `key`, matching the original driver's "nothing to do" case.
    #[pyo3(name = "increment")]
    pub fn py_increment(&self, py: Python<'_>, key: i64, column: usize) -> PyResult<bool> {
        let table = self.table.borrow(py);
        let key_column = table.key_column();
        let projected: Vec<usize> = (0..table.num_columns()).collect();

        let records = table.select(key, key_column, &projected)?;
        let Some(record) = records.into_iter().next() else {
            return Ok(false);
        };

        let current = *record.columns.get(column).ok_or_else(|| {
            StorageError::invariant(format!("column {column} out of range for a {}-column table", table.num_columns()))
        })?;

        let mut updated = vec![None; table.num_columns()];
        updated[column] = Some(current + 1);
        table.update(key, updated)?;
        Ok(true)
    }
}
