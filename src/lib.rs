//! `lstore_engine`: a two-tier columnar storage engine (base pages plus an
//! append-only tail chain, periodically merged), embedded in Python via
//! `pyo3` the way the teacher embeds its own engine.

mod bufferpool;
mod config;
pub mod database;
mod error;
mod index;
mod lock_manager;
mod page;
mod page_range;
pub mod query;
pub mod table;
pub mod transaction;
mod types;
pub mod worker;

use pyo3::prelude::*;

/// The single Python module exposed by this crate. Every storage-layer
/// pyclass lives in one flat namespace, mirroring the external driver's
/// expectations in `spec.md` §1 ("the thin CLI/driver... imports the
/// engine as one module").
#[pymodule]
fn lstore_engine(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<database::Database>()?;
    m.add_class::<table::Table>()?;
    m.add_class::<table::PyRecord>()?;
    m.add_class::<query::Query>()?;
    m.add_class::<transaction::Transaction>()?;
    m.add_class::<worker::TransactionWorker>()?;
    Ok(())
}
