//! The table: RID allocation, record operations, and the background merge
//! and deallocation workers, per `spec.md` §4.5.
//!
//! A table owns its buffer pool exclusively (unlike the lock manager, which
//! is shared database-wide) and its own set of page ranges. Base RIDs are
//! the table's externally visible record identity; everything about tail
//! (logical) RIDs stays inside `page_range::PageRange`.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{info, warn};
use parking_lot::Mutex;
use pyo3::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bufferpool::BufferPool;
use crate::config::{
    physical_columns, HIDDEN_INDIRECTION, HIDDEN_RID, HIDDEN_SCHEMA_ENCODING, HIDDEN_TIMESTAMP,
    HIDDEN_UPDATE_TIMESTAMP, MAX_RECORD_PER_PAGE_RANGE, MAX_TAIL_PAGES_BEFORE_MERGING, PAGE_CAPACITY,
    RECORD_DELETION_FLAG, RECORD_NONE_VALUE,
};
use crate::error::{StorageError, StorageResult};
use crate::index::Index;
use crate::page_range::PageRange;
use crate::types::Rid;

const HEADER_FILE: &str = "table.hdr";

/// A single projected record, returned by `select`/`select_version`.
#[pyclass]
#[derive(Clone, Debug)]
pub struct PyRecord {
    #[pyo3(get)]
    pub rid: i64,
    #[pyo3(get)]
    pub key: i64,
    #[pyo3(get)]
    pub columns: Vec<i64>,
}

#[pymethods]
impl PyRecord {
    #[new]
    pub fn new(rid: Rid, key: i64, columns: Vec<i64>) -> Self {
        PyRecord { rid, key, columns }
    }
}

#[derive(Serialize, Deserialize)]
struct TableHeader {
    name: String,
    num_columns: usize,
    key_column: usize,
    num_ranges: usize,
    current_range: usize,
    offset_in_range: usize,
    indexed_columns: Vec<usize>,
}

enum MergeMessage {
    Merge { range_idx: usize, filled: usize },
    Terminate,
}

enum DeallocMessage {
    Reclaim { range_idx: usize, local_offset: i64, head: i64 },
    Terminate,
}

struct BaseAllocator {
    current_range: usize,
    offset_in_range: usize,
}

#[pyclass(unsendable)]
pub struct Table {
    directory: PathBuf,
    name: String,
    num_columns: usize,
    key_column: usize,
    pool: Arc<BufferPool>,
    page_ranges: Mutex<Vec<Arc<PageRange>>>,
    allocator: Mutex<BaseAllocator>,
    recycled_base_rids: Mutex<VecDeque<Rid>>,
    index: Arc<Index>,
    clock: AtomicI64,
    merge_sender: Option<Sender<MergeMessage>>,
    merge_handle: Option<JoinHandle<()>>,
    dealloc_sender: Option<Sender<DeallocMessage>>,
    dealloc_handle: Option<JoinHandle<()>>,
}

impl Drop for Table {
    fn drop(&mut self) {
        if let Some(sender) = self.merge_sender.take() {
            let _ = sender.send(MergeMessage::Terminate);
        }
        if let Some(handle) = self.merge_handle.take() {
            let _ = handle.join();
        }
        if let Some(sender) = self.dealloc_sender.take() {
            let _ = sender.send(DeallocMessage::Terminate);
        }
        if let Some(handle) = self.dealloc_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Table {
    /// Open an existing table under `directory/name`, or create a fresh one.
    pub fn open(directory: impl Into<PathBuf>, name: impl Into<String>, num_columns: usize, key_column: usize) -> StorageResult<Table> {
        let directory = directory.into();
        let name = name.into();
        let table_dir = directory.join(&name);
        let header_path = table_dir.join(HEADER_FILE);

        let pool = Arc::new(BufferPool::new(physical_columns(num_columns)));
        pool.set_directory(&table_dir);

        let header: TableHeader = if header_path.exists() {
            let bytes = fs::read(&header_path).map_err(|e| StorageError::SerializationFault {
                path: header_path.display().to_string(),
                reason: e.to_string(),
            })?;
            serde_json::from_slice(&bytes).map_err(|e| StorageError::SerializationFault {
                path: header_path.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            TableHeader {
                name: name.clone(),
                num_columns,
                key_column,
                num_ranges: 1,
                current_range: 0,
                offset_in_range: 0,
                indexed_columns: Vec::new(),
            }
        };

        let page_ranges = Mutex::new(
            (0..header.num_ranges)
                .map(|r| Arc::new(PageRange::new(name.clone(), r, num_columns, pool.clone())))
                .collect::<Vec<_>>(),
        );

        let index = Arc::new(Index::new(num_columns, key_column));
        for column in &header.indexed_columns {
            index.create_index(*column)?;
        }

        let mut table = Table {
            directory,
            name,
            num_columns,
            key_column,
            pool,
            page_ranges,
            allocator: Mutex::new(BaseAllocator {
                current_range: header.current_range,
                offset_in_range: header.offset_in_range,
            }),
            recycled_base_rids: Mutex::new(VecDeque::new()),
            index,
            clock: AtomicI64::new(0),
            merge_sender: None,
            merge_handle: None,
            dealloc_sender: None,
            dealloc_handle: None,
        };

        table.rebuild_indices()?;
        table.start_workers();
        Ok(table)
    }

    fn table_dir(&self) -> PathBuf {
        self.directory.join(&self.name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn key_column(&self) -> usize {
        self.key_column
    }

    fn next_timestamp(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::AcqRel)
    }

    fn range_for(&self, range_idx: usize) -> Arc<PageRange> {
        self.page_ranges.lock()[range_idx].clone()
    }

    /// Pure arithmetic: `spec.md` §3's location formula for a base RID.
    fn base_location(&self, rid: Rid) -> (usize, usize, i64, usize) {
        let t = MAX_RECORD_PER_PAGE_RANGE as Rid;
        let range_idx = (rid / t) as usize;
        let local_offset = rid % t;
        let page_idx = local_offset as usize / PAGE_CAPACITY;
        let slot = local_offset as usize % PAGE_CAPACITY;
        (range_idx, page_idx, local_offset, slot)
    }

    fn assign_rid_to_record(&self) -> StorageResult<Rid> {
        if let Some(rid) = self.recycled_base_rids.lock().pop_front() {
            return Ok(rid);
        }

        let t = MAX_RECORD_PER_PAGE_RANGE;
        let mut allocator = self.allocator.lock();
        if allocator.offset_in_range == t {
            allocator.current_range += 1;
            allocator.offset_in_range = 0;

            let mut ranges = self.page_ranges.lock();
            if ranges.len() <= allocator.current_range {
                ranges.push(Arc::new(PageRange::new(
                    self.name.clone(),
                    allocator.current_range,
                    self.num_columns,
                    self.pool.clone(),
                )));
            }
        }

        let rid = (allocator.current_range as Rid) * (t as Rid) + allocator.offset_in_range as Rid;
        allocator.offset_in_range += 1;
        Ok(rid)
    }

    /// Walk a record's chain (starting from `head`, range-local) to read
    /// `column`'s value as of the most recent version that touched it,
    /// falling back to the base image.
    fn resolve_column(&self, range: &PageRange, head: i64, base_row: &[i64], column: usize) -> StorageResult<i64> {
        let t = MAX_RECORD_PER_PAGE_RANGE as Rid;
        let mut cur = head;
        while cur >= t {
            if let Some(value) = range.read_tail_record_column(cur, column)? {
                return Ok(value);
            }
            cur = range
                .read_tail_record_column(cur, self.num_columns + HIDDEN_INDIRECTION)?
                .ok_or_else(|| StorageError::invariant("tail record missing INDIRECTION column"))?;
        }
        Ok(base_row[column])
    }

    /// Step `head` back `versions` distinct tail records (0 = no-op, i.e.
    /// the latest version), stopping early at the base terminal.
    fn rewind(&self, range: &PageRange, mut head: i64, versions: usize) -> StorageResult<i64> {
        let t = MAX_RECORD_PER_PAGE_RANGE as Rid;
        for _ in 0..versions {
            if head < t {
                break;
            }
            head = range
                .read_tail_record_column(head, self.num_columns + HIDDEN_INDIRECTION)?
                .ok_or_else(|| StorageError::invariant("tail record missing INDIRECTION column"))?;
        }
        Ok(head)
    }

    fn read_full_row(&self, range: &PageRange, head: i64, base_row: &[i64]) -> StorageResult<Vec<i64>> {
        (0..self.num_columns)
            .map(|c| self.resolve_column(range, head, base_row, c))
            .collect()
    }

    fn is_deleted(&self, base_row: &[i64]) -> bool {
        base_row[self.num_columns + HIDDEN_RID] == RECORD_DELETION_FLAG
    }

    fn rebuild_indices(&mut self) -> StorageResult<()> {
        let allocator = self.allocator.lock();
        let t = MAX_RECORD_PER_PAGE_RANGE as Rid;
        let highest = allocator.current_range as Rid * t + allocator.offset_in_range as Rid;
        drop(allocator);

        for rid in 0..highest {
            let (range_idx, _, local_offset, _) = self.base_location(rid);
            let range = self.range_for(range_idx);
            let base_row = range.copy_base_record(local_offset)?;
            if self.is_deleted(&base_row) {
                continue;
            }
            let head = base_row[self.num_columns + HIDDEN_INDIRECTION];
            let row = self.read_full_row(&range, head, &base_row)?;
            self.index.insert_in_all_indices(&row, rid)?;
        }
        Ok(())
    }

    pub fn insert(&self, user_columns: Vec<i64>) -> StorageResult<Rid> {
        if user_columns.len() != self.num_columns {
            return Err(StorageError::invariant(format!(
                "insert: expected {} columns, got {}",
                self.num_columns,
                user_columns.len()
            )));
        }
        if self.index.primary_lookup(user_columns[self.key_column]).is_some() {
            return Err(StorageError::Duplicate(user_columns[self.key_column]));
        }

        let rid = self.assign_rid_to_record()?;
        let (range_idx, _, _, _) = self.base_location(rid);
        let range = self.range_for(range_idx);

        let mut row = vec![0i64; physical_columns(self.num_columns)];
        row[..self.num_columns].copy_from_slice(&user_columns);
        row[self.num_columns + HIDDEN_RID] = rid;
        row[self.num_columns + HIDDEN_TIMESTAMP] = self.next_timestamp();
        row[self.num_columns + HIDDEN_SCHEMA_ENCODING] = 0;
        row[self.num_columns + HIDDEN_UPDATE_TIMESTAMP] = RECORD_NONE_VALUE;

        range.write_base_record(rid, &mut row)?;
        self.index.insert_in_all_indices(&user_columns, rid)?;
        Ok(rid)
    }

    pub fn update(&self, search_key: i64, new_columns: Vec<Option<i64>>) -> StorageResult<()> {
        if new_columns.len() != self.num_columns {
            return Err(StorageError::invariant(format!(
                "update: expected {} columns, got {}",
                self.num_columns,
                new_columns.len()
            )));
        }

        let rid = self
            .index
            .primary_lookup(search_key)
            .ok_or_else(|| StorageError::not_found(format!("primary key {search_key}")))?;

        let (range_idx, _, local_offset, _) = self.base_location(rid);
        let range = self.range_for(range_idx);
        let base_row = range.copy_base_record(local_offset)?;
        if self.is_deleted(&base_row) {
            return Err(StorageError::not_found(format!("primary key {search_key}")));
        }
        let head = base_row[self.num_columns + HIDDEN_INDIRECTION];
        let old_row = self.read_full_row(&range, head, &base_row)?;

        let logical_rid = range.assign_logical_rid();
        let schema_encoding = new_columns
            .iter()
            .enumerate()
            .fold(0i64, |mask, (i, v)| if v.is_some() { mask | (1 << i) } else { mask });
        let timestamp = self.next_timestamp();

        range.write_tail_record(logical_rid, head, schema_encoding, timestamp, &new_columns)?;
        range.write_base_column(local_offset, self.num_columns + HIDDEN_INDIRECTION, logical_rid)?;

        self.index.update_all_indices(&old_row, &new_columns, rid);

        if range.tps() >= MAX_TAIL_PAGES_BEFORE_MERGING * PAGE_CAPACITY {
            self.queue_merge(range_idx);
        }
        Ok(())
    }

    pub fn delete(&self, primary_key: i64) -> StorageResult<()> {
        let rid = self
            .index
            .primary_lookup(primary_key)
            .ok_or_else(|| StorageError::not_found(format!("primary key {primary_key}")))?;

        let (range_idx, _, local_offset, _) = self.base_location(rid);
        let range = self.range_for(range_idx);
        let base_row = range.copy_base_record(local_offset)?;
        if self.is_deleted(&base_row) {
            return Err(StorageError::not_found(format!("primary key {primary_key}")));
        }
        let head = base_row[self.num_columns + HIDDEN_INDIRECTION];
        let old_row = self.read_full_row(&range, head, &base_row)?;

        self.index.delete_from_all_indices(&old_row, rid);
        range.write_base_column(local_offset, self.num_columns + HIDDEN_RID, RECORD_DELETION_FLAG)?;

        self.queue_reclaim(range_idx, local_offset, head);
        self.recycled_base_rids.lock().push_back(rid);
        Ok(())
    }

    pub fn select(&self, search_key: i64, search_key_index: usize, projected: &[usize]) -> StorageResult<Vec<PyRecord>> {
        let rids = self.candidates(search_key, search_key_index)?;
        rids.into_iter()
            .map(|rid| self.project(rid, projected, 0))
            .collect()
    }

    pub fn select_version(&self, search_key: i64, search_key_index: usize, projected: &[usize], relative_version: usize) -> StorageResult<Vec<PyRecord>> {
        let rids = self.candidates(search_key, search_key_index)?;
        rids.into_iter()
            .map(|rid| self.project(rid, projected, relative_version))
            .collect()
    }

    fn candidates(&self, search_key: i64, search_key_index: usize) -> StorageResult<Vec<Rid>> {
        if search_key_index == self.key_column {
            return Ok(self.index.primary_lookup(search_key).into_iter().collect());
        }
        if self.index.is_indexed(search_key_index) {
            return Ok(self.index.locate(search_key_index, search_key));
        }

        warn!("select on un-indexed column {search_key_index}: falling back to a full scan");
        let allocator = self.allocator.lock();
        let t = MAX_RECORD_PER_PAGE_RANGE as Rid;
        let highest = allocator.current_range as Rid * t + allocator.offset_in_range as Rid;
        drop(allocator);

        let mut matches = Vec::new();
        for rid in 0..highest {
            let (range_idx, _, local_offset, _) = self.base_location(rid);
            let range = self.range_for(range_idx);
            let base_row = range.copy_base_record(local_offset)?;
            if self.is_deleted(&base_row) {
                continue;
            }
            let head = base_row[self.num_columns + HIDDEN_INDIRECTION];
            let value = self.resolve_column(&range, head, &base_row, search_key_index)?;
            if value == search_key {
                matches.push(rid);
            }
        }
        Ok(matches)
    }

    fn project(&self, rid: Rid, projected: &[usize], relative_version: usize) -> StorageResult<PyRecord> {
        let (range_idx, _, local_offset, _) = self.base_location(rid);
        let range = self.range_for(range_idx);
        let base_row = range.copy_base_record(local_offset)?;
        if self.is_deleted(&base_row) {
            return Err(StorageError::missing_rid(rid));
        }
        let head = base_row[self.num_columns + HIDDEN_INDIRECTION];
        let as_of = self.rewind(&range, head, relative_version)?;

        let columns = projected
            .iter()
            .map(|&c| self.resolve_column(&range, as_of, &base_row, c))
            .collect::<StorageResult<Vec<_>>>()?;
        let key = self.resolve_column(&range, as_of, &base_row, self.key_column)?;
        Ok(PyRecord { rid, key, columns })
    }

    pub fn sum(&self, start_range: i64, end_range: i64, column_index: usize) -> StorageResult<i64> {
        self.sum_version(start_range, end_range, column_index, 0)
    }

    pub fn sum_version(&self, start_range: i64, end_range: i64, column_index: usize, relative_version: usize) -> StorageResult<i64> {
        let rids = self.index.locate_range(self.key_column, start_range, end_range);
        let mut total = 0i64;
        for rid in rids {
            let record = self.project(rid, &[column_index], relative_version)?;
            total += record.columns[0];
        }
        Ok(total)
    }

    pub fn create_index(&self, column: usize) -> StorageResult<()> {
        self.index.create_index(column)
    }

    pub fn drop_index(&self, column: usize) -> StorageResult<()> {
        self.index.drop_index(column)
    }

    pub fn persist(&self) -> StorageResult<()> {
        let table_dir = self.table_dir();
        fs::create_dir_all(&table_dir).map_err(|e| StorageError::SerializationFault {
            path: table_dir.display().to_string(),
            reason: e.to_string(),
        })?;

        self.pool.unload_all_frames()?;

        let allocator = self.allocator.lock();
        let header = TableHeader {
            name: self.name.clone(),
            num_columns: self.num_columns,
            key_column: self.key_column,
            num_ranges: self.page_ranges.lock().len(),
            current_range: allocator.current_range,
            offset_in_range: allocator.offset_in_range,
            indexed_columns: (0..self.num_columns).filter(|&c| self.index.is_indexed(c)).collect(),
        };
        drop(allocator);

        let header_path = table_dir.join(HEADER_FILE);
        let bytes = serde_json::to_vec_pretty(&header).map_err(|e| StorageError::SerializationFault {
            path: header_path.display().to_string(),
            reason: e.to_string(),
        })?;
        fs::write(&header_path, bytes).map_err(|e| StorageError::SerializationFault {
            path: header_path.display().to_string(),
            reason: e.to_string(),
        })?;

        info!("persisted table {} ({} ranges)", self.name, self.page_ranges.lock().len());
        Ok(())
    }

    fn queue_merge(&self, range_idx: usize) {
        if let Some(sender) = &self.merge_sender {
            let filled = {
                let allocator = self.allocator.lock();
                if allocator.current_range == range_idx {
                    allocator.offset_in_range
                } else {
                    MAX_RECORD_PER_PAGE_RANGE
                }
            };
            let _ = sender.send(MergeMessage::Merge { range_idx, filled });
        }
    }

    fn queue_reclaim(&self, range_idx: usize, local_offset: i64, head: i64) {
        if let Some(sender) = &self.dealloc_sender {
            let _ = sender.send(DeallocMessage::Reclaim { range_idx, local_offset, head });
        } else {
            self.reclaim_chain(range_idx, head);
            let _ = local_offset;
        }
    }

    fn reclaim_chain(&self, range_idx: usize, mut cur: Rid) {
        let t = MAX_RECORD_PER_PAGE_RANGE as Rid;
        let range = self.range_for(range_idx);
        while cur >= t {
            let next = range.read_tail_record_column(cur, self.num_columns + HIDDEN_INDIRECTION);
            range.recycle_logical_rid(cur);
            match next {
                Ok(Some(n)) => cur = n,
                _ => break,
            }
        }
    }

    fn start_workers(&mut self) {
        let (merge_tx, merge_rx) = mpsc::channel::<MergeMessage>();
        let (dealloc_tx, dealloc_rx) = mpsc::channel::<DeallocMessage>();

        let merge_state = WorkerState {
            page_ranges: self.page_ranges.lock().clone(),
            num_columns: self.num_columns,
        };
        let merge_name = self.name.clone();
        let merge_handle = thread::spawn(move || {
            for message in merge_rx {
                match message {
                    MergeMessage::Merge { range_idx, filled } => {
                        if let Err(e) = merge_state.merge_range_standalone(range_idx, filled) {
                            warn!("merge worker for table {merge_name} failed: {e}");
                        }
                    }
                    MergeMessage::Terminate => break,
                }
            }
        });

        let dealloc_state = WorkerState {
            page_ranges: self.page_ranges.lock().clone(),
            num_columns: self.num_columns,
        };
        let dealloc_handle = thread::spawn(move || {
            for message in dealloc_rx {
                match message {
                    DeallocMessage::Reclaim { range_idx, head, .. } => {
                        dealloc_state.reclaim_chain_standalone(range_idx, head);
                    }
                    DeallocMessage::Terminate => break,
                }
            }
        });

        self.merge_sender = Some(merge_tx);
        self.merge_handle = Some(merge_handle);
        self.dealloc_sender = Some(dealloc_tx);
        self.dealloc_handle = Some(dealloc_handle);
    }
}

/// The slice of `Table` state the background workers need, captured by
/// value at spawn time so the threads don't borrow `Table` itself. A page
/// range created after the workers started (the table outgrew its first
/// range) is invisible to this snapshot; `merge_range_standalone` and
/// `reclaim_chain_standalone` treat an out-of-bounds range index as a no-op
/// rather than panicking. TODO: rebuild the workers' range list when
/// `assign_rid_to_record` appends a new one, instead of snapshotting once.
#[derive(Clone)]
struct WorkerState {
    page_ranges: Vec<Arc<PageRange>>,
    num_columns: usize,
}

impl WorkerState {
    fn merge_range_standalone(&self, range_idx: usize, filled: usize) -> StorageResult<()> {
        let Some(range) = self.page_ranges.get(range_idx) else {
            warn!("merge worker: range {range_idx} was created after the worker started, skipping");
            return Ok(());
        };
        let t = MAX_RECORD_PER_PAGE_RANGE as Rid;

        for local_offset in 0..filled as i64 {
            let base_row = range.copy_base_record(local_offset)?;
            if base_row[self.num_columns + HIDDEN_RID] == RECORD_DELETION_FLAG {
                continue;
            }
            let head = base_row[self.num_columns + HIDDEN_INDIRECTION];
            if head < t {
                continue;
            }

            let mut merged_row = base_row.clone();
            for column in 0..self.num_columns {
                let mut cur = head;
                let mut resolved = base_row[column];
                while cur >= t {
                    if let Some(value) = range.read_tail_record_column(cur, column)? {
                        resolved = value;
                        break;
                    }
                    cur = range
                        .read_tail_record_column(cur, self.num_columns + HIDDEN_INDIRECTION)?
                        .ok_or_else(|| StorageError::invariant("tail record missing INDIRECTION column"))?;
                }
                merged_row[column] = resolved;
            }
            merged_row[self.num_columns + HIDDEN_SCHEMA_ENCODING] = 0;
            let newest_timestamp = range
                .read_tail_record_column(head, self.num_columns + HIDDEN_TIMESTAMP)?
                .ok_or_else(|| StorageError::invariant("tail record missing TIMESTAMP column"))?;
            merged_row[self.num_columns + HIDDEN_UPDATE_TIMESTAMP] = newest_timestamp;

            // Splice a copy of the pre-merge base image onto the end of the
            // tail chain before the base page is overwritten, so a reader
            // walking back past every recorded update still lands on the
            // record's original values instead of the now-consolidated row.
            // The base's own INDIRECTION keeps pointing at `head`; only the
            // oldest tail record's INDIRECTION is re-rooted at the splice.
            let merge_point = range.find_records_last_logical_rid(head)?;
            let splice_rid = range.assign_logical_rid();
            let original_columns: Vec<Option<i64>> = base_row[..self.num_columns].iter().map(|&v| Some(v)).collect();
            let original_timestamp = base_row[self.num_columns + HIDDEN_TIMESTAMP];
            range.write_tail_record(splice_rid, local_offset, 0, original_timestamp, &original_columns)?;
            range.write_tail_column(merge_point, self.num_columns + HIDDEN_INDIRECTION, splice_rid)?;

            for column in 0..physical_columns(self.num_columns) {
                range.write_base_column(local_offset, column, merged_row[column])?;
            }
        }
        Ok(())
    }

    fn reclaim_chain_standalone(&self, range_idx: usize, mut cur: Rid) {
        let t = MAX_RECORD_PER_PAGE_RANGE as Rid;
        let Some(range) = self.page_ranges.get(range_idx) else {
            return;
        };
        while cur >= t {
            let next = range.read_tail_record_column(cur, self.num_columns + HIDDEN_INDIRECTION);
            range.recycle_logical_rid(cur);
            match next {
                Ok(Some(n)) => cur = n,
                _ => break,
            }
        }
    }
}

#[pymethods]
impl Table {
    #[new]
    pub fn py_new(directory: String, name: String, num_columns: usize, key_column: usize) -> PyResult<Table> {
        Table::open(directory, name, num_columns, key_column).map_err(Into::into)
    }

    #[pyo3(name = "insert")]
    pub fn py_insert(&self, columns: Vec<i64>) -> PyResult<i64> {
        self.insert(columns).map_err(Into::into)
    }

    #[pyo3(name = "update")]
    pub fn py_update(&self, key: i64, columns: Vec<Option<i64>>) -> PyResult<()> {
        self.update(key, columns).map_err(Into::into)
    }

    #[pyo3(name = "delete")]
    pub fn py_delete(&self, primary_key: i64) -> PyResult<()> {
        self.delete(primary_key).map_err(Into::into)
    }

    #[pyo3(name = "select")]
    pub fn py_select(&self, search_key: i64, search_key_index: usize, projected_columns: Vec<usize>) -> PyResult<Vec<PyRecord>> {
        self.select(search_key, search_key_index, &projected_columns).map_err(Into::into)
    }

    #[pyo3(name = "select_version")]
    pub fn py_select_version(&self, search_key: i64, search_key_index: usize, projected_columns: Vec<usize>, relative_version: usize) -> PyResult<Vec<PyRecord>> {
        self.select_version(search_key, search_key_index, &projected_columns, relative_version)
            .map_err(Into::into)
    }

    #[pyo3(name = "sum")]
    pub fn py_sum(&self, start_range: i64, end_range: i64, column_index: usize) -> PyResult<i64> {
        self.sum(start_range, end_range, column_index).map_err(Into::into)
    }

    #[pyo3(name = "sum_version")]
    pub fn py_sum_version(&self, start_range: i64, end_range: i64, column_index: usize, relative_version: usize) -> PyResult<i64> {
        self.sum_version(start_range, end_range, column_index, relative_version).map_err(Into::into)
    }

    #[pyo3(name = "persist")]
    pub fn py_persist(&self) -> PyResult<()> {
        self.persist().map_err(Into::into)
    }
}

impl From<StorageError> for PyErr {
    fn from(e: StorageError) -> Self {
        pyo3::exceptions::PyRuntimeError::new_err(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_table(dir: &Path, num_columns: usize, key_column: usize) -> Table {
        Table::open(dir.to_path_buf(), "t", num_columns, key_column).unwrap()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("lstore_table_test_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&path);
        path
    }

    #[test]
    fn insert_then_select_round_trips() {
        let dir = scratch_dir("insert_select");
        let table = fresh_table(&dir, 3, 0);

        let rid = table.insert(vec![1, 10, 100]).unwrap();
        let records = table.select(1, 0, &[0, 1, 2]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rid, rid);
        assert_eq!(records[0].columns, vec![1, 10, 100]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn duplicate_primary_key_is_rejected() {
        let dir = scratch_dir("dup_key");
        let table = fresh_table(&dir, 2, 0);
        table.insert(vec![1, 10]).unwrap();
        assert!(table.insert(vec![1, 20]).is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn update_then_select_returns_latest_and_partial_update_preserves_other_columns() {
        let dir = scratch_dir("update_select");
        let table = fresh_table(&dir, 3, 0);
        table.insert(vec![1, 10, 100]).unwrap();

        table.update(1, vec![None, Some(20), None]).unwrap();
        let records = table.select(1, 0, &[0, 1, 2]).unwrap();
        assert_eq!(records[0].columns, vec![1, 20, 100]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn select_version_walks_back_through_updates() {
        let dir = scratch_dir("select_version");
        let table = fresh_table(&dir, 2, 0);
        table.insert(vec![1, 10]).unwrap();
        table.update(1, vec![None, Some(20)]).unwrap();
        table.update(1, vec![None, Some(30)]).unwrap();

        let latest = table.select_version(1, 0, &[1], 0).unwrap();
        assert_eq!(latest[0].columns, vec![30]);
        let one_back = table.select_version(1, 0, &[1], 1).unwrap();
        assert_eq!(one_back[0].columns, vec![20]);
        let two_back = table.select_version(1, 0, &[1], 2).unwrap();
        assert_eq!(two_back[0].columns, vec![10]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn delete_removes_from_index_and_future_selects() {
        let dir = scratch_dir("delete");
        let table = fresh_table(&dir, 2, 0);
        table.insert(vec![1, 10]).unwrap();
        table.delete(1).unwrap();
        assert!(table.select(1, 0, &[0, 1]).unwrap().is_empty());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn sum_aggregates_a_primary_key_range() {
        let dir = scratch_dir("sum");
        let table = fresh_table(&dir, 2, 0);
        for k in 1..=5 {
            table.insert(vec![k, k * 10]).unwrap();
        }
        assert_eq!(table.sum(2, 4, 1).unwrap(), 20 + 30 + 40);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn secondary_index_lookup_after_create_index() {
        let dir = scratch_dir("secondary_index");
        let table = fresh_table(&dir, 2, 0);
        table.insert(vec![1, 42]).unwrap();
        table.insert(vec![2, 42]).unwrap();
        table.create_index(1).unwrap();

        let mut rids: Vec<_> = table.select(42, 1, &[0]).unwrap().into_iter().map(|r| r.key).collect();
        rids.sort();
        assert_eq!(rids, vec![1, 2]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn persist_and_reopen_preserves_records() {
        let dir = scratch_dir("persist");
        {
            let table = fresh_table(&dir, 2, 0);
            table.insert(vec![1, 99]).unwrap();
            table.persist().unwrap();
        }

        let reopened = fresh_table(&dir, 2, 0);
        let records = reopened.select(1, 0, &[0, 1]).unwrap();
        assert_eq!(records[0].columns, vec![1, 99]);

        fs::remove_dir_all(&dir).ok();
    }

    /// Drives the merge logic directly (rather than through the background
    /// queue, whose completion isn't otherwise observable) to check that a
    /// record's full update history survives consolidation: every
    /// `select_version` offset up to the number of updates applied still
    /// resolves to the value that was current at that point.
    #[test]
    fn merge_preserves_every_prior_version_behind_a_spliced_base_image() {
        let dir = scratch_dir("merge_history");
        let table = fresh_table(&dir, 2, 0);
        table.insert(vec![1, 10]).unwrap();
        table.update(1, vec![None, Some(20)]).unwrap();
        table.update(1, vec![None, Some(30)]).unwrap();
        table.update(1, vec![None, Some(40)]).unwrap();

        let worker = WorkerState {
            page_ranges: table.page_ranges.lock().clone(),
            num_columns: table.num_columns,
        };
        worker.merge_range_standalone(0, 1).unwrap();

        assert_eq!(table.select(1, 0, &[0, 1]).unwrap()[0].columns, vec![1, 40]);
        assert_eq!(table.select_version(1, 0, &[1], 0).unwrap()[0].columns, vec![40]);
        assert_eq!(table.select_version(1, 0, &[1], 1).unwrap()[0].columns, vec![30]);
        assert_eq!(table.select_version(1, 0, &[1], 2).unwrap()[0].columns, vec![20]);
        assert_eq!(table.select_version(1, 0, &[1], 3).unwrap()[0].columns, vec![10]);

        fs::remove_dir_all(&dir).ok();
    }
}
