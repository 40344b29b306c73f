//! A page range: a fixed-size group of base pages plus its append-only tail
//! pages, per `spec.md` §3-4.5.
//!
//! Base record location within a range is purely arithmetic. Tail (logical)
//! record location is resolved through this range's own `logical_directory`
//! — logical RIDs are local to the page range that issued them and never
//! need to be globally unique, since every indirection chain walk starts
//! from a base record whose page range is already known.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bufferpool::{BufferPool, PageKey};
use crate::config::{
    physical_columns, HIDDEN_INDIRECTION, HIDDEN_RID, HIDDEN_SCHEMA_ENCODING, HIDDEN_TIMESTAMP,
    HIDDEN_UPDATE_TIMESTAMP, MAX_PAGE_RANGE, MAX_RECORD_PER_PAGE_RANGE, PAGE_CAPACITY,
};
use crate::error::{StorageError, StorageResult};
use crate::types::Rid;

/// Where a logical column's value physically lives: a page index within the
/// range's tail-page region for that column, and a slot within that page.
pub type Location = (usize, usize);

struct Counters {
    /// Next never-used logical RID to hand out, starting at `T`.
    next_logical_rid: Rid,
    recycled_logical_rids: VecDeque<Rid>,
    /// Current (highest) tail page index per physical column, so appends
    /// know which page to grow. Indexed by physical column number.
    tail_page_index: Vec<usize>,
}

/// One page range. Owns no buffer pool of its own — it borrows the table's,
/// since frames are addressed by `PageKey { table, range, column, page_idx }`
/// and a single pool backs every range of a table.
pub struct PageRange {
    table_name: String,
    range_idx: usize,
    num_columns: usize,
    pool: Arc<BufferPool>,
    counters: Mutex<Counters>,
    logical_directory: Mutex<HashMap<Rid, Vec<Option<Location>>>>,
    /// Number of physical records written into this range so far (base
    /// and tail together), exposed read-only for merge scheduling.
    tps: AtomicUsize,
}

impl PageRange {
    pub fn new(table_name: impl Into<String>, range_idx: usize, num_columns: usize, pool: Arc<BufferPool>) -> Self {
        let total_columns = physical_columns(num_columns);
        PageRange {
            table_name: table_name.into(),
            range_idx,
            num_columns,
            pool,
            counters: Mutex::new(Counters {
                next_logical_rid: MAX_RECORD_PER_PAGE_RANGE as Rid,
                recycled_logical_rids: VecDeque::new(),
                // Base pages occupy [0, MAX_PAGE_RANGE) in every column; tail
                // pages for the same column start right after, so appends
                // never collide with a base page's PageKey.
                tail_page_index: vec![MAX_PAGE_RANGE; total_columns],
            }),
            logical_directory: Mutex::new(HashMap::new()),
            tps: AtomicUsize::new(0),
        }
    }

    pub fn range_idx(&self) -> usize {
        self.range_idx
    }

    pub fn tps(&self) -> usize {
        self.tps.load(Ordering::Acquire)
    }

    fn total_columns(&self) -> usize {
        physical_columns(self.num_columns)
    }

    fn key(&self, column: usize, page_idx: usize) -> PageKey {
        PageKey {
            table: self.table_name.clone(),
            range: self.range_idx,
            column,
            page_idx,
        }
    }

    /// True iff the global base RID `rid` belongs to this range (its
    /// `T`-sized slice of the global base RID numbering).
    pub fn has_capacity(&self, rid: Rid) -> bool {
        let t = MAX_RECORD_PER_PAGE_RANGE as Rid;
        rid / t == self.range_idx as Rid
    }

    /// Write a base record's full physical row (user columns followed by
    /// hidden columns) at the arithmetic location implied by `rid`.
    /// `columns[num_columns + HIDDEN_INDIRECTION]` is overwritten with the
    /// self-pointing terminal value (`rid % T`) regardless of what the
    /// caller passed, since a freshly inserted base record has no tail yet.
    pub fn write_base_record(&self, rid: Rid, columns: &mut [i64]) -> StorageResult<()> {
        let total_columns = self.total_columns();
        if columns.len() != total_columns {
            return Err(StorageError::invariant(format!(
                "write_base_record: expected {total_columns} physical columns, got {}",
                columns.len()
            )));
        }

        let t = MAX_RECORD_PER_PAGE_RANGE as Rid;
        let local_offset = (rid % t) as usize;
        columns[self.num_columns + HIDDEN_INDIRECTION] = local_offset as i64;

        let page_idx = local_offset / PAGE_CAPACITY;
        let slot = local_offset % PAGE_CAPACITY;

        for (column, value) in columns.iter().enumerate() {
            self.pool.write_page_exact(&self.key(column, page_idx), slot, *value)?;
        }

        self.tps.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Read a base record's full physical row at its local offset.
    pub fn copy_base_record(&self, local_offset: i64) -> StorageResult<Vec<i64>> {
        let total_columns = self.total_columns();
        let page_idx = local_offset as usize / PAGE_CAPACITY;
        let slot = local_offset as usize % PAGE_CAPACITY;

        (0..total_columns)
            .map(|column| self.pool.read_page_slot(&self.key(column, page_idx), slot))
            .collect()
    }

    /// Overwrite a single physical column of a base record in place. Used
    /// for the INDIRECTION pointer on update, the deletion tombstone, and
    /// by merge to splice a consolidated image back into the base page.
    pub fn write_base_column(&self, local_offset: i64, column: usize, value: i64) -> StorageResult<()> {
        let page_idx = local_offset as usize / PAGE_CAPACITY;
        let slot = local_offset as usize % PAGE_CAPACITY;
        self.pool.write_page_exact(&self.key(column, page_idx), slot, value)
    }

    /// Overwrite a single hidden column of an already-written tail record in
    /// place. Used by merge to re-root the oldest tail record's INDIRECTION
    /// at the newly spliced pre-merge base image.
    pub fn write_tail_column(&self, logical_rid: Rid, column: usize, value: i64) -> StorageResult<()> {
        let page_idx = logical_rid as usize / PAGE_CAPACITY;
        let slot = logical_rid as usize % PAGE_CAPACITY;
        self.pool.write_page_exact(&self.key(column, page_idx), slot, value)
    }

    /// Allocate a fresh or recycled logical RID for a new tail record.
    pub fn assign_logical_rid(&self) -> Rid {
        let mut counters = self.counters.lock();
        if let Some(recycled) = counters.recycled_logical_rids.pop_front() {
            return recycled;
        }
        let rid = counters.next_logical_rid;
        counters.next_logical_rid += 1;
        rid
    }

    /// Return a logical RID's column slot to the free pool once its chain
    /// link has been merged away and it is no longer reachable.
    pub fn recycle_logical_rid(&self, logical_rid: Rid) {
        self.counters.lock().recycled_logical_rids.push_back(logical_rid);
        self.logical_directory.lock().remove(&logical_rid);
    }

    /// Write a new tail record. Hidden columns are always written at the
    /// fixed location implied by `logical_rid`; user columns are appended
    /// to their column's tail pages only when present (`None` means "this
    /// update left the column unchanged", leaving no directory entry so
    /// readers fall back to the predecessor version).
    #[allow(clippy::too_many_arguments)]
    pub fn write_tail_record(
        &self,
        logical_rid: Rid,
        indirection: i64,
        schema_encoding: i64,
        timestamp: i64,
        user_columns: &[Option<i64>],
    ) -> StorageResult<()> {
        if user_columns.len() != self.num_columns {
            return Err(StorageError::invariant(format!(
                "write_tail_record: expected {} user columns, got {}",
                self.num_columns,
                user_columns.len()
            )));
        }

        let hidden_page_idx = logical_rid as usize / PAGE_CAPACITY;
        let hidden_slot = logical_rid as usize % PAGE_CAPACITY;

        let hidden = [
            (HIDDEN_INDIRECTION, indirection),
            (HIDDEN_RID, logical_rid),
            (HIDDEN_TIMESTAMP, timestamp),
            (HIDDEN_SCHEMA_ENCODING, schema_encoding),
            (HIDDEN_UPDATE_TIMESTAMP, timestamp),
        ];
        for (offset, value) in hidden {
            let column = self.num_columns + offset;
            self.pool
                .write_page_exact(&self.key(column, hidden_page_idx), hidden_slot, value)?;
        }

        let mut locations = vec![None; self.num_columns];
        for (column, value) in user_columns.iter().enumerate() {
            let Some(value) = value else { continue };

            let page_idx = {
                let mut counters = self.counters.lock();
                let current = counters.tail_page_index[column];
                if !self.pool.get_page_has_capacity(&self.key(column, current))? {
                    counters.tail_page_index[column] += 1;
                }
                counters.tail_page_index[column]
            };
            let slot = self.pool.write_page_next(&self.key(column, page_idx), *value)?;
            locations[column] = Some((page_idx, slot));
        }

        self.logical_directory.lock().insert(logical_rid, locations);
        self.tps.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Resolve where a logical record's column physically lives. Hidden
    /// columns are always present (fixed location); user columns may be
    /// absent if that particular tail record did not touch the column.
    pub fn get_column_location(&self, logical_rid: Rid, column: usize) -> StorageResult<Option<Location>> {
        if column >= self.num_columns {
            let page_idx = logical_rid as usize / PAGE_CAPACITY;
            let slot = logical_rid as usize % PAGE_CAPACITY;
            return Ok(Some((page_idx, slot)));
        }

        let directory = self.logical_directory.lock();
        let entry = directory
            .get(&logical_rid)
            .ok_or_else(|| StorageError::missing_rid(logical_rid))?;
        Ok(entry[column])
    }

    /// Read a single column of a logical (tail) record, or `Ok(None)` if
    /// this version didn't touch that user column.
    pub fn read_tail_record_column(&self, logical_rid: Rid, column: usize) -> StorageResult<Option<i64>> {
        match self.get_column_location(logical_rid, column)? {
            Some((page_idx, slot)) => {
                let value = self.pool.read_page_slot(&self.key(column, page_idx), slot)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Follow `cur`'s INDIRECTION links until a base terminal (`< T`) is
    /// observed, returning the last logical RID seen along the way — or
    /// `cur` itself, unchanged, if it was already a base terminal (i.e. the
    /// chain is empty). Used by merge to splice a consolidated base image
    /// into the newest tail slot.
    pub fn find_records_last_logical_rid(&self, cur: Rid) -> StorageResult<Rid> {
        let t = MAX_RECORD_PER_PAGE_RANGE as Rid;
        let mut cur = cur;
        let mut last = cur;
        while cur >= t {
            last = cur;
            cur = self
                .read_tail_record_column(cur, self.num_columns + HIDDEN_INDIRECTION)?
                .ok_or_else(|| StorageError::invariant("tail record missing INDIRECTION column"))?;
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NUM_HIDDEN_COLUMNS;

    fn range_with(num_columns: usize) -> PageRange {
        let pool = Arc::new(BufferPool::new(physical_columns(num_columns)));
        PageRange::new("t", 0, num_columns, pool)
    }

    fn base_row(num_columns: usize, values: &[i64]) -> Vec<i64> {
        let mut row = vec![0i64; num_columns + NUM_HIDDEN_COLUMNS];
        row[..num_columns].copy_from_slice(values);
        row
    }

    #[test]
    fn base_record_round_trips_and_self_points() {
        let range = range_with(2);
        let mut row = base_row(2, &[10, 20]);
        range.write_base_record(0, &mut row).unwrap();

        let read_back = range.copy_base_record(0).unwrap();
        assert_eq!(read_back[0], 10);
        assert_eq!(read_back[1], 20);
        assert_eq!(read_back[2 + HIDDEN_INDIRECTION], 0);
    }

    #[test]
    fn tail_record_partial_update_leaves_missing_column_absent() {
        let range = range_with(2);
        let mut row = base_row(2, &[10, 20]);
        range.write_base_record(0, &mut row).unwrap();

        let logical_rid = range.assign_logical_rid();
        range
            .write_tail_record(logical_rid, 0, 0b01, 1, &[Some(99), None])
            .unwrap();

        assert_eq!(range.read_tail_record_column(logical_rid, 0).unwrap(), Some(99));
        assert_eq!(range.read_tail_record_column(logical_rid, 1).unwrap(), None);
    }

    #[test]
    fn chain_walk_returns_newest_logical_rid() {
        let range = range_with(1);
        let mut row = base_row(1, &[1]);
        range.write_base_record(5, &mut row).unwrap();

        let first = range.assign_logical_rid();
        range.write_tail_record(first, 5, 0b1, 1, &[Some(2)]).unwrap();
        let second = range.assign_logical_rid();
        range.write_tail_record(second, first, 0b1, 2, &[Some(3)]).unwrap();

        let newest = range.find_records_last_logical_rid(5).unwrap();
        assert_eq!(newest, second);
    }

    #[test]
    fn empty_chain_returns_input_unchanged() {
        let range = range_with(1);
        let mut row = base_row(1, &[1]);
        range.write_base_record(7, &mut row).unwrap();
        assert_eq!(range.find_records_last_logical_rid(7).unwrap(), 7);
    }

    #[test]
    fn recycled_logical_rid_is_reused_before_minting_a_new_one() {
        let range = range_with(1);
        let first = range.assign_logical_rid();
        range.recycle_logical_rid(first);
        let second = range.assign_logical_rid();
        assert_eq!(first, second);
    }

    #[test]
    fn has_capacity_checks_rid_against_this_ranges_slice() {
        let range = range_with(1);
        let t = MAX_RECORD_PER_PAGE_RANGE as Rid;
        assert!(range.has_capacity(0));
        assert!(range.has_capacity(t - 1));
        assert!(!range.has_capacity(t));
    }
}
