//! Compile-time configuration constants for the storage engine.
//!
//! These mirror `spec.md` §6's "Configurable constants" table. They stay as
//! `pub const`s rather than a runtime config struct because the teacher
//! (`constants.rs`) does the same and nothing in the spec calls for runtime
//! tuning.

/// Size in bytes of a physical page.
pub const PAGE_SIZE: usize = 4096;

/// Size in bytes of a single record slot (one `i64`).
pub const RECORD_SIZE: usize = 8;

/// Number of 8-byte slots a page holds. `PAGE_SIZE / RECORD_SIZE`.
pub const PAGE_CAPACITY: usize = PAGE_SIZE / RECORD_SIZE;

/// Number of base pages grouped into a single page range, per column.
pub const MAX_PAGE_RANGE: usize = 32;

/// Number of hidden metadata columns physically stored alongside user
/// columns: INDIRECTION, RID, TIMESTAMP, SCHEMA_ENCODING, UPDATE_TIMESTAMP.
pub const NUM_HIDDEN_COLUMNS: usize = 5;

/// Number of hidden columns other than INDIRECTION (RID, TIMESTAMP,
/// SCHEMA_ENCODING, UPDATE_TIMESTAMP). `NUM_HIDDEN_COLUMNS - 1`.
pub const METADATA_COLUMNS: usize = NUM_HIDDEN_COLUMNS - 1;

/// Number of frames owned by one table's buffer pool, before multiplying by
/// the number of physical columns (`spec.md` §4.2: `F = MAX_NUM_FRAME *
/// (num_columns + NUM_HIDDEN_COLUMNS)`).
pub const MAX_NUM_FRAME: usize = 64;

/// Number of base records grouped into one page range. `spec.md` §3: `T`.
pub const MAX_RECORD_PER_PAGE_RANGE: usize = MAX_PAGE_RANGE * PAGE_CAPACITY;

/// Number of tail-page "slots" of writes (in units of `PAGE_CAPACITY`
/// records) that may accumulate in a page range before a merge is queued.
pub const MAX_TAIL_PAGES_BEFORE_MERGING: usize = 50;

/// Sentinel meaning "this optional argument was not supplied" at API
/// boundaries that cannot pass a native `None` (e.g. the PyO3 list-argument
/// surface). Internally the engine always prefers `Option<i64>`.
pub const RECORD_NONE_VALUE: i64 = -2;

/// Sentinel written to mark a record as deleted, used as a defensive
/// secondary signal alongside removal from the index and page directory.
pub const RECORD_DELETION_FLAG: i64 = -1;

/// Hidden-column offsets within the metadata block appended after the
/// `num_columns` user columns of a physical record.
pub const HIDDEN_INDIRECTION: usize = 0;
pub const HIDDEN_RID: usize = 1;
pub const HIDDEN_TIMESTAMP: usize = 2;
pub const HIDDEN_SCHEMA_ENCODING: usize = 3;
pub const HIDDEN_UPDATE_TIMESTAMP: usize = 4;

/// Total physical column count for a table with `num_columns` user columns.
pub fn physical_columns(num_columns: usize) -> usize {
    num_columns + NUM_HIDDEN_COLUMNS
}
