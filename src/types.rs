//! Shared identifier types used across the page range, index, table, and
//! transaction layers.
//!
//! A `Rid` is a table-wide, globally unique identifier for a *base* record.
//! Base RIDs are assigned sequentially and packed per page range: for a
//! range at index `r`, its base RIDs occupy `[r * T, (r + 1) * T)` where
//! `T = MAX_RECORD_PER_PAGE_RANGE`. That packing is what makes
//! `page_range = rid / T` and `local_offset = rid % T` correct arithmetic
//! (`spec.md` §3's "RID space").
//!
//! Logical (tail) RIDs are a second, smaller-scoped numbering: each page
//! range hands out its own logical RIDs starting at `T`, and they never
//! leave that page range's bookkeeping (`logical_directory`,
//! `recycled_logical_rids`). A value stored in an INDIRECTION column is
//! always range-local: either a logical RID (`>= T`) or the base record's
//! own local offset (`< T`, i.e. `rid % T`) used as the chain terminator.
pub type Rid = i64;
