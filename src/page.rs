//! Fixed-size columnar page: a contiguous byte buffer viewed as an array of
//! 8-byte signed-integer slots, per `spec.md` §4.1.

use serde::{Deserialize, Serialize};

use crate::config::PAGE_CAPACITY;
use crate::error::{StorageError, StorageResult};

/// A physical page: `PAGE_CAPACITY` 8-byte slots plus a slot counter.
///
/// Invariants: `0 <= num_records <= PAGE_CAPACITY`; slot `i` is valid iff
/// `i < num_records`. A page is clean unless written; `dirty` tracking lives
/// one layer up, in the buffer pool's `Frame`, since a bare `Page` has no
/// notion of "has been flushed".
#[derive(Clone, Debug)]
pub struct Page {
    slots: [i64; PAGE_CAPACITY],
    num_records: usize,
}

/// On-disk representation of a page: the slot count plus the raw slot
/// values. `spec.md` §6 calls this "`{entry_count, content}`"; we keep
/// `content` as the plain slot array rather than inventing a compression
/// scheme the spec does not require.
#[derive(Serialize, Deserialize, Debug)]
pub struct SerializedPage {
    pub entry_count: usize,
    pub content: Vec<i64>,
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl Page {
    pub fn new() -> Self {
        Page {
            slots: [0; PAGE_CAPACITY],
            num_records: 0,
        }
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    pub fn has_capacity(&self) -> bool {
        self.num_records < PAGE_CAPACITY
    }

    /// Append `value` at slot `num_records`, incrementing the counter.
    /// Fails with `Invariant` if the page is full.
    pub fn write(&mut self, value: i64) -> StorageResult<usize> {
        if !self.has_capacity() {
            return Err(StorageError::invariant("page has no remaining capacity"));
        }

        let slot = self.num_records;
        self.slots[slot] = value;
        self.num_records += 1;
        Ok(slot)
    }

    /// Overwrite an existing slot in place. Does not change `num_records`.
    pub fn write_precise(&mut self, slot: usize, value: i64) -> StorageResult<()> {
        if slot >= self.num_records {
            return Err(StorageError::invariant(format!(
                "write_precise: slot {slot} is not yet allocated (num_records = {})",
                self.num_records
            )));
        }

        self.slots[slot] = value;
        Ok(())
    }

    /// Read the content of `slot`. Undefined (returns an `Invariant` error
    /// here rather than stay silently undefined) for `slot >= num_records`.
    pub fn get(&self, slot: usize) -> StorageResult<i64> {
        if slot >= self.num_records {
            return Err(StorageError::invariant(format!(
                "read of slot {slot} out of bounds (num_records = {})",
                self.num_records
            )));
        }

        Ok(self.slots[slot])
    }

    pub fn serialize(&self) -> SerializedPage {
        SerializedPage {
            entry_count: self.num_records,
            content: self.slots.to_vec(),
        }
    }

    pub fn deserialize(serialized: &SerializedPage) -> StorageResult<Page> {
        if serialized.content.len() != PAGE_CAPACITY {
            return Err(StorageError::SerializationFault {
                path: String::new(),
                reason: format!(
                    "expected {PAGE_CAPACITY} slots, found {}",
                    serialized.content.len()
                ),
            });
        }

        if serialized.entry_count > PAGE_CAPACITY {
            return Err(StorageError::SerializationFault {
                path: String::new(),
                reason: format!(
                    "entry_count {} exceeds page capacity {PAGE_CAPACITY}",
                    serialized.entry_count
                ),
            });
        }

        let mut slots = [0i64; PAGE_CAPACITY];
        slots.copy_from_slice(&serialized.content);

        Ok(Page {
            slots,
            num_records: serialized.entry_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut page = Page::new();
        assert!(page.has_capacity());
        let slot = page.write(42).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(page.get(0).unwrap(), 42);
    }

    #[test]
    fn write_precise_overwrites_without_growing() {
        let mut page = Page::new();
        page.write(1).unwrap();
        page.write(2).unwrap();
        page.write_precise(0, 99).unwrap();
        assert_eq!(page.get(0).unwrap(), 99);
        assert_eq!(page.num_records(), 2);
    }

    #[test]
    fn full_page_rejects_further_writes() {
        let mut page = Page::new();
        for i in 0..PAGE_CAPACITY {
            page.write(i as i64).unwrap();
        }
        assert!(!page.has_capacity());
        assert!(page.write(0).is_err());
    }

    #[test]
    fn serialize_deserialize_round_trip_is_byte_exact() {
        let mut page = Page::new();
        for i in 0..10 {
            page.write(i * 7).unwrap();
        }

        let serialized = page.serialize();
        let restored = Page::deserialize(&serialized).unwrap();

        assert_eq!(restored.num_records(), page.num_records());
        for i in 0..page.num_records() {
            assert_eq!(restored.get(i).unwrap(), page.get(i).unwrap());
        }
    }

    #[test]
    fn read_past_num_records_is_an_error() {
        let page = Page::new();
        assert!(page.get(0).is_err());
    }
}
