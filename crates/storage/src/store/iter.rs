//! Default forward/backward store iterators (C3)
//!
//! Built purely from `num_data_rows` + `get_value_append`; any store gets a
//! working iterator for free. `seek_exact` follows the *corrected* contract
//! from `SPEC_FULL.md` §4.3: it positions the cursor at `id` and returns the
//! row there, unlike the source's `DefaultStoreIterForward::seekExact`
//! (`original_source/src/terark/db/db_store.cpp`), which clamps to the end
//! and returns "found" without actually seeking — the spec's Open Question
//! explicitly calls that a bug and asks for the corrected behavior here.

use std::sync::Arc;

use composite_core::SubId;

use crate::store::ReadableStore;

/// A positioned scan over a store's rows.
pub trait StoreIterator: Send {
    /// Advance and return the next `(id, row)`, or `None` at the end.
    fn increment(&mut self) -> Option<(SubId, Vec<u8>)>;

    /// Position the cursor at `id` and return the row there, or `None` if
    /// `id` is out of range (the cursor is then left at the end sentinel).
    fn seek_exact(&mut self, id: SubId) -> Option<Vec<u8>>;

    /// Re-sample the row count and rewind to the start of the scan.
    fn reset(&mut self);
}

/// Ascending scan over `[0, num_data_rows)`, row count sampled at creation.
pub struct DefaultForwardIter {
    store: Arc<dyn ReadableStore>,
    rows: usize,
    cur: usize,
}

impl DefaultForwardIter {
    /// Start a forward scan over `store`, snapshotting its current row count.
    pub fn new(store: Arc<dyn ReadableStore>) -> Self {
        let rows = store.num_data_rows();
        DefaultForwardIter {
            store,
            rows,
            cur: 0,
        }
    }
}

impl StoreIterator for DefaultForwardIter {
    fn increment(&mut self) -> Option<(SubId, Vec<u8>)> {
        if self.cur < self.rows {
            let id = SubId(self.cur as u32);
            let mut buf = Vec::new();
            self.store.get_value_append(id, &mut buf).ok()?;
            self.cur += 1;
            Some((id, buf))
        } else {
            None
        }
    }

    fn seek_exact(&mut self, id: SubId) -> Option<Vec<u8>> {
        if (id.get() as usize) < self.rows {
            let mut buf = Vec::new();
            self.store.get_value_append(id, &mut buf).ok()?;
            self.cur = id.get() as usize + 1;
            Some(buf)
        } else {
            self.cur = self.rows;
            None
        }
    }

    fn reset(&mut self) {
        self.rows = self.store.num_data_rows();
        self.cur = 0;
    }
}

/// Descending scan from `num_data_rows - 1` down to `0`.
pub struct DefaultBackwardIter {
    store: Arc<dyn ReadableStore>,
    rows: usize,
    cur: usize,
}

impl DefaultBackwardIter {
    /// Start a backward scan over `store`, snapshotting its current row count.
    pub fn new(store: Arc<dyn ReadableStore>) -> Self {
        let rows = store.num_data_rows();
        DefaultBackwardIter { store, rows, cur: rows }
    }
}

impl StoreIterator for DefaultBackwardIter {
    fn increment(&mut self) -> Option<(SubId, Vec<u8>)> {
        if self.cur > 0 {
            self.cur -= 1;
            let id = SubId(self.cur as u32);
            let mut buf = Vec::new();
            self.store.get_value_append(id, &mut buf).ok()?;
            Some((id, buf))
        } else {
            None
        }
    }

    fn seek_exact(&mut self, id: SubId) -> Option<Vec<u8>> {
        if (id.get() as usize) < self.rows {
            let mut buf = Vec::new();
            self.store.get_value_append(id, &mut buf).ok()?;
            self.cur = id.get() as usize;
            Some(buf)
        } else {
            self.cur = 0;
            None
        }
    }

    fn reset(&mut self) {
        self.rows = self.store.num_data_rows();
        self.cur = self.rows;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::MockValueStore;
    use crate::store::WritableStore;

    fn three_row_store() -> Arc<dyn ReadableStore> {
        let store = MockValueStore::new();
        store.append(b"a").unwrap();
        store.append(b"b").unwrap();
        store.append(b"c").unwrap();
        Arc::new(store)
    }

    #[test]
    fn forward_yields_rows_in_order() {
        let mut it = DefaultForwardIter::new(three_row_store());
        let mut seen = Vec::new();
        while let Some((_, row)) = it.increment() {
            seen.push(row);
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn backward_yields_rows_in_reverse() {
        let mut it = DefaultBackwardIter::new(three_row_store());
        let mut seen = Vec::new();
        while let Some((_, row)) = it.increment() {
            seen.push(row);
        }
        assert_eq!(seen, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn seek_exact_positions_at_id_not_at_the_end() {
        let mut it = DefaultForwardIter::new(three_row_store());
        let row = it.seek_exact(SubId(1)).expect("id 1 is in range");
        assert_eq!(row, b"b");
        // cursor continues from right after the sought id
        let (id, row) = it.increment().unwrap();
        assert_eq!(id, SubId(2));
        assert_eq!(row, b"c");
    }

    #[test]
    fn seek_exact_out_of_range_clamps_to_end() {
        let mut it = DefaultForwardIter::new(three_row_store());
        assert!(it.seek_exact(SubId(99)).is_none());
        assert!(it.increment().is_none());
    }
}
