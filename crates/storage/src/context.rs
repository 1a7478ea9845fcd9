//! DbContext (C7)
//!
//! One per caller. Holds a back-reference to the table plus a reusable
//! scratch buffer for row decoding, so repeated `getValue` calls on one
//! thread don't allocate a fresh `Vec` every time (`spec.md` §4.7). The
//! `RefCell` makes `DbContext` deliberately `!Sync` — callers are expected
//! to create one context per thread, matching "not thread-safe; callers
//! use distinct contexts per thread".

use std::cell::RefCell;
use std::sync::Arc;

use composite_core::{IndexId, Result, RowId};

use crate::table::{CompositeTable, TableBackwardIter, TableForwardIter, TableIndexIter};

/// Per-caller handle into a [`CompositeTable`].
pub struct DbContext {
    table: Arc<CompositeTable>,
    scratch: RefCell<Vec<u8>>,
}

impl DbContext {
    pub(crate) fn new(table: Arc<CompositeTable>) -> Self {
        DbContext {
            table,
            scratch: RefCell::new(Vec::new()),
        }
    }

    /// Insert `row`, returning its newly assigned id.
    pub fn insert_row(&self, row: &[u8]) -> Result<RowId> {
        self.table.insert_row(row)
    }

    /// Tombstone the row at `id`.
    pub fn remove_row(&self, id: RowId) -> Result<()> {
        self.table.remove_row(id)
    }

    /// Replace the row at `id` with `new_row`.
    pub fn replace_row(&self, id: RowId, new_row: &[u8]) -> Result<RowId> {
        self.table.replace_row(id, new_row)
    }

    /// Read the row at `id` into this context's reusable scratch buffer,
    /// returning a clone of its contents.
    ///
    /// Reuses the same backing allocation across calls from this context;
    /// the returned `Vec` is an owned copy so callers may hold it past the
    /// next `get_value` call.
    pub fn get_value(&self, id: RowId) -> Result<Vec<u8>> {
        let mut buf = self.scratch.borrow_mut();
        buf.clear();
        self.table.get_value(id, &mut buf)?;
        Ok(buf.clone())
    }

    /// All live row ids currently mapped from `key` in `index`.
    pub fn find_by_index(&self, index: IndexId, key: &[u8]) -> Vec<RowId> {
        self.table.find_by_index(index, key)
    }

    /// Manually record `key -> id` in `index`, bypassing row-level sync.
    pub fn index_insert(&self, index: IndexId, key: &[u8], id: RowId) -> Result<()> {
        self.table.index_insert(index, key, id)
    }

    /// Manually remove `key -> id` from `index`, bypassing row-level sync.
    pub fn index_remove(&self, index: IndexId, key: &[u8], id: RowId) -> Result<()> {
        self.table.index_remove(index, key, id)
    }

    /// Manually retarget `id` from `old_key` to `new_key` in `index`.
    pub fn index_replace(&self, index: IndexId, old_key: &[u8], new_key: &[u8], id: RowId) -> Result<()> {
        self.table.index_replace(index, old_key, new_key, id)
    }

    /// Total row slots across all segments, including tombstones.
    pub fn num_data_rows(&self) -> usize {
        self.table.num_data_rows()
    }

    /// A forward snapshot iterator over the table's current catalogue.
    pub fn iter_forward(&self) -> TableForwardIter {
        self.table.iter_forward()
    }

    /// A backward snapshot iterator over the table's current catalogue.
    pub fn iter_backward(&self) -> TableBackwardIter {
        self.table.iter_backward()
    }

    /// A merged, key-ordered snapshot iterator over `index` across the
    /// table's current catalogue.
    pub fn iter_index(&self, index: IndexId) -> TableIndexIter {
        self.table.iter_index(index)
    }

    /// The table this context is bound to.
    pub fn table(&self) -> &Arc<CompositeTable> {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::testing::KeyedRowSchema;

    #[test]
    fn forwards_row_operations_to_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = CompositeTable::create(
            dir.path(),
            Arc::new(KeyedRowSchema::with_unique_key()),
            TableConfig::default(),
        )
        .unwrap();
        let ctx = table.create_context();

        let id = ctx.insert_row(b"a:1").unwrap();
        assert_eq!(ctx.get_value(id).unwrap(), b"a:1");

        let id2 = ctx.replace_row(id, b"a:2").unwrap();
        assert_eq!(id2, id);
        assert_eq!(ctx.get_value(id).unwrap(), b"a:2");

        ctx.remove_row(id).unwrap();
        assert!(ctx.get_value(id).is_err());
    }

    #[test]
    fn scratch_buffer_is_reused_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let table = CompositeTable::create(
            dir.path(),
            Arc::new(KeyedRowSchema::without_index()),
            TableConfig::default(),
        )
        .unwrap();
        let ctx = table.create_context();
        let a = ctx.insert_row(b"first").unwrap();
        let b = ctx.insert_row(b"second").unwrap();
        assert_eq!(ctx.get_value(a).unwrap(), b"first");
        assert_eq!(ctx.get_value(b).unwrap(), b"second");
    }

    #[test]
    fn find_by_index_reflects_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let table = CompositeTable::create(
            dir.path(),
            Arc::new(KeyedRowSchema::with_unique_key()),
            TableConfig::default(),
        )
        .unwrap();
        let ctx = table.create_context();
        let id = ctx.insert_row(b"k:1").unwrap();
        assert_eq!(ctx.find_by_index(IndexId(0), b"k"), vec![id]);
        assert!(ctx.find_by_index(IndexId(0), b"missing").is_empty());
    }

    #[test]
    fn iter_index_yields_keys_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let table = CompositeTable::create(
            dir.path(),
            Arc::new(KeyedRowSchema::with_unique_key()),
            TableConfig::default(),
        )
        .unwrap();
        let ctx = table.create_context();
        ctx.insert_row(b"c:3").unwrap();
        ctx.insert_row(b"a:1").unwrap();
        ctx.insert_row(b"b:2").unwrap();

        let keys: Vec<Vec<u8>> = ctx.iter_index(IndexId(0)).map(|(key, _)| key).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }
}
