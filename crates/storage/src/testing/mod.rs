//! Test-only helpers: a minimal [`Schema`] and a [`ReferenceModel`] oracle
//!
//! Grounded on `strata-storage::testing::reference_model::ReferenceModel`:
//! an in-memory mirror of expected state, built up alongside calls to the
//! real table and compared against it, rather than re-deriving expectations
//! inline in every test.

use std::collections::BTreeMap;

use composite_core::{IndexDecl, IndexId, RowId, Schema};

/// A schema for rows shaped `"<key>:<rest>"`: the bytes before the first
/// `:` are the projected key for index 0 (unique or not, by construction).
pub struct KeyedRowSchema {
    indices: Vec<IndexDecl>,
}

impl KeyedRowSchema {
    /// One unique index over the `key:` prefix.
    pub fn with_unique_key() -> Self {
        KeyedRowSchema {
            indices: vec![IndexDecl::unique(IndexId(0))],
        }
    }

    /// One multi-valued index over the `key:` prefix.
    pub fn with_multi_key() -> Self {
        KeyedRowSchema {
            indices: vec![IndexDecl::multi(IndexId(0))],
        }
    }

    /// No declared indices at all — useful for rollover/compaction tests
    /// that don't care about uniqueness.
    pub fn without_index() -> Self {
        KeyedRowSchema { indices: Vec::new() }
    }
}

impl Schema for KeyedRowSchema {
    fn indices(&self) -> &[IndexDecl] {
        &self.indices
    }

    fn project(&self, row: &[u8], _index: IndexId) -> Vec<u8> {
        match row.iter().position(|&b| b == b':') {
            Some(pos) => row[..pos].to_vec(),
            None => row.to_vec(),
        }
    }
}

/// An in-memory oracle for the row set a sequence of table operations is
/// expected to produce, independent of segment/compaction internals.
#[derive(Debug, Default)]
pub struct ReferenceModel {
    rows: BTreeMap<i64, Vec<u8>>,
}

impl ReferenceModel {
    /// A model with no rows.
    pub fn new() -> Self {
        ReferenceModel::default()
    }

    /// Record that `id` now holds `row`.
    pub fn insert(&mut self, id: RowId, row: Vec<u8>) {
        self.rows.insert(id.get(), row);
    }

    /// Record that `id` no longer holds a row.
    pub fn remove(&mut self, id: RowId) {
        self.rows.remove(&id.get());
    }

    /// Record that `old_id` is gone and `new_id` now holds `row` (the
    /// reinsert path of a replace).
    pub fn reinsert(&mut self, old_id: RowId, new_id: RowId, row: Vec<u8>) {
        self.rows.remove(&old_id.get());
        self.rows.insert(new_id.get(), row);
    }

    /// Live rows in ascending id order, matching a table's forward scan.
    pub fn live_rows_forward(&self) -> Vec<Vec<u8>> {
        self.rows.values().cloned().collect()
    }

    /// Number of live rows currently tracked.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// `true` if no rows are tracked.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
