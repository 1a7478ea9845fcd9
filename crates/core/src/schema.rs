//! The schema seam between the embedder and the storage engine
//!
//! The composite table never interprets a row's bytes. It only needs to
//! know, per declared index, whether to enforce uniqueness and how to
//! project a key out of a row. Row encoding/decoding, and the mapping from
//! column names to indices, are the embedder's responsibility.

use crate::ids::IndexId;

/// One declared index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDecl {
    /// The index's identifier, used to address it in table operations.
    pub id: IndexId,
    /// `true` if the table must reject a second live row with the same key.
    pub unique: bool,
}

impl IndexDecl {
    /// Declare a unique index.
    pub fn unique(id: IndexId) -> Self {
        IndexDecl { id, unique: true }
    }

    /// Declare a multi-valued index.
    pub fn multi(id: IndexId) -> Self {
        IndexDecl { id, unique: false }
    }
}

/// The embedder-supplied projection from rows to index keys.
///
/// Implementations must be pure and deterministic: projecting the same row
/// twice must yield byte-identical keys, since the table relies on key
/// equality for uniqueness checks and index reconciliation on replace.
pub trait Schema: Send + Sync {
    /// All indices declared over this table, in a stable order.
    fn indices(&self) -> &[IndexDecl];

    /// Project the key for `index` out of `row`.
    ///
    /// Called once per declared index on every insert/replace; implementors
    /// that do not care about a given index should still return a
    /// consistent (e.g. empty) key rather than panicking.
    fn project(&self, row: &[u8], index: IndexId) -> Vec<u8>;
}
