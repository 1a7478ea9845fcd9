//! Index capability traits
//!
//! An index maps `(indexId, key)` to a set of local [`SubId`]s within one
//! segment. Index *files* are stores too (`spec.md` §6: "One file per
//! index... File suffix selects the decoder via the store registry"), so a
//! concrete index type implements [`crate::store::ReadableStore`] and
//! overrides `as_readable_index`/`as_writable_index` to expose these traits.

use composite_core::SubId;

/// Key-ordered and key-exact lookup over one indexed column.
pub trait ReadableIndex: Send + Sync {
    /// All live `SubId`s currently mapped from `key`. Empty if none.
    ///
    /// Does not filter tombstoned rows — callers (the segment, the table)
    /// cross-reference the segment's delete-bitmap, since the index itself
    /// has no notion of liveness.
    fn search_exact(&self, key: &[u8]) -> Vec<SubId>;

    /// All `(key, id)` pairs in ascending key order, ties broken by `id`
    /// ascending. Used to build merged per-index iterators across segments.
    fn iter_forward(&self) -> Vec<(Vec<u8>, SubId)>;

    /// Number of distinct keys currently indexed.
    fn key_count(&self) -> usize;
}

/// Mutation surface for an index backing a writable segment.
pub trait WritableIndex: ReadableIndex {
    /// Record that `key` now maps to `id`.
    fn insert(&self, key: &[u8], id: SubId);

    /// Remove the `(key, id)` mapping. A no-op if absent.
    fn remove(&self, key: &[u8], id: SubId);
}
