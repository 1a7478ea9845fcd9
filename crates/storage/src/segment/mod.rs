//! Segments (C5): the unit of storage owning one value-store/index set over
//! a contiguous row-id range.

pub mod bitset;
pub mod manifest;
pub mod readonly;
pub mod writable;

pub use readonly::ReadonlySegment;
pub use writable::WritableSegment;

use std::sync::Arc;

use crate::index::ReadableIndex;

/// Either a readonly or the (at most one) writable segment a table holds.
///
/// Cloning a `Segment` clones the `Arc`, not the underlying data — this is
/// what lets a table iterator snapshot the whole catalogue cheaply.
#[derive(Clone)]
pub enum Segment {
    /// An immutable, compacted segment.
    Readonly(Arc<ReadonlySegment>),
    /// The table's current mutable segment, or a just-frozen one awaiting
    /// compaction.
    Writable(Arc<WritableSegment>),
}

impl Segment {
    /// Number of row slots, including tombstoned ones.
    pub fn num_data_rows(&self) -> usize {
        match self {
            Segment::Readonly(s) => s.num_data_rows(),
            Segment::Writable(s) => s.num_data_rows(),
        }
    }

    /// On-disk footprint estimate.
    pub fn data_storage_size(&self) -> u64 {
        match self {
            Segment::Readonly(s) => s.data_storage_size(),
            Segment::Writable(s) => s.data_storage_size(),
        }
    }

    /// `true` if `sub` has been tombstoned within this segment.
    pub fn is_deleted(&self, sub: composite_core::SubId) -> bool {
        match self {
            Segment::Readonly(s) => s.is_deleted(sub),
            Segment::Writable(s) => s.is_deleted(sub),
        }
    }

    /// Read the row at `sub`.
    pub fn get_value(&self, sub: composite_core::SubId, out: &mut Vec<u8>) -> composite_core::Result<()> {
        match self {
            Segment::Readonly(s) => s.get_value(sub, out),
            Segment::Writable(s) => s.get_value(sub, out),
        }
    }

    /// Look up `key` in index `idx`, filtering out tombstoned hits.
    pub fn index_search_exact(&self, idx: composite_core::IndexId, key: &[u8]) -> Vec<composite_core::SubId> {
        match self {
            Segment::Readonly(s) => s.index_search_exact(idx, key),
            Segment::Writable(s) => s.index_search_exact(idx, key),
        }
    }

    /// The backing value store, for building default iterators.
    pub fn value_store(&self) -> Arc<dyn crate::store::ReadableStore> {
        match self {
            Segment::Readonly(s) => s.value_store(),
            Segment::Writable(s) => s.value_store(),
        }
    }

    /// The readable-index handle for `idx` on this segment, if declared.
    pub fn readable_index(&self, idx: composite_core::IndexId) -> Option<&dyn ReadableIndex> {
        match self {
            Segment::Readonly(s) => s.readable_index(idx),
            Segment::Writable(s) => s.readable_index(idx),
        }
    }

    /// `true` if this is the live (unfrozen) writable segment.
    pub fn is_live_writable(&self) -> bool {
        matches!(self, Segment::Writable(s) if !s.frozen())
    }

    /// This segment's on-disk directory.
    pub fn dir(&self) -> &std::path::Path {
        match self {
            Segment::Readonly(s) => s.dir(),
            Segment::Writable(s) => s.dir(),
        }
    }
}
