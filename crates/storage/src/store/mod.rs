//! The readable/writable/appendable/updatable store capability set (C2)
//!
//! A [`ReadableStore`] is the polymorphic record container every segment's
//! value store and every index file implements. Four further facets are
//! discoverable at runtime through capability probes that default to
//! absent; concrete types override only the probes they actually support.
//! Absence is signalled by `Option::None`, never by an `Err`.

pub mod btree_index;
pub mod fixedwidth;
pub mod frozen;
pub mod iter;
pub mod mock;

use std::path::Path;

use composite_core::{Result, SubId};

use crate::index::{ReadableIndex, WritableIndex};

/// The base capability every store implements: size queries, point reads,
/// forward/backward scans, and persistence.
pub trait ReadableStore: Send + Sync {
    /// Number of rows addressable in `[0, num_data_rows)`, including
    /// tombstoned slots that have not yet been compacted away.
    fn num_data_rows(&self) -> usize;

    /// On-disk footprint in bytes, as last computed (an estimate is fine;
    /// it only gates rollover/compaction heuristics).
    fn data_storage_size(&self) -> u64;

    /// In-memory footprint once fully inflated (decompressed/decoded).
    fn data_inflate_size(&self) -> u64;

    /// Append the row at `id` to `out`. Implementations must not clear `out`
    /// first — callers may be accumulating into a reused scratch buffer.
    fn get_value_append(&self, id: SubId, out: &mut Vec<u8>) -> Result<()>;

    /// Persist this store under `path` (a single file; the segment picks
    /// the path and records it in the segment manifest).
    fn save(&self, path: &Path) -> Result<()>;

    /// Replace this store's contents with what's persisted at `path`.
    /// Always called once, immediately after construction by
    /// [`crate::registry::open_store`], before the store is shared.
    fn load(&mut self, path: &Path) -> Result<()>;

    /// Narrow to [`WritableStore`] if this store supports append, remove,
    /// and in-place replace.
    fn as_writable(&self) -> Option<&dyn WritableStore> {
        None
    }

    /// Narrow to [`AppendableStore`] if this store supports append only.
    fn as_appendable(&self) -> Option<&dyn AppendableStore> {
        None
    }

    /// Narrow to [`UpdatableStore`] if this store supports in-place update.
    fn as_updatable(&self) -> Option<&dyn UpdatableStore> {
        None
    }

    /// Narrow to [`ReadableIndex`] if this store is also an index file.
    fn as_readable_index(&self) -> Option<&dyn ReadableIndex> {
        None
    }

    /// Narrow to [`WritableIndex`] if this store is a mutable index file.
    fn as_writable_index(&self) -> Option<&dyn WritableIndex> {
        None
    }
}

/// Full read-write capability: append, remove, and in-place replace.
///
/// Mutating methods take `&self` — implementors guard their state with
/// interior mutability (a `parking_lot::Mutex`), which is what lets the
/// capability probes above hand out a `&dyn WritableStore` from a shared
/// `&self` reference in the first place. The composite table still
/// serializes all mutation of a given segment through its own write lock;
/// the store-level mutex exists only so stores remain safely callable
/// without that external discipline (see `SPEC_FULL.md` §5).
pub trait WritableStore: ReadableStore {
    /// Append `row`, returning the [`SubId`] it was assigned.
    fn append(&self, row: &[u8]) -> Result<SubId>;

    /// Remove the row at `id`, leaving a tombstone slot. `id` is never
    /// recycled within this store's lifetime.
    fn remove(&self, id: SubId) -> Result<()>;

    /// Overwrite the row at `id` in place.
    fn replace(&self, id: SubId, row: &[u8]) -> Result<()>;
}

/// Append-only capability, for stores whose layout cannot support removal
/// without a full re-encode (left to compaction).
pub trait AppendableStore: ReadableStore {
    /// Append `row`, returning the [`SubId`] it was assigned.
    fn append(&self, row: &[u8]) -> Result<SubId>;
}

/// In-place update capability. Implementations may transparently promote
/// their internal layout (e.g. fixed-width to variable-width records) the
/// first time an update no longer fits the current encoding.
pub trait UpdatableStore: ReadableStore {
    /// Overwrite the row at `id` with `row`, promoting layout if needed.
    fn update(&self, id: SubId, row: &[u8]) -> Result<()>;
}
