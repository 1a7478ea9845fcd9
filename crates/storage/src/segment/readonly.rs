//! Readonly segments (C5)
//!
//! Owns one value store plus one [`ReadableIndex`] per declared index, for
//! a contiguous, immutable row-id range. Reads are wait-free: the only
//! mutation a readonly segment ever sees is a tombstone bit set by the
//! table on `removeRow` (`spec.md` §4.6.5).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use composite_core::{Error, IndexId, Result, SubId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::index::ReadableIndex;
use crate::registry;
use crate::segment::bitset::Bitset;
use crate::segment::manifest::SegmentManifest;
use crate::store::ReadableStore;

/// An immutable, compressed (conceptually — the concrete stores here are
/// plain in-memory stand-ins, see `SPEC_FULL.md` §4.1) segment.
///
/// Indexed by `FxHashMap`, the non-cryptographic hasher the teacher reaches
/// for on its own lookup-heavy maps (`strata-storage::sharded::Shard::data`)
/// — a readonly segment's index map is built once and then probed on every
/// lookup, never under adversarial key input.
pub struct ReadonlySegment {
    dir: PathBuf,
    value_store: Arc<dyn ReadableStore>,
    indices: FxHashMap<IndexId, Arc<dyn ReadableStore>>,
    delete_bitmap: RwLock<Bitset>,
}

impl ReadonlySegment {
    /// Open a readonly segment from `dir`, reading its manifest and
    /// materializing each file through the store registry.
    pub fn open(dir: &Path) -> Result<Self> {
        let manifest = SegmentManifest::load(dir)?;
        let value_store: Arc<dyn ReadableStore> =
            Arc::from(registry::open_store(dir, &manifest.value_store.file_name)?);
        let num_rows = value_store.num_data_rows();

        let mut indices = FxHashMap::default();
        for entry in &manifest.indices {
            let store = registry::open_store(dir, &entry.file_name)?;
            indices.insert(entry.index_id(), Arc::from(store));
        }

        let delete_bitmap = match &manifest.delete_bitmap_file {
            Some(file_name) => load_bitmap(&dir.join(file_name))?,
            None => Bitset::with_len(num_rows),
        };

        Ok(ReadonlySegment {
            dir: dir.to_path_buf(),
            value_store,
            indices,
            delete_bitmap: RwLock::new(delete_bitmap),
        })
    }

    /// Build a readonly segment directly from already-constructed stores
    /// (the path compaction uses) and persist it under `dir`.
    pub fn build(
        dir: &Path,
        value_store: Arc<dyn ReadableStore>,
        indices: HashMap<IndexId, Arc<dyn ReadableStore>>,
        index_meta: &[(IndexId, String, bool)],
        value_store_file: &str,
    ) -> Result<Self> {
        let indices: FxHashMap<IndexId, Arc<dyn ReadableStore>> = indices.into_iter().collect();
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        value_store.save(&dir.join(value_store_file))?;

        let mut index_entries = Vec::new();
        for (id, column_name, unique) in index_meta {
            let file_name = format!("idx.{}.btreeidx", id.0);
            indices
                .get(id)
                .ok_or_else(|| Error::InvariantViolated(format!("missing index store for {id}")))?
                .save(&dir.join(&file_name))?;
            index_entries.push(crate::segment::manifest::IndexEntry {
                index_id: id.0,
                column_name: column_name.clone(),
                unique: *unique,
                file_name,
            });
        }

        let manifest = SegmentManifest {
            value_store: crate::segment::manifest::ValueStoreEntry {
                file_name: value_store_file.to_string(),
            },
            indices: index_entries,
            delete_bitmap_file: None,
        };
        manifest.save(dir)?;

        Ok(ReadonlySegment {
            dir: dir.to_path_buf(),
            value_store,
            indices,
            delete_bitmap: RwLock::new(Bitset::new()),
        })
    }

    /// Number of row slots, including tombstoned ones.
    pub fn num_data_rows(&self) -> usize {
        self.value_store.num_data_rows()
    }

    /// Total on-disk footprint of the value store.
    pub fn data_storage_size(&self) -> u64 {
        self.value_store.data_storage_size()
    }

    /// The backing value store, for building default iterators.
    pub fn value_store(&self) -> Arc<dyn ReadableStore> {
        Arc::clone(&self.value_store)
    }

    /// This segment's on-disk directory, e.g. `.../rd-0003`.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read the row at `sub`.
    pub fn get_value(&self, sub: SubId, out: &mut Vec<u8>) -> Result<()> {
        self.value_store.get_value_append(sub, out)
    }

    /// `true` if `sub` has been tombstoned.
    pub fn is_deleted(&self, sub: SubId) -> bool {
        self.delete_bitmap.read().get(sub.get() as usize)
    }

    /// Record a logical tombstone for `sub` (`spec.md` §4.6.5).
    pub fn mark_deleted(&self, sub: SubId) {
        self.delete_bitmap.write().set(sub.get() as usize);
    }

    /// Look up `key` in index `idx`, filtering out tombstoned hits.
    pub fn index_search_exact(&self, idx: IndexId, key: &[u8]) -> Vec<SubId> {
        let Some(store) = self.indices.get(&idx) else {
            return Vec::new();
        };
        let Some(index) = store.as_readable_index() else {
            return Vec::new();
        };
        index
            .search_exact(key)
            .into_iter()
            .filter(|sub| !self.is_deleted(*sub))
            .collect()
    }

    /// The readable-index handle for `idx`, if declared on this segment.
    pub fn readable_index(&self, idx: IndexId) -> Option<&dyn ReadableIndex> {
        self.indices.get(&idx)?.as_readable_index()
    }

    /// Declared index ids on this segment.
    pub fn index_ids(&self) -> impl Iterator<Item = IndexId> + '_ {
        self.indices.keys().copied()
    }

    /// Persist the delete-bitmap under this segment's directory (called
    /// after marking tombstones, to keep on-disk state current at flush
    /// boundaries — `spec.md` §1: "durability only at flush boundaries").
    pub fn flush_delete_bitmap(&self) -> Result<()> {
        let path = self.dir.join("isDel.rs");
        let bitmap = self.delete_bitmap.read();
        let bytes = bincode::serialize(&*bitmap)
            .map_err(|e| Error::corruption(&path, format!("encode failed: {e}")))?;
        fs::write(&path, bytes).map_err(|e| Error::io(&path, e))
    }
}

fn load_bitmap(path: &Path) -> Result<Bitset> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    bincode::deserialize(&bytes).map_err(|e| Error::corruption(path, format!("{e}")))
}
