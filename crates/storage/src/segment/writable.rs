//! Writable segments (C5)
//!
//! Owns a writable value store plus a writable index per column. At most
//! one segment in a table is writable at a time; it is always the last
//! segment until it is frozen and handed to compaction (`spec.md` §3).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use composite_core::{Error, IndexDecl, IndexId, Result, Schema, SubId};
use parking_lot::RwLock;

use crate::index::ReadableIndex;
use crate::registry;
use crate::segment::bitset::Bitset;
use crate::segment::manifest::{IndexEntry, SegmentManifest, ValueStoreEntry};
use crate::store::mock::MockValueStore;
use crate::store::ReadableStore;

const VALUE_STORE_FILE: &str = "values.mock";

/// A mutable segment accepting insert, remove, and replace.
pub struct WritableSegment {
    dir: PathBuf,
    value_store: Arc<dyn ReadableStore>,
    indices: Vec<(IndexDecl, Arc<dyn ReadableStore>)>,
    delete_bitmap: RwLock<Bitset>,
    frozen: AtomicBool,
}

impl WritableSegment {
    /// Create a brand new, empty writable segment under `dir`, with one
    /// index store per index declared in `schema`.
    pub fn create(dir: &Path, schema: &dyn Schema) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let value_store: Arc<dyn ReadableStore> = Arc::new(MockValueStore::new());
        let mut indices = Vec::new();
        let mut index_entries = Vec::new();
        for decl in schema.indices() {
            let file_name = format!("idx.{}.btreeidx", decl.id.0);
            let store: Arc<dyn ReadableStore> =
                Arc::new(crate::store::btree_index::BTreeIndexStore::new());
            indices.push((*decl, Arc::clone(&store)));
            index_entries.push(IndexEntry {
                index_id: decl.id.0,
                column_name: format!("idx{}", decl.id.0),
                unique: decl.unique,
                file_name,
            });
        }

        let manifest = SegmentManifest {
            value_store: ValueStoreEntry {
                file_name: VALUE_STORE_FILE.to_string(),
            },
            indices: index_entries,
            delete_bitmap_file: Some("isDel.rs".to_string()),
        };
        manifest.save(dir)?;

        Ok(WritableSegment {
            dir: dir.to_path_buf(),
            value_store,
            indices,
            delete_bitmap: RwLock::new(Bitset::new()),
            frozen: AtomicBool::new(false),
        })
    }

    /// Reopen a previously-created writable segment from `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let manifest = SegmentManifest::load(dir)?;
        let value_store: Arc<dyn ReadableStore> =
            Arc::from(registry::open_store(dir, &manifest.value_store.file_name)?);

        let mut indices = Vec::new();
        for entry in &manifest.indices {
            let store = registry::open_store(dir, &entry.file_name)?;
            let decl = if entry.unique {
                IndexDecl::unique(entry.index_id())
            } else {
                IndexDecl::multi(entry.index_id())
            };
            indices.push((decl, Arc::from(store)));
        }

        let delete_bitmap = match &manifest.delete_bitmap_file {
            Some(file_name) => {
                let path = dir.join(file_name);
                if path.exists() {
                    let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
                    bincode::deserialize(&bytes)
                        .map_err(|e| Error::corruption(&path, format!("{e}")))?
                } else {
                    Bitset::new()
                }
            }
            None => Bitset::new(),
        };

        Ok(WritableSegment {
            dir: dir.to_path_buf(),
            value_store,
            indices,
            delete_bitmap: RwLock::new(delete_bitmap),
            frozen: AtomicBool::new(false),
        })
    }

    /// `true` once `freeze` has been called; mutating calls then refuse.
    pub fn frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Freeze this segment, the precondition for compaction (`spec.md` §4.5).
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Number of row slots, including tombstoned ones.
    pub fn num_data_rows(&self) -> usize {
        self.value_store.num_data_rows()
    }

    /// Current on-disk footprint estimate, used by rollover thresholds.
    pub fn data_storage_size(&self) -> u64 {
        self.value_store.data_storage_size()
    }

    /// The backing value store, for building default iterators.
    pub fn value_store(&self) -> Arc<dyn ReadableStore> {
        Arc::clone(&self.value_store)
    }

    /// This segment's on-disk directory, e.g. `.../wr-0007`.
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

    /// Record a bitmap-only tombstone for `sub`, without touching indices.
    /// Used once this segment is frozen: its indices are about to be
    /// rebuilt from scratch by compaction anyway, and a frozen segment
    /// otherwise refuses mutating calls (`spec.md` §4.5).
    pub fn mark_deleted(&self, sub: SubId) {
        self.delete_bitmap.write().set(sub.get() as usize);
    }

    /// Declared indices on this segment.
    pub fn indices(&self) -> &[(IndexDecl, Arc<dyn ReadableStore>)] {
        &self.indices
    }

    /// The readable-index handle for `idx`, if declared on this segment.
    pub fn readable_index(&self, idx: IndexId) -> Option<&dyn ReadableIndex> {
        self.indices.iter().find(|(decl, _)| decl.id == idx)?.1.as_readable_index()
    }

    /// Look up `key` in index `idx`, filtering out tombstoned hits.
    pub fn index_search_exact(&self, idx: IndexId, key: &[u8]) -> Vec<SubId> {
        let Some((_, store)) = self.indices.iter().find(|(decl, _)| decl.id == idx) else {
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

    /// Append `row`, synchronising every declared index (`spec.md` §4.5).
    pub fn insert(&self, row: &[u8], schema: &dyn Schema) -> Result<SubId> {
        if self.frozen() {
            return Err(Error::UnsupportedOperation("insert on a frozen segment"));
        }
        let writable = self
            .value_store
            .as_writable()
            .ok_or_else(|| Error::InvariantViolated("writable segment value store lost its Writable facet".into()))?;
        let sub = writable.append(row)?;
        for (decl, store) in &self.indices {
            let key = schema.project(row, decl.id);
            if let Some(index) = store.as_writable_index() {
                index.insert(&key, sub);
            }
        }
        Ok(sub)
    }

    /// Tombstone the row at `sub` and remove its index entries.
    pub fn remove(&self, sub: SubId, schema: &dyn Schema) -> Result<()> {
        if self.frozen() {
            return Err(Error::UnsupportedOperation("remove on a frozen segment"));
        }
        let mut old = Vec::new();
        self.value_store.get_value_append(sub, &mut old)?;
        let writable = self
            .value_store
            .as_writable()
            .ok_or_else(|| Error::InvariantViolated("writable segment value store lost its Writable facet".into()))?;
        writable.remove(sub)?;
        for (decl, store) in &self.indices {
            if let Some(index) = store.as_writable_index() {
                index.remove(&schema.project(&old, decl.id), sub);
            }
        }
        self.delete_bitmap.write().set(sub.get() as usize);
        Ok(())
    }

    /// Overwrite the row at `sub`, reconciling any index whose projected
    /// key changed (`spec.md` §4.6.4 `replaceSyncIndex`).
    pub fn replace(&self, sub: SubId, new_row: &[u8], schema: &dyn Schema) -> Result<()> {
        if self.frozen() {
            return Err(Error::UnsupportedOperation("replace on a frozen segment"));
        }
        let mut old = Vec::new();
        self.value_store.get_value_append(sub, &mut old)?;
        let writable = self
            .value_store
            .as_writable()
            .ok_or_else(|| Error::InvariantViolated("writable segment value store lost its Writable facet".into()))?;
        writable.replace(sub, new_row)?;
        for (decl, store) in &self.indices {
            let old_key = schema.project(&old, decl.id);
            let new_key = schema.project(new_row, decl.id);
            if old_key != new_key {
                if let Some(index) = store.as_writable_index() {
                    index.remove(&old_key, sub);
                    index.insert(&new_key, sub);
                }
            }
        }
        Ok(())
    }

    /// Persist manifest-unrelated mutable state (the delete-bitmap) at a
    /// flush boundary.
    pub fn flush_delete_bitmap(&self) -> Result<()> {
        let path = self.dir.join("isDel.rs");
        let bitmap = self.delete_bitmap.read();
        let bytes = bincode::serialize(&*bitmap)
            .map_err(|e| Error::corruption(&path, format!("encode failed: {e}")))?;
        fs::write(&path, bytes).map_err(|e| Error::io(&path, e))
    }

    /// Persist the value store and every index store under this segment's directory.
    pub fn flush(&self) -> Result<()> {
        self.value_store.save(&self.dir.join(VALUE_STORE_FILE))?;
        for (decl, store) in &self.indices {
            store.save(&self.dir.join(format!("idx.{}.btreeidx", decl.id.0)))?;
        }
        self.flush_delete_bitmap()
    }
}
