//! A `BTreeMap`-backed readable/writable index
//!
//! Stands in for the succinct-trie (`.nlt`) and bitmap-index (`.bitmap`)
//! codecs `spec.md` §1/§6 treat as external collaborators. Registers under
//! the `.btreeidx` suffix and supports both unique and multi indices —
//! uniqueness is enforced by the table (`spec.md` §4.6.3), not the index
//! itself, so the same type backs both kinds.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use composite_core::{Error, Result, SubId};
use parking_lot::Mutex;

use crate::index::{ReadableIndex, WritableIndex};
use crate::store::ReadableStore;

/// Ordered key -> `SubId` set index.
#[derive(Default)]
pub struct BTreeIndexStore {
    map: Mutex<BTreeMap<Vec<u8>, Vec<SubId>>>,
}

impl BTreeIndexStore {
    /// An empty index.
    pub fn new() -> Self {
        BTreeIndexStore::default()
    }

    /// Build directly from already-collected `(key, id)` pairs — the path
    /// compaction uses when it rebuilds an index in one batch from a row
    /// stream (`spec.md` §4.6.7).
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Vec<u8>, SubId)>) -> Self {
        let mut map: BTreeMap<Vec<u8>, Vec<SubId>> = BTreeMap::new();
        for (key, id) in pairs {
            map.entry(key).or_default().push(id);
        }
        BTreeIndexStore {
            map: Mutex::new(map),
        }
    }

    /// The registry factory for the `.btreeidx` suffix.
    pub fn factory() -> Box<dyn ReadableStore> {
        Box::new(BTreeIndexStore::new())
    }
}

impl ReadableStore for BTreeIndexStore {
    fn num_data_rows(&self) -> usize {
        self.map.lock().values().map(|v| v.len()).sum()
    }

    fn data_storage_size(&self) -> u64 {
        self.map
            .lock()
            .iter()
            .map(|(k, v)| (k.len() + v.len() * 4) as u64)
            .sum()
    }

    fn data_inflate_size(&self) -> u64 {
        self.data_storage_size()
    }

    fn get_value_append(&self, _id: SubId, _out: &mut Vec<u8>) -> Result<()> {
        Err(Error::UnsupportedOperation(
            "BTreeIndexStore is not a value store",
        ))
    }

    fn save(&self, path: &Path) -> Result<()> {
        let map = self.map.lock();
        let flat: Vec<(Vec<u8>, Vec<SubId>)> = map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let encoded: Vec<(Vec<u8>, Vec<u32>)> = flat
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().map(SubId::get).collect()))
            .collect();
        let bytes = bincode::serialize(&encoded)
            .map_err(|e| Error::corruption(path, format!("encode failed: {e}")))?;
        fs::write(path, bytes).map_err(|e| Error::io(path, e))
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        let encoded: Vec<(Vec<u8>, Vec<u32>)> =
            bincode::deserialize(&bytes).map_err(|e| Error::corruption(path, format!("{e}")))?;
        let map = encoded
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().map(SubId).collect()))
            .collect();
        *self.map.get_mut() = map;
        Ok(())
    }

    fn as_readable_index(&self) -> Option<&dyn ReadableIndex> {
        Some(self)
    }

    fn as_writable_index(&self) -> Option<&dyn WritableIndex> {
        Some(self)
    }
}

impl ReadableIndex for BTreeIndexStore {
    fn search_exact(&self, key: &[u8]) -> Vec<SubId> {
        self.map.lock().get(key).cloned().unwrap_or_default()
    }

    fn iter_forward(&self) -> Vec<(Vec<u8>, SubId)> {
        let map = self.map.lock();
        let mut out = Vec::with_capacity(map.len());
        for (key, ids) in map.iter() {
            let mut ids = ids.clone();
            ids.sort_unstable();
            for id in ids {
                out.push((key.clone(), id));
            }
        }
        out
    }

    fn key_count(&self) -> usize {
        self.map.lock().len()
    }
}

impl WritableIndex for BTreeIndexStore {
    fn insert(&self, key: &[u8], id: SubId) {
        self.map.lock().entry(key.to_vec()).or_default().push(id);
    }

    fn remove(&self, key: &[u8], id: SubId) {
        let mut map = self.map.lock();
        if let Some(ids) = map.get_mut(key) {
            ids.retain(|&existing| existing != id);
            if ids.is_empty() {
                map.remove(key);
            }
        }
    }
}
