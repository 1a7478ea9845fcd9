//! An immutable, densely-packed value store
//!
//! `FrozenValueStore` is what compaction writes: a flat, tombstone-free
//! vector of row bodies. It registers under the `.rovec` suffix and never
//! exposes any mutation facet, matching "Readonly segment... immutable,
//! compressed, may be memory-mapped" (`spec.md` §3) — the mmap/compression
//! themselves are the out-of-scope physical codec this stands in for.

use std::fs;
use std::path::Path;

use composite_core::{Error, Result, RowId, SubId};

use super::ReadableStore;

/// Dense, immutable row storage.
#[derive(Default)]
pub struct FrozenValueStore {
    rows: Vec<Vec<u8>>,
}

impl FrozenValueStore {
    /// Build directly from an already-materialized row sequence (the usual
    /// path: compaction streams live rows into this constructor).
    pub fn from_rows(rows: Vec<Vec<u8>>) -> Self {
        FrozenValueStore { rows }
    }

    /// The registry factory for the `.rovec` suffix.
    pub fn factory() -> Box<dyn ReadableStore> {
        Box::new(FrozenValueStore::default())
    }
}

impl ReadableStore for FrozenValueStore {
    fn num_data_rows(&self) -> usize {
        self.rows.len()
    }

    fn data_storage_size(&self) -> u64 {
        self.rows.iter().map(|r| r.len() as u64).sum()
    }

    fn data_inflate_size(&self) -> u64 {
        self.data_storage_size()
    }

    fn get_value_append(&self, id: SubId, out: &mut Vec<u8>) -> Result<()> {
        match self.rows.get(id.get() as usize) {
            Some(row) => {
                out.extend_from_slice(row);
                Ok(())
            }
            None => Err(Error::OutOfRange {
                id: RowId(id.get() as i64),
                max: RowId(self.rows.len() as i64),
            }),
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(&self.rows)
            .map_err(|e| Error::corruption(path, format!("encode failed: {e}")))?;
        fs::write(path, bytes).map_err(|e| Error::io(path, e))
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        self.rows =
            bincode::deserialize(&bytes).map_err(|e| Error::corruption(path, format!("{e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.rovec");
        let store = FrozenValueStore::from_rows(vec![b"a".to_vec(), b"b".to_vec()]);
        store.save(&path).unwrap();

        let mut reloaded = FrozenValueStore::default();
        reloaded.load(&path).unwrap();
        assert_eq!(reloaded.num_data_rows(), 2);
        let mut out = Vec::new();
        reloaded.get_value_append(SubId(0), &mut out).unwrap();
        assert_eq!(out, b"a");
    }

    #[test]
    fn exposes_no_mutation_facet() {
        let store = FrozenValueStore::from_rows(vec![b"a".to_vec()]);
        assert!(store.as_writable().is_none());
        assert!(store.as_appendable().is_none());
        assert!(store.as_updatable().is_none());
    }
}
