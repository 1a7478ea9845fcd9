//! A variable-width, mutable value store
//!
//! `MockValueStore` is the reference implementation that stands in for the
//! physical on-disk record codecs `spec.md` §1 treats as external
//! collaborators. It registers under the `.mock` suffix and supports the
//! full [`WritableStore`] facet (append, remove, replace), which is why
//! [`crate::segment::writable::WritableSegment`] builds its value store on
//! top of it.

use std::fs;
use std::path::Path;

use composite_core::{Error, Result, SubId};
use parking_lot::Mutex;

use super::{ReadableStore, WritableStore};

/// A row slot: `None` marks a tombstone left behind by `remove`.
type Slot = Option<Vec<u8>>;

/// In-memory, append/remove/replace-capable value store, persisted as a
/// single `bincode`-encoded file.
#[derive(Default)]
pub struct MockValueStore {
    rows: Mutex<Vec<Slot>>,
}

impl MockValueStore {
    /// An empty store, ready to accept inserts.
    pub fn new() -> Self {
        MockValueStore {
            rows: Mutex::new(Vec::new()),
        }
    }

    /// The registry factory for the `.mock` suffix.
    pub fn factory() -> Box<dyn ReadableStore> {
        Box::new(MockValueStore::new())
    }
}

impl ReadableStore for MockValueStore {
    fn num_data_rows(&self) -> usize {
        self.rows.lock().len()
    }

    fn data_storage_size(&self) -> u64 {
        self.rows
            .lock()
            .iter()
            .map(|s| s.as_ref().map_or(0, |r| r.len() as u64))
            .sum()
    }

    fn data_inflate_size(&self) -> u64 {
        self.data_storage_size()
    }

    fn get_value_append(&self, id: SubId, out: &mut Vec<u8>) -> Result<()> {
        let rows = self.rows.lock();
        match rows.get(id.get() as usize) {
            Some(Some(row)) => {
                out.extend_from_slice(row);
                Ok(())
            }
            Some(None) => Err(Error::InvariantViolated(format!(
                "read of tombstoned row {id}"
            ))),
            None => Err(Error::OutOfRange {
                id: composite_core::RowId(id.get() as i64),
                max: composite_core::RowId(rows.len() as i64),
            }),
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        let rows = self.rows.lock();
        let bytes = bincode::serialize(&*rows)
            .map_err(|e| Error::corruption(path, format!("encode failed: {e}")))?;
        fs::write(path, bytes).map_err(|e| Error::io(path, e))
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        let rows: Vec<Slot> =
            bincode::deserialize(&bytes).map_err(|e| Error::corruption(path, format!("{e}")))?;
        *self.rows.get_mut() = rows;
        Ok(())
    }

    fn as_writable(&self) -> Option<&dyn WritableStore> {
        Some(self)
    }
}

impl WritableStore for MockValueStore {
    fn append(&self, row: &[u8]) -> Result<SubId> {
        let mut rows = self.rows.lock();
        let id = SubId(rows.len() as u32);
        rows.push(Some(row.to_vec()));
        Ok(id)
    }

    fn remove(&self, id: SubId) -> Result<()> {
        let mut rows = self.rows.lock();
        match rows.get_mut(id.get() as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            Some(None) => Ok(()),
            None => Err(Error::OutOfRange {
                id: composite_core::RowId(id.get() as i64),
                max: composite_core::RowId(rows.len() as i64),
            }),
        }
    }

    fn replace(&self, id: SubId, row: &[u8]) -> Result<()> {
        let mut rows = self.rows.lock();
        match rows.get_mut(id.get() as usize) {
            Some(slot) => {
                *slot = Some(row.to_vec());
                Ok(())
            }
            None => Err(Error::OutOfRange {
                id: composite_core::RowId(id.get() as i64),
                max: composite_core::RowId(rows.len() as i64),
            }),
        }
    }
}
