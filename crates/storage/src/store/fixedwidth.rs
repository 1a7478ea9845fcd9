//! A fixed-width record store that promotes to variable-width on demand
//!
//! Registers under the `.fixlen` suffix (`spec.md` §6 names `.fixlen` as an
//! example store type that must be registerable). Supports
//! [`AppendableStore`] and [`UpdatableStore`] but not [`WritableStore`]:
//! once a row no longer fits the fixed record width, `update` promotes the
//! whole store to a variable-width layout rather than fail, per `spec.md`
//! §4.2 ("Updatable... may promote the underlying layout... on first
//! non-compatible update").

use std::fs;
use std::path::Path;

use composite_core::{Error, Result, RowId, SubId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{AppendableStore, ReadableStore, UpdatableStore};

#[derive(Serialize, Deserialize)]
enum Layout {
    /// All rows share `width` bytes.
    Fixed { width: usize, rows: Vec<Vec<u8>> },
    /// Rows promoted to independent lengths.
    Variable { rows: Vec<Vec<u8>> },
}

impl Layout {
    fn rows(&self) -> &[Vec<u8>] {
        match self {
            Layout::Fixed { rows, .. } => rows,
            Layout::Variable { rows } => rows,
        }
    }

    fn rows_mut(&mut self) -> &mut Vec<Vec<u8>> {
        match self {
            Layout::Fixed { rows, .. } => rows,
            Layout::Variable { rows } => rows,
        }
    }
}

/// Append/update-capable store with fixed-width -> variable-width promotion.
pub struct FixedWidthStore {
    layout: Mutex<Layout>,
}

impl Default for FixedWidthStore {
    fn default() -> Self {
        FixedWidthStore {
            layout: Mutex::new(Layout::Variable { rows: Vec::new() }),
        }
    }
}

impl FixedWidthStore {
    /// An empty store that fixes its width to that of the first appended row.
    pub fn new() -> Self {
        FixedWidthStore {
            layout: Mutex::new(Layout::Fixed {
                width: 0,
                rows: Vec::new(),
            }),
        }
    }

    /// The registry factory for the `.fixlen` suffix.
    pub fn factory() -> Box<dyn ReadableStore> {
        Box::new(FixedWidthStore::new())
    }

    /// `true` once this store has promoted away from fixed-width.
    pub fn is_promoted(&self) -> bool {
        matches!(&*self.layout.lock(), Layout::Variable { .. })
    }
}

impl ReadableStore for FixedWidthStore {
    fn num_data_rows(&self) -> usize {
        self.layout.lock().rows().len()
    }

    fn data_storage_size(&self) -> u64 {
        self.layout
            .lock()
            .rows()
            .iter()
            .map(|r| r.len() as u64)
            .sum()
    }

    fn data_inflate_size(&self) -> u64 {
        self.data_storage_size()
    }

    fn get_value_append(&self, id: SubId, out: &mut Vec<u8>) -> Result<()> {
        let layout = self.layout.lock();
        match layout.rows().get(id.get() as usize) {
            Some(row) => {
                out.extend_from_slice(row);
                Ok(())
            }
            None => Err(Error::OutOfRange {
                id: RowId(id.get() as i64),
                max: RowId(layout.rows().len() as i64),
            }),
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        let layout = self.layout.lock();
        let bytes = bincode::serialize(&*layout)
            .map_err(|e| Error::corruption(path, format!("encode failed: {e}")))?;
        fs::write(path, bytes).map_err(|e| Error::io(path, e))
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        let layout: Layout =
            bincode::deserialize(&bytes).map_err(|e| Error::corruption(path, format!("{e}")))?;
        *self.layout.get_mut() = layout;
        Ok(())
    }

    fn as_appendable(&self) -> Option<&dyn AppendableStore> {
        Some(self)
    }

    fn as_updatable(&self) -> Option<&dyn UpdatableStore> {
        Some(self)
    }
}

impl AppendableStore for FixedWidthStore {
    fn append(&self, row: &[u8]) -> Result<SubId> {
        let mut layout = self.layout.lock();
        match &mut *layout {
            Layout::Fixed { width, rows } => {
                if rows.is_empty() {
                    *width = row.len();
                }
                if row.len() != *width {
                    let w = *width;
                    let mut promoted: Vec<Vec<u8>> = std::mem::take(rows);
                    promoted.push(row.to_vec());
                    let id = SubId((promoted.len() - 1) as u32);
                    *layout = Layout::Variable { rows: promoted };
                    tracing::debug!(old_width = w, new_len = row.len(), "promoted to variable-width layout");
                    return Ok(id);
                }
                rows.push(row.to_vec());
                Ok(SubId((rows.len() - 1) as u32))
            }
            Layout::Variable { rows } => {
                rows.push(row.to_vec());
                Ok(SubId((rows.len() - 1) as u32))
            }
        }
    }
}

impl UpdatableStore for FixedWidthStore {
    fn update(&self, id: SubId, row: &[u8]) -> Result<()> {
        let mut layout = self.layout.lock();
        let needs_promotion = matches!(&*layout, Layout::Fixed { width, .. } if *width != row.len());
        if needs_promotion {
            let rows = std::mem::take(layout.rows_mut());
            *layout = Layout::Variable { rows };
            tracing::debug!(id = id.get(), "update triggered promotion to variable-width layout");
        }
        match layout.rows_mut().get_mut(id.get() as usize) {
            Some(slot) => {
                *slot = row.to_vec();
                Ok(())
            }
            None => Err(Error::OutOfRange {
                id: RowId(id.get() as i64),
                max: RowId(layout.rows().len() as i64),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_fixed_width_while_rows_match() {
        let store = FixedWidthStore::new();
        store.append(b"abcd").unwrap();
        store.append(b"efgh").unwrap();
        assert!(!store.is_promoted());
    }

    #[test]
    fn append_promotes_on_width_mismatch() {
        let store = FixedWidthStore::new();
        store.append(b"abcd").unwrap();
        store.append(b"longer-row").unwrap();
        assert!(store.is_promoted());
        let mut out = Vec::new();
        store.get_value_append(SubId(1), &mut out).unwrap();
        assert_eq!(out, b"longer-row");
    }

    #[test]
    fn update_promotes_on_width_mismatch() {
        let store = FixedWidthStore::new();
        let id = store.append(b"abcd").unwrap();
        store.update(id, b"much longer value").unwrap();
        assert!(store.is_promoted());
        let mut out = Vec::new();
        store.get_value_append(id, &mut out).unwrap();
        assert_eq!(out, b"much longer value");
    }

    #[test]
    fn does_not_expose_writable_facet() {
        let store = FixedWidthStore::new();
        assert!(store.as_writable().is_none());
    }
}
