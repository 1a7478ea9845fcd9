//! MultiPartStore (C4)
//!
//! Concatenates an ordered sequence of child stores into one logical row
//! sequence without copying, used during compaction to present a combined
//! view of the candidate segments' value stores. Grounded directly on
//! `MultiPartStore` in `original_source/src/terark/db/db_store.cpp`:
//! `m_rowNumVec` prefix sums, `upper_bound` resolution, `save` emitting
//! `base.<NNNN>`, and `load` being invalid (constructed in memory only).

use std::path::Path;
use std::sync::Arc;

use composite_core::{Error, Result, RowId, SubId};

use crate::store::iter::StoreIterator;
use crate::store::ReadableStore;

/// Read-only concatenation of child stores.
pub struct MultiPartStore {
    parts: Vec<Arc<dyn ReadableStore>>,
    row_num_vec: Vec<i64>,
}

impl MultiPartStore {
    /// Build a view over `parts`, computing the prefix-sum vector once.
    pub fn new(parts: Vec<Arc<dyn ReadableStore>>) -> Self {
        let mut row_num_vec = Vec::with_capacity(parts.len() + 1);
        let mut total = 0i64;
        row_num_vec.push(0);
        for part in &parts {
            total += part.num_data_rows() as i64;
            row_num_vec.push(total);
        }
        MultiPartStore { parts, row_num_vec }
    }

    /// Resolve a global id to `(part index, local SubId)`.
    fn resolve(&self, id: i64) -> Result<(usize, SubId)> {
        let max = *self.row_num_vec.last().unwrap_or(&0);
        if id < 0 || id >= max {
            return Err(Error::OutOfRange {
                id: RowId(id),
                max: RowId(max),
            });
        }
        let part_idx = self
            .row_num_vec
            .partition_point(|&boundary| boundary <= id)
            - 1;
        let base = self.row_num_vec[part_idx];
        Ok((part_idx, SubId((id - base) as u32)))
    }

    fn create_iter_forward(self: &Arc<Self>) -> MultiPartForwardIter {
        MultiPartForwardIter {
            owner: Arc::clone(self),
            part_idx: 0,
            id: 0,
        }
    }

    fn create_iter_backward(self: &Arc<Self>) -> MultiPartBackwardIter {
        let parts = self.parts.len();
        let rows = *self.row_num_vec.last().unwrap_or(&0);
        MultiPartBackwardIter {
            owner: Arc::clone(self),
            part_idx: parts,
            id: rows,
        }
    }
}

impl ReadableStore for MultiPartStore {
    fn num_data_rows(&self) -> usize {
        *self.row_num_vec.last().unwrap_or(&0) as usize
    }

    fn data_storage_size(&self) -> u64 {
        self.parts.iter().map(|p| p.data_storage_size()).sum()
    }

    fn data_inflate_size(&self) -> u64 {
        self.parts.iter().map(|p| p.data_inflate_size()).sum()
    }

    fn get_value_append(&self, id: SubId, out: &mut Vec<u8>) -> Result<()> {
        let (part_idx, local) = self.resolve(id.get() as i64)?;
        self.parts[part_idx].get_value_append(local, out)
    }

    fn save(&self, path: &Path) -> Result<()> {
        for (i, part) in self.parts.iter().enumerate() {
            let part_path = path.with_extension(format!("{:04}", i));
            part.save(&part_path)?;
        }
        Ok(())
    }

    fn load(&mut self, _path: &Path) -> Result<()> {
        Err(Error::UnsupportedOperation(
            "MultiPartStore::load — children are loaded individually through the registry; \
             a MultiPartStore is only ever constructed in memory during compaction",
        ))
    }
}

/// Ascending scan that crosses part boundaries as the prefix sum advances.
pub struct MultiPartForwardIter {
    owner: Arc<MultiPartStore>,
    part_idx: usize,
    id: i64,
}

impl StoreIterator for MultiPartForwardIter {
    fn increment(&mut self) -> Option<(SubId, Vec<u8>)> {
        if self.owner.parts.is_empty() {
            return None;
        }
        if self.id < self.owner.row_num_vec[self.part_idx + 1] {
            // still inside the current part
        } else if self.part_idx + 1 < self.owner.parts.len() {
            self.part_idx += 1;
        } else {
            return None;
        }
        let id = self.id;
        self.id += 1;
        let base = self.owner.row_num_vec[self.part_idx];
        let mut buf = Vec::new();
        self.owner.parts[self.part_idx]
            .get_value_append(SubId((id - base) as u32), &mut buf)
            .ok()?;
        Some((SubId(id as u32), buf))
    }

    fn seek_exact(&mut self, id: SubId) -> Option<Vec<u8>> {
        let (part_idx, local) = self.owner.resolve(id.get() as i64).ok()?;
        let mut buf = Vec::new();
        self.owner.parts[part_idx].get_value_append(local, &mut buf).ok()?;
        self.part_idx = part_idx;
        self.id = id.get() as i64 + 1;
        Some(buf)
    }

    fn reset(&mut self) {
        self.part_idx = 0;
        self.id = 0;
    }
}

/// Descending scan that crosses part boundaries as the prefix sum recedes.
pub struct MultiPartBackwardIter {
    owner: Arc<MultiPartStore>,
    part_idx: usize,
    id: i64,
}

impl StoreIterator for MultiPartBackwardIter {
    fn increment(&mut self) -> Option<(SubId, Vec<u8>)> {
        if self.owner.parts.is_empty() {
            return None;
        }
        if self.id > self.owner.row_num_vec[self.part_idx - 1] {
            // still inside the current part
        } else if self.part_idx > 1 {
            self.part_idx -= 1;
        } else {
            return None;
        }
        self.id -= 1;
        let id = self.id;
        let base = self.owner.row_num_vec[self.part_idx - 1];
        let mut buf = Vec::new();
        self.owner.parts[self.part_idx - 1]
            .get_value_append(SubId((id - base) as u32), &mut buf)
            .ok()?;
        Some((SubId(id as u32), buf))
    }

    fn seek_exact(&mut self, id: SubId) -> Option<Vec<u8>> {
        let (part_idx, local) = self.owner.resolve(id.get() as i64).ok()?;
        let mut buf = Vec::new();
        self.owner.parts[part_idx].get_value_append(local, &mut buf).ok()?;
        self.part_idx = part_idx + 1;
        self.id = id.get() as i64;
        Some(buf)
    }

    fn reset(&mut self) {
        self.part_idx = self.owner.parts.len();
        self.id = *self.owner.row_num_vec.last().unwrap_or(&0);
    }
}

/// Create a forward iterator over `owner`.
pub fn iter_forward(owner: &Arc<MultiPartStore>) -> MultiPartForwardIter {
    owner.create_iter_forward()
}

/// Create a backward iterator over `owner`.
pub fn iter_backward(owner: &Arc<MultiPartStore>) -> MultiPartBackwardIter {
    owner.create_iter_backward()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::MockValueStore;
    use crate::store::WritableStore;

    fn child(rows: &[&[u8]]) -> Arc<dyn ReadableStore> {
        let store = MockValueStore::new();
        for row in rows {
            store.append(row).unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn prefix_sum_resolves_across_children() {
        let parts = vec![
            child(&[b"a", b"b"]),
            child(&[b"c"]),
            child(&[b"d", b"e", b"f"]),
        ];
        let owner = Arc::new(MultiPartStore::new(parts));
        assert_eq!(owner.num_data_rows(), 6);
        let mut out = Vec::new();
        owner.get_value_append(SubId(2), &mut out).unwrap();
        assert_eq!(out, b"c");
        out.clear();
        owner.get_value_append(SubId(5), &mut out).unwrap();
        assert_eq!(out, b"f");
    }

    #[test]
    fn forward_iteration_matches_single_store_encoding() {
        let parts = vec![child(&[b"a", b"b"]), child(&[b"c", b"d"])];
        let owner = Arc::new(MultiPartStore::new(parts));
        let mut it = iter_forward(&owner);
        let mut seen = Vec::new();
        while let Some((_, row)) = it.increment() {
            seen.push(row);
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn backward_iteration_is_the_reverse() {
        let parts = vec![child(&[b"a", b"b"]), child(&[b"c", b"d"])];
        let owner = Arc::new(MultiPartStore::new(parts));
        let mut it = iter_backward(&owner);
        let mut seen = Vec::new();
        while let Some((_, row)) = it.increment() {
            seen.push(row);
        }
        assert_eq!(seen, vec![b"d".to_vec(), b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn load_is_unsupported() {
        let mut owner = MultiPartStore::new(vec![]);
        assert!(matches!(
            owner.load(Path::new("/dev/null")),
            Err(Error::UnsupportedOperation(_))
        ));
    }
}
