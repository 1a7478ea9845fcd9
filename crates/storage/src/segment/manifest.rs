//! Per-segment manifest
//!
//! Lists the value store file and one entry per declared index, each naming
//! the store suffix that selects its decoder via the registry (`spec.md`
//! §6). Serialized as JSON, in the same spirit as strata's manifest types
//! (`strata-storage::format::manifest::Manifest`) though with a different
//! wire format — `spec.md` §6 names `dbmeta.json`/segment manifests
//! explicitly as JSON documents rather than the teacher's hand-rolled binary
//! layout.

use std::fs;
use std::path::Path;

use composite_core::{Error, IndexId, Result};
use serde::{Deserialize, Serialize};

/// The value store file a segment owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueStoreEntry {
    /// Filename under the segment directory, e.g. `values.mock`.
    pub file_name: String,
}

/// One declared index's file within a segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The index this file backs.
    pub index_id: u32,
    /// Column name, carried for human-readability only — the table
    /// addresses indices by [`IndexId`], not by name.
    pub column_name: String,
    /// `true` if the table enforces uniqueness on this index.
    pub unique: bool,
    /// Filename under the segment directory, e.g. `idx.0.btreeidx`.
    pub file_name: String,
}

impl IndexEntry {
    /// The [`IndexId`] this entry backs.
    pub fn index_id(&self) -> IndexId {
        IndexId(self.index_id)
    }
}

/// The manifest for one `rd-NNNN/` or `wr-NNNN/` segment directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentManifest {
    /// The value store entry.
    pub value_store: ValueStoreEntry,
    /// One entry per declared index, in schema order.
    pub indices: Vec<IndexEntry>,
    /// Filename of the delete-bitmap, if this segment carries tombstones
    /// (`spec.md` §6: `isDel.rs`, present for readonly segments with
    /// tombstones; writable segments always carry one for symmetry here).
    pub delete_bitmap_file: Option<String>,
}

const MANIFEST_FILE_NAME: &str = "manifest.json";

impl SegmentManifest {
    /// Path of the manifest file within `segment_dir`.
    pub fn path(segment_dir: &Path) -> std::path::PathBuf {
        segment_dir.join(MANIFEST_FILE_NAME)
    }

    /// Write this manifest to `segment_dir/manifest.json`.
    pub fn save(&self, segment_dir: &Path) -> Result<()> {
        let path = Self::path(segment_dir);
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::corruption(&path, format!("encode failed: {e}")))?;
        fs::write(&path, bytes).map_err(|e| Error::io(&path, e))
    }

    /// Read the manifest from `segment_dir/manifest.json`.
    pub fn load(segment_dir: &Path) -> Result<Self> {
        let path = Self::path(segment_dir);
        let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::corruption(&path, format!("{e}")))
    }
}
