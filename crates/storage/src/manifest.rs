//! Table manifest (`dbmeta.json`)
//!
//! Enumerates the segments a table owns, in catalogue order, each naming its
//! kind and ordinal so the table can reopen `dir/rd-NNNN` / `dir/wr-NNNN`
//! without re-deriving it from directory listings (`spec.md` §6).

use std::fs;
use std::path::Path;

use composite_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// One segment's place in the catalogue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmentEntry {
    /// `"rd"` or `"wr"`.
    pub kind: SegmentKind,
    /// The 4-digit ordinal used to name the segment's subdirectory.
    pub index: u32,
    /// Row count at the time the manifest was last written.
    pub row_count: i64,
}

/// Discriminates a segment manifest entry's on-disk directory prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// `rd-NNNN/`, immutable.
    Rd,
    /// `wr-NNNN/`, mutable (at most one, and only for the last entry).
    Wr,
}

impl SegmentKind {
    /// The directory-name prefix this kind uses.
    pub fn prefix(self) -> &'static str {
        match self {
            SegmentKind::Rd => "rd",
            SegmentKind::Wr => "wr",
        }
    }
}

impl SegmentEntry {
    /// The subdirectory name this entry's segment lives under, e.g. `rd-0003`.
    pub fn dir_name(&self) -> String {
        format!("{}-{:04}", self.kind.prefix(), self.index)
    }
}

/// The whole-table manifest, `dir/dbmeta.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableManifest {
    /// Segments in catalogue order.
    pub segments: Vec<SegmentEntry>,
}

const MANIFEST_FILE_NAME: &str = "dbmeta.json";

impl TableManifest {
    /// Path of the manifest file within `dir`.
    pub fn path(dir: &Path) -> std::path::PathBuf {
        dir.join(MANIFEST_FILE_NAME)
    }

    /// Write this manifest to `dir/dbmeta.json`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = Self::path(dir);
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::corruption(&path, format!("encode failed: {e}")))?;
        fs::write(&path, bytes).map_err(|e| Error::io(&path, e))
    }

    /// Read the manifest from `dir/dbmeta.json`, if present.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(dir);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
        let manifest =
            serde_json::from_slice(&bytes).map_err(|e| Error::corruption(&path, format!("{e}")))?;
        Ok(Some(manifest))
    }
}
