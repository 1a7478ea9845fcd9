//! Identifier newtypes
//!
//! `RowId` is the global, signed 64-bit row identifier a caller sees.
//! `SubId` is the 32-bit row id local to a single segment. `IndexId`
//! names one declared index column.

use std::fmt;

/// A global row identifier, unique within one table at the time it was issued.
///
/// Ids returned by `insertRow` are strictly increasing, but are **not**
/// guaranteed stable across a compaction (see `spec.md` §4.6.7 /
/// `SPEC_FULL.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(pub i64);

impl RowId {
    /// The smallest valid row id.
    pub const ZERO: RowId = RowId(0);

    /// View this id as a plain `i64`.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RowId {
    fn from(v: i64) -> Self {
        RowId(v)
    }
}

/// A row identifier local to one segment: dense and 0-based until deletions
/// punch holes, never recycled within the segment's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubId(pub u32);

impl SubId {
    /// View this id as a plain `u32`.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SubId {
    fn from(v: u32) -> Self {
        SubId(v)
    }
}

/// Identifies one declared index column within a table's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexId(pub u32);

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idx{}", self.0)
    }
}

impl From<u32> for IndexId {
    fn from(v: u32) -> Self {
        IndexId(v)
    }
}
