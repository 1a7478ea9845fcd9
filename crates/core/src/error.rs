//! Error types for the composite table storage engine
//!
//! `Error` is the unified error type surfaced by every fallible operation in
//! `composite-storage`. Capability probes (`as_writable`, `as_appendable`,
//! ...) never produce an `Error` — absence of a capability is signalled by
//! `Option::None`, not by a failure.

use std::path::PathBuf;
use thiserror::Error;

use crate::ids::{IndexId, RowId};

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Error conditions the composite table and its collaborators can raise.
#[derive(Debug, Error)]
pub enum Error {
    /// `openStore` was asked for a filename suffix no factory is registered for.
    #[error("unknown store type for suffix {0:?}")]
    UnknownStoreType(String),

    /// A second factory was registered for a suffix already present in the registry.
    #[error("duplicate store registration for suffix {0:?}")]
    DuplicateRegistration(String),

    /// A row id fell outside `[0, max)`.
    #[error("row id {id} out of range (max {max})")]
    OutOfRange {
        /// The offending id.
        id: RowId,
        /// The current upper bound (`rowNumVec.back()`), exclusive.
        max: RowId,
    },

    /// A unique index rejected an insert or replace because the key already maps to a live row.
    #[error("duplicate key for unique index {index:?}: {key:?}")]
    DuplicateKey {
        /// The unique index that was violated.
        index: IndexId,
        /// The projected key that collided.
        key: Vec<u8>,
    },

    /// A capability or operation the target store/segment does not support was invoked.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// A persistence operation failed at the filesystem boundary.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The file or directory the failing operation targeted.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A manifest or file body failed validation on load.
    #[error("corruption at {path}: {detail}")]
    Corruption {
        /// The file that failed validation.
        path: PathBuf,
        /// A human-readable description of the check that failed.
        detail: String,
    },

    /// An internal invariant was violated. Never meant to be caught and retried.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}

impl Error {
    /// Build an [`Error::Io`] from a path and the underlying OS error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Build an [`Error::Corruption`] from a path and a detail message.
    pub fn corruption(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Error::Corruption {
            path: path.into(),
            detail: detail.into(),
        }
    }
}
