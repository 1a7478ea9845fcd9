//! Core types for the composite table storage engine
//!
//! This crate defines the identifiers, error model, and schema seam shared
//! between the embedder and the storage engine:
//! - `RowId` / `SubId` / `IndexId`: identifier newtypes
//! - `Error` / `Result`: the unified error model
//! - `Schema`: the trait an embedder implements to project index keys from
//!   rows and declare which indices are unique
//!
//! Row bodies and the codec that (de)serializes them stay outside this
//! crate; a `Schema` only ever hands back opaque `Vec<u8>` keys.

pub mod error;
pub mod ids;
pub mod schema;

pub use error::{Error, Result};
pub use ids::{IndexId, RowId, SubId};
pub use schema::{IndexDecl, Schema};
