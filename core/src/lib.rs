//! livedb-core - shared primitives for the livedb reactive database adapter
//!
//! This crate holds the pieces that do not depend on any concrete storage
//! engine: the JSON-shaped [`Value`]/[`Row`] data model, the changeset wire
//! format, the SQL table-name extractor used by the live-query dependency
//! tracker, the crate-wide error type, and the tracing helper macros.

pub mod changeset;
pub mod error;
pub mod table_extractor;
pub mod tracing;
pub mod value;

pub use changeset::{BigInt, ChangeTuple, ChangeType};
pub use error::{LiveDbError, Result};
pub use table_extractor::extract_tables;
pub use value::{Row, Value, structural_eq};
