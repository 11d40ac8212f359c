#![warn(missing_docs)]

//! Geometry database for the shotline intersection kernel.
//!
//! A database is a flat directory of named objects. Leaf objects are raw
//! primitive records; combinations group other objects under placement
//! matrices. The ray-tracing side only ever asks three things of it: open a
//! file, fetch a record by name, and flatten a named tree into placed leaf
//! solids.
//!
//! # File format
//!
//! ```json
//! {
//!   "title": "cube",
//!   "objects": [
//!     { "name": "box.s", "record": { "type": "arb8", "pts": [[-1,-1,-1], ...] } },
//!     { "name": "all", "record": { "type": "comb", "members": [{ "name": "box.s" }] } }
//!   ]
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

mod db;
mod record;

pub use db::{Db, LeafSolid};
pub use record::{DbFile, DbObject, DbRecord, Member};

/// Errors raised by database access.
#[derive(Error, Debug)]
pub enum DbError {
    /// The database file could not be read.
    #[error("cannot read database {path}: {source}")]
    Io {
        /// File that failed to open.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The database file is not valid JSON for [`DbFile`].
    #[error("malformed database: {0}")]
    Parse(#[from] serde_json::Error),

    /// No object with this name exists.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Two objects share a name.
    #[error("duplicate object name: {0}")]
    Duplicate(String),

    /// The combination tree nests deeper than the walker allows (usually a cycle).
    #[error("tree too deep at {0} (cyclic reference?)")]
    TooDeep(String),
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DbError>;
