//! Error types for preparing and tracing a model.

use shotline_db::DbError;
use shotline_math::MathError;
use thiserror::Error;

/// Errors raised while building or preparing a ray-tracing instance.
///
/// Shooting never fails; a ray that hits nothing simply produces no
/// segments.
#[derive(Error, Debug)]
pub enum RtError {
    /// Database access failed.
    #[error(transparent)]
    Db(#[from] DbError),

    /// A placement matrix could not be inverted or applied.
    #[error(transparent)]
    Math(#[from] MathError),

    /// A raw record is malformed for its primitive type.
    #[error("bad {kind} record: {reason}")]
    BadRecord {
        /// Primitive type label.
        kind: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// An ARB kept fewer than 4 (or more than 6) usable faces.
    #[error("arb has {0} usable faces, need 4 to 6")]
    BadFaceCount(usize),

    /// Integer tag with no registered primitive.
    #[error("unknown primitive tag {0}")]
    UnknownKind(i32),

    /// A submodel's tree resolved to no solids.
    #[error("submodel tree '{0}' has no solids")]
    EmptySubmodel(String),

    /// A submodel (directly or indirectly) instances itself.
    #[error("submodel tree '{0}' instances itself")]
    SubmodelCycle(String),

    /// No solid with this index in the instance.
    #[error("no solid #{0}")]
    NoSuchSolid(usize),

    /// Nothing survived preparation.
    #[error("no solids survived preparation")]
    NoSolids,

    /// Unrecognised space partitioning method name.
    #[error("unknown space partitioning method '{0}'")]
    UnknownMethod(String),

    /// Worker pool could not be created.
    #[error("cannot start worker pool: {0}")]
    Pool(String),
}

/// Result type for ray-tracing operations.
pub type Result<T> = std::result::Result<T, RtError>;
