//! Raw database records.
//!
//! Records are stored in the object's own local coordinates. Placement comes
//! from the combination matrices above it and is applied by each
//! primitive's import routine, never here.

use serde::{Deserialize, Serialize};
use shotline_math::Transform;

/// A raw object record as stored in a database file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DbRecord {
    /// Arbitrary convex polyhedron given by 8 vertices. Degenerate forms
    /// (ARB4..ARB7) repeat vertices.
    Arb8 {
        /// The eight vertices, in the canonical ARB8 order.
        pts: [[f64; 3]; 8],
    },
    /// Elliptical hyperboloid of one sheet, capped by two planes.
    Hyp {
        /// Centre of the base ellipse.
        v: [f64; 3],
        /// Height vector, base centre to top centre.
        h: [f64; 3],
        /// Semi-major axis of the base ellipse.
        a: [f64; 3],
        /// Semi-minor axis length of the base ellipse.
        b: f64,
        /// Ratio of neck size to base size, strictly inside `(0, 1)`.
        bnr: f64,
    },
    /// An entire tree of another (or the same) database instanced as one solid.
    Submodel {
        /// Database file, relative to this one. `None` means this database.
        #[serde(default)]
        file: Option<String>,
        /// Root object of the instanced tree.
        treetop: String,
        /// Space-partitioning override for the nested instance.
        #[serde(default)]
        method: Option<String>,
    },
    /// A group of other objects, each with an optional placement matrix.
    Comb {
        /// Member references.
        members: Vec<Member>,
        /// Air regions are skipped unless air is treated as solid.
        #[serde(default)]
        air: bool,
    },
}

impl DbRecord {
    /// Short type label used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            DbRecord::Arb8 { .. } => "arb8",
            DbRecord::Hyp { .. } => "hyp",
            DbRecord::Submodel { .. } => "submodel",
            DbRecord::Comb { .. } => "comb",
        }
    }

    /// Whether this record is a leaf solid rather than a combination.
    pub fn is_solid(&self) -> bool {
        !matches!(self, DbRecord::Comb { .. })
    }
}

/// One member reference inside a combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Name of the referenced object.
    pub name: String,
    /// Row-major placement matrix; identity when absent.
    #[serde(default)]
    pub matrix: Option<[f64; 16]>,
}

impl Member {
    /// Reference `name` with no placement.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matrix: None,
        }
    }

    /// Reference `name` placed by `xform`.
    pub fn placed(name: impl Into<String>, xform: &Transform) -> Self {
        Self {
            name: name.into(),
            matrix: Some(xform.to_array()),
        }
    }

    /// The placement matrix.
    pub fn transform(&self) -> Transform {
        self.matrix
            .as_ref()
            .map(Transform::from_array)
            .unwrap_or_default()
    }
}

/// A named object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbObject {
    /// Unique object name.
    pub name: String,
    /// The raw record.
    pub record: DbRecord,
}

/// On-disk database layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbFile {
    /// Free-form title.
    #[serde(default)]
    pub title: String,
    /// All objects in file order.
    pub objects: Vec<DbObject>,
}
