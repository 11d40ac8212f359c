//! Solid table entries.

use shotline_math::{Tolerance, Transform};

use crate::application::{Application, Resource};
use crate::bbox::{Aabb3, Bounds};
use crate::hit::{Curvature, Hit, Segment, UvCoord};
use crate::primitive::{Classification, Primitive, PrimitiveKind};
use crate::ray::Ray;

/// One prepared solid placed in an instance.
///
/// Dropping the entry frees its specific record, including anything built
/// lazily after prep.
#[derive(Debug)]
pub struct Soltab {
    /// Index in the owning instance's solid table.
    pub id: usize,
    /// Object name.
    pub name: String,
    /// Full path from the tree root.
    pub path: String,
    /// Primitive tag.
    pub kind: PrimitiveKind,
    /// Placement the solid was imported with.
    pub matrix: Transform,
    /// Bounding box and spheres.
    pub bounds: Bounds,
    /// Prepared primitive data.
    pub specific: Box<dyn Primitive>,
}

impl Soltab {
    /// Intersect the application's ray with this solid.
    pub fn shot(&self, ap: &Application<'_>, res: &mut Resource, segs: &mut Vec<Segment>) -> usize {
        self.specific.shot(self, ap, res, segs)
    }

    /// Fill in a hit's point and normal.
    pub fn norm(&self, hit: &mut Hit, ray: &Ray) {
        self.specific.norm(hit, self, ray);
    }

    /// Curvature at a normalled hit.
    pub fn curve(&self, hit: &Hit) -> Curvature {
        self.specific.curve(hit, self)
    }

    /// UV at a normalled hit.
    pub fn uv(&self, ap: &Application<'_>, hit: &Hit) -> UvCoord {
        self.specific.uv(ap, self, hit)
    }

    /// Classify a box against this solid.
    pub fn class(&self, bbox: &Aabb3, tol: &Tolerance) -> Classification {
        self.specific.class(self, bbox, tol)
    }

    /// Downcast the specific record.
    pub fn specific_as<T: 'static>(&self) -> Option<&T> {
        self.specific.as_any().downcast_ref::<T>()
    }
}
