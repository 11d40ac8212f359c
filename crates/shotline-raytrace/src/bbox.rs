//! Bounding boxes and bounding spheres.

use shotline_math::{Point3, Transform, Vec3};

/// Axis-aligned bounding box in 3D.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb3 {
    /// Minimum corner.
    pub min: Point3,
    /// Maximum corner.
    pub max: Point3,
}

impl Aabb3 {
    /// Create an AABB from min and max corners.
    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    /// Inverted box, ready to grow.
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Smallest box containing every point.
    pub fn from_points<'a>(pts: impl IntoIterator<Item = &'a Point3>) -> Self {
        let mut bb = Self::empty();
        for p in pts {
            bb.include_point(p);
        }
        bb
    }

    /// Whether nothing has been included yet.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grow to include a point.
    pub fn include_point(&mut self, p: &Point3) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    /// Grow to include another box.
    pub fn include(&mut self, other: &Aabb3) {
        if other.is_empty() {
            return;
        }
        self.include_point(&other.min);
        self.include_point(&other.max);
    }

    /// Test if two boxes overlap (touching counts).
    pub fn overlaps(&self, other: &Aabb3) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Whether `p` lies inside or on the box.
    pub fn contains(&self, p: &Point3) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// Grow by `tol` on every side.
    pub fn expand(&mut self, tol: f64) {
        self.min -= Vec3::repeat(tol);
        self.max += Vec3::repeat(tol);
    }

    /// Box centre.
    pub fn center(&self) -> Point3 {
        nalgebra::center(&self.min, &self.max)
    }

    /// Half the diagonal vector.
    pub fn half_extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// The 8 corners, bit `i` of the index choosing max on axis `i`.
    pub fn corners(&self) -> [Point3; 8] {
        std::array::from_fn(|i| {
            Point3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }

    /// Box of the transformed corners.
    pub fn transformed(&self, xform: &Transform) -> Self {
        let corners = self.corners().map(|c| xform.apply_point(&c));
        Self::from_points(corners.iter())
    }
}

/// Bounding volume of one prepared solid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Axis-aligned box.
    pub aabb: Aabb3,
    /// Bounding sphere centre.
    pub center: Point3,
    /// Radius of the sphere enclosing the box along its largest axis.
    pub aradius: f64,
    /// True bounding sphere radius.
    pub bradius: f64,
}

impl Bounds {
    /// Sphere derived from the box. It contains the box, not necessarily
    /// anything tighter.
    pub fn from_aabb(aabb: Aabb3) -> Self {
        let half = aabb.half_extent();
        Self {
            aabb,
            center: aabb.center(),
            aradius: half.x.max(half.y).max(half.z),
            bradius: half.norm(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_from_box() {
        let bb = Aabb3::new(Point3::new(-1.0, -2.0, -3.0), Point3::new(1.0, 2.0, 3.0));
        let b = Bounds::from_aabb(bb);
        assert!((b.center - Point3::origin()).norm() < 1e-12);
        assert!((b.aradius - 3.0).abs() < 1e-12);
        assert!((b.bradius - 14.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_empty_and_include() {
        let mut bb = Aabb3::empty();
        assert!(bb.is_empty());
        bb.include(&Aabb3::empty());
        assert!(bb.is_empty());
        bb.include_point(&Point3::new(1.0, 1.0, 1.0));
        bb.include_point(&Point3::new(-1.0, 0.0, 2.0));
        assert!(!bb.is_empty());
        assert_eq!(bb.min, Point3::new(-1.0, 0.0, 1.0));
        assert_eq!(bb.max, Point3::new(1.0, 1.0, 2.0));
        assert!(bb.contains(&Point3::new(0.0, 0.5, 1.5)));
    }

    #[test]
    fn test_transformed_box() {
        let bb = Aabb3::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
        let moved = bb.transformed(&Transform::translation(10.0, 0.0, 0.0));
        assert!((moved.min.x - 9.0).abs() < 1e-12);
        assert!((moved.max.x - 11.0).abs() < 1e-12);

        let rot = Transform::from_angles(0.0, 0.0, 45.0);
        let spun = bb.transformed(&rot);
        assert!((spun.max.x - 2.0_f64.sqrt()).abs() < 1e-9);
        assert!((spun.max.z - 1.0).abs() < 1e-9);
    }
}
