//! Ray representation and ray/box slab tests.

use shotline_math::{Dir3, Point3, Transform, Vec3};

use crate::bbox::Aabb3;

/// A ray in 3D space defined by origin and unit direction.
///
/// Hit distances along a ray are measured in units of its unit direction.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// Origin point of the ray.
    pub origin: Point3,
    /// Unit direction of the ray.
    pub direction: Dir3,
    /// Precomputed reciprocal of direction components for fast AABB tests.
    inv_direction: Vec3,
    /// Sign of direction components (0 if positive, 1 if negative).
    sign: [usize; 3],
}

impl Ray {
    /// Create a new ray from origin and direction.
    ///
    /// The direction will be normalized.
    pub fn new(origin: Point3, direction: Vec3) -> Self {
        let dir = Dir3::new_normalize(direction);
        let inv = dir.map(|c| 1.0 / c);
        let sign = [
            usize::from(inv.x < 0.0),
            usize::from(inv.y < 0.0),
            usize::from(inv.z < 0.0),
        ];
        Self {
            origin,
            direction: dir,
            inv_direction: inv,
            sign,
        }
    }

    /// Evaluate the ray at parameter `t`: `origin + t * direction`.
    #[inline]
    pub fn at(&self, t: f64) -> Point3 {
        self.origin + t * self.direction.as_ref()
    }

    /// Map the ray through `xform`.
    ///
    /// Returns the mapped ray and the length the mapped direction had before
    /// normalization: a distance `t` along `self` becomes `t * scale` along
    /// the result.
    pub fn transformed(&self, xform: &Transform) -> (Ray, f64) {
        let dir = xform.apply_vec(self.direction.as_ref());
        let scale = dir.norm();
        (Ray::new(xform.apply_point(&self.origin), dir), scale)
    }

    /// Raw slab interval, not clamped to the ray's start.
    ///
    /// Returns `Some((t_min, t_max))` when the supporting line crosses the
    /// box, even if the whole interval lies behind the origin.
    #[inline]
    pub fn slab(&self, aabb: &Aabb3) -> Option<(f64, f64)> {
        let bounds = [aabb.min, aabb.max];
        let mut t_min = f64::NEG_INFINITY;
        let mut t_max = f64::INFINITY;

        for axis in 0..3 {
            let inv = self.inv_direction[axis];
            let near = bounds[self.sign[axis]][axis];
            let far = bounds[1 - self.sign[axis]][axis];
            let o = self.origin[axis];

            if inv.is_infinite() {
                // Parallel to this slab: inside it or never.
                if o < aabb.min[axis] || o > aabb.max[axis] {
                    return None;
                }
                continue;
            }
            t_min = t_min.max((near - o) * inv);
            t_max = t_max.min((far - o) * inv);
        }

        (t_max >= t_min).then_some((t_min, t_max))
    }

    /// Test ray-AABB intersection using the slab method.
    ///
    /// Returns `Some((t_min, t_max))` with `t_min` clamped to 0 if the ray
    /// meets the box at or ahead of its origin.
    #[inline]
    pub fn intersect_aabb(&self, aabb: &Aabb3) -> Option<(f64, f64)> {
        match self.slab(aabb) {
            Some((t_min, t_max)) if t_max >= 0.0 => Some((t_min.max(0.0), t_max)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Aabb3 {
        Aabb3::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_ray_at() {
        let ray = Ray::new(Point3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0));
        let p = ray.at(5.0);
        assert!((p.x - 5.0).abs() < 1e-12);
        assert!(p.y.abs() < 1e-12);
        assert!(p.z.abs() < 1e-12);
    }

    #[test]
    fn test_ray_aabb_hit() {
        let ray = Ray::new(Point3::new(-5.0, 0.5, 0.5), Vec3::new(1.0, 0.0, 0.0));
        let (t_min, t_max) = ray.intersect_aabb(&unit_box()).unwrap();
        assert!((t_min - 5.0).abs() < 1e-10);
        assert!((t_max - 6.0).abs() < 1e-10);
    }

    #[test]
    fn test_ray_aabb_miss() {
        let ray = Ray::new(Point3::new(-5.0, 5.0, 5.0), Vec3::new(1.0, 0.0, 0.0));
        assert!(ray.intersect_aabb(&unit_box()).is_none());
    }

    #[test]
    fn test_ray_inside_aabb() {
        let ray = Ray::new(Point3::new(0.5, 0.5, 0.5), Vec3::new(1.0, 0.0, 0.0));
        let (t_min, t_max) = ray.intersect_aabb(&unit_box()).unwrap();
        assert!(t_min >= 0.0);
        assert!((t_max - 0.5).abs() < 1e-10);

        let (raw_min, _) = ray.slab(&unit_box()).unwrap();
        assert!((raw_min + 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_ray_aabb_behind() {
        let ray = Ray::new(Point3::new(-5.0, 0.5, 0.5), Vec3::new(-1.0, 0.0, 0.0));
        assert!(ray.intersect_aabb(&unit_box()).is_none());
        assert!(ray.slab(&unit_box()).is_some());
    }

    #[test]
    fn test_ray_on_box_face_plane() {
        // Axis-aligned ray lying in the x = 0 face plane.
        let ray = Ray::new(Point3::new(0.0, -1.0, 0.5), Vec3::new(0.0, 1.0, 0.0));
        let (t_min, t_max) = ray.intersect_aabb(&unit_box()).unwrap();
        assert!((t_min - 1.0).abs() < 1e-12);
        assert!((t_max - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_transformed_reports_scale() {
        let ray = Ray::new(Point3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        let xf = Transform::scale(3.0, 3.0, 3.0).then(&Transform::translation(1.0, 0.0, 0.0));
        let (r, s) = ray.transformed(&xf);
        assert!((s - 3.0).abs() < 1e-12);
        assert!((r.origin - Point3::new(6.0, 0.0, 0.0)).norm() < 1e-12);
        assert!((r.direction.y - 1.0).abs() < 1e-12);
    }
}
