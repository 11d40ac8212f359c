//! 4x4 homogeneous transforms.
//!
//! Matrices are row-major and act on column vectors, so `a.then(&b)` applied
//! to a point applies `b` first. The bottom-right element carries a global
//! (inverse) scale: a point is divided by its resulting `w`, a vector by
//! `m[15]`.

use nalgebra::{Matrix4, Vector4};

use crate::{
    vec_ortho, Dir3, HVec, Mat3, MathError, Point3, Result, Tolerance, Vec3, SMALL_FASTF,
};

/// Pivots smaller than this make a matrix singular for [`Transform::invert`].
const SINGULAR_PIVOT: f64 = 1.0e-20;

/// A 4x4 affine transformation matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// The underlying 4x4 matrix.
    pub matrix: Matrix4<f64>,
}

impl Transform {
    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// The all-zero matrix.
    pub fn zero() -> Self {
        Self {
            matrix: Matrix4::zeros(),
        }
    }

    /// Build from 16 row-major values.
    pub fn from_array(m: &[f64; 16]) -> Self {
        Self {
            matrix: Matrix4::from_row_slice(m),
        }
    }

    /// The 16 row-major values.
    pub fn to_array(&self) -> [f64; 16] {
        let mut out = [0.0; 16];
        for r in 0..4 {
            for c in 0..4 {
                out[r * 4 + c] = self.matrix[(r, c)];
            }
        }
        out
    }

    /// Translation by `(dx, dy, dz)`.
    pub fn translation(dx: f64, dy: f64, dz: f64) -> Self {
        let mut m = Matrix4::identity();
        m[(0, 3)] = dx;
        m[(1, 3)] = dy;
        m[(2, 3)] = dz;
        Self { matrix: m }
    }

    /// Non-uniform scale by `(sx, sy, sz)`.
    pub fn scale(sx: f64, sy: f64, sz: f64) -> Self {
        let mut m = Matrix4::identity();
        m[(0, 0)] = sx;
        m[(1, 1)] = sy;
        m[(2, 2)] = sz;
        Self { matrix: m }
    }

    /// Rotation about an arbitrary axis through the origin by `angle` radians.
    ///
    /// Uses Rodrigues' rotation formula.
    pub fn rotation_about_axis(axis: &Dir3, angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        let t = 1.0 - c;
        let (x, y, z) = (axis.as_ref().x, axis.as_ref().y, axis.as_ref().z);
        let mut m = Matrix4::identity();
        m[(0, 0)] = t * x * x + c;
        m[(0, 1)] = t * x * y - s * z;
        m[(0, 2)] = t * x * z + s * y;
        m[(1, 0)] = t * x * y + s * z;
        m[(1, 1)] = t * y * y + c;
        m[(1, 2)] = t * y * z - s * x;
        m[(2, 0)] = t * x * z - s * y;
        m[(2, 1)] = t * y * z + s * x;
        m[(2, 2)] = t * z * z + c;
        Self { matrix: m }
    }

    /// Rotation taking the +X axis to the direction given by azimuth and
    /// elevation, both in degrees.
    pub fn from_ae(azimuth: f64, elevation: f64) -> Self {
        let (sin_az, cos_az) = azimuth.to_radians().sin_cos();
        let (sin_el, cos_el) = elevation.to_radians().sin_cos();
        let mut m = Matrix4::identity();
        m[(0, 0)] = cos_el * cos_az;
        m[(0, 1)] = -sin_az;
        m[(0, 2)] = -sin_el * cos_az;
        m[(1, 0)] = cos_el * sin_az;
        m[(1, 1)] = cos_az;
        m[(1, 2)] = -sin_el * sin_az;
        m[(2, 0)] = sin_el;
        m[(2, 1)] = 0.0;
        m[(2, 2)] = cos_el;
        Self { matrix: m }
    }

    /// Rotation `Rx(alpha) * Ry(beta) * Rz(gamma)`, angles in degrees.
    pub fn from_angles(alpha: f64, beta: f64, gamma: f64) -> Self {
        if alpha == 0.0 && beta == 0.0 && gamma == 0.0 {
            return Self::identity();
        }
        let (sa, ca) = alpha.to_radians().sin_cos();
        let (sb, cb) = beta.to_radians().sin_cos();
        let (sg, cg) = gamma.to_radians().sin_cos();
        let mut m = Matrix4::identity();
        m[(0, 0)] = cb * cg;
        m[(0, 1)] = -cb * sg;
        m[(0, 2)] = sb;
        m[(1, 0)] = sa * sb * cg + ca * sg;
        m[(1, 1)] = -sa * sb * sg + ca * cg;
        m[(1, 2)] = -sa * cb;
        m[(2, 0)] = sa * sg - ca * sb * cg;
        m[(2, 1)] = sa * cg + ca * sb * sg;
        m[(2, 2)] = ca * cb;
        Self { matrix: m }
    }

    /// Rotation carrying direction `from` onto direction `to`.
    ///
    /// Built in the orthonormal frame `(from, n, n x from)` with
    /// `n = from x to`. Exactly anti-parallel inputs rotate half a turn about
    /// an arbitrary perpendicular.
    pub fn from_to(from: &Vec3, to: &Vec3, tol: &Tolerance) -> Self {
        let u = from.normalize();
        let target = to.normalize();
        let cos = u.dot(&target);

        if cos >= tol.para {
            return Self::identity();
        }

        let (n, sin, cos) = if cos <= -tol.para {
            (vec_ortho(&u), 0.0, -1.0)
        } else {
            let n = u.cross(&target).normalize();
            (n, n.cross(&u).dot(&target), cos)
        };
        let w = n.cross(&u);

        // R u = to, R w = -sin u + cos w, R n = n
        let ru = cos * u + sin * w;
        let rw = -sin * u + cos * w;
        let r = ru * u.transpose() + rw * w.transpose() + n * n.transpose();

        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        Self { matrix: m }
    }

    /// Rotation by `angle` radians about the line through `pt` along `dir`.
    pub fn arb_rot(pt: &Point3, dir: &Vec3, angle: f64) -> Self {
        let axis = Dir3::new_normalize(*dir);
        Self::translation(pt.x, pt.y, pt.z)
            .then(&Self::rotation_about_axis(&axis, angle))
            .then(&Self::translation(-pt.x, -pt.y, -pt.z))
    }

    /// Uniform scale by `scale` about `pt`, carried in the homogeneous `w`.
    pub fn scale_about_pt(pt: &Point3, scale: f64) -> Result<Self> {
        if scale.abs() < SMALL_FASTF {
            return Err(MathError::ZeroScale);
        }
        let mut s = Matrix4::identity();
        s[(3, 3)] = 1.0 / scale;
        Ok(Self::translation(pt.x, pt.y, pt.z)
            .then(&Self { matrix: s })
            .then(&Self::translation(-pt.x, -pt.y, -pt.z)))
    }

    /// Apply `xform` as if `pt` were the origin.
    pub fn xform_about_pt(xform: &Transform, pt: &Point3) -> Self {
        Self::translation(pt.x, pt.y, pt.z)
            .then(xform)
            .then(&Self::translation(-pt.x, -pt.y, -pt.z))
    }

    /// Compose: `self` then `other` (self * other).
    pub fn then(&self, other: &Transform) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
        }
    }

    /// Multiply a homogeneous 4-vector.
    pub fn mul_hvec(&self, v: &HVec) -> HVec {
        self.matrix * v
    }

    /// Transpose.
    pub fn transpose(&self) -> Self {
        Self {
            matrix: self.matrix.transpose(),
        }
    }

    /// The upper-left 3x3 block.
    pub fn linear(&self) -> Mat3 {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Transform a point, dividing through by the resulting `w`.
    pub fn apply_point(&self, p: &Point3) -> Point3 {
        let v = self.matrix * Vector4::new(p.x, p.y, p.z, 1.0);
        if v.w.abs() < SMALL_FASTF || v.w == 1.0 {
            return Point3::new(v.x, v.y, v.z);
        }
        Point3::new(v.x / v.w, v.y / v.w, v.z / v.w)
    }

    /// Transform a direction vector (ignores translation, applies rotation/scale).
    pub fn apply_vec(&self, v: &Vec3) -> Vec3 {
        let r = self.matrix * Vector4::new(v.x, v.y, v.z, 0.0);
        let w = self.matrix[(3, 3)];
        if w.abs() < SMALL_FASTF || w == 1.0 {
            return Vec3::new(r.x, r.y, r.z);
        }
        Vec3::new(r.x / w, r.y / w, r.z / w)
    }

    /// Transform a normal vector (uses inverse transpose of upper-left 3x3).
    pub fn apply_normal(&self, n: &Vec3) -> Vec3 {
        match self.linear().try_inverse() {
            Some(inv) => inv.transpose() * n,
            None => *n,
        }
    }

    /// Isotropic scale of a rigid + uniform-scale transform.
    pub fn uniform_scale(&self) -> f64 {
        self.apply_vec(&Vec3::x()).norm()
    }

    /// Whether the three basis vectors are scaled equally within `tol.perp`.
    pub fn is_uniform_scale(&self, tol: &Tolerance) -> bool {
        let sx = self.apply_vec(&Vec3::x()).norm();
        let sy = self.apply_vec(&Vec3::y()).norm();
        let sz = self.apply_vec(&Vec3::z()).norm();
        let limit = tol.perp * sx.max(sy).max(sz).max(1.0);
        (sx - sy).abs() <= limit && (sx - sz).abs() <= limit
    }

    /// Inverse by Gauss-Jordan elimination with partial pivoting.
    ///
    /// Fails with [`MathError::Singular`] instead of returning a meaningless
    /// inverse.
    pub fn invert(&self) -> Result<Self> {
        let mut a = self.matrix;
        let mut inv = Matrix4::<f64>::identity();

        for col in 0..4 {
            let mut pivot_row = col;
            let mut pivot = a[(col, col)].abs();
            for row in (col + 1)..4 {
                if a[(row, col)].abs() > pivot {
                    pivot = a[(row, col)].abs();
                    pivot_row = row;
                }
            }
            if pivot < SINGULAR_PIVOT {
                return Err(MathError::Singular { column: col, pivot });
            }
            if pivot_row != col {
                a.swap_rows(col, pivot_row);
                inv.swap_rows(col, pivot_row);
            }

            let p = a[(col, col)];
            for j in 0..4 {
                a[(col, j)] /= p;
                inv[(col, j)] /= p;
            }

            for row in 0..4 {
                if row == col {
                    continue;
                }
                let f = a[(row, col)];
                if f == 0.0 {
                    continue;
                }
                for j in 0..4 {
                    let aj = a[(col, j)];
                    let ij = inv[(col, j)];
                    a[(row, j)] -= f * aj;
                    inv[(row, j)] -= f * ij;
                }
            }
        }

        Ok(Self { matrix: inv })
    }

    /// Approximate equality: the translation column is compared against
    /// `tol.dist`, every other element against `tol.perp`.
    pub fn is_equal(&self, other: &Transform, tol: &Tolerance) -> bool {
        for r in 0..4 {
            for c in 0..4 {
                let d = (self.matrix[(r, c)] - other.matrix[(r, c)]).abs();
                let limit = if c == 3 && r < 3 { tol.dist } else { tol.perp };
                if d > limit {
                    return false;
                }
            }
        }
        true
    }

    /// Bit-exact identity test.
    ///
    /// Only meaningful for matrices read back from a file; computed matrices
    /// should use [`Transform::is_equal`].
    pub fn is_identity(&self) -> bool {
        let id = Matrix4::<f64>::identity();
        self.matrix
            .iter()
            .zip(id.iter())
            .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for &Transform {
    type Output = Transform;

    fn mul(self, rhs: &Transform) -> Transform {
        self.then(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sample() -> Transform {
        Transform::translation(3.0, -2.0, 7.5)
            .then(&Transform::from_angles(30.0, -45.0, 10.0))
            .then(&Transform::scale(2.0, 0.5, 1.5))
    }

    #[test]
    fn test_identity_transform() {
        let t = Transform::identity();
        let p = Point3::new(1.0, 2.0, 3.0);
        let result = t.apply_point(&p);
        assert!((result - p).norm() < 1e-12);
        assert!(t.is_identity());
    }

    #[test]
    fn test_array_round_trip_is_row_major() {
        let t = Transform::translation(10.0, 20.0, 30.0);
        let a = t.to_array();
        assert_eq!(a[3], 10.0);
        assert_eq!(a[7], 20.0);
        assert_eq!(a[11], 30.0);
        assert_eq!(Transform::from_array(&a), t);
    }

    #[test]
    fn test_invert_round_trip() {
        let tol = Tolerance::DEFAULT;
        let m = sample();
        let inv = m.invert().unwrap();
        assert!(m.then(&inv).is_equal(&Transform::identity(), &tol));
        assert!(inv.then(&m).is_equal(&Transform::identity(), &tol));
        let back = inv.invert().unwrap();
        assert!(back.is_equal(&m, &tol));
    }

    #[test]
    fn test_invert_needs_pivoting() {
        // Zero on the leading diagonal; elimination must swap rows.
        let m = Transform::from_array(&[
            0.0, 1.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ]);
        let inv = m.invert().unwrap();
        assert!(m
            .then(&inv)
            .is_equal(&Transform::identity(), &Tolerance::DEFAULT));
    }

    #[test]
    fn test_invert_singular() {
        let m = Transform::scale(1.0, 0.0, 1.0);
        assert!(matches!(
            m.invert(),
            Err(MathError::Singular { column: 1, .. })
        ));
        assert!(Transform::zero().invert().is_err());
    }

    #[test]
    fn test_multiply_associative() {
        let tol = Tolerance::DEFAULT;
        let a = sample();
        let b = Transform::from_ae(35.0, 25.0);
        let c = Transform::scale_about_pt(&Point3::new(1.0, 1.0, 1.0), 3.0).unwrap();
        let left = a.then(&b).then(&c);
        let right = a.then(&b.then(&c));
        assert!(left.is_equal(&right, &tol));
        assert!((&a * &b).is_equal(&a.then(&b), &tol));
    }

    #[test]
    fn test_is_equal_tolerates_recomputation() {
        let tol = Tolerance::DEFAULT;
        let a = Transform::from_angles(10.0, 20.0, 30.0);
        let b = Transform::rotation_about_axis(&Dir3::new_normalize(Vec3::x()), 10.0_f64.to_radians())
            .then(&Transform::rotation_about_axis(
                &Dir3::new_normalize(Vec3::y()),
                20.0_f64.to_radians(),
            ))
            .then(&Transform::rotation_about_axis(
                &Dir3::new_normalize(Vec3::z()),
                30.0_f64.to_radians(),
            ));
        assert!(a.is_equal(&a, &tol));
        assert!(a.is_equal(&b, &tol));
        assert!(!a.is_identity());
        assert!(!a.is_equal(&Transform::translation(0.01, 0.0, 0.0).then(&a), &tol));
    }

    #[test]
    fn test_transpose_of_rotation_is_inverse() {
        let r = Transform::from_angles(15.0, 25.0, -35.0);
        assert!(r
            .transpose()
            .is_equal(&r.invert().unwrap(), &Tolerance::DEFAULT));
    }

    #[test]
    fn test_from_ae() {
        let m = Transform::from_ae(90.0, 0.0);
        let v = m.apply_vec(&Vec3::x());
        assert!((v - Vec3::y()).norm() < 1e-12);

        let up = Transform::from_ae(0.0, 90.0).apply_vec(&Vec3::x());
        assert!((up - Vec3::z()).norm() < 1e-12);
    }

    #[test]
    fn test_from_to() {
        let tol = Tolerance::DEFAULT;
        let from = Vec3::new(1.0, 2.0, 3.0);
        let to = Vec3::new(-2.0, 0.5, 1.0);
        let m = Transform::from_to(&from, &to, &tol);
        let r = m.apply_vec(&from.normalize());
        assert!((r - to.normalize()).norm() < 1e-12);
        // Still a rotation.
        assert!(m.transpose().is_equal(&m.invert().unwrap(), &tol));
    }

    #[test]
    fn test_from_to_anti_parallel() {
        let tol = Tolerance::DEFAULT;
        let from = Vec3::new(0.0, 0.0, 1.0);
        let m = Transform::from_to(&from, &-from, &tol);
        let r = m.apply_vec(&from);
        assert!((r + from).norm() < 1e-12);
        assert!(Transform::from_to(&from, &from, &tol).is_identity());
    }

    #[test]
    fn test_arb_rot() {
        let pivot = Point3::new(1.0, 1.0, 0.0);
        let m = Transform::arb_rot(&pivot, &Vec3::z(), PI / 2.0);
        let p = m.apply_point(&Point3::new(2.0, 1.0, 0.0));
        assert!((p - Point3::new(1.0, 2.0, 0.0)).norm() < 1e-12);
        let fixed = m.apply_point(&pivot);
        assert!((fixed - pivot).norm() < 1e-12);
    }

    #[test]
    fn test_scale_about_pt() {
        let pivot = Point3::new(1.0, 0.0, 0.0);
        let m = Transform::scale_about_pt(&pivot, 2.0).unwrap();
        let p = m.apply_point(&Point3::new(2.0, 1.0, 0.0));
        assert!((p - Point3::new(3.0, 2.0, 0.0)).norm() < 1e-12);
        assert!((m.uniform_scale() - 2.0).abs() < 1e-12);
        assert!(m.is_uniform_scale(&Tolerance::DEFAULT));
        assert_eq!(
            Transform::scale_about_pt(&pivot, 0.0),
            Err(MathError::ZeroScale)
        );
    }

    #[test]
    fn test_xform_about_pt() {
        let pivot = Point3::new(0.0, 5.0, 0.0);
        let rot = Transform::rotation_about_axis(&Dir3::new_normalize(Vec3::z()), PI);
        let m = Transform::xform_about_pt(&rot, &pivot);
        let p = m.apply_point(&Point3::new(1.0, 5.0, 0.0));
        assert!((p - Point3::new(-1.0, 5.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_mul_hvec() {
        let m = Transform::translation(1.0, 2.0, 3.0);
        let v = m.mul_hvec(&HVec::new(1.0, 1.0, 1.0, 1.0));
        assert_eq!(v, HVec::new(2.0, 3.0, 4.0, 1.0));
        let d = m.mul_hvec(&HVec::new(1.0, 1.0, 1.0, 0.0));
        assert_eq!(d, HVec::new(1.0, 1.0, 1.0, 0.0));
    }

    #[test]
    fn test_non_uniform_scale_detected() {
        assert!(!Transform::scale(1.0, 2.0, 1.0).is_uniform_scale(&Tolerance::DEFAULT));
    }
}
