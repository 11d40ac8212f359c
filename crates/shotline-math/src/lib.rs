#![warn(missing_docs)]

//! Math types for the shotline intersection kernel.
//!
//! Thin wrappers around nalgebra providing the vocabulary every primitive
//! speaks: points, vectors, homogeneous 4x4 transforms, tolerance bundles,
//! and the handful of small numeric helpers (orthogonal vectors, 2x2 eigen
//! decomposition) the curvature routines lean on.

use nalgebra::{Matrix3, Unit, Vector2, Vector3, Vector4};
use thiserror::Error;

mod transform;

pub use transform::Transform;

/// A point in 3D space.
pub type Point3 = nalgebra::Point3<f64>;

/// A vector in 3D space.
pub type Vec3 = Vector3<f64>;

/// A unit (normalized) direction vector in 3D space.
pub type Dir3 = Unit<Vector3<f64>>;

/// A point in 2D parameter space.
pub type Point2 = nalgebra::Point2<f64>;

/// A vector in 2D space.
pub type Vec2 = Vector2<f64>;

/// A homogeneous 4-vector.
pub type HVec = Vector4<f64>;

/// A 3x3 linear map (rotation/scale block of a transform).
pub type Mat3 = Matrix3<f64>;

/// Smallest magnitude treated as non-zero by the intersection kernels.
pub const SMALL_FASTF: f64 = 1.0e-77;

/// Square root of [`SMALL_FASTF`]; gates near-zero denominators.
pub const SQRT_SMALL_FASTF: f64 = 1.0e-39;

/// Errors raised by the transform library.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    /// Gauss-Jordan elimination found no usable pivot.
    #[error("singular matrix: largest pivot {pivot:e} in column {column}")]
    Singular {
        /// Column being eliminated.
        column: usize,
        /// Magnitude of the best pivot found.
        pivot: f64,
    },

    /// A scale of zero cannot be applied about a point.
    #[error("zero scale factor")]
    ZeroScale,
}

/// Result type for math operations.
pub type Result<T> = std::result::Result<T, MathError>;

/// Tolerance bundle for geometric comparisons.
#[derive(Debug, Clone, Copy)]
pub struct Tolerance {
    /// Distance tolerance in model units (mm).
    pub dist: f64,
    /// `dist * dist`, precomputed.
    pub dist_sq: f64,
    /// Perpendicularity tolerance: `|cos(angle)|` below this is perpendicular.
    pub perp: f64,
    /// Parallelism tolerance: `1 - perp`.
    pub para: f64,
}

impl Tolerance {
    /// Default ray-tracing tolerances (0.0005 mm distance, 1e-6 perpendicularity).
    pub const DEFAULT: Self = Self::new(0.0005, 1e-6);

    /// Build a tolerance bundle from distance and perpendicularity tolerances.
    pub const fn new(dist: f64, perp: f64) -> Self {
        Self {
            dist,
            dist_sq: dist * dist,
            perp,
            para: 1.0 - perp,
        }
    }

    /// Check if two points are coincident within tolerance.
    pub fn points_equal(&self, a: &Point3, b: &Point3) -> bool {
        (a - b).norm_squared() < self.dist_sq
    }

    /// Check if a scalar distance is effectively zero.
    pub fn is_zero(&self, d: f64) -> bool {
        d.abs() < self.dist
    }

    /// Check if two unit vectors are perpendicular within tolerance.
    pub fn is_perpendicular(&self, a: &Vec3, b: &Vec3) -> bool {
        a.dot(b).abs() < self.perp
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Return a unit vector perpendicular to `v`.
///
/// The component of smallest magnitude is zeroed and the other two are
/// swapped with one sign flip, so the result is stable for any input that
/// is not the zero vector. A zero input yields the zero vector.
pub fn vec_ortho(v: &Vec3) -> Vec3 {
    let (mut i, mut j, mut k) = (0, 1, 2);
    let mut f = v.x.abs();
    if v.y.abs() < f {
        f = v.y.abs();
        (i, j, k) = (1, 2, 0);
    }
    if v.z.abs() < f {
        (i, j, k) = (2, 0, 1);
    }
    let h = v[j].hypot(v[k]);
    if h < SMALL_FASTF {
        return Vec3::zeros();
    }
    let mut out = Vec3::zeros();
    out[i] = 0.0;
    out[j] = -v[k] / h;
    out[k] = v[j] / h;
    out
}

/// Eigen decomposition of a symmetric 2x2 matrix.
#[derive(Debug, Clone, Copy)]
pub struct Eigen2 {
    /// Smaller eigenvalue.
    pub val1: f64,
    /// Larger eigenvalue.
    pub val2: f64,
    /// Unit eigenvector for `val1`.
    pub vec1: Vec2,
    /// Unit eigenvector for `val2`.
    pub vec2: Vec2,
}

/// Eigenvalues and eigenvectors of the symmetric matrix `[[a, b], [b, c]]`.
///
/// Eigenvalues are returned in ascending order.
pub fn eigen2x2(a: f64, b: f64, c: f64) -> Eigen2 {
    if b.abs() < 1.0e-10 {
        return if a < c {
            Eigen2 {
                val1: a,
                val2: c,
                vec1: Vec2::new(1.0, 0.0),
                vec2: Vec2::new(0.0, 1.0),
            }
        } else {
            Eigen2 {
                val1: c,
                val2: a,
                vec1: Vec2::new(0.0, 1.0),
                vec2: Vec2::new(1.0, 0.0),
            }
        };
    }

    let d = 0.5 * (c - a);
    let root = d.hypot(b);
    let mid = 0.5 * (c + a);
    let val1 = mid - root;
    let val2 = mid + root;

    Eigen2 {
        val1,
        val2,
        vec1: Vec2::new(b, val1 - a).normalize(),
        vec2: Vec2::new(b, val2 - a).normalize(),
    }
}
