//! Elliptical hyperboloid of one sheet, capped by two planes.
//!
//! Prep builds a scale-and-rotate matrix taking model space to a canonical
//! frame in which the surface is `x^2 + y^2 - z^2 = 1` and the caps are the
//! planes `z = +k` and `z = -k`. Distances along a ray are the same in both
//! frames, so roots found in the canonical frame are model distances.

use std::any::Any;
use std::cmp::Ordering;
use std::f64::consts::{PI, TAU};
use std::fmt::Write as _;

use log::debug;
use shotline_db::DbRecord;
use shotline_math::{
    eigen2x2, vec_ortho, Mat3, Point3, Tolerance, Transform, Vec3, SMALL_FASTF,
    SQRT_SMALL_FASTF,
};

use super::{Primitive, PrimitiveKind};
use crate::application::{Application, Resource};
use crate::bbox::{Aabb3, Bounds};
use crate::error::{Result, RtError};
use crate::hit::{Curvature, Hit, HitPrivate, Segment, UvCoord};
use crate::ray::Ray;
use crate::soltab::Soltab;

/// Hit on the hyperbolic body.
pub const HYP_BODY: i32 = 1;
/// Hit on the cap at `v + h`.
pub const HYP_TOP: i32 = 2;
/// Hit on the cap at `v`.
pub const HYP_BOTTOM: i32 = 3;

/// Leading coefficient below this fraction of `|d|^2` is treated as zero.
const DEGENERATE_A: f64 = 1.0e-12;

/// Imported hyperboloid in placed coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct HypInternal {
    /// Centre of the base ellipse.
    pub v: Point3,
    /// Height vector, base to top.
    pub h: Vec3,
    /// Semi-major axis of the base ellipse.
    pub a: Vec3,
    /// Semi-minor length of the base ellipse.
    pub b: f64,
    /// Neck size over base size.
    pub bnr: f64,
}

impl HypInternal {
    /// Place raw parameters by `mat` and validate them.
    pub fn import(
        v: &[f64; 3],
        h: &[f64; 3],
        a: &[f64; 3],
        b: f64,
        bnr: f64,
        mat: &Transform,
    ) -> Result<Self> {
        let hip = Self {
            v: mat.apply_point(&Point3::from(*v)),
            h: mat.apply_vec(&Vec3::from(*h)),
            a: mat.apply_vec(&Vec3::from(*a)),
            b: b * mat.uniform_scale(),
            bnr,
        };
        hip.validate()?;
        Ok(hip)
    }

    fn validate(&self) -> Result<()> {
        let bad = |reason: &str| {
            Err(RtError::BadRecord {
                kind: "hyp",
                reason: reason.to_string(),
            })
        };
        if self.h.norm() < SQRT_SMALL_FASTF {
            return bad("zero height vector");
        }
        if self.a.norm() < SQRT_SMALL_FASTF || self.b <= 0.0 {
            return bad("zero base axis");
        }
        if !(self.bnr > 0.0 && self.bnr < 1.0) {
            return bad("neck ratio must lie strictly between 0 and 1");
        }
        let tol = Tolerance::DEFAULT;
        if !tol.is_perpendicular(&self.a.normalize(), &self.h.normalize()) {
            return bad("base axis is not perpendicular to height");
        }
        Ok(())
    }

    /// Back to a raw record.
    pub fn export(&self) -> DbRecord {
        DbRecord::Hyp {
            v: [self.v.x, self.v.y, self.v.z],
            h: [self.h.x, self.h.y, self.h.z],
            a: [self.a.x, self.a.y, self.a.z],
            b: self.b,
            bnr: self.bnr,
        }
    }

    /// Parameter listing, plus derived neck sizes when `verbose`.
    pub fn describe(&self, verbose: bool) -> String {
        let mut out = String::from("hyp\n");
        let (v, h, a) = (self.v, self.h, self.a);
        let _ = writeln!(out, "\tV ({:.4}, {:.4}, {:.4})", v.x, v.y, v.z);
        let _ = writeln!(out, "\tH ({:.4}, {:.4}, {:.4}) mag={:.4}", h.x, h.y, h.z, h.norm());
        let _ = writeln!(out, "\tA ({:.4}, {:.4}, {:.4}) mag={:.4}", a.x, a.y, a.z, a.norm());
        let _ = writeln!(out, "\tb={:.4} bnr={:.4}", self.b, self.bnr);
        if verbose {
            let k = (1.0 - self.bnr * self.bnr).sqrt() / self.bnr;
            let _ = writeln!(
                out,
                "\tneck {:.4} x {:.4}, canonical cap height {:.4}",
                a.norm() * self.bnr,
                self.b * self.bnr,
                k
            );
        }
        out
    }
}

/// Prepared hyperboloid.
#[derive(Debug)]
pub struct HypSpecific {
    /// Centre of the neck.
    center: Point3,
    /// Unit axis, base to top.
    axis: Vec3,
    r1: f64,
    r2: f64,
    /// Half the height.
    hh: f64,
    /// Cap height in the canonical frame.
    k: f64,
    /// Model to canonical, about `center`.
    sr: Mat3,
    /// Canonical to model.
    inv_sr: Mat3,
}

impl HypSpecific {
    /// Build the canonical frame and bounds.
    pub fn prep(hip: &HypInternal) -> Result<(Self, Bounds)> {
        hip.validate()?;

        let r1 = hip.a.norm();
        let r2 = hip.b;
        let bnr = hip.bnr;
        let hh = hip.h.norm() * 0.5;
        let k = (1.0 - bnr * bnr).sqrt() / bnr;

        let axis = hip.h / (2.0 * hh);
        let major = hip.a / r1;
        let minor = axis.cross(&major).normalize();

        let sr = Mat3::from_rows(&[
            (major / (r1 * bnr)).transpose(),
            (minor / (r2 * bnr)).transpose(),
            (axis * (k / hh)).transpose(),
        ]);
        let inv_sr = Mat3::from_columns(&[major * (r1 * bnr), minor * (r2 * bnr), axis * (hh / k)]);

        let center = hip.v + axis * hh;

        let ext = Vec3::from_fn(|i, _| (r1 * major[i]).hypot(r2 * minor[i]));
        let top = center + axis * hh;
        let bottom = center - axis * hh;
        let aabb = Aabb3::from_points(&[top - ext, top + ext, bottom - ext, bottom + ext]);
        let half = aabb.half_extent();
        let bounds = Bounds {
            aabb,
            center,
            aradius: half.x.max(half.y).max(half.z),
            bradius: hh.hypot(r1.max(r2)),
        };

        Ok((
            Self {
                center,
                axis,
                r1,
                r2,
                hh,
                k,
                sr,
                inv_sr,
            },
            bounds,
        ))
    }

    /// Model point to canonical frame.
    pub fn to_canonical(&self, p: &Point3) -> Point3 {
        Point3::from(self.sr * (p - self.center))
    }

    /// Canonical point back to model space.
    pub fn from_canonical(&self, q: &Point3) -> Point3 {
        self.center + self.inv_sr * q.coords
    }

    /// Accepted body and cap crossings, unsorted.
    fn candidates(&self, ray: &Ray) -> Vec<Hit> {
        let p = self.sr * (ray.origin - self.center);
        let d = self.sr * ray.direction.as_ref();
        let k = self.k;

        let mut hits = Vec::with_capacity(4);
        let mut push = |t: f64, surfno: i32| {
            let q = Point3::from(p + t * d);
            hits.push(Hit::new(t, surfno).with_private(HitPrivate::Hyp(q)));
        };

        let a = d.x * d.x + d.y * d.y - d.z * d.z;
        let b = 2.0 * (p.x * d.x + p.y * d.y - p.z * d.z);
        let c = p.x * p.x + p.y * p.y - p.z * p.z - 1.0;

        let roots = if a.abs() > DEGENERATE_A * d.norm_squared() {
            let disc = b * b - 4.0 * a * c;
            if disc < 0.0 {
                [None, None]
            } else {
                let sq = disc.sqrt();
                [Some((-b - sq) / (2.0 * a)), Some((-b + sq) / (2.0 * a))]
            }
        } else if b.abs() > SMALL_FASTF {
            // Parallel to an asymptote: one crossing.
            [Some(-c / b), None]
        } else {
            [None, None]
        };
        for t in roots.into_iter().flatten() {
            if (p.z + t * d.z).abs() <= k {
                push(t, HYP_BODY);
            }
        }

        if d.z.abs() > SMALL_FASTF {
            let rim = 1.0 + k * k;
            for (z, surfno) in [(k, HYP_TOP), (-k, HYP_BOTTOM)] {
                let t = (z - p.z) / d.z;
                let q = p + t * d;
                if q.x * q.x + q.y * q.y <= rim {
                    push(t, surfno);
                }
            }
        }
        hits
    }

    fn canonical_of(&self, hit: &Hit) -> Point3 {
        match &hit.private {
            HitPrivate::Hyp(q) => *q,
            _ => self.to_canonical(&hit.point),
        }
    }

    /// Unscaled model-space gradient of the implicit function at canonical `q`.
    fn gradient(&self, q: &Point3) -> Vec3 {
        self.sr.transpose() * Vec3::new(2.0 * q.x, 2.0 * q.y, -2.0 * q.z)
    }
}

/// Sort crossings by distance and pair them off into segments.
///
/// A capped sheet is crossed 2 or 4 times; any other count comes from a
/// graze along the rim and is a miss.
fn pair_crossings(stp: &Soltab, mut hits: Vec<Hit>, segs: &mut Vec<Segment>) -> usize {
    if hits.len() != 2 && hits.len() != 4 {
        if !hits.is_empty() {
            debug!("hyp({}): {} crossings, treating as a miss", stp.name, hits.len());
        }
        return 0;
    }
    hits.sort_by(|a, b| a.dist.partial_cmp(&b.dist).unwrap_or(Ordering::Equal));

    let mut n = 0;
    let mut it = hits.into_iter();
    while let (Some(inhit), Some(outhit)) = (it.next(), it.next()) {
        segs.push(Segment {
            solid: stp.id,
            inhit,
            outhit,
        });
        n += 1;
    }
    n
}

impl Primitive for HypSpecific {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Hyp
    }

    fn shot(
        &self,
        stp: &Soltab,
        ap: &Application<'_>,
        _res: &mut Resource,
        segs: &mut Vec<Segment>,
    ) -> usize {
        pair_crossings(stp, self.candidates(&ap.ray), segs)
    }

    fn norm(&self, hit: &mut Hit, _stp: &Soltab, ray: &Ray) {
        hit.point = ray.at(hit.dist);
        hit.normal = match hit.surfno {
            HYP_TOP => self.axis,
            HYP_BOTTOM => -self.axis,
            _ => self.gradient(&self.canonical_of(hit)).normalize(),
        };
    }

    fn curve(&self, hit: &Hit, _stp: &Soltab) -> Curvature {
        if hit.surfno != HYP_BODY {
            return Curvature::flat(&hit.normal);
        }

        let q = self.canonical_of(hit);
        let gnorm = self.gradient(&q).norm();
        if gnorm < SQRT_SMALL_FASTF {
            return Curvature::flat(&hit.normal);
        }

        // Hessian of the implicit function in model space.
        let hess =
            self.sr.transpose() * Mat3::from_diagonal(&Vec3::new(2.0, 2.0, -2.0)) * self.sr;
        let n = hit.normal;
        let u = vec_ortho(&n);
        let v = n.cross(&u);

        let a = -u.dot(&(hess * u)) / gnorm;
        let b = -u.dot(&(hess * v)) / gnorm;
        let c = -v.dot(&(hess * v)) / gnorm;
        let e = eigen2x2(a, b, c);

        let d1 = e.vec1.x * u + e.vec1.y * v;
        let d2 = e.vec2.x * u + e.vec2.y * v;
        if e.val1.abs() <= e.val2.abs() {
            Curvature {
                pdir: d1,
                c1: e.val1,
                c2: e.val2,
            }
        } else {
            Curvature {
                pdir: d2,
                c1: e.val2,
                c2: e.val1,
            }
        }
    }

    fn uv(&self, ap: &Application<'_>, _stp: &Soltab, hit: &Hit) -> UvCoord {
        let q = self.canonical_of(hit);
        let u = (q.y.atan2(q.x) / TAU).rem_euclid(1.0);
        let r = ap.rbeam + ap.diverge * hit.dist;
        let du = r / (PI * (self.r1 + self.r2));

        let (v, dv) = if hit.surfno == HYP_BODY {
            ((q.z + self.k) / (2.0 * self.k), r / (2.0 * self.hh))
        } else {
            let rim = (1.0 + self.k * self.k).sqrt();
            (q.x.hypot(q.y) / rim, r / self.r1.max(self.r2))
        };

        UvCoord {
            u,
            v: v.clamp(0.0, 1.0),
            du,
            dv,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Circular hyp: base radius 2, neck radius 1, height 2 centred on the origin.
    fn waisted() -> HypSpecific {
        let hip = HypInternal::import(
            &[0.0, 0.0, -1.0],
            &[0.0, 0.0, 2.0],
            &[2.0, 0.0, 0.0],
            2.0,
            0.5,
            &Transform::identity(),
        )
        .unwrap();
        HypSpecific::prep(&hip).unwrap().0
    }

    fn sorted(mut hits: Vec<Hit>) -> Vec<Hit> {
        hits.sort_by(|a, b| a.dist.partial_cmp(&b.dist).unwrap());
        hits
    }

    #[test]
    fn test_ray_through_waist() {
        let hyp = waisted();
        let ray = Ray::new(Point3::new(-5.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        let hits = sorted(hyp.candidates(&ray));
        assert_eq!(hits.len(), 2);
        assert!((hits[0].dist - 4.0).abs() < 1e-9);
        assert!((hits[1].dist - 6.0).abs() < 1e-9);
        for h in &hits {
            assert_eq!(h.surfno, HYP_BODY);
            let q = hyp.canonical_of(h);
            assert!((q.x * q.x + q.y * q.y - q.z * q.z - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_axis_parallel_outside_misses() {
        let hyp = waisted();
        let ray = Ray::new(Point3::new(3.0, 0.0, -5.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(hyp.candidates(&ray).is_empty());
    }

    #[test]
    fn test_axis_ray_hits_both_caps() {
        let hyp = waisted();
        let ray = Ray::new(Point3::new(0.0, 0.0, -5.0), Vec3::new(0.0, 0.0, 1.0));
        let hits = sorted(hyp.candidates(&ray));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].surfno, HYP_BOTTOM);
        assert_eq!(hits[1].surfno, HYP_TOP);
        assert!((hits[0].dist - 4.0).abs() < 1e-9);
        assert!((hits[1].dist - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_two_lobes_give_four_crossings() {
        let hyp = waisted();
        // x = 1.5 is inside only where 1 + 3 z^2 > 2.25.
        let ray = Ray::new(Point3::new(1.5, 0.0, 5.0), Vec3::new(0.0, 0.0, -1.0));
        let hits = sorted(hyp.candidates(&ray));
        assert_eq!(hits.len(), 4);
        let z0 = (1.25_f64 / 3.0).sqrt();
        assert_eq!(hits[0].surfno, HYP_TOP);
        assert!((hits[0].dist - 4.0).abs() < 1e-9);
        assert!((hits[1].dist - (5.0 - z0)).abs() < 1e-9);
        assert!((hits[2].dist - (5.0 + z0)).abs() < 1e-9);
        assert_eq!(hits[3].surfno, HYP_BOTTOM);
    }

    #[test]
    fn test_shot_pairs_both_lobes() {
        let mut db = shotline_db::Db::new("lobes");
        db.insert(
            "waist.s",
            DbRecord::Hyp {
                v: [0.0, 0.0, -1.0],
                h: [0.0, 0.0, 2.0],
                a: [2.0, 0.0, 0.0],
                b: 2.0,
                bnr: 0.5,
            },
        )
        .unwrap();
        let mut rt = crate::Rt::new(std::sync::Arc::new(db), crate::RtSettings::default());
        rt.gettree("waist.s").unwrap();
        rt.prep().unwrap();

        let ray = Ray::new(Point3::new(1.5, 0.0, 5.0), Vec3::new(0.0, 0.0, -1.0));
        let ap = Application::new(&rt, ray);
        let mut segs = Vec::new();
        let n = rt.solid(0).unwrap().shot(&ap, &mut Resource::new(0), &mut segs);
        assert_eq!(n, 2);
        assert_eq!(segs.len(), 2);

        let z0 = (1.25_f64 / 3.0).sqrt();
        assert!((segs[0].inhit.dist - 4.0).abs() < 1e-9);
        assert!((segs[0].outhit.dist - (5.0 - z0)).abs() < 1e-9);
        assert!((segs[1].inhit.dist - (5.0 + z0)).abs() < 1e-9);
        assert!((segs[1].outhit.dist - 6.0).abs() < 1e-9);
        assert_eq!(segs[0].inhit.surfno, HYP_TOP);
        assert_eq!(segs[1].outhit.surfno, HYP_BOTTOM);
    }

    #[test]
    fn test_odd_crossings_are_a_miss() {
        let bounds = Bounds::from_aabb(Aabb3::new(
            Point3::new(-2.0, -2.0, -1.0),
            Point3::new(2.0, 2.0, 1.0),
        ));
        let stp = soltab(waisted(), bounds);
        let mut segs = Vec::new();

        // Grazing the top rim: the body root and the cap both land on it.
        let graze = vec![
            Hit::new(3.0, HYP_BODY),
            Hit::new(3.0, HYP_TOP),
            Hit::new(5.0, HYP_BODY),
        ];
        assert_eq!(pair_crossings(&stp, graze, &mut segs), 0);
        assert!(segs.is_empty());

        // Unsorted input still pairs nearest-first.
        let four = vec![
            Hit::new(6.0, HYP_BOTTOM),
            Hit::new(4.0, HYP_TOP),
            Hit::new(5.5, HYP_BODY),
            Hit::new(4.5, HYP_BODY),
        ];
        assert_eq!(pair_crossings(&stp, four, &mut segs), 2);
        assert_eq!((segs[0].inhit.dist, segs[0].outhit.dist), (4.0, 4.5));
        assert_eq!((segs[1].inhit.dist, segs[1].outhit.dist), (5.5, 6.0));
        assert_eq!(segs[0].solid, 0);
    }

    #[test]
    fn test_candidate_count_is_even() {
        let hyp = waisted();
        let rays = [
            Ray::new(Point3::new(-5.0, 0.3, 0.2), Vec3::new(1.0, 0.1, 0.05)),
            Ray::new(Point3::new(0.5, -4.0, 3.0), Vec3::new(0.0, 1.0, -0.8)),
            Ray::new(Point3::new(1.2, 1.2, -4.0), Vec3::new(0.1, -0.2, 1.0)),
            Ray::new(Point3::new(-3.0, -3.0, -3.0), Vec3::new(1.0, 1.0, 1.0)),
        ];
        for ray in rays {
            assert_eq!(hyp.candidates(&ray).len() % 2, 0);
        }
    }

    #[test]
    fn test_frames_invert() {
        let hyp = waisted();
        let p = Point3::new(0.7, -0.4, 0.9);
        let back = hyp.from_canonical(&hyp.to_canonical(&p));
        assert!((back - p).norm() < 1e-12);
        // The neck maps to the unit circle.
        let q = hyp.to_canonical(&Point3::new(1.0, 0.0, 0.0));
        assert!((q.x - 1.0).abs() < 1e-12);
    }

    fn soltab(hyp: HypSpecific, bounds: Bounds) -> Soltab {
        Soltab {
            id: 0,
            name: "waist.s".into(),
            path: "/waist.s".into(),
            kind: PrimitiveKind::Hyp,
            matrix: Transform::identity(),
            bounds,
            specific: Box::new(hyp),
        }
    }

    #[test]
    fn test_waist_normal_and_curvature() {
        let hip = HypInternal::import(
            &[0.0, 0.0, -1.0],
            &[0.0, 0.0, 2.0],
            &[2.0, 0.0, 0.0],
            2.0,
            0.5,
            &Transform::identity(),
        )
        .unwrap();
        let (hyp, bounds) = HypSpecific::prep(&hip).unwrap();
        let stp = soltab(hyp, bounds);

        let ray = Ray::new(Point3::new(-5.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        let spec = stp.specific_as::<HypSpecific>().unwrap();
        let mut hit = spec.candidates(&ray).into_iter().find(|h| h.dist > 5.0).unwrap();
        stp.norm(&mut hit, &ray);
        assert!((hit.point - Point3::new(1.0, 0.0, 0.0)).norm() < 1e-9);
        assert!((hit.normal - Vec3::new(1.0, 0.0, 0.0)).norm() < 1e-9);

        // Around the neck: -1/r. Along the axis: rn k^2 / hh^2 = 3.
        let cv = stp.curve(&hit);
        assert!((cv.c1 + 1.0).abs() < 1e-9);
        assert!((cv.c2 - 3.0).abs() < 1e-9);
        assert!(cv.pdir.z.abs() < 1e-9);
        assert!(cv.pdir.dot(&hit.normal).abs() < 1e-12);
    }

    #[test]
    fn test_cap_normal_is_axis() {
        let hip = HypInternal::import(
            &[0.0, 0.0, -1.0],
            &[0.0, 0.0, 2.0],
            &[2.0, 0.0, 0.0],
            2.0,
            0.5,
            &Transform::identity(),
        )
        .unwrap();
        let (hyp, bounds) = HypSpecific::prep(&hip).unwrap();
        let stp = soltab(hyp, bounds);

        let ray = Ray::new(Point3::new(0.5, 0.5, 5.0), Vec3::new(0.0, 0.0, -1.0));
        let spec = stp.specific_as::<HypSpecific>().unwrap();
        let mut hits = sorted(spec.candidates(&ray));
        assert_eq!(hits.len(), 2);
        let top = &mut hits[0];
        assert_eq!(top.surfno, HYP_TOP);
        stp.norm(top, &ray);
        assert!((top.normal - Vec3::new(0.0, 0.0, 1.0)).norm() < 1e-12);
        let cv = stp.curve(top);
        assert_eq!((cv.c1, cv.c2), (0.0, 0.0));
        assert!(matches!(top.private, HitPrivate::Hyp(q) if (q.z - spec.k).abs() < 1e-12));
    }

    #[test]
    fn test_bounds() {
        let hip = HypInternal::import(
            &[0.0, 0.0, 0.0],
            &[0.0, 0.0, 4.0],
            &[3.0, 0.0, 0.0],
            1.0,
            0.5,
            &Transform::translation(0.0, 0.0, 1.0),
        )
        .unwrap();
        let (_, b) = HypSpecific::prep(&hip).unwrap();
        assert!((b.aabb.min - Point3::new(-3.0, -1.0, 1.0)).norm() < 1e-12);
        assert!((b.aabb.max - Point3::new(3.0, 1.0, 5.0)).norm() < 1e-12);
        assert!((b.center - Point3::new(0.0, 0.0, 3.0)).norm() < 1e-12);
        assert!((b.bradius - 13.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_import_validation() {
        let id = Transform::identity();
        let v = [0.0, 0.0, 0.0];
        let h = [0.0, 0.0, 2.0];
        assert!(HypInternal::import(&v, &h, &[1.0, 0.0, 0.0], 1.0, 1.0, &id).is_err());
        assert!(HypInternal::import(&v, &h, &[1.0, 0.0, 0.0], 1.0, 0.0, &id).is_err());
        assert!(HypInternal::import(&v, &h, &[1.0, 0.0, 1.0], 1.0, 0.5, &id).is_err());
        assert!(HypInternal::import(&v, &[0.0; 3], &[1.0, 0.0, 0.0], 1.0, 0.5, &id).is_err());
        assert!(HypInternal::import(&v, &h, &[1.0, 0.0, 0.0], -1.0, 0.5, &id).is_err());
        let ok = HypInternal::import(&v, &h, &[1.0, 0.0, 0.0], 1.0, 0.5, &id).unwrap();
        assert!(ok.describe(true).contains("neck"));
    }
}
