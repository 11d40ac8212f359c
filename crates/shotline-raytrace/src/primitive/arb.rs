//! Arbitrary convex polyhedron (ARB4 through ARB8).
//!
//! An ARB is eight vertices. Degenerate forms repeat vertices, which
//! collapses faces; prep keeps whichever of the six canonical quads still
//! have three distinct points and requires 4 to 6 of them.
//!
//! Shooting clips the ray's parametric interval against each face
//! half-space in turn (Cyrus-Beck). The largest entry distance and the
//! smallest exit distance bound the segment.

use std::any::Any;
use std::fmt::Write as _;
use std::sync::OnceLock;

use log::{debug, warn};
use shotline_db::DbRecord;
use shotline_math::{Point3, Tolerance, Transform, Vec3, SQRT_SMALL_FASTF};

use super::{Classification, Primitive, PrimitiveKind, RtInternal};
use crate::application::{Application, Resource};
use crate::bbox::{Aabb3, Bounds};
use crate::error::{Result, RtError};
use crate::hit::{Curvature, Hit, Segment, UvCoord};
use crate::ray::Ray;
use crate::soltab::Soltab;

/// The six candidate faces: label and vertex indices, listed clockwise
/// seen from outside.
const FACES: [(&str, [usize; 4]); 6] = [
    ("1234", [3, 2, 1, 0]),
    ("8765", [4, 5, 6, 7]),
    ("1485", [4, 7, 3, 0]),
    ("2673", [2, 6, 5, 1]),
    ("1562", [1, 5, 4, 0]),
    ("4378", [7, 6, 2, 3]),
];

/// Vertices closer than this (squared) are the same vertex.
const EQUIV_DIST_SQ: f64 = 0.005;

/// Cosine slop for colinear and non-planar checks.
const SLOPPY_DOT_TOL: f64 = 0.0087;

/// Imported ARB: eight vertices in placed coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbInternal {
    /// Vertices in ARB8 order.
    pub pts: [Point3; 8],
}

impl ArbInternal {
    /// Place raw vertices by `mat`.
    pub fn import(pts: &[[f64; 3]; 8], mat: &Transform) -> Result<Self> {
        let pts = pts.map(|p| mat.apply_point(&Point3::new(p[0], p[1], p[2])));
        if pts.iter().any(|p| !p.coords.iter().all(|c| c.is_finite())) {
            return Err(RtError::BadRecord {
                kind: "arb8",
                reason: "vertex is not finite".into(),
            });
        }
        Ok(Self { pts })
    }

    /// Back to a raw record.
    pub fn export(&self) -> DbRecord {
        DbRecord::Arb8 {
            pts: self.pts.map(|p| [p.x, p.y, p.z]),
        }
    }

    /// Mean of the eight vertices. Always interior for a valid ARB, unlike
    /// the box centre of a thin tilted plate.
    pub fn center(&self) -> Point3 {
        let sum = self.pts.iter().fold(Vec3::zeros(), |acc, p| acc + p.coords);
        Point3::from(sum / 8.0)
    }

    /// Vertex listing, plus face planes when `verbose`.
    pub fn describe(&self, verbose: bool) -> String {
        let mut out = String::from("arb8\n");
        for (i, p) in self.pts.iter().enumerate() {
            let _ = writeln!(out, "\t{} ({:.4}, {:.4}, {:.4})", i + 1, p.x, p.y, p.z);
        }
        if verbose {
            match mk_faces(self, false, "describe") {
                Ok(set) => {
                    for f in &set.faces {
                        let (n, a) = (f.normal, f.point);
                        let _ = writeln!(
                            out,
                            "\tface {}: A=({:.4}, {:.4}, {:.4}) N=({:.4}, {:.4}, {:.4}) d={:.4}",
                            f.title, a.x, a.y, a.z, n.x, n.y, n.z, f.offset
                        );
                    }
                }
                Err(e) => {
                    let _ = writeln!(out, "\t{e}");
                }
            }
        }
        out
    }
}

/// One face plane.
#[derive(Debug, Clone, Copy)]
struct ArbFace {
    title: &'static str,
    /// First accepted vertex.
    point: Point3,
    /// Unit outward normal.
    normal: Vec3,
    /// `normal . point`.
    offset: f64,
}

/// UV basis of one face. `u` and `v` are pre-scaled by the inverse face
/// extents, so projecting onto them gives `[0, 1]`.
#[derive(Debug, Clone, Copy)]
struct ArbUv {
    origin: Point3,
    u: Vec3,
    v: Vec3,
    /// Inverse extent along U.
    ulen: f64,
    /// Inverse extent along V.
    vlen: f64,
}

#[derive(Debug, Default)]
struct FaceSet {
    faces: Vec<ArbFace>,
    uv: Vec<ArbUv>,
}

/// Accumulates one face point by point.
struct FaceBuilder<'a> {
    title: &'static str,
    center: &'a Point3,
    with_uv: bool,
    npts: usize,
    a: Point3,
    normal: Vec3,
    offset: f64,
    uv: ArbUv,
}

impl<'a> FaceBuilder<'a> {
    fn new(title: &'static str, center: &'a Point3, with_uv: bool) -> Self {
        Self {
            title,
            center,
            with_uv,
            npts: 0,
            a: Point3::origin(),
            normal: Vec3::zeros(),
            offset: 0.0,
            uv: ArbUv {
                origin: Point3::origin(),
                u: Vec3::zeros(),
                v: Vec3::zeros(),
                ulen: 0.0,
                vlen: 0.0,
            },
        }
    }

    /// Grow the UV extents to cover `p`, re-anchoring the origin when it
    /// projects behind it.
    fn stretch_uv(&mut self, p: &Point3, along_v: bool) {
        let pa = p - self.uv.origin;
        let f = pa.dot(&self.uv.u);
        if f > self.uv.ulen {
            self.uv.ulen = f;
        } else if f < 0.0 {
            self.uv.origin += f * self.uv.u;
            self.uv.ulen -= f;
        }
        if !along_v {
            return;
        }
        let pa = p - self.uv.origin;
        let f = pa.dot(&self.uv.v);
        if f > self.uv.vlen {
            self.uv.vlen = f;
        } else if f < 0.0 {
            self.uv.origin += f * self.uv.v;
            self.uv.vlen -= f;
        }
    }

    /// Offer the next distinct vertex. Returns whether it was accepted.
    fn add_pt(&mut self, p: &Point3, name: &str) -> bool {
        match self.npts {
            0 => {
                self.a = *p;
                self.uv.origin = *p;
            }
            1 => {
                let u = p - self.a;
                let len = u.norm();
                if len == 0.0 {
                    return false;
                }
                self.uv.ulen = len;
                self.uv.u = u / len;
            }
            2 => {
                let pa = p - self.a;
                // Points run clockwise, so (C-A)x(B-A) points inward.
                let n = pa.cross(&self.uv.u);
                let mag = n.norm();
                if mag < SLOPPY_DOT_TOL {
                    return false;
                }
                let n = n / mag;

                if self.with_uv {
                    let work = n.cross(&self.uv.u).normalize();
                    let v = work * work.dot(&pa);
                    self.uv.vlen = v.norm();
                    self.uv.v = v / self.uv.vlen;
                    self.stretch_uv(p, false);
                }

                self.normal = if (self.a - self.center).dot(&n) < 0.0 {
                    -n
                } else {
                    n
                };
                self.offset = self.normal.dot(&self.a.coords);
            }
            _ => {
                if self.with_uv {
                    self.stretch_uv(p, true);
                }
                let dir = (p - self.a).normalize();
                let f = self.normal.dot(&dir);
                if f.abs() > SLOPPY_DOT_TOL {
                    warn!(
                        "arb({name}): face {}[{}] non-planar, dot={f:.6}",
                        self.title, self.npts
                    );
                }
            }
        }
        self.npts += 1;
        true
    }

    fn finish(self) -> Option<(ArbFace, ArbUv)> {
        if self.npts < 3 {
            return None;
        }
        let mut uv = self.uv;
        if self.with_uv {
            uv.ulen = 1.0 / uv.ulen;
            uv.vlen = 1.0 / uv.vlen;
            uv.u *= uv.ulen;
            uv.v *= uv.vlen;
        }
        Some((
            ArbFace {
                title: self.title,
                point: self.a,
                normal: self.normal,
                offset: self.offset,
            },
            uv,
        ))
    }
}

/// Derive the face planes (and optionally the UV bases) of an ARB.
fn mk_faces(aip: &ArbInternal, with_uv: bool, name: &str) -> Result<FaceSet> {
    let center = aip.center();

    // Lowest-numbered equivalent vertex for each vertex.
    let mut equiv = [0usize; 8];
    for i in 0..8 {
        equiv[i] = (0..i)
            .rev()
            .find(|&j| (aip.pts[i] - aip.pts[j]).norm_squared() < EQUIV_DIST_SQ)
            .map_or(i, |j| equiv[j]);
    }
    debug!("arb({name}) equivalent vertices {equiv:?}");

    let mut set = FaceSet::default();
    for (title, verts) in FACES {
        let mut fb = FaceBuilder::new(title, &center, with_uv);
        let mut used: Vec<usize> = Vec::with_capacity(4);
        for &vi in &verts {
            let vi = equiv[vi];
            if used.contains(&vi) {
                continue;
            }
            if fb.add_pt(&aip.pts[vi], name) {
                used.push(vi);
            }
        }
        if let Some((face, uv)) = fb.finish() {
            set.faces.push(face);
            if with_uv {
                set.uv.push(uv);
            }
        }
    }

    if !(4..=6).contains(&set.faces.len()) {
        warn!("arb({name}): only {} faces present", set.faces.len());
        return Err(RtError::BadFaceCount(set.faces.len()));
    }
    Ok(set)
}

/// Prepared ARB.
#[derive(Debug)]
pub struct ArbSpecific {
    faces: Vec<ArbFace>,
    uv: OnceLock<Vec<ArbUv>>,
}

impl ArbSpecific {
    /// Derive faces and bounds. With `with_uv` the UV bases are built now
    /// instead of on the first `uv` call.
    pub fn prep(aip: &ArbInternal, with_uv: bool, name: &str) -> Result<(Self, Bounds)> {
        let set = mk_faces(aip, with_uv, name)?;
        let uv = OnceLock::new();
        if with_uv {
            let _ = uv.set(set.uv);
        }
        let bounds = Bounds::from_aabb(Aabb3::from_points(aip.pts.iter()));
        Ok((
            Self {
                faces: set.faces,
                uv,
            },
            bounds,
        ))
    }

    /// Number of faces kept.
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Outward unit normal and plane offset of face `i`.
    pub fn plane(&self, i: usize) -> Option<(Vec3, f64)> {
        self.faces.get(i).map(|f| (f.normal, f.offset))
    }

    /// Whether the UV bases exist yet.
    pub fn has_uv(&self) -> bool {
        self.uv.get().is_some()
    }

    /// Clip `ray` against every face. Returns `(in, out)` hits.
    fn clip(&self, ray: &Ray) -> Option<(Hit, Hit)> {
        let mut t_in = f64::NEG_INFINITY;
        let mut t_out = f64::INFINITY;
        let mut iplane = None;
        let mut oplane = None;

        for (j, face) in self.faces.iter().enumerate().rev() {
            let dxbdn = face.normal.dot(&ray.origin.coords) - face.offset;
            let dn = -face.normal.dot(ray.direction.as_ref());

            if dn < -SQRT_SMALL_FASTF {
                // Exit: dir.N > 0.
                let s = dxbdn / dn;
                if t_out > s {
                    t_out = s;
                    oplane = Some(j);
                }
            } else if dn > SQRT_SMALL_FASTF {
                let s = dxbdn / dn;
                if t_in < s {
                    t_in = s;
                    iplane = Some(j);
                }
            } else if dxbdn > SQRT_SMALL_FASTF {
                // Parallel and outside this face.
                return None;
            }
            if t_in > t_out {
                return None;
            }
        }

        let (iplane, oplane) = (iplane?, oplane?);
        if t_in >= t_out || t_out >= f64::INFINITY {
            return None;
        }
        Some((Hit::new(t_in, iplane as i32), Hit::new(t_out, oplane as i32)))
    }

    /// UV bases, building them on first use.
    ///
    /// The record is fetched again outside the lock; the bases are derived
    /// under the instance's model lock, and only if nobody beat us to it.
    fn uv_basis(&self, ap: &Application<'_>, stp: &Soltab) -> Option<&[ArbUv]> {
        if let Some(uv) = self.uv.get() {
            return Some(uv);
        }

        let aip = match RtInternal::fetch(ap.rt.db(), &stp.name, &stp.matrix) {
            Ok(RtInternal::Arb8(aip)) => aip,
            Ok(other) => {
                warn!("arb({}): record is now a {}", stp.name, other.kind());
                return None;
            }
            Err(e) => {
                warn!("arb({}): uv setup cannot fetch record: {e}", stp.name);
                return None;
            }
        };

        {
            let _guard = ap.rt.model_lock();
            if self.uv.get().is_none() {
                match mk_faces(&aip, true, &stp.name) {
                    Ok(set) => {
                        let _ = self.uv.set(set.uv);
                    }
                    Err(e) => warn!("arb({}): uv setup failed: {e}", stp.name),
                }
            }
        }

        self.uv.get().map(Vec::as_slice)
    }
}

/// UV of `point` on `face`, with the beam footprint `r` projected into the
/// face plane.
fn face_uv(face: &ArbFace, uvb: &ArbUv, point: &Point3, dir: &Vec3, r: f64) -> UvCoord {
    let pa = point - uvb.origin;
    let mut u = pa.dot(&uvb.u);
    // v runs opposite the build direction.
    let mut v = 1.0 - pa.dot(&uvb.v);
    if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
        debug!("arb uv out of range: {u}, {v}");
        u = u.abs();
        v = v.abs();
    }

    let min_du = r * uvb.ulen;
    let min_dv = r * uvb.vlen;
    let rev_dir = -dir;
    let dot_n = rev_dir.dot(&face.normal);
    let along = rev_dir - dot_n * face.normal;
    let along = if along.norm() < SQRT_SMALL_FASTF {
        Vec3::zeros()
    } else {
        along.normalize()
    };

    let (du, dv) = if dot_n.abs() < SQRT_SMALL_FASTF {
        (min_du, min_dv)
    } else {
        (
            (r * along.dot(&uvb.u) / dot_n).abs().max(min_du),
            (r * along.dot(&uvb.v) / dot_n).abs().max(min_dv),
        )
    };

    UvCoord { u, v, du, dv }
}

impl Primitive for ArbSpecific {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Arb8
    }

    fn shot(
        &self,
        stp: &Soltab,
        ap: &Application<'_>,
        _res: &mut Resource,
        segs: &mut Vec<Segment>,
    ) -> usize {
        match self.clip(&ap.ray) {
            Some((inhit, outhit)) => {
                segs.push(Segment {
                    solid: stp.id,
                    inhit,
                    outhit,
                });
                1
            }
            None => 0,
        }
    }

    fn norm(&self, hit: &mut Hit, _stp: &Soltab, ray: &Ray) {
        hit.point = ray.at(hit.dist);
        if let Some(face) = self.faces.get(hit.surfno as usize) {
            hit.normal = face.normal;
        }
    }

    fn curve(&self, hit: &Hit, _stp: &Soltab) -> Curvature {
        Curvature::flat(&hit.normal)
    }

    fn uv(&self, ap: &Application<'_>, stp: &Soltab, hit: &Hit) -> UvCoord {
        let Some(basis) = self.uv_basis(ap, stp) else {
            return UvCoord::default();
        };
        let i = hit.surfno as usize;
        match (self.faces.get(i), basis.get(i)) {
            (Some(face), Some(uvb)) => {
                let r = ap.rbeam + ap.diverge * hit.dist;
                face_uv(face, uvb, &hit.point, ap.ray.direction.as_ref(), r)
            }
            _ => UvCoord::default(),
        }
    }

    fn class(&self, _stp: &Soltab, bbox: &Aabb3, tol: &Tolerance) -> Classification {
        for face in &self.faces {
            // Corner of the box deepest along -N.
            let near = Point3::new(
                if face.normal.x > 0.0 { bbox.min.x } else { bbox.max.x },
                if face.normal.y > 0.0 { bbox.min.y } else { bbox.max.y },
                if face.normal.z > 0.0 { bbox.min.z } else { bbox.max.z },
            );
            if face.normal.dot(&near.coords) - face.offset > tol.dist {
                return Classification::Outside;
            }
        }
        Classification::Unimplemented
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Batched shot over (ARB, ray) pairs.
///
/// Faces are the outer loop and pairs the inner one. A pair that has
/// missed is marked and skipped rather than leaving the batch. Solids that
/// are not ARBs yield `None`.
pub fn vshot(stps: &[&Soltab], rays: &[Ray]) -> Vec<Option<Segment>> {
    struct Lane<'a> {
        arb: Option<&'a ArbSpecific>,
        t_in: f64,
        t_out: f64,
        iplane: i32,
        oplane: i32,
    }

    let mut lanes: Vec<Lane<'_>> = stps
        .iter()
        .map(|stp| Lane {
            arb: stp.specific_as::<ArbSpecific>(),
            t_in: f64::NEG_INFINITY,
            t_out: f64::INFINITY,
            iplane: -1,
            oplane: -1,
        })
        .collect();

    for j in 0..6 {
        for (lane, ray) in lanes.iter_mut().zip(rays) {
            let Some(arb) = lane.arb else { continue };
            let Some(face) = arb.faces.get(j) else { continue };

            let dxbdn = face.normal.dot(&ray.origin.coords) - face.offset;
            let dn = -face.normal.dot(ray.direction.as_ref());
            if dn < -SQRT_SMALL_FASTF {
                let s = dxbdn / dn;
                if lane.t_out > s {
                    lane.t_out = s;
                    lane.oplane = j as i32;
                }
            } else if dn > SQRT_SMALL_FASTF {
                let s = dxbdn / dn;
                if lane.t_in < s {
                    lane.t_in = s;
                    lane.iplane = j as i32;
                }
            } else if dxbdn > SQRT_SMALL_FASTF {
                lane.arb = None;
            }
            if lane.t_in > lane.t_out {
                lane.arb = None;
            }
        }
    }

    lanes
        .into_iter()
        .zip(stps)
        .map(|(lane, stp)| {
            lane.arb?;
            if lane.iplane == -1 || lane.oplane == -1 {
                return None;
            }
            if lane.t_in >= lane.t_out || lane.t_out >= f64::INFINITY {
                return None;
            }
            Some(Segment {
                solid: stp.id,
                inhit: Hit::new(lane.t_in, lane.iplane),
                outhit: Hit::new(lane.t_out, lane.oplane),
            })
        })
        .collect()
}
