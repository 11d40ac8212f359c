//! Hits, segments, and partitions.
//!
//! A [`Segment`] is one ray/solid crossing: an entry [`Hit`] and an exit
//! [`Hit`]. Hit points and normals are filled in on demand by the owning
//! primitive's `norm`, so only hits that matter pay for them.

use std::cmp::Ordering;

use shotline_math::{Point3, Tolerance, Vec3};

/// Principal curvature at a hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Curvature {
    /// Unit direction of the first principal curvature, tangent to the surface.
    pub pdir: Vec3,
    /// First principal curvature, `|c1| <= |c2|`.
    pub c1: f64,
    /// Second principal curvature.
    pub c2: f64,
}

impl Curvature {
    /// Zero curvature, principal direction perpendicular to `normal`.
    pub fn flat(normal: &Vec3) -> Self {
        Self {
            pdir: shotline_math::vec_ortho(normal),
            c1: 0.0,
            c2: 0.0,
        }
    }
}

/// Surface parameter coordinates and their beam footprint.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UvCoord {
    /// U in `[0, 1]`.
    pub u: f64,
    /// V in `[0, 1]`.
    pub v: f64,
    /// Footprint width along U.
    pub du: f64,
    /// Footprint width along V.
    pub dv: f64,
}

/// Final surface data for a hit that crossed out of a nested instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmodelHit {
    /// Unit normal in the outer frame.
    pub normal: Vec3,
    /// UV from the nested primitive.
    pub uv: UvCoord,
    /// Curvature from the nested primitive, direction in the outer frame.
    pub curvature: Curvature,
    /// Surface number inside the nested primitive.
    pub inner_surfno: i32,
    /// Name of the nested solid that was struck.
    pub solid: String,
}

/// Primitive-specific scratch carried with a hit.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum HitPrivate {
    /// Nothing kept.
    #[default]
    None,
    /// Hit point in the hyperboloid's canonical frame.
    Hyp(Point3),
    /// Everything already resolved on the nested side.
    Submodel(Box<SubmodelHit>),
}

/// One end of a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Distance along the ray.
    pub dist: f64,
    /// Hit point. Valid after `norm`.
    pub point: Point3,
    /// Unit outward normal. Valid after `norm`.
    pub normal: Vec3,
    /// Which sub-surface was struck; meaning is up to the primitive.
    pub surfno: i32,
    /// Primitive scratch.
    pub private: HitPrivate,
}

impl Hit {
    /// A hit at `dist` on surface `surfno`.
    pub fn new(dist: f64, surfno: i32) -> Self {
        Self {
            dist,
            point: Point3::origin(),
            normal: Vec3::zeros(),
            surfno,
            private: HitPrivate::None,
        }
    }

    /// Attach primitive scratch.
    pub fn with_private(mut self, private: HitPrivate) -> Self {
        self.private = private;
        self
    }
}

/// One ray/solid crossing.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Index of the solid in its instance's solid table.
    pub solid: usize,
    /// Entry.
    pub inhit: Hit,
    /// Exit. Never nearer than `inhit`.
    pub outhit: Hit,
}

impl Segment {
    /// Length of the crossing.
    pub fn length(&self) -> f64 {
        self.outhit.dist - self.inhit.dist
    }
}

/// A maximal run of overlapping segments along the ray.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Solid providing the entry.
    pub in_solid: usize,
    /// Entry hit.
    pub inhit: Hit,
    /// Solid providing the exit.
    pub out_solid: usize,
    /// Exit hit.
    pub outhit: Hit,
}

impl Partition {
    /// Union-weave segments into partitions.
    ///
    /// Sorts `segs` by entry distance, then merges any segment that starts
    /// within `tol.dist` of the running partition's exit.
    pub fn weave(segs: &mut [Segment], tol: &Tolerance) -> Vec<Partition> {
        segs.sort_by(|a, b| {
            a.inhit
                .dist
                .partial_cmp(&b.inhit.dist)
                .unwrap_or(Ordering::Equal)
        });

        let mut parts: Vec<Partition> = Vec::new();
        for seg in segs.iter() {
            match parts.last_mut() {
                Some(last) if seg.inhit.dist <= last.outhit.dist + tol.dist => {
                    if seg.outhit.dist > last.outhit.dist {
                        last.outhit = seg.outhit.clone();
                        last.out_solid = seg.solid;
                    }
                }
                _ => parts.push(Partition {
                    in_solid: seg.solid,
                    inhit: seg.inhit.clone(),
                    out_solid: seg.solid,
                    outhit: seg.outhit.clone(),
                }),
            }
        }
        parts
    }
}
