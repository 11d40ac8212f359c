//! The primitive contract and its dispatch table.
//!
//! Every solid type implements [`Primitive`]. Preparation is the one
//! operation that dispatches on the integer tag, since there is no
//! prepared object to call through yet; everything afterwards is a trait
//! call on the prepared `Box<dyn Primitive>`.
//!
//! | Tag | Kind | Module |
//! |-----|------|--------|
//! | 4   | ARB8 | [`arb`] |
//! | 28  | SUBMODEL | [`submodel`] |
//! | 38  | HYP  | [`hyp`] |

use std::any::Any;
use std::fmt;

use shotline_db::{Db, DbRecord};
use shotline_math::{Tolerance, Transform};

use crate::application::{Application, Resource};
use crate::bbox::{Aabb3, Bounds};
use crate::error::{Result, RtError};
use crate::hit::{Curvature, Hit, Segment, UvCoord};
use crate::ray::Ray;
use crate::rt::Rt;
use crate::soltab::Soltab;

pub mod arb;
pub mod hyp;
pub mod submodel;

pub use arb::{ArbInternal, ArbSpecific};
pub use hyp::{HypInternal, HypSpecific};
pub use submodel::{SubmodelInternal, SubmodelSpecific};

/// Integer primitive tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum PrimitiveKind {
    /// Convex polyhedron, 4 to 8 vertices.
    Arb8 = 4,
    /// Nested instance of a whole tree.
    Submodel = 28,
    /// Hyperboloid of one sheet.
    Hyp = 38,
}

impl PrimitiveKind {
    /// Short label.
    pub fn name(self) -> &'static str {
        match self {
            Self::Arb8 => "arb8",
            Self::Submodel => "submodel",
            Self::Hyp => "hyp",
        }
    }
}

impl TryFrom<i32> for PrimitiveKind {
    type Error = RtError;

    fn try_from(tag: i32) -> Result<Self> {
        match tag {
            4 => Ok(Self::Arb8),
            28 => Ok(Self::Submodel),
            38 => Ok(Self::Hyp),
            _ => Err(RtError::UnknownKind(tag)),
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of classifying a box against a solid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Box is wholly outside.
    Outside,
    /// Box is wholly inside.
    Inside,
    /// Box straddles the boundary.
    Overlapping,
    /// The primitive cannot tell.
    Unimplemented,
}

/// A solid in its imported, placed form, ready for prep.
#[derive(Debug, Clone, PartialEq)]
pub enum RtInternal {
    /// Convex polyhedron.
    Arb8(ArbInternal),
    /// Hyperboloid of one sheet.
    Hyp(HypInternal),
    /// Nested instance.
    Submodel(SubmodelInternal),
}

impl RtInternal {
    /// Import a raw record placed by `mat`.
    pub fn import(record: &DbRecord, mat: &Transform) -> Result<Self> {
        match record {
            DbRecord::Arb8 { pts } => Ok(Self::Arb8(ArbInternal::import(pts, mat)?)),
            DbRecord::Hyp { v, h, a, b, bnr } => {
                Ok(Self::Hyp(HypInternal::import(v, h, a, *b, *bnr, mat)?))
            }
            DbRecord::Submodel {
                file,
                treetop,
                method,
            } => Ok(Self::Submodel(SubmodelInternal {
                file: file.clone(),
                treetop: treetop.clone(),
                method: method.clone(),
                root2leaf: *mat,
            })),
            DbRecord::Comb { .. } => Err(RtError::BadRecord {
                kind: "comb",
                reason: "combinations are not primitives".into(),
            }),
        }
    }

    /// Re-fetch `name` from `db` and import it again.
    pub fn fetch(db: &Db, name: &str, mat: &Transform) -> Result<Self> {
        Self::import(db.fetch(name)?, mat)
    }

    /// Back to a raw record, in placed coordinates.
    pub fn export(&self) -> DbRecord {
        match self {
            Self::Arb8(a) => a.export(),
            Self::Hyp(h) => h.export(),
            Self::Submodel(s) => s.export(),
        }
    }

    /// Human-readable parameter report.
    pub fn describe(&self, verbose: bool) -> String {
        match self {
            Self::Arb8(a) => a.describe(verbose),
            Self::Hyp(h) => h.describe(verbose),
            Self::Submodel(s) => s.describe(verbose),
        }
    }

    /// The tag this record prepares into.
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Self::Arb8(_) => PrimitiveKind::Arb8,
            Self::Hyp(_) => PrimitiveKind::Hyp,
            Self::Submodel(_) => PrimitiveKind::Submodel,
        }
    }
}

/// What a primitive's prep may consult.
#[derive(Debug, Clone, Copy)]
pub struct PrepContext<'a> {
    /// Instance the solid is being prepared into.
    pub rt: &'a Rt,
    /// Object name of the solid.
    pub name: &'a str,
    /// Placement the solid was imported with.
    pub matrix: &'a Transform,
    /// Tree the solid was walked from.
    pub root: &'a str,
}

/// Operations every prepared solid supports.
///
/// Implementations are immutable after prep, apart from lazily completed
/// secondary data guarded by the instance's model lock.
pub trait Primitive: Send + Sync + fmt::Debug {
    /// Tag of this primitive.
    fn kind(&self) -> PrimitiveKind;

    /// Intersect `ap.ray`, appending segments to `segs`. Returns how many
    /// were added; 0 is a miss.
    fn shot(
        &self,
        stp: &Soltab,
        ap: &Application<'_>,
        res: &mut Resource,
        segs: &mut Vec<Segment>,
    ) -> usize;

    /// Fill in `hit.point` and `hit.normal`.
    fn norm(&self, hit: &mut Hit, stp: &Soltab, ray: &Ray);

    /// Principal curvature at a hit whose normal is already filled in.
    fn curve(&self, hit: &Hit, stp: &Soltab) -> Curvature;

    /// Surface parameters at a hit whose point is already filled in.
    fn uv(&self, ap: &Application<'_>, stp: &Soltab, hit: &Hit) -> UvCoord;

    /// Classify an axis-aligned box against the solid.
    fn class(&self, _stp: &Soltab, _bbox: &Aabb3, _tol: &Tolerance) -> Classification {
        Classification::Unimplemented
    }

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

/// Prepare one solid.
///
/// With `internal` absent, the record is fetched again from the instance's
/// database by name.
pub fn prep(
    internal: Option<&RtInternal>,
    ctx: &PrepContext<'_>,
) -> Result<(Box<dyn Primitive>, Bounds)> {
    let fetched;
    let internal = match internal {
        Some(ip) => ip,
        None => {
            fetched = RtInternal::fetch(ctx.rt.db(), ctx.name, ctx.matrix)?;
            &fetched
        }
    };

    match internal {
        RtInternal::Arb8(aip) => {
            let uv_now = ctx.rt.settings().arb_uv_at_prep;
            let (spec, bounds) = ArbSpecific::prep(aip, uv_now, ctx.name)?;
            Ok((Box::new(spec), bounds))
        }
        RtInternal::Hyp(hip) => {
            let (spec, bounds) = HypSpecific::prep(hip)?;
            Ok((Box::new(spec), bounds))
        }
        RtInternal::Submodel(sip) => {
            let (spec, bounds) = SubmodelSpecific::prep(sip, ctx)?;
            Ok((Box::new(spec), bounds))
        }
    }
}

/// Shoot many independent (solid, ray) pairs.
///
/// Pairs are grouped by kind; ARBs go through their batched routine and
/// everything else through `shot` one pair at a time. The result has one
/// entry per pair, in input order.
pub fn vshot(
    pairs: &[(&Soltab, Ray)],
    ap: &Application<'_>,
    res: &mut Resource,
) -> Vec<Vec<Segment>> {
    let mut out = vec![Vec::new(); pairs.len()];

    let (arbs, rest): (Vec<usize>, Vec<usize>) =
        (0..pairs.len()).partition(|&i| pairs[i].0.kind == PrimitiveKind::Arb8);

    if !arbs.is_empty() {
        let stps: Vec<&Soltab> = arbs.iter().map(|&i| pairs[i].0).collect();
        let rays: Vec<Ray> = arbs.iter().map(|&i| pairs[i].1).collect();
        for (slot, seg) in arbs.iter().zip(arb::vshot(&stps, &rays)) {
            if let Some(seg) = seg {
                out[*slot].push(seg);
            }
        }
    }

    for i in rest {
        let (stp, ray) = pairs[i];
        let pap = ap.with_ray(ray);
        stp.specific.shot(stp, &pap, res, &mut out[i]);
    }

    res.stats.segments += out.iter().map(|s| s.len() as u64).sum::<u64>();
    out
}
