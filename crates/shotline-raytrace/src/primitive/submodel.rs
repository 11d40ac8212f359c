//! Submodels: a whole tree, possibly from another database file, placed as
//! one solid.
//!
//! Prep builds a nested [`Rt`] for the named tree. Placements of the same
//! tree from the same database share one nested instance through a
//! process-wide registry; the last placement to go releases it. Shooting
//! maps the ray into the nested frame, traces the nested instance, and maps
//! each resulting partition back out as one segment whose hits already
//! carry their final normal, UV and curvature.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, ThreadId};

use log::{debug, warn};
use shotline_db::{Db, DbRecord};
use shotline_math::Transform;

use super::{PrepContext, Primitive, PrimitiveKind};
use crate::application::{Application, RayHandler, Resource, ShotStats};
use crate::bbox::Bounds;
use crate::error::{Result, RtError};
use crate::hit::{Curvature, Hit, HitPrivate, Partition, Segment, SubmodelHit, UvCoord};
use crate::ray::Ray;
use crate::rt::Rt;
use crate::settings::SpacePartition;
use crate::soltab::Soltab;

/// Surface number of every hit lifted out of a nested instance.
pub const SUBMODEL_SURFNO: i32 = -2;

/// Hard limit on nesting, whatever the trees are called.
const MAX_NESTING: u32 = 32;

/// Imported submodel record.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmodelInternal {
    /// Database file holding the tree; `None` means the referencing database.
    pub file: Option<String>,
    /// Root object of the nested tree.
    pub treetop: String,
    /// Space partitioning override for the nested instance.
    pub method: Option<String>,
    /// Nested frame to placed frame.
    pub root2leaf: Transform,
}

impl SubmodelInternal {
    /// Back to a raw record. The placement lives in the referencing
    /// combination, not here.
    pub fn export(&self) -> DbRecord {
        DbRecord::Submodel {
            file: self.file.clone(),
            treetop: self.treetop.clone(),
            method: self.method.clone(),
        }
    }

    /// Parameter listing. Verbose adds the placement matrix.
    pub fn describe(&self, verbose: bool) -> String {
        let mut out = String::from("submodel\n");
        let _ = writeln!(
            out,
            "\tfile: {}",
            self.file.as_deref().unwrap_or("(current database)")
        );
        let _ = writeln!(out, "\ttreetop: {}", self.treetop);
        if let Some(method) = &self.method {
            let _ = writeln!(out, "\tmethod: {method}");
        }
        if verbose {
            let m = self.root2leaf.to_array();
            for row in m.chunks(4) {
                let _ = writeln!(
                    out,
                    "\t[{:10.4} {:10.4} {:10.4} {:10.4}]",
                    row[0], row[1], row[2], row[3]
                );
            }
        }
        out
    }
}

/// Identity of a shareable nested instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    db: u64,
    treetop: String,
    partition: SpacePartition,
    useair: bool,
}

enum Slot {
    /// Being prepared by this thread; others wait.
    Building(ThreadId),
    Ready { model: Arc<Rt>, refs: usize },
}

#[derive(Default)]
struct Registry {
    entries: HashMap<Key, Slot>,
    /// Threads blocked on someone else's build, and the key they want.
    waiting: HashMap<ThreadId, Key>,
}

static REGISTRY: OnceLock<(Mutex<Registry>, Condvar)> = OnceLock::new();

fn registry() -> &'static (Mutex<Registry>, Condvar) {
    REGISTRY.get_or_init(Default::default)
}

fn lock(m: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Registry {
    /// Whether `me` waiting on `key` would close a loop of builders each
    /// waiting on the next.
    fn closes_cycle(&self, me: ThreadId, key: &Key) -> bool {
        let mut key = key;
        for _ in 0..=self.waiting.len() {
            let owner = match self.entries.get(key) {
                Some(Slot::Building(owner)) => *owner,
                _ => return false,
            };
            if owner == me {
                return true;
            }
            match self.waiting.get(&owner) {
                Some(next) => key = next,
                None => return false,
            }
        }
        false
    }
}

/// A claimed `Building` entry. Dropped without `done`, it withdraws the claim
/// and wakes any waiters so one of them can build instead.
struct Claim<'k> {
    key: &'k Key,
    done: bool,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.done {
            let (m, cvar) = registry();
            lock(m).entries.remove(self.key);
            cvar.notify_all();
        }
    }
}

/// Find or build the nested instance for `key`.
///
/// The registry lock is held only to look up and claim. `build` runs
/// unlocked; concurrent preparers of the same key wait for it.
fn acquire(key: &Key, build: impl FnOnce() -> Result<Rt>) -> Result<Arc<Rt>> {
    let (m, cvar) = registry();
    let me = thread::current().id();
    let mut reg = lock(m);
    loop {
        match reg.entries.get_mut(key) {
            Some(Slot::Ready { model, refs }) => {
                *refs += 1;
                debug!("submodel {}: sharing instance ({} refs)", key.treetop, refs);
                return Ok(Arc::clone(model));
            }
            Some(Slot::Building(_)) => {}
            None => break,
        }
        if reg.closes_cycle(me, key) {
            return Err(RtError::SubmodelCycle(key.treetop.clone()));
        }
        reg.waiting.insert(me, key.clone());
        reg = cvar.wait(reg).unwrap_or_else(PoisonError::into_inner);
        reg.waiting.remove(&me);
    }
    reg.entries.insert(key.clone(), Slot::Building(me));
    drop(reg);

    let mut claim = Claim { key, done: false };
    let model = Arc::new(build()?);

    let mut reg = lock(m);
    reg.entries.insert(
        key.clone(),
        Slot::Ready {
            model: Arc::clone(&model),
            refs: 1,
        },
    );
    claim.done = true;
    drop(reg);
    cvar.notify_all();
    Ok(model)
}

/// Drop one reference. The last one removes the entry.
fn release(key: &Key) {
    let (m, _) = registry();
    let mut reg = lock(m);
    let last = match reg.entries.get_mut(key) {
        Some(Slot::Ready { refs, .. }) => {
            *refs -= 1;
            *refs == 0
        }
        _ => false,
    };
    let removed = if last { reg.entries.remove(key) } else { None };
    drop(reg);
    // The nested instance may hold submodels of its own, which release
    // through this same lock.
    drop(removed);
}

fn shared_refs(key: &Key) -> Option<usize> {
    let (m, _) = registry();
    match lock(m).entries.get(key) {
        Some(Slot::Ready { refs, .. }) => Some(*refs),
        _ => None,
    }
}

/// Prepared submodel.
#[derive(Debug)]
pub struct SubmodelSpecific {
    treetop: String,
    nested: Arc<Rt>,
    /// Registry key; `None` for a private instance.
    key: Option<Key>,
    forward: Transform,
    inverse: Transform,
    /// Nested-side resource per outer worker.
    resources: Vec<Mutex<Resource>>,
}

impl SubmodelSpecific {
    /// Resolve the nested tree and compute the outer-frame bounds.
    pub fn prep(sip: &SubmodelInternal, ctx: &PrepContext<'_>) -> Result<(Self, Bounds)> {
        let rt = ctx.rt;
        if rt.depth() >= MAX_NESTING {
            return Err(RtError::SubmodelCycle(sip.treetop.clone()));
        }

        let db: Arc<Db> = match &sip.file {
            Some(file) => Db::open_shared(rt.db().resolve(file))?,
            None => Arc::clone(rt.db()),
        };

        // A tree already being built further out can only recurse.
        let mut lineage = rt.ancestors().to_vec();
        lineage.push((rt.db().id(), ctx.root.to_string()));
        if lineage
            .iter()
            .any(|(id, top)| *id == db.id() && *top == sip.treetop)
        {
            return Err(RtError::SubmodelCycle(sip.treetop.clone()));
        }

        let mut settings = rt.settings().clone();
        if let Some(method) = &sip.method {
            settings.space_partition = method.parse()?;
        }

        let forward = sip.root2leaf;
        let inverse = forward.invert()?;
        if !forward.is_uniform_scale(rt.tol()) {
            warn!(
                "{}: submodel {} placed with non-uniform scale; hit distances will be approximate",
                ctx.name, sip.treetop
            );
        }

        let ncpu = rt.ncpu();
        let depth = rt.depth() + 1;
        let build = || -> Result<Rt> {
            let mut nested = Rt::nested(
                Arc::clone(&db),
                settings.clone(),
                ncpu,
                depth,
                lineage.clone(),
            );
            if nested.gettree(&sip.treetop)? == 0 {
                return Err(RtError::EmptySubmodel(sip.treetop.clone()));
            }
            nested.prep()?;
            Ok(nested)
        };

        let key = (!settings.dont_instance).then(|| Key {
            db: db.id(),
            treetop: sip.treetop.clone(),
            partition: settings.space_partition,
            useair: settings.useair,
        });
        let nested = match &key {
            Some(key) => acquire(key, build)?,
            None => Arc::new(build()?),
        };

        let bounds = Bounds::from_aabb(nested.bounds().transformed(&forward));
        let resources = (0..ncpu).map(|cpu| Mutex::new(Resource::new(cpu))).collect();

        Ok((
            Self {
                treetop: sip.treetop.clone(),
                nested,
                key,
                forward,
                inverse,
                resources,
            },
            bounds,
        ))
    }

    /// The nested instance.
    pub fn nested(&self) -> &Arc<Rt> {
        &self.nested
    }

    /// Nested frame to outer frame.
    pub fn forward(&self) -> &Transform {
        &self.forward
    }

    /// Outer frame to nested frame.
    pub fn inverse(&self) -> &Transform {
        &self.inverse
    }

    /// Nested-side counters summed over every outer worker.
    pub fn nested_stats(&self) -> ShotStats {
        let mut total = ShotStats::default();
        for slot in &self.resources {
            total += slot.lock().unwrap_or_else(PoisonError::into_inner).stats;
        }
        total
    }

    /// How many placements share the nested instance; `None` when it is
    /// private to this one.
    pub fn shared_refs(&self) -> Option<usize> {
        self.key.as_ref().and_then(shared_refs)
    }

    /// Build the outer-frame hit for one end of a nested partition.
    fn lift(&self, nap: &Application<'_>, inner: &Soltab, hit: &Hit, t0: f64, scale: f64) -> Hit {
        let mut h = hit.clone();
        inner.norm(&mut h, &nap.ray);
        let uv = inner.uv(nap, &h);
        let cv = inner.curve(&h);

        let lin = self.forward.linear();
        let normal = (lin * h.normal).normalize();
        let curvature = Curvature {
            pdir: (lin * cv.pdir).try_normalize(0.0).unwrap_or(cv.pdir),
            c1: cv.c1 * scale,
            c2: cv.c2 * scale,
        };

        let mut out = Hit::new((h.dist + t0) / scale, SUBMODEL_SURFNO);
        out.point = self.forward.apply_point(&h.point);
        out.normal = normal;
        out.private = HitPrivate::Submodel(Box::new(SubmodelHit {
            normal,
            uv,
            curvature,
            inner_surfno: h.surfno,
            solid: inner.name.clone(),
        }));
        out
    }
}

impl Drop for SubmodelSpecific {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            release(&key);
        }
    }
}

/// Hands nested partitions back to the caller.
struct Collect;

impl RayHandler for Collect {
    type Output = Vec<Partition>;

    fn hit(&mut self, _ap: &Application<'_>, parts: &[Partition], _segs: &[Segment]) -> Self::Output {
        parts.to_vec()
    }

    fn miss(&mut self, _ap: &Application<'_>) -> Self::Output {
        Vec::new()
    }
}

impl Primitive for SubmodelSpecific {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Submodel
    }

    fn shot(
        &self,
        stp: &Soltab,
        ap: &Application<'_>,
        res: &mut Resource,
        segs: &mut Vec<Segment>,
    ) -> usize {
        let (nray, scale) = ap.ray.transformed(&self.inverse);
        let Some((t0, _)) = nray.slab(self.nested.bounds()) else {
            return 0;
        };

        let nap = Application {
            rt: self.nested.as_ref(),
            ray: Ray::new(nray.at(t0), nray.direction.into_inner()),
            onehit: ap.onehit,
            rbeam: ap.rbeam * scale,
            diverge: ap.diverge,
            min_dist: ap.min_dist * scale - t0,
            level: ap.level + 1,
        };

        let parts = match self.resources.get(res.cpu) {
            Some(slot) => {
                let mut nres = slot.lock().unwrap_or_else(PoisonError::into_inner);
                self.nested.shoot_ray(&nap, &mut nres, &mut Collect)
            }
            None => {
                debug!(
                    "submodel {}: worker {} outside the {} nested resources; stats not kept",
                    self.treetop,
                    res.cpu,
                    self.resources.len()
                );
                self.nested.shoot_ray(&nap, &mut Resource::new(res.cpu), &mut Collect)
            }
        };

        let mut n = 0;
        for p in &parts {
            let (Some(sin), Some(sout)) = (self.nested.solid(p.in_solid), self.nested.solid(p.out_solid))
            else {
                continue;
            };
            segs.push(Segment {
                solid: stp.id,
                inhit: self.lift(&nap, sin, &p.inhit, t0, scale),
                outhit: self.lift(&nap, sout, &p.outhit, t0, scale),
            });
            n += 1;
        }
        if n > 0 {
            debug!("submodel {}: {} partitions lifted", self.treetop, n);
        }
        n
    }

    fn norm(&self, hit: &mut Hit, _stp: &Soltab, ray: &Ray) {
        hit.point = ray.at(hit.dist);
        if let HitPrivate::Submodel(sub) = &hit.private {
            hit.normal = sub.normal;
        }
    }

    fn curve(&self, hit: &Hit, _stp: &Soltab) -> Curvature {
        match &hit.private {
            HitPrivate::Submodel(sub) => sub.curvature,
            _ => Curvature::flat(&hit.normal),
        }
    }

    fn uv(&self, _ap: &Application<'_>, _stp: &Soltab, hit: &Hit) -> UvCoord {
        match &hit.private {
            HitPrivate::Submodel(sub) => sub.uv,
            _ => UvCoord::default(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
