//! Ray-tracing instances: a database tree flattened into a prepared solid
//! table that rays are shot against.
//!
//! Building an instance is two steps. [`Rt::gettree`] walks a named tree and
//! imports every leaf; [`Rt::prep`] prepares the imported solids, in
//! parallel unless the instance is single-threaded. After that the instance
//! is read-only and may be shot from any number of threads, each with its
//! own [`Resource`].

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use shotline_db::Db;
use shotline_math::{Tolerance, Transform};

use crate::application::{Application, RayHandler, Resource, ShotStats};
use crate::bbox::{Aabb3, Bounds};
use crate::error::{Result, RtError};
use crate::hit::{Partition, Segment};
use crate::primitive::{self, PrepContext, Primitive, RtInternal};
use crate::ray::Ray;
use crate::settings::{RtSettings, SpacePartition};
use crate::soltab::Soltab;

/// An imported solid waiting for prep.
#[derive(Debug)]
struct Pending {
    name: String,
    path: String,
    matrix: Transform,
    /// Tree the solid was walked from.
    root: String,
    internal: RtInternal,
}

/// A prepared model.
#[derive(Debug)]
pub struct Rt {
    db: Arc<Db>,
    settings: RtSettings,
    tol: Tolerance,
    pending: Vec<Pending>,
    solids: Vec<Soltab>,
    bounds: Aabb3,
    model_lock: Mutex<()>,
    ncpu: usize,
    /// Worker pool, built on first parallel use.
    pool: OnceLock<ThreadPool>,
    single_threaded: bool,
    /// Any import or prep failure fails the whole instance.
    strict: bool,
    /// Submodel nesting depth; 0 at the top.
    depth: u32,
    /// (database id, tree top) of every enclosing instance, outermost first.
    ancestors: Vec<(u64, String)>,
}

impl Rt {
    /// New top-level instance over `db`.
    ///
    /// Failing solids are logged and left out.
    pub fn new(db: Arc<Db>, settings: RtSettings) -> Self {
        let ncpu = settings.worker_count();
        Self::build(db, settings, ncpu, false, false, 0, Vec::new())
    }

    /// Instance nested inside a submodel. Prepared on the calling thread,
    /// and the first failing solid fails the instance.
    pub(crate) fn nested(
        db: Arc<Db>,
        settings: RtSettings,
        ncpu: usize,
        depth: u32,
        ancestors: Vec<(u64, String)>,
    ) -> Self {
        Self::build(db, settings, ncpu, true, true, depth, ancestors)
    }

    fn build(
        db: Arc<Db>,
        settings: RtSettings,
        ncpu: usize,
        single_threaded: bool,
        strict: bool,
        depth: u32,
        ancestors: Vec<(u64, String)>,
    ) -> Self {
        Self {
            db,
            tol: settings.tolerance(),
            settings,
            pending: Vec::new(),
            solids: Vec::new(),
            bounds: Aabb3::empty(),
            model_lock: Mutex::new(()),
            ncpu: ncpu.max(1),
            pool: OnceLock::new(),
            single_threaded,
            strict,
            depth,
            ancestors,
        }
    }

    /// Database the solids come from.
    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    /// Settings this instance was built with.
    pub fn settings(&self) -> &RtSettings {
        &self.settings
    }

    /// Tolerances derived from the settings.
    pub fn tol(&self) -> &Tolerance {
        &self.tol
    }

    /// Worker count. Also sizes per-worker tables in nested instances.
    pub fn ncpu(&self) -> usize {
        self.ncpu
    }

    /// Submodel nesting depth.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Trees of the enclosing instances as (database id, tree top),
    /// outermost first. Empty at the top.
    pub fn ancestors(&self) -> &[(u64, String)] {
        &self.ancestors
    }

    /// Union of every prepared solid's box.
    pub fn bounds(&self) -> &Aabb3 {
        &self.bounds
    }

    /// Prepared solids, indexed by id.
    pub fn solids(&self) -> &[Soltab] {
        &self.solids
    }

    /// One prepared solid.
    pub fn solid(&self, id: usize) -> Option<&Soltab> {
        self.solids.get(id)
    }

    /// Imported solids not yet prepared.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The lock guarding lazy completion of per-solid data.
    pub fn model_lock(&self) -> MutexGuard<'_, ()> {
        self.model_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Walk the tree under `root` and import every leaf solid.
    ///
    /// Returns how many solids were queued for prep.
    pub fn gettree(&mut self, root: &str) -> Result<usize> {
        let leaves = self.db.walk(root, self.settings.useair)?;
        let mut added = 0;
        for leaf in leaves {
            match RtInternal::import(&leaf.record, &leaf.matrix) {
                Ok(internal) => {
                    self.pending.push(Pending {
                        name: leaf.name,
                        path: leaf.path,
                        matrix: leaf.matrix,
                        root: root.to_string(),
                        internal,
                    });
                    added += 1;
                }
                Err(e) if !self.strict => warn!("{}: {e}; skipped", leaf.path),
                Err(e) => return Err(e),
            }
        }
        debug!("gettree {root}: {added} solids queued");
        Ok(added)
    }

    fn pool(&self) -> Result<&ThreadPool> {
        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.ncpu)
            .thread_name(|i| format!("shotline-{i}"))
            .build()
            .map_err(|e| RtError::Pool(e.to_string()))?;
        debug!("started {} workers", self.ncpu);
        // A racing caller's pool wins; ours is dropped.
        Ok(self.pool.get_or_init(|| pool))
    }

    fn runs_serially(&self) -> bool {
        self.single_threaded || self.ncpu <= 1
    }

    /// Prepare every queued solid.
    ///
    /// Fails with [`RtError::NoSolids`] when nothing survives.
    pub fn prep(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let queued = pending.len();

        let prep_one = |p: Pending| {
            let ctx = PrepContext {
                rt: &*self,
                name: &p.name,
                matrix: &p.matrix,
                root: &p.root,
            };
            let out = primitive::prep(Some(&p.internal), &ctx);
            (p, out)
        };
        let results: Vec<(Pending, Result<(Box<dyn Primitive>, Bounds)>)> =
            if self.runs_serially() {
                let mut out = Vec::with_capacity(queued);
                for p in pending {
                    let done = prep_one(p);
                    let failed = done.1.is_err();
                    out.push(done);
                    if failed && self.strict {
                        break;
                    }
                }
                out
            } else {
                let pool = self.pool()?;
                pool.install(|| pending.into_par_iter().map(prep_one).collect())
            };

        for (p, out) in results {
            match out {
                Ok((specific, bounds)) => {
                    let id = self.solids.len();
                    self.solids.push(Soltab {
                        id,
                        name: p.name,
                        path: p.path,
                        kind: specific.kind(),
                        matrix: p.matrix,
                        bounds,
                        specific,
                    });
                }
                Err(e) if !self.strict => warn!("prep {}: {e}; solid dropped", p.path),
                Err(e) => return Err(e),
            }
        }

        if self.solids.is_empty() {
            return Err(RtError::NoSolids);
        }
        self.recompute_bounds();
        info!(
            "prepped {} of {} solids (depth {}), bounds {:?} .. {:?}",
            self.solids.len(),
            queued,
            self.depth,
            self.bounds.min,
            self.bounds.max
        );
        Ok(())
    }

    fn recompute_bounds(&mut self) {
        let mut bounds = Aabb3::empty();
        for stp in &self.solids {
            bounds.include(&stp.bounds.aabb);
        }
        self.bounds = bounds;
    }

    /// Shoot one ray and hand the outcome to `handler`.
    pub fn shoot_ray<H: RayHandler>(
        &self,
        ap: &Application<'_>,
        res: &mut Resource,
        handler: &mut H,
    ) -> H::Output {
        res.stats.shots += 1;
        let mut segs = res.get_segs();

        for stp in &self.solids {
            if self.settings.space_partition == SpacePartition::Boxes
                && ap.ray.slab(&stp.bounds.aabb).is_none()
            {
                continue;
            }
            stp.shot(ap, res, &mut segs);
        }

        segs.retain(|s| s.outhit.dist >= ap.min_dist);
        res.stats.segments += segs.len() as u64;

        let out = if segs.is_empty() {
            res.stats.misses += 1;
            handler.miss(ap)
        } else {
            let mut parts = Partition::weave(&mut segs, &self.tol);
            if ap.onehit {
                parts.truncate(1);
            }
            res.stats.hits += 1;
            handler.hit(ap, &parts, &segs)
        };

        res.put_segs(segs);
        out
    }

    /// Shoot a batch of rays in parallel, each with `template`'s parameters.
    ///
    /// Outputs are in ray order. Each batch of rays gets its own handler from
    /// `make_handler` and its own [`Resource`].
    pub fn shoot_rays<H, F>(
        &self,
        rays: &[Ray],
        template: &Application<'_>,
        make_handler: F,
    ) -> Result<(Vec<H::Output>, ShotStats)>
    where
        H: RayHandler,
        H::Output: Send,
        F: Fn() -> H + Sync,
    {
        let batch = rays.len().div_ceil(self.ncpu * 4).max(1);
        let run = |rays: &[Ray]| {
            let mut res = Resource::new(rayon::current_thread_index().unwrap_or(0));
            let mut handler = make_handler();
            let out: Vec<H::Output> = rays
                .iter()
                .map(|ray| self.shoot_ray(&template.with_ray(*ray), &mut res, &mut handler))
                .collect();
            (out, res.stats)
        };

        let batches: Vec<(Vec<H::Output>, ShotStats)> = if self.runs_serially() {
            rays.chunks(batch).map(&run).collect()
        } else {
            let pool = self.pool()?;
            pool.install(|| rays.par_chunks(batch).map(&run).collect())
        };

        let mut stats = ShotStats::default();
        let mut outputs = Vec::with_capacity(rays.len());
        for (out, s) in batches {
            outputs.extend(out);
            stats += s;
        }
        Ok((outputs, stats))
    }

    /// Shoot independent (solid id, ray) pairs.
    ///
    /// One segment list per pair, in input order. An unknown id yields an
    /// empty list.
    pub fn vshot(
        &self,
        pairs: &[(usize, Ray)],
        ap: &Application<'_>,
        res: &mut Resource,
    ) -> Vec<Vec<Segment>> {
        let known: Vec<usize> = (0..pairs.len())
            .filter(|&i| pairs[i].0 < self.solids.len())
            .collect();
        let batch: Vec<(&Soltab, Ray)> = known
            .iter()
            .map(|&i| (&self.solids[pairs[i].0], pairs[i].1))
            .collect();

        let mut out = vec![Vec::new(); pairs.len()];
        for (i, segs) in known.into_iter().zip(primitive::vshot(&batch, ap, res)) {
            out[i] = segs;
        }
        out
    }

    /// Remove one solid. Later solids shift down one id.
    pub fn free_solid(&mut self, id: usize) -> Option<Soltab> {
        if id >= self.solids.len() {
            return None;
        }
        let stp = self.solids.remove(id);
        for (i, s) in self.solids.iter_mut().enumerate().skip(id) {
            s.id = i;
        }
        self.recompute_bounds();
        debug!("freed solid {} ({})", id, stp.path);
        Some(stp)
    }

    /// Parameter report for one solid, re-imported from the database.
    pub fn describe_solid(&self, id: usize, verbose: bool) -> Result<String> {
        let stp = self.solid(id).ok_or(RtError::NoSuchSolid(id))?;
        let internal = RtInternal::fetch(&self.db, &stp.name, &stp.matrix)?;

        let mut out = format!("{} ({})\n", stp.path, stp.kind);
        out.push_str(&internal.describe(verbose));
        let (lo, hi) = (stp.bounds.aabb.min, stp.bounds.aabb.max);
        let _ = writeln!(
            out,
            "\tbounds ({:.4}, {:.4}, {:.4}) to ({:.4}, {:.4}, {:.4}), radius {:.4}",
            lo.x, lo.y, lo.z, hi.x, hi.y, hi.z, stp.bounds.bradius
        );
        Ok(out)
    }
}
