//! Per-ray application context and per-worker resources.

use std::ops::AddAssign;

use crate::hit::{Partition, Segment};
use crate::ray::Ray;
use crate::rt::Rt;

/// Tracing parameters for one ray against one instance.
#[derive(Debug, Clone, Copy)]
pub struct Application<'a> {
    /// Instance being shot.
    pub rt: &'a Rt,
    /// The ray.
    pub ray: Ray,
    /// Stop after the first partition.
    pub onehit: bool,
    /// Beam radius at the ray origin.
    pub rbeam: f64,
    /// Beam divergence per unit distance.
    pub diverge: f64,
    /// Segments ending before this distance are dropped.
    pub min_dist: f64,
    /// Nesting depth; 0 for the top-level instance.
    pub level: u32,
}

impl<'a> Application<'a> {
    /// All-hits application with a zero-width beam.
    pub fn new(rt: &'a Rt, ray: Ray) -> Self {
        Self {
            rt,
            ray,
            onehit: false,
            rbeam: 0.0,
            diverge: 0.0,
            min_dist: f64::NEG_INFINITY,
            level: 0,
        }
    }

    /// Same parameters, different ray.
    pub fn with_ray(&self, ray: Ray) -> Self {
        Self { ray, ..*self }
    }
}

/// Shot counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShotStats {
    /// Rays fired.
    pub shots: u64,
    /// Rays producing at least one partition.
    pub hits: u64,
    /// Rays producing nothing.
    pub misses: u64,
    /// Segments produced.
    pub segments: u64,
}

impl AddAssign for ShotStats {
    fn add_assign(&mut self, rhs: Self) {
        self.shots += rhs.shots;
        self.hits += rhs.hits;
        self.misses += rhs.misses;
        self.segments += rhs.segments;
    }
}

/// Scratch owned by one worker.
///
/// Never shared between threads while a ray is in flight.
#[derive(Debug, Default)]
pub struct Resource {
    /// Worker index.
    pub cpu: usize,
    free_segs: Vec<Vec<Segment>>,
    /// Counters for rays shot with this resource.
    pub stats: ShotStats,
}

impl Resource {
    /// Fresh resource for worker `cpu`.
    pub fn new(cpu: usize) -> Self {
        Self {
            cpu,
            ..Default::default()
        }
    }

    /// An empty segment buffer, reused when one is available.
    pub fn get_segs(&mut self) -> Vec<Segment> {
        self.free_segs.pop().unwrap_or_default()
    }

    /// Return a segment buffer for reuse.
    pub fn put_segs(&mut self, mut segs: Vec<Segment>) {
        segs.clear();
        self.free_segs.push(segs);
    }
}

/// Receives the outcome of one ray.
pub trait RayHandler {
    /// Value produced per ray.
    type Output;

    /// Called when at least one partition survives. `segs` are every
    /// segment the ray produced, sorted by entry distance.
    fn hit(&mut self, ap: &Application<'_>, parts: &[Partition], segs: &[Segment]) -> Self::Output;

    /// Called when nothing was hit.
    fn miss(&mut self, ap: &Application<'_>) -> Self::Output;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hit::Hit;

    #[test]
    fn test_segment_buffer_reuse() {
        let mut res = Resource::new(3);
        let mut segs = res.get_segs();
        segs.push(Segment {
            solid: 0,
            inhit: Hit::new(0.0, 0),
            outhit: Hit::new(1.0, 0),
        });
        let cap = segs.capacity();
        res.put_segs(segs);

        let again = res.get_segs();
        assert!(again.is_empty());
        assert_eq!(again.capacity(), cap);
        assert_eq!(res.cpu, 3);
    }

    #[test]
    fn test_stats_accumulate() {
        let mut a = ShotStats {
            shots: 2,
            hits: 1,
            misses: 1,
            segments: 3,
        };
        a += ShotStats {
            shots: 1,
            hits: 1,
            misses: 0,
            segments: 2,
        };
        assert_eq!(a.shots, 3);
        assert_eq!(a.segments, 5);
    }
}
