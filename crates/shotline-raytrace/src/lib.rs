#![warn(missing_docs)]

//! Ray/solid intersection for the shotline kernel.
//!
//! A database tree is flattened into a ray-tracing instance ([`Rt`]) whose
//! solids each implement the [`Primitive`] contract: shoot a ray and get
//! entry/exit [`Segment`]s back, then ask for normals, curvature and surface
//! coordinates at the hits that matter.
//!
//! # Architecture
//!
//! - [`Ray`] - Ray representation with origin and unit direction
//! - [`Hit`], [`Segment`], [`Partition`] - What a shot produces
//! - [`primitive`] - The contract plus ARB, HYP and submodel implementations
//! - [`Rt`] - Solid table, prep, and shooting
//! - [`Application`], [`Resource`] - Per-ray parameters and per-worker scratch
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use shotline_db::Db;
//! use shotline_raytrace::{Application, Ray, Resource, Rt, RtSettings};
//!
//! let db = Arc::new(Db::open("cube.json")?);
//! let mut rt = Rt::new(db, RtSettings::default());
//! rt.gettree("all")?;
//! rt.prep()?;
//!
//! let ray = Ray::new(Point3::new(-5.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
//! let mut res = Resource::new(0);
//! let spans = rt.shoot_ray(&Application::new(&rt, ray), &mut res, &mut handler);
//! ```

mod application;
mod bbox;
mod error;
mod hit;
mod ray;
mod rt;
mod settings;
mod soltab;

pub mod primitive;

pub use application::{Application, RayHandler, Resource, ShotStats};
pub use bbox::{Aabb3, Bounds};
pub use error::{Result, RtError};
pub use hit::{Curvature, Hit, HitPrivate, Partition, Segment, SubmodelHit, UvCoord};
pub use primitive::{Classification, Primitive, PrimitiveKind, RtInternal};
pub use ray::Ray;
pub use rt::Rt;
pub use settings::{RtSettings, SpacePartition};
pub use soltab::Soltab;

#[cfg(test)]
mod tests {
    use super::*;
    use shotline_db::{Db, DbRecord, Member};
    use shotline_math::{Point3, Transform, Vec3};
    use std::sync::Arc;

    fn unit_cube() -> DbRecord {
        DbRecord::Arb8 {
            pts: [
                [-1.0, -1.0, -1.0],
                [1.0, -1.0, -1.0],
                [1.0, 1.0, -1.0],
                [-1.0, 1.0, -1.0],
                [-1.0, -1.0, 1.0],
                [1.0, -1.0, 1.0],
                [1.0, 1.0, 1.0],
                [-1.0, 1.0, 1.0],
            ],
        }
    }

    fn waist_hyp() -> DbRecord {
        DbRecord::Hyp {
            v: [0.0, 0.0, -1.0],
            h: [0.0, 0.0, 2.0],
            a: [2.0, 0.0, 0.0],
            b: 2.0,
            bnr: 0.5,
        }
    }

    fn instance(db: Db, root: &str) -> Rt {
        let mut rt = Rt::new(Arc::new(db), RtSettings::default());
        rt.gettree(root).unwrap();
        rt.prep().unwrap();
        rt
    }

    fn single(record: DbRecord) -> Rt {
        let mut db = Db::new("single");
        db.insert("solid.s", record).unwrap();
        instance(db, "solid.s")
    }

    /// Every segment, with hit points and normals filled in.
    struct Normalled;

    impl RayHandler for Normalled {
        type Output = Vec<Segment>;

        fn hit(&mut self, ap: &Application<'_>, _parts: &[Partition], segs: &[Segment]) -> Self::Output {
            segs.iter()
                .map(|s| {
                    let mut s = s.clone();
                    let stp = &ap.rt.solids()[s.solid];
                    stp.norm(&mut s.inhit, &ap.ray);
                    stp.norm(&mut s.outhit, &ap.ray);
                    s
                })
                .collect()
        }

        fn miss(&mut self, _ap: &Application<'_>) -> Self::Output {
            Vec::new()
        }
    }

    fn shoot(rt: &Rt, origin: Point3, dir: Vec3) -> Vec<Segment> {
        let ap = Application::new(rt, Ray::new(origin, dir));
        rt.shoot_ray(&ap, &mut Resource::new(0), &mut Normalled)
    }

    #[test]
    fn test_cube_along_x() {
        let rt = single(unit_cube());
        let segs = shoot(&rt, Point3::new(-5.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(segs.len(), 1);
        let s = &segs[0];
        assert!((s.inhit.dist - 4.0).abs() < 1e-9);
        assert!((s.outhit.dist - 6.0).abs() < 1e-9);
        assert!((s.inhit.point - Point3::new(-1.0, 0.0, 0.0)).norm() < 1e-9);
        assert!((s.outhit.point - Point3::new(1.0, 0.0, 0.0)).norm() < 1e-9);
        assert!((s.inhit.normal - Vec3::new(-1.0, 0.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn test_cube_miss() {
        let rt = single(unit_cube());
        let segs = shoot(&rt, Point3::new(5.0, 5.0, 5.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(segs.is_empty());
    }

    #[test]
    fn test_hyp_through_waist() {
        let rt = single(waist_hyp());
        let segs = shoot(&rt, Point3::new(-5.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(segs.len(), 1);
        let s = &segs[0];
        assert!((s.inhit.point.x + s.outhit.point.x).abs() < 1e-9);
        assert!((s.inhit.point.x + 1.0).abs() < 1e-9);

        let ap = Application {
            rbeam: 0.01,
            ..Application::new(&rt, Ray::new(Point3::new(-5.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)))
        };
        let uv = rt.solids()[0].uv(&ap, &s.inhit);
        assert!((uv.u - 0.5).abs() < 1e-9);
        assert!((uv.v - 0.5).abs() < 1e-9);
        assert!(uv.du > 0.0 && uv.dv > 0.0);
    }

    #[test]
    fn test_cube_uv_built_on_first_use() {
        let rt = single(unit_cube());
        let stp = &rt.solids()[0];
        let arb = stp.specific_as::<primitive::ArbSpecific>().unwrap();
        assert!(!arb.has_uv());

        let segs = shoot(&rt, Point3::new(-5.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        let ap = Application::new(&rt, Ray::new(Point3::new(-5.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)));
        let uv = stp.uv(&ap, &segs[0].inhit);
        assert!(arb.has_uv());
        assert!((0.0..=1.0).contains(&uv.u));
        assert!((0.0..=1.0).contains(&uv.v));
        // Face centre.
        assert!((uv.u - 0.5).abs() < 1e-9);
        assert!((uv.v - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_cube_uv_racing_threads_agree() {
        const THREADS: usize = 8;
        let rt = single(unit_cube());
        let stp = &rt.solids()[0];
        let ray = Ray::new(Point3::new(-5.0, 0.2, -0.3), Vec3::new(1.0, 0.0, 0.0));
        let segs = shoot(&rt, ray.origin, *ray.direction);
        let hit = segs[0].inhit.clone();
        let arb = stp.specific_as::<primitive::ArbSpecific>().unwrap();
        assert!(!arb.has_uv());
        let start = std::sync::Barrier::new(THREADS);

        let uvs: Vec<UvCoord> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        let ap = Application {
                            rbeam: 0.05,
                            ..Application::new(&rt, ray)
                        };
                        start.wait();
                        stp.uv(&ap, &hit)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(arb.has_uv());
        assert!(uvs.iter().all(|uv| *uv == uvs[0]));
        assert!(uvs[0].du > 0.0);
    }

    #[test]
    fn test_submodel_translated_cube() {
        let mut db = Db::new("wrapped");
        db.insert("box.s", unit_cube()).unwrap();
        db.insert(
            "cube",
            DbRecord::Comb {
                members: vec![Member::new("box.s")],
                air: false,
            },
        )
        .unwrap();
        db.insert(
            "sub.s",
            DbRecord::Submodel {
                file: None,
                treetop: "cube".into(),
                method: None,
            },
        )
        .unwrap();
        db.insert(
            "scene",
            DbRecord::Comb {
                members: vec![Member::placed(
                    "sub.s",
                    &Transform::translation(10.0, 0.0, 0.0),
                )],
                air: false,
            },
        )
        .unwrap();
        let rt = instance(db, "scene");

        let segs = shoot(&rt, Point3::new(5.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(segs.len(), 1);
        let s = &segs[0];
        // The cube spans x in [9, 11].
        assert!((s.inhit.dist - 4.0).abs() < 1e-9);
        assert!((s.outhit.dist - 6.0).abs() < 1e-9);
        assert!((s.inhit.point - Point3::new(9.0, 0.0, 0.0)).norm() < 1e-9);
        assert!((s.outhit.normal - Vec3::new(1.0, 0.0, 0.0)).norm() < 1e-9);
        match &s.inhit.private {
            HitPrivate::Submodel(sub) => assert_eq!(sub.solid, "box.s"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_centroid_rays_always_hit() {
        let rt = single(unit_cube());
        let dirs = [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.3, -0.7, 0.2),
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(0.0, 0.1, -1.0),
        ];
        for d in dirs {
            let origin = Point3::origin() - d.normalize() * 10.0;
            let segs = shoot(&rt, origin, d);
            assert_eq!(segs.len(), 1);
            let s = &segs[0];
            assert!(s.inhit.dist < s.outhit.dist);
            for p in [s.inhit.point, s.outhit.point] {
                let m = p.x.abs().max(p.y.abs()).max(p.z.abs());
                assert!((m - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_ray_outside_box_never_hits() {
        let mut db = Db::new("mixed");
        db.insert("box.s", unit_cube()).unwrap();
        db.insert("hyp.s", waist_hyp()).unwrap();
        db.insert(
            "all",
            DbRecord::Comb {
                members: vec![
                    Member::new("box.s"),
                    Member::placed("hyp.s", &Transform::translation(0.0, 6.0, 0.0)),
                ],
                air: false,
            },
        )
        .unwrap();
        let rt = instance(db, "all");
        let bounds = *rt.bounds();
        for i in 0..20 {
            let z = bounds.max.z + 0.1 + f64::from(i);
            let ray = Ray::new(Point3::new(-20.0, 3.0, z), Vec3::new(1.0, 0.2, 0.0));
            assert!(ray.slab(&bounds).is_none());
            assert!(shoot(&rt, ray.origin, *ray.direction).is_empty());
        }
    }
}
