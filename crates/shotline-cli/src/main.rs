//! shotline CLI - shoot rays at a geometry database
//!
//! Prepares a named tree from a database file and reports on its solids,
//! single rays, or a parallel grid of rays.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use shotline_db::Db;
use shotline_math::{Point3, Vec3};
use shotline_raytrace::{Aabb3, Application, Partition, RayHandler, Ray, Resource, Rt, Segment};

mod config;
mod logger;

use config::Config;
use logger::{init_logger, LogLevel};

#[derive(Parser)]
#[command(name = "shotline")]
#[command(about = "Ray/solid intersection over geometry databases", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Set the logging level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare a tree and describe every solid
    Info {
        /// Database file
        db: PathBuf,
        /// Root object
        object: String,
        /// Include derived parameters
        #[arg(short, long)]
        verbose: bool,
    },
    /// Shoot one ray and print its partitions
    Shoot {
        /// Database file
        db: PathBuf,
        /// Root object
        object: String,
        /// Ray origin as x,y,z
        #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true)]
        origin: Vec3,
        /// Ray direction as x,y,z
        #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true)]
        dir: Vec3,
        /// Stop at the first partition
        #[arg(long)]
        onehit: bool,
    },
    /// Fire an N x N grid of parallel rays through the model
    Grid {
        /// Database file
        db: PathBuf,
        /// Root object
        object: String,
        /// Rays per side
        #[arg(long, default_value = "64")]
        size: usize,
        /// Axis the rays travel along
        #[arg(long, value_enum, default_value = "x")]
        axis: Axis,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

fn parse_vec3(s: &str) -> std::result::Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected x,y,z, got '{s}'"));
    }
    let mut v = Vec3::zeros();
    for (i, p) in parts.iter().enumerate() {
        v[i] = p.parse().map_err(|e| format!("bad component '{p}': {e}"))?;
    }
    Ok(v)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.log_level.into());
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Info {
            db,
            object,
            verbose,
        } => {
            let rt = load(&db, &object, &config)?;
            show_info(&rt, verbose)?;
        }
        Commands::Shoot {
            db,
            object,
            origin,
            dir,
            onehit,
        } => {
            if dir.norm() == 0.0 {
                anyhow::bail!("ray direction must be non-zero");
            }
            let rt = load(&db, &object, &config)?;
            shoot_one(&rt, Point3::from(origin), dir, onehit);
        }
        Commands::Grid {
            db,
            object,
            size,
            axis,
        } => {
            let rt = load(&db, &object, &config)?;
            run_grid(&rt, size, axis)?;
        }
    }

    Ok(())
}

fn load(path: &Path, object: &str, config: &Config) -> Result<Rt> {
    let db = Db::open_shared(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rt = Rt::new(Arc::clone(&db), config.raytrace.clone());
    let n = rt
        .gettree(object)
        .with_context(|| format!("walking {object}"))?;
    info!("{object}: {n} solids imported");

    let start = Instant::now();
    rt.prep().with_context(|| format!("preparing {object}"))?;
    info!(
        "prepared {} solids in {:.1} ms",
        rt.solids().len(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(rt)
}

fn show_info(rt: &Rt, verbose: bool) -> Result<()> {
    println!("Database: {}", rt.db().title());
    println!("Solids: {}", rt.solids().len());
    let b = rt.bounds();
    println!(
        "Bounds: ({:.4}, {:.4}, {:.4}) to ({:.4}, {:.4}, {:.4})",
        b.min.x, b.min.y, b.min.z, b.max.x, b.max.y, b.max.z
    );
    for stp in rt.solids() {
        println!();
        print!("{}", rt.describe_solid(stp.id, verbose)?);
    }
    Ok(())
}

/// Formats each partition of one ray.
struct Report;

impl RayHandler for Report {
    type Output = Vec<String>;

    fn hit(&mut self, ap: &Application<'_>, parts: &[Partition], _segs: &[Segment]) -> Self::Output {
        let mut lines = Vec::with_capacity(parts.len() * 2);
        for (i, p) in parts.iter().enumerate() {
            lines.push(format!(
                "partition {}: {:.4} .. {:.4} (length {:.4})",
                i,
                p.inhit.dist,
                p.outhit.dist,
                p.outhit.dist - p.inhit.dist
            ));
            for (label, id, hit) in [("in ", p.in_solid, &p.inhit), ("out", p.out_solid, &p.outhit)] {
                let stp = &ap.rt.solids()[id];
                let mut hit = hit.clone();
                stp.norm(&mut hit, &ap.ray);
                let uv = stp.uv(ap, &hit);
                let cv = stp.curve(&hit);
                let (pt, n) = (hit.point, hit.normal);
                lines.push(format!(
                    "  {label} {:<12} pt ({:.4}, {:.4}, {:.4}) n ({:.4}, {:.4}, {:.4}) uv ({:.4}, {:.4}) c ({:.4}, {:.4})",
                    stp.name, pt.x, pt.y, pt.z, n.x, n.y, n.z, uv.u, uv.v, cv.c1, cv.c2
                ));
            }
        }
        lines
    }

    fn miss(&mut self, _ap: &Application<'_>) -> Self::Output {
        vec!["miss".to_string()]
    }
}

fn shoot_one(rt: &Rt, origin: Point3, dir: Vec3, onehit: bool) {
    let ap = Application {
        onehit,
        ..Application::new(rt, Ray::new(origin, dir))
    };
    let mut res = Resource::new(0);
    for line in rt.shoot_ray(&ap, &mut res, &mut Report) {
        println!("{line}");
    }
}

/// Rays along `axis` through the centres of an `n` x `n` grid spanning the
/// box's cross-section, starting just outside it.
fn grid_rays(bounds: &Aabb3, n: usize, axis: Axis) -> Vec<Ray> {
    let a = axis.index();
    let (u, v) = ((a + 1) % 3, (a + 2) % 3);
    let mut dir = Vec3::zeros();
    dir[a] = 1.0;

    let size = bounds.max - bounds.min;
    let start = bounds.min[a] - 0.01 * size[a].max(1.0);
    let mut rays = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            let mut o = Point3::origin();
            o[a] = start;
            o[u] = bounds.min[u] + size[u] * (i as f64 + 0.5) / n as f64;
            o[v] = bounds.min[v] + size[v] * (j as f64 + 0.5) / n as f64;
            rays.push(Ray::new(o, dir));
        }
    }
    rays
}

/// Partition count and in-solid length per ray.
struct Tally;

impl RayHandler for Tally {
    type Output = (usize, f64);

    fn hit(&mut self, _ap: &Application<'_>, parts: &[Partition], _segs: &[Segment]) -> Self::Output {
        let len = parts.iter().map(|p| p.outhit.dist - p.inhit.dist).sum();
        (parts.len(), len)
    }

    fn miss(&mut self, _ap: &Application<'_>) -> Self::Output {
        (0, 0.0)
    }
}

fn run_grid(rt: &Rt, size: usize, axis: Axis) -> Result<()> {
    if size == 0 {
        anyhow::bail!("grid size must be at least 1");
    }
    let rays = grid_rays(rt.bounds(), size, axis);
    let template = Application::new(rt, rays[0]);

    let start = Instant::now();
    let (tallies, stats) = rt.shoot_rays(&rays, &template, || Tally)?;
    let elapsed = start.elapsed();

    let partitions: usize = tallies.iter().map(|t| t.0).sum();
    let length: f64 = tallies.iter().map(|t| t.1).sum();
    println!("Rays: {} ({} x {}, along {:?})", rays.len(), size, size, axis);
    println!("Hits: {}  Misses: {}", stats.hits, stats.misses);
    println!("Segments: {}  Partitions: {}", stats.segments, partitions);
    if stats.hits > 0 {
        println!("Mean in-solid length: {:.4}", length / stats.hits as f64);
    }
    println!(
        "Elapsed: {:.1} ms ({:.0} rays/s on {} workers)",
        elapsed.as_secs_f64() * 1000.0,
        rays.len() as f64 / elapsed.as_secs_f64().max(1e-9),
        rt.ncpu()
    );
    Ok(())
}
