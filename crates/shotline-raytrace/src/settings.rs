//! Scene-wide settings, propagated into nested submodel instances.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shotline_math::Tolerance;

use crate::error::RtError;

/// How candidate solids are selected for each ray.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpacePartition {
    /// Every solid is shot.
    Brute,
    /// Solids whose bounding box the ray misses are skipped.
    #[default]
    Boxes,
}

impl FromStr for SpacePartition {
    type Err = RtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "brute" | "none" => Ok(Self::Brute),
            "boxes" | "rpp" => Ok(Self::Boxes),
            _ => Err(RtError::UnknownMethod(s.to_string())),
        }
    }
}

impl fmt::Display for SpacePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Brute => "brute",
            Self::Boxes => "boxes",
        })
    }
}

/// Tracing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtSettings {
    /// Distance tolerance in model units.
    pub tol_dist: f64,
    /// Perpendicularity tolerance (cosine).
    pub tol_perp: f64,
    /// Tessellation chord tolerance. Carried for nested instances.
    pub chord_tol: f64,
    /// Treat air regions as solid.
    pub useair: bool,
    /// Give every submodel placement its own nested instance.
    pub dont_instance: bool,
    /// Candidate selection method.
    pub space_partition: SpacePartition,
    /// Worker count. 0 uses every core.
    pub ncpu: usize,
    /// Build ARB UV bases during prep instead of on first use.
    pub arb_uv_at_prep: bool,
}

impl Default for RtSettings {
    fn default() -> Self {
        Self {
            tol_dist: Tolerance::DEFAULT.dist,
            tol_perp: Tolerance::DEFAULT.perp,
            chord_tol: 0.0,
            useair: false,
            dont_instance: false,
            space_partition: SpacePartition::default(),
            ncpu: 0,
            arb_uv_at_prep: false,
        }
    }
}

impl RtSettings {
    /// Tolerance bundle built from the distance and perpendicularity settings.
    pub fn tolerance(&self) -> Tolerance {
        Tolerance::new(self.tol_dist, self.tol_perp)
    }

    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        if self.ncpu == 0 {
            num_cpus::get().max(1)
        } else {
            self.ncpu
        }
    }
}
