//! Settings file loading.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use shotline_raytrace::RtSettings;

/// Top level of a settings file. Every section is optional.
///
/// ```toml
/// [raytrace]
/// tol_dist = 0.0005
/// space_partition = "brute"
/// ncpu = 4
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub raytrace: RtSettings,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load `path`, or defaults when no file was given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing settings {}", path.display()))
    }
}
