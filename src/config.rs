// config.rs — Engine configuration.
//
// Every stage's parameters in one serde tree. All structs carry
// `#[serde(default)]`, so a JSON file only lists what it overrides:
//
//   {
//     "bandwidth": 0.4,
//     "rasterizer": { "resolution": 512, "method": "binned" },
//     "context": { "backend": "gpu", "threads": 4 }
//   }

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::ContextConfig;
use crate::density::DensityRasterizer;
use crate::error::{Error, Result};
use crate::merge::ModeMerger;
use crate::tracker::GradientAscentTracker;

/// Bandwidth used until `set_bandwidth` is called.
pub const DEFAULT_BANDWIDTH: f32 = 0.15;

/// Which density field the tracker climbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Rasterized surface, bilinearly interpolated.
    #[default]
    Grid,
    /// Direct KDE evaluation at every query (no grid error, cost O(N) per
    /// query within the cutoff).
    Continuous,
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanShiftConfig {
    pub bandwidth: f32,
    pub field: FieldKind,
    pub rasterizer: DensityRasterizer,
    pub tracker: GradientAscentTracker,
    pub merger: ModeMerger,
    pub context: ContextConfig,
}

impl Default for MeanShiftConfig {
    fn default() -> Self {
        MeanShiftConfig {
            bandwidth: DEFAULT_BANDWIDTH,
            field: FieldKind::Grid,
            rasterizer: DensityRasterizer::default(),
            tracker: GradientAscentTracker::default(),
            merger: ModeMerger::default(),
            context: ContextConfig::default(),
        }
    }
}

impl MeanShiftConfig {
    /// Check every stage's parameters.
    pub fn validate(&self) -> Result<()> {
        validate_bandwidth(self.bandwidth)?;
        self.rasterizer.validate()?;
        self.tracker.validate()?;
        self.merger.validate()?;
        Ok(())
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: MeanShiftConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

/// `Ok` iff `sigma` is strictly positive and `sigma²` is a normal float.
///
/// The kernel divides by σ² and the merger scales σ down, so a subnormal
/// or overflowing σ² would collapse to zero or infinity mid-run.
pub fn validate_bandwidth(sigma: f32) -> Result<()> {
    if sigma > 0.0 && (sigma * sigma).is_normal() {
        Ok(())
    } else {
        Err(Error::InvalidBandwidth(sigma))
    }
}

/// Load and validate a JSON configuration file.
pub fn load_config(path: &Path) -> Result<MeanShiftConfig> {
    let contents = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    MeanShiftConfig::from_json_str(&contents)
}
