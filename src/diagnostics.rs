// diagnostics.rs — Per-run statistics and stage timings.

use serde::{Deserialize, Serialize};

use crate::context::Backend;

/// Timing entry for a single pipeline stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub label: String,
    pub elapsed_ms: f64,
}

impl StageTiming {
    pub fn new(label: impl Into<String>, elapsed_ms: f64) -> Self {
        Self {
            label: label.into(),
            elapsed_ms,
        }
    }
}

/// Timing trace for one clustering run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingBreakdown {
    pub total_ms: f64,
    pub stages: Vec<StageTiming>,
}

impl TimingBreakdown {
    pub fn with_total(total_ms: f64) -> Self {
        Self {
            total_ms,
            stages: Vec::new(),
        }
    }

    pub fn push(&mut self, label: impl Into<String>, elapsed_ms: f64) {
        self.stages.push(StageTiming::new(label, elapsed_ms));
    }

    /// Elapsed time of the stage named `label`, if it ran.
    pub fn stage(&self, label: &str) -> Option<f64> {
        self.stages.iter().find(|s| s.label == label).map(|s| s.elapsed_ms)
    }
}

/// What happened during one `cluster()` call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Input point count.
    pub points: usize,
    /// Bandwidth the run used.
    pub sigma: f32,
    /// Lock-step tracker passes executed.
    pub iterations: usize,
    /// Points stopped by the iteration cap rather than by convergence.
    pub force_stopped: usize,
    /// Density grid size (0×0 for the continuous field or skipped runs).
    pub grid_width: usize,
    pub grid_height: usize,
    /// Grid cell size in world units (0 for the continuous field).
    pub cell_size: f32,
    /// The grid needed more than the configured resolution to resolve σ.
    pub resolution_raised: bool,
    /// No grid within `max_resolution` resolved σ; the run used the
    /// continuous field instead.
    pub continuous_fallback: bool,
    /// Distance under which converged positions were merged.
    pub merge_tolerance: f32,
    /// The bounding box had zero extent; tracking was skipped.
    pub degenerate: bool,
    pub backend: Backend,
    pub timing: TimingBreakdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_lookup() {
        let mut t = TimingBreakdown::with_total(3.0);
        t.push("rasterize", 1.0);
        t.push("track", 2.0);
        assert_eq!(t.stage("track"), Some(2.0));
        assert_eq!(t.stage("merge"), None);
    }

    #[test]
    fn test_stats_serialize() {
        let stats = RunStats { points: 3, backend: Backend::Gpu, ..Default::default() };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["points"], 3);
        assert_eq!(json["backend"], "gpu");
    }
}
