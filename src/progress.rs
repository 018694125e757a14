// progress.rs — Advisory progress reporting.
//
// A run reports (stage, fraction-within-stage) pairs to an optional
// callback. Reports are informational only: the callback cannot cancel the
// run and nothing in the result depends on whether one is installed.

use std::fmt;

use serde::Serialize;

/// Pipeline stage being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    Rasterizing,
    Tracking,
    Merging,
    Finished,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Initializing => "initializing",
            Stage::Rasterizing => "rasterizing",
            Stage::Tracking => "tracking",
            Stage::Merging => "merging",
            Stage::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// One progress report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub stage: Stage,
    /// Completed fraction of `stage`, in [0, 1].
    pub fraction: f32,
}

impl Progress {
    pub fn new(stage: Stage, fraction: f32) -> Self {
        Progress {
            stage,
            fraction: fraction.clamp(0.0, 1.0),
        }
    }
}

/// Boxed progress callback as stored by the engine.
pub type ProgressFn = Box<dyn FnMut(Progress) + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_is_clamped() {
        assert_eq!(Progress::new(Stage::Tracking, 1.5).fraction, 1.0);
        assert_eq!(Progress::new(Stage::Tracking, -0.1).fraction, 0.0);
    }

    #[test]
    fn test_stages_are_ordered() {
        assert!(Stage::Initializing < Stage::Rasterizing);
        assert!(Stage::Merging < Stage::Finished);
        assert_eq!(Stage::Tracking.to_string(), "tracking");
    }
}
