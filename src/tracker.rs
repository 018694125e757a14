// tracker.rs — Gradient ascent (mean-shift) tracker.
//
// Moves every input point uphill on a `DensityField` until it settles on a
// mode:
//
//   xₖ₊₁ = xₖ + σ² · ∇f(xₖ) / f(xₖ)
//
// which, for the Gaussian KDE, is the kernel-weighted centroid of the points
// around xₖ: the classic mean-shift update. No step size to tune.
//
// LOCK-STEP ITERATION
// ───────────────────
// All points advance one step per pass. Within a pass the updates are
// independent (each reads only its own state and the immutable field), so
// the pass runs as a rayon `par_iter_mut`. The pass completes before the
// next begins, so pass k+1 always sees the complete result of pass k and the
// trajectory of each point is the same regardless of thread scheduling.
//
// Per-point state machine:
//
//   Active ──step < ε──▶ Converged         (terminal)
//   Active ──step ≥ ε──▶ Active
//   Active ──cap hit──▶ ForceStopped       (terminal, after the last pass)
//
// with ε = epsilon_factor · σ, so convergence is judged relative to the
// kernel width and the outcome does not depend on the units of the data.

use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::density::DensityField;
use crate::error::{Error, Result};
use crate::points::Point2;

/// State of one tracked point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    /// Still moving.
    Active,
    /// Last step was shorter than ε.
    Converged,
    /// Iteration cap reached while still moving; position is the last one.
    ForceStopped,
}

/// Per-point tracker state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPoint {
    /// Current (finally: converged) position.
    pub position: Point2,
    /// Length of the most recent step.
    pub displacement: f32,
    /// Number of steps taken.
    pub iterations: u32,
    pub status: TrackStatus,
}

impl TrackedPoint {
    fn start(position: Point2) -> Self {
        TrackedPoint {
            position,
            displacement: f32::INFINITY,
            iterations: 0,
            status: TrackStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TrackStatus::Active
    }
}

/// Result of one `track()` call.
#[derive(Debug, Clone)]
pub struct TrackingOutcome {
    /// One entry per input point, in input order.
    pub points: Vec<TrackedPoint>,
    /// Number of lock-step passes executed.
    pub iterations: usize,
    /// Points that hit the iteration cap.
    pub force_stopped: usize,
}

impl TrackingOutcome {
    /// Final positions in input order.
    pub fn positions(&self) -> Vec<Point2> {
        self.points.iter().map(|t| t.position).collect()
    }
}

/// Mean-shift gradient ascent tracker.
///
/// Defaults: 200 passes, ε = 1e-3 · σ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientAscentTracker {
    /// Maximum number of lock-step passes.
    pub max_iterations: usize,
    /// Convergence threshold as a fraction of σ.
    pub epsilon_factor: f32,
}

impl Default for GradientAscentTracker {
    fn default() -> Self {
        GradientAscentTracker {
            max_iterations: 200,
            epsilon_factor: 1e-3,
        }
    }
}

impl GradientAscentTracker {
    pub fn new(max_iterations: usize, epsilon_factor: f32) -> Self {
        GradientAscentTracker { max_iterations, epsilon_factor }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig("tracker max_iterations must be at least 1".into()));
        }
        if !(self.epsilon_factor > 0.0) || !self.epsilon_factor.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "tracker epsilon_factor must be finite and > 0 (got {})",
                self.epsilon_factor
            )));
        }
        Ok(())
    }

    /// Absolute convergence threshold for bandwidth `sigma`.
    pub fn epsilon(&self, sigma: f32) -> f32 {
        self.epsilon_factor * sigma
    }

    /// Track every point in `points` to a mode of `field`.
    pub fn track<F: DensityField>(&self, points: &[Point2], field: &F) -> TrackingOutcome {
        self.track_with_progress(points, field, |_| {})
    }

    /// Like `track`, calling `progress(fraction)` after every pass.
    ///
    /// `fraction` is `pass / max_iterations`; it reaches 1.0 when the run
    /// ends, early or not.
    pub fn track_with_progress<F, P>(&self, points: &[Point2], field: &F, mut progress: P) -> TrackingOutcome
    where
        F: DensityField,
        P: FnMut(f32),
    {
        let sigma = field.sigma();
        let eps = self.epsilon(sigma);
        let mut state: Vec<TrackedPoint> = points.iter().copied().map(TrackedPoint::start).collect();

        let mut iterations = 0;
        let mut active = state.len();
        while active > 0 && iterations < self.max_iterations {
            state
                .par_iter_mut()
                .filter(|t| t.is_active())
                .for_each(|t| step(t, field, sigma, eps));

            iterations += 1;
            active = state.iter().filter(|t| t.is_active()).count();
            progress(iterations as f32 / self.max_iterations as f32);
        }

        let mut force_stopped = 0;
        for t in state.iter_mut().filter(|t| t.is_active()) {
            t.status = TrackStatus::ForceStopped;
            force_stopped += 1;
        }
        if force_stopped > 0 {
            warn!(
                "{force_stopped} of {} points did not converge within {} iterations",
                state.len(),
                self.max_iterations
            );
        }
        debug!(
            "tracking finished after {iterations} passes ({} points, eps={eps:.3e})",
            state.len()
        );
        progress(1.0);

        TrackingOutcome {
            points: state,
            iterations,
            force_stopped,
        }
    }
}

/// One mean-shift step for one point.
#[inline]
fn step<F: DensityField>(t: &mut TrackedPoint, field: &F, sigma: f32, eps: f32) {
    let (dx, dy) = field.sample(t.position).mean_shift(sigma);
    let len = (dx * dx + dy * dy).sqrt();
    t.iterations += 1;

    if !len.is_finite() {
        // Degenerate field value: stop here rather than propagate NaN.
        t.displacement = 0.0;
        t.status = TrackStatus::Converged;
        return;
    }

    t.position.x += dx;
    t.position.y += dy;
    t.displacement = len;
    if len < eps {
        t.status = TrackStatus::Converged;
    }
}
