// engine.rs — Mean-shift clustering engine.
//
// The caller-facing object. Holds an immutable snapshot of the point set, the
// bandwidth, the stage configuration, and a shared compute context:
//
//   let mut ms = MeanShift::new(MeanShiftConfig::default())?;
//   ms.set_points(&points)?;
//   ms.set_bandwidth(0.5)?;
//   ms.initialize()?;                 // creates the context once
//   let result = ms.cluster()?;       // one full run
//
// One run:
//
//   acquire lease ─▶ rasterize ─▶ track (lock-step passes) ─▶ merge ─▶ release
//
// with two early-outs before any numeric work: an empty point set returns an
// empty result, and a zero-extent bounding box (every point identical)
// returns a single cluster without building a grid.
//
// A grid whose cells are too wide for σ (one far outlier can stretch the
// bounding box arbitrarily) is refined by the rasterizer up to its
// `max_resolution`; past that, the run tracks on the continuous KDE.
//
// The lease is a guard, so the context is released when `cluster()` returns
// by any path.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{validate_bandwidth, FieldKind, MeanShiftConfig};
use crate::context::{ComputeContext, ContextLease};
use crate::density::{DensityField, ExactKde};
use crate::diagnostics::{RunStats, TimingBreakdown};
use crate::error::{Error, Result};
use crate::merge::Cluster;
use crate::points::{self, BoundingBox, Point2};
use crate::progress::{Progress, ProgressFn, Stage};
use crate::tracker::{GradientAscentTracker, TrackingOutcome};

/// Output of one clustering run.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterResult {
    /// Ordered by smallest member index.
    pub clusters: Vec<Cluster>,
    pub stats: RunStats,
}

impl ClusterResult {
    fn empty(stats: RunStats) -> Self {
        ClusterResult { clusters: Vec::new(), stats }
    }

    /// Number of clusters.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Cluster id of every input point, indexed by point.
    pub fn labels(&self) -> Vec<usize> {
        let mut labels = vec![0; self.stats.points];
        for (id, c) in self.clusters.iter().enumerate() {
            for &i in &c.indices {
                labels[i] = id;
            }
        }
        labels
    }
}

/// Mean-shift clustering engine.
pub struct MeanShift {
    config: MeanShiftConfig,
    points: Arc<[Point2]>,
    context: Option<Arc<ComputeContext>>,
    progress: Option<ProgressFn>,
}

impl MeanShift {
    /// New engine without a context; call `initialize()` before `cluster()`.
    pub fn new(config: MeanShiftConfig) -> Result<Self> {
        config.validate()?;
        Ok(MeanShift {
            config,
            points: Arc::from(Vec::new()),
            context: None,
            progress: None,
        })
    }

    /// New engine on an existing (possibly shared) context.
    pub fn with_context(config: MeanShiftConfig, context: Arc<ComputeContext>) -> Result<Self> {
        let mut engine = MeanShift::new(config)?;
        engine.context = Some(context);
        Ok(engine)
    }

    pub fn config(&self) -> &MeanShiftConfig {
        &self.config
    }

    /// The current point snapshot.
    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    pub fn bandwidth(&self) -> f32 {
        self.config.bandwidth
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    pub fn context(&self) -> Option<&Arc<ComputeContext>> {
        self.context.as_ref()
    }

    /// Replace the point set with a validated copy.
    pub fn set_points(&mut self, points: &[Point2]) -> Result<()> {
        self.points = points::snapshot(points)?;
        Ok(())
    }

    /// Replace the point set with columns `dim_x` and `dim_y` of a row-major
    /// buffer of `dimensions` values per point.
    pub fn set_points_from_columns(
        &mut self,
        data: &[f32],
        dimensions: usize,
        dim_x: usize,
        dim_y: usize,
    ) -> Result<()> {
        let pts = points::from_columns(data, dimensions, dim_x, dim_y)?;
        self.points = points::snapshot(&pts)?;
        Ok(())
    }

    /// Set the kernel bandwidth for subsequent runs.
    ///
    /// # Errors
    /// `Error::InvalidBandwidth` unless `sigma` is positive with a normal
    /// `sigma²`; the previous bandwidth is kept.
    pub fn set_bandwidth(&mut self, sigma: f32) -> Result<()> {
        validate_bandwidth(sigma)?;
        self.config.bandwidth = sigma;
        Ok(())
    }

    /// Install an advisory progress callback.
    pub fn set_progress<F>(&mut self, callback: F)
    where
        F: FnMut(Progress) + Send + 'static,
    {
        self.progress = Some(Box::new(callback));
    }

    /// Create the compute context if there is none yet. Idempotent.
    pub fn initialize(&mut self) -> Result<()> {
        if self.context.is_none() {
            let ctx = ComputeContext::create(&self.config.context)?;
            self.context = Some(Arc::new(ctx));
        }
        Ok(())
    }

    /// Run one full clustering pass over the current snapshot.
    ///
    /// # Errors
    /// - `Error::NotInitialized` if no context exists.
    /// - `Error::ContextBusy` if another run holds the context.
    /// - `Error::Gpu` if GPU rasterization fails.
    pub fn cluster(&mut self) -> Result<ClusterResult> {
        let ctx = Arc::clone(self.context.as_ref().ok_or(Error::NotInitialized)?);
        let start = Instant::now();
        let points = Arc::clone(&self.points);
        let sigma = self.config.bandwidth;
        report(&mut self.progress, Stage::Initializing, 0.0);

        let mut stats = RunStats {
            points: points.len(),
            sigma,
            backend: ctx.backend(),
            ..Default::default()
        };

        let Some(bounds) = BoundingBox::from_points(&points) else {
            debug!("empty point set: nothing to cluster");
            report(&mut self.progress, Stage::Finished, 1.0);
            return Ok(ClusterResult::empty(stats));
        };

        let lease = ctx.acquire()?;
        report(&mut self.progress, Stage::Initializing, 1.0);

        if bounds.is_degenerate() {
            debug!("zero-extent bounding box: {} identical points form one cluster", points.len());
            stats.degenerate = true;
            stats.timing = TimingBreakdown::with_total(elapsed_ms(start));
            lease.release();
            report(&mut self.progress, Stage::Finished, 1.0);
            return Ok(ClusterResult {
                clusters: vec![Cluster {
                    indices: (0..points.len()).collect(),
                    mode: points[0],
                }],
                stats,
            });
        }

        let mut timing = TimingBreakdown::default();
        let tracker = &self.config.tracker;

        // Rasterize + track.
        let outcome = match self.field_for(&points, sigma, &mut stats) {
            FieldKind::Grid => {
                report(&mut self.progress, Stage::Rasterizing, 0.0);
                let t = Instant::now();
                let surface = lease.rasterize(&self.config.rasterizer, &points, sigma)?;
                timing.push("rasterize", elapsed_ms(t));
                stats.grid_width = surface.frame().width;
                stats.grid_height = surface.frame().height;
                stats.cell_size = surface.cell_size();
                stats.resolution_raised =
                    stats.grid_width.max(stats.grid_height) > self.config.rasterizer.resolution;
                if stats.resolution_raised {
                    info!(
                        "raised grid to {}×{} cells to resolve sigma={sigma} (cell={:.4})",
                        stats.grid_width, stats.grid_height, stats.cell_size
                    );
                }
                report(&mut self.progress, Stage::Rasterizing, 1.0);

                let t = Instant::now();
                let outcome = track_on(&lease, tracker, &points, &surface, &mut self.progress);
                timing.push("track", elapsed_ms(t));
                outcome
            }
            FieldKind::Continuous => {
                let t = Instant::now();
                let kde = ExactKde::new(&points, sigma, self.config.rasterizer.cutoff);
                let outcome = track_on(&lease, tracker, &points, &kde, &mut self.progress);
                timing.push("track", elapsed_ms(t));
                outcome
            }
        };
        stats.iterations = outcome.iterations;
        stats.force_stopped = outcome.force_stopped;

        // Merge.
        report(&mut self.progress, Stage::Merging, 0.0);
        let t = Instant::now();
        let tolerance = self.config.merger.tolerance(sigma, stats.cell_size);
        let positions = outcome.positions();
        let clusters = self.config.merger.assemble(&positions, tolerance);
        timing.push("merge", elapsed_ms(t));
        stats.merge_tolerance = tolerance;
        report(&mut self.progress, Stage::Merging, 1.0);

        lease.release();

        timing.total_ms = elapsed_ms(start);
        stats.timing = timing;
        info!(
            "clustered {} points (sigma={sigma}) into {} clusters in {:.2} ms ({} passes, {} force-stopped)",
            stats.points,
            clusters.len(),
            stats.timing.total_ms,
            stats.iterations,
            stats.force_stopped
        );
        report(&mut self.progress, Stage::Finished, 1.0);

        Ok(ClusterResult { clusters, stats })
    }

    /// Field the run tracks on: the configured one, unless a grid within
    /// `max_resolution` cannot resolve `sigma`.
    fn field_for(&self, points: &[Point2], sigma: f32, stats: &mut RunStats) -> FieldKind {
        let rasterizer = &self.config.rasterizer;
        if self.config.field != FieldKind::Grid {
            return self.config.field;
        }
        match rasterizer.frame_for(points, sigma) {
            Some(frame) if !rasterizer.resolves(&frame, sigma) => {
                warn!(
                    "a {}×{} grid leaves cells of {:.4} for sigma={sigma}; tracking on the continuous field",
                    frame.width, frame.height, frame.cell
                );
                stats.continuous_fallback = true;
                FieldKind::Continuous
            }
            _ => FieldKind::Grid,
        }
    }
}

fn track_on<F: DensityField>(
    lease: &ContextLease<'_>,
    tracker: &GradientAscentTracker,
    points: &[Point2],
    field: &F,
    progress: &mut Option<ProgressFn>,
) -> TrackingOutcome {
    report(progress, Stage::Tracking, 0.0);
    lease.install(|| {
        tracker.track_with_progress(points, field, |fraction| {
            report(progress, Stage::Tracking, fraction)
        })
    })
}

fn report(progress: &mut Option<ProgressFn>, stage: Stage, fraction: f32) {
    if let Some(cb) = progress.as_mut() {
        cb(Progress::new(stage, fraction));
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1e3
}
