// density.rs — Kernel density estimate rasterizer.
//
// Builds the surface the tracker climbs:
//
//   f(x) = Σᵢ exp(−‖x − pᵢ‖² / 2σ²)
//   ∇f(x) = Σᵢ exp(−‖x − pᵢ‖² / 2σ²) · (pᵢ − x) / σ²
//
// sampled at the cell centres of a grid that covers the bounding box of the
// points plus `margin · σ` on every side. Two ways to fill that grid:
//
// 1. EXACT: every cell sums the kernels of all points within `cutoff · σ`
//    and the analytic gradient alongside. Parallel by row; points are
//    visited in a fixed (y-sorted) order so the sums are reproducible.
//    Cost O(N · (cutoff·σ / cell)²).
//
// 2. BINNED: splat each point bilinearly into a histogram, then convolve
//    with a separable Gaussian (`convolution.rs`) and take finite
//    differences (`gradient.rs`). Cost O(N + cells · kernel), independent
//    of N after the splat, at the price of a small bilinear blur.
//
// The GPU backend (gpu/density.rs) produces the same surface as EXACT.
//
// `ExactKde` evaluates f and ∇f continuously instead, without a grid. It is
// the reference the grid surfaces are validated against, and an option for
// small point sets where grid error matters more than speed.

use std::collections::HashMap;

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::convolution::{convolve_separable, gaussian_kernel_1d};
use crate::error::{Error, Result};
use crate::gradient::gradient_xy;
use crate::grid::{interpolate_bilinear, Grid, GridFrame};
use crate::points::{BoundingBox, Point2};

/// Below this density the mean-shift step is treated as zero.
const DENSITY_FLOOR: f32 = 1e-20;

/// How the rasterizer fills the density grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DensityMethod {
    /// Direct kernel sum at each cell, analytic gradient.
    Exact,
    /// Histogram splat + separable Gaussian convolution, numeric gradient.
    Binned,
}

/// Density and gradient at one query position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FieldSample {
    pub density: f32,
    pub grad_x: f32,
    pub grad_y: f32,
}

impl FieldSample {
    /// Mean-shift vector for a Gaussian kernel of width `sigma`.
    ///
    /// For the Gaussian KDE, σ² · ∇f / f equals the offset from the query to
    /// the kernel-weighted centroid of the points, which is the classic
    /// mean-shift step.
    #[inline]
    pub fn mean_shift(&self, sigma: f32) -> (f32, f32) {
        if !(self.density > DENSITY_FLOOR) {
            return (0.0, 0.0);
        }
        let s = sigma * sigma / self.density;
        (self.grad_x * s, self.grad_y * s)
    }
}

/// A density function the tracker can query at arbitrary positions.
pub trait DensityField: Sync {
    /// Density and gradient at `p` (world coordinates).
    fn sample(&self, p: Point2) -> FieldSample;

    /// Kernel bandwidth the field was built with.
    fn sigma(&self) -> f32;

    /// Spatial resolution of the field in world units (0 for continuous).
    fn cell_size(&self) -> f32 {
        0.0
    }
}

// ---------------------------------------------------------------------------
// DensitySurface
// ---------------------------------------------------------------------------

/// A rasterized KDE: density plus both gradient components on one frame.
#[derive(Debug, Clone)]
pub struct DensitySurface {
    frame: GridFrame,
    sigma: f32,
    density: Grid,
    grad_x: Grid,
    grad_y: Grid,
}

impl DensitySurface {
    /// Surface of an empty point set. Every sample is zero.
    pub fn empty(sigma: f32) -> Self {
        DensitySurface {
            frame: GridFrame::empty(),
            sigma,
            density: Grid::empty(),
            grad_x: Grid::empty(),
            grad_y: Grid::empty(),
        }
    }

    /// Assemble a surface from grids computed elsewhere (the GPU readback).
    ///
    /// # Panics
    /// Panics if any grid does not match the frame size.
    pub fn from_parts(frame: GridFrame, sigma: f32, density: Grid, grad_x: Grid, grad_y: Grid) -> Self {
        for g in [&density, &grad_x, &grad_y] {
            assert!(
                g.width() == frame.width && g.height() == frame.height,
                "grid {}×{} does not match frame {}×{}",
                g.width(),
                g.height(),
                frame.width,
                frame.height,
            );
        }
        DensitySurface { frame, sigma, density, grad_x, grad_y }
    }

    pub fn is_empty(&self) -> bool {
        self.density.is_empty()
    }

    pub fn frame(&self) -> &GridFrame {
        &self.frame
    }

    pub fn density(&self) -> &Grid {
        &self.density
    }

    pub fn grad_x(&self) -> &Grid {
        &self.grad_x
    }

    pub fn grad_y(&self) -> &Grid {
        &self.grad_y
    }

    /// Cell centre with the highest density and its value.
    pub fn peak(&self) -> Option<(Point2, f32)> {
        self.density
            .cells()
            .fold(None, |best: Option<(usize, usize, f32)>, (c, r, v)| match best {
                Some((_, _, bv)) if bv >= v => best,
                _ => Some((c, r, v)),
            })
            .map(|(c, r, v)| (self.frame.to_world(c, r), v))
    }
}

impl DensityField for DensitySurface {
    fn sample(&self, p: Point2) -> FieldSample {
        if self.is_empty() {
            return FieldSample::default();
        }
        let (gx, gy) = self.frame.to_grid(p);
        FieldSample {
            density: interpolate_bilinear(&self.density, gx, gy),
            grad_x: interpolate_bilinear(&self.grad_x, gx, gy),
            grad_y: interpolate_bilinear(&self.grad_y, gx, gy),
        }
    }

    fn sigma(&self) -> f32 {
        self.sigma
    }

    fn cell_size(&self) -> f32 {
        self.frame.cell
    }
}

// ---------------------------------------------------------------------------
// DensityRasterizer
// ---------------------------------------------------------------------------

/// Builds a `DensitySurface` for a point set and bandwidth.
///
/// Defaults: 256 cells along the longer axis, 3σ margin, 4σ kernel cutoff,
/// exact summation. The cell count is raised (up to `max_resolution`) when
/// 256 cells would be wider than `max_cell_fraction · σ`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityRasterizer {
    /// Number of cells spanning the longer axis of the expanded bounding box.
    pub resolution: usize,
    /// Ceiling for the raised cell count along the longer axis.
    pub max_resolution: usize,
    /// Widest cell the kernel can be sampled on, in multiples of σ.
    pub max_cell_fraction: f32,
    /// Margin added around the bounding box, in multiples of σ (≥ 3).
    pub margin: f32,
    /// Kernel truncation radius, in multiples of σ.
    pub cutoff: f32,
    pub method: DensityMethod,
}

impl Default for DensityRasterizer {
    fn default() -> Self {
        DensityRasterizer {
            resolution: 256,
            max_resolution: 2048,
            max_cell_fraction: 0.5,
            margin: 3.0,
            cutoff: 4.0,
            method: DensityMethod::Exact,
        }
    }
}

impl DensityRasterizer {
    pub fn new(resolution: usize) -> Self {
        DensityRasterizer { resolution, ..Default::default() }
    }

    pub fn with_method(resolution: usize, method: DensityMethod) -> Self {
        DensityRasterizer { resolution, method, ..Default::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolution < 2 {
            return Err(Error::InvalidConfig(format!(
                "rasterizer resolution must be at least 2 (got {})",
                self.resolution
            )));
        }
        if self.max_resolution < self.resolution {
            return Err(Error::InvalidConfig(format!(
                "max_resolution ({}) must be at least resolution ({})",
                self.max_resolution, self.resolution
            )));
        }
        if !(self.max_cell_fraction > 0.0) || !self.max_cell_fraction.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "max_cell_fraction must be finite and > 0 (got {})",
                self.max_cell_fraction
            )));
        }
        if !(self.margin >= 3.0) || !self.margin.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "rasterizer margin must be a finite multiple of sigma >= 3 (got {})",
                self.margin
            )));
        }
        if !(self.cutoff > 0.0) || !self.cutoff.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "kernel cutoff must be finite and > 0 (got {})",
                self.cutoff
            )));
        }
        Ok(())
    }

    /// Grid frame for `points` at bandwidth `sigma`, or `None` if empty.
    pub fn frame_for(&self, points: &[Point2], sigma: f32) -> Option<GridFrame> {
        let bounds = BoundingBox::from_points(points)?.expanded(self.margin * sigma);
        Some(GridFrame::covering(&bounds, self.resolution_for(&bounds, sigma)))
    }

    /// Cells along the longer axis of `bounds`: `resolution`, or more if
    /// that leaves cells wider than `max_cell_fraction · σ`.
    fn resolution_for(&self, bounds: &BoundingBox, sigma: f32) -> usize {
        let longer = bounds.width().max(bounds.height());
        let needed = (longer / (self.max_cell_fraction * sigma)).ceil() + 1.0;
        if needed <= self.resolution as f32 {
            return self.resolution;
        }
        // Saturating cast; `needed` may exceed usize for extreme boxes.
        (needed as usize).min(self.max_resolution.max(self.resolution))
    }

    /// Whether `frame` samples a kernel of width `sigma` finely enough.
    pub fn resolves(&self, frame: &GridFrame, sigma: f32) -> bool {
        // Slack for the rounding in `cell = extent / (cells - 1)`.
        frame.cell <= self.max_cell_fraction * sigma * (1.0 + 1e-4)
    }

    /// Rasterize the KDE of `points` with bandwidth `sigma`.
    ///
    /// `sigma` must be positive; the engine validates it before a run.
    pub fn build(&self, points: &[Point2], sigma: f32) -> DensitySurface {
        debug_assert!(sigma > 0.0, "sigma must be positive");
        let frame = match self.frame_for(points, sigma) {
            Some(f) => f,
            None => return DensitySurface::empty(sigma),
        };
        debug!(
            "rasterizing {} points ({:?}) onto {}×{} cells, cell={:.4}, sigma={}",
            points.len(),
            self.method,
            frame.width,
            frame.height,
            frame.cell,
            sigma
        );
        match self.method {
            DensityMethod::Exact => self.rasterize_exact(points, sigma, frame),
            DensityMethod::Binned => self.rasterize_binned(points, sigma, frame),
        }
    }

    fn rasterize_exact(&self, points: &[Point2], sigma: f32, frame: GridFrame) -> DensitySurface {
        let w = frame.width;
        let radius = self.cutoff * sigma;
        let radius_sq = radius * radius;
        let inv_two_sigma_sq = 1.0 / (2.0 * sigma * sigma);
        let inv_sigma_sq = 1.0 / (sigma * sigma);

        // Points sorted by y (ties by index) so each row can binary-search
        // the band of points within the cutoff.
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by(|&a, &b| points[a].y.total_cmp(&points[b].y).then(a.cmp(&b)));
        let ys: Vec<f32> = order.iter().map(|&i| points[i].y).collect();

        let mut density = Grid::new(w, frame.height);
        let mut grad_x = Grid::new(w, frame.height);
        let mut grad_y = Grid::new(w, frame.height);

        density
            .as_mut_slice()
            .par_chunks_mut(w)
            .zip(grad_x.as_mut_slice().par_chunks_mut(w))
            .zip(grad_y.as_mut_slice().par_chunks_mut(w))
            .enumerate()
            .for_each(|(row, ((d_row, gx_row), gy_row))| {
                let yc = frame.origin.y + row as f32 * frame.cell;
                let lo = ys.partition_point(|&y| y < yc - radius);
                let hi = ys.partition_point(|&y| y <= yc + radius);

                for &i in &order[lo..hi] {
                    let p = points[i];
                    let dy = p.y - yc;
                    let ky = (-dy * dy * inv_two_sigma_sq).exp();

                    let c_lo = ((p.x - radius - frame.origin.x) / frame.cell).ceil().max(0.0) as usize;
                    let c_hi = ((p.x + radius - frame.origin.x) / frame.cell).floor();
                    if c_hi < 0.0 {
                        continue;
                    }
                    let c_hi = (c_hi as usize).min(w - 1);

                    for col in c_lo..=c_hi {
                        let dx = p.x - (frame.origin.x + col as f32 * frame.cell);
                        if dx * dx + dy * dy > radius_sq {
                            continue;
                        }
                        let k = ky * (-dx * dx * inv_two_sigma_sq).exp();
                        d_row[col] += k;
                        gx_row[col] += k * dx * inv_sigma_sq;
                        gy_row[col] += k * dy * inv_sigma_sq;
                    }
                }
            });

        DensitySurface { frame, sigma, density, grad_x, grad_y }
    }

    fn rasterize_binned(&self, points: &[Point2], sigma: f32, frame: GridFrame) -> DensitySurface {
        let mut histogram = Grid::new(frame.width, frame.height);
        let max_c = frame.width - 1;
        let max_r = frame.height - 1;

        for &p in points {
            let (gx, gy) = frame.to_grid(p);
            let gx = gx.clamp(0.0, max_c as f32);
            let gy = gy.clamp(0.0, max_r as f32);
            let c0 = gx.floor() as usize;
            let r0 = gy.floor() as usize;
            let fx = gx - c0 as f32;
            let fy = gy - r0 as f32;
            let c1 = (c0 + 1).min(max_c);
            let r1 = (r0 + 1).min(max_r);

            histogram.add(c0, r0, (1.0 - fx) * (1.0 - fy));
            histogram.add(c1, r0, fx * (1.0 - fy));
            histogram.add(c0, r1, (1.0 - fx) * fy);
            histogram.add(c1, r1, fx * fy);
        }

        let sigma_cells = sigma / frame.cell;
        let half = ((self.cutoff * sigma_cells).ceil() as usize)
            .max(1)
            .min(frame.width.max(frame.height));
        let kernel = gaussian_kernel_1d(half, sigma_cells);

        let density = convolve_separable(&histogram, &kernel, &kernel);
        let (grad_x, grad_y) = gradient_xy(&density, frame.cell);

        DensitySurface { frame, sigma, density, grad_x, grad_y }
    }
}

// ---------------------------------------------------------------------------
// ExactKde — continuous evaluation
// ---------------------------------------------------------------------------

/// The KDE evaluated directly at query positions.
///
/// Points are bucketed on a uniform grid with bucket size `cutoff · σ`, so a
/// query only visits the 3×3 buckets around it. Buckets hold point indices
/// in ascending order, which fixes the summation order.
pub struct ExactKde {
    points: Vec<Point2>,
    sigma: f32,
    radius: f32,
    origin: Point2,
    buckets: HashMap<(i64, i64), Vec<u32>>,
}

impl ExactKde {
    pub fn new(points: &[Point2], sigma: f32, cutoff: f32) -> Self {
        let radius = cutoff * sigma;
        let origin = BoundingBox::from_points(points)
            .map(|b| Point2::new(b.min_x, b.min_y))
            .unwrap_or_default();

        let mut buckets: HashMap<(i64, i64), Vec<u32>> = HashMap::new();
        for (i, &p) in points.iter().enumerate() {
            buckets
                .entry(bucket_key(p, origin, radius))
                .or_default()
                .push(i as u32);
        }

        ExactKde {
            points: points.to_vec(),
            sigma,
            radius,
            origin,
            buckets,
        }
    }
}

fn bucket_key(p: Point2, origin: Point2, size: f32) -> (i64, i64) {
    (
        ((p.x - origin.x) / size).floor() as i64,
        ((p.y - origin.y) / size).floor() as i64,
    )
}

impl DensityField for ExactKde {
    fn sample(&self, q: Point2) -> FieldSample {
        let inv_two_sigma_sq = 1.0 / (2.0 * self.sigma * self.sigma);
        let inv_sigma_sq = 1.0 / (self.sigma * self.sigma);
        let radius_sq = self.radius * self.radius;
        let (kx, ky) = bucket_key(q, self.origin, self.radius);

        let mut s = FieldSample::default();
        for by in ky - 1..=ky + 1 {
            for bx in kx - 1..=kx + 1 {
                let Some(bucket) = self.buckets.get(&(bx, by)) else {
                    continue;
                };
                for &i in bucket {
                    let p = self.points[i as usize];
                    let dx = p.x - q.x;
                    let dy = p.y - q.y;
                    let d2 = dx * dx + dy * dy;
                    if d2 > radius_sq {
                        continue;
                    }
                    let k = (-d2 * inv_two_sigma_sq).exp();
                    s.density += k;
                    s.grad_x += k * dx * inv_sigma_sq;
                    s.grad_y += k * dy * inv_sigma_sq;
                }
            }
        }
        s
    }

    fn sigma(&self) -> f32 {
        self.sigma
    }
}
