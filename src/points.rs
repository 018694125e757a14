// points.rs — 2-D point snapshots and their bounding boxes.
//
// The engine never holds a reference into caller-owned buffers. Points are
// copied once into an immutable `Arc<[Point2]>` snapshot when the caller
// hands them over, so a run sees a fixed N from start to finish no matter
// what the caller does with its own data afterwards.
//
// Coordinates are f32, the same precision the density grid is stored in.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A position in the plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Point2 { x, y }
    }

    /// Squared Euclidean distance to `other`.
    #[inline]
    pub fn distance_sq(self, other: Point2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    #[inline]
    pub fn distance(self, other: Point2) -> f32 {
        self.distance_sq(other).sqrt()
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f32, f32)> for Point2 {
    fn from((x, y): (f32, f32)) -> Self {
        Point2 { x, y }
    }
}

/// Axis-aligned bounding box of a point set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl BoundingBox {
    /// Tight box around `points`, or `None` for an empty slice.
    pub fn from_points(points: &[Point2]) -> Option<Self> {
        let first = points.first()?;
        let init = BoundingBox {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        Some(points[1..].iter().fold(init, |b, p| BoundingBox {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        }))
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    /// True when every point coincides (zero extent on both axes).
    ///
    /// A single-line point set (zero extent on one axis only) is not
    /// degenerate: the rasterizer margin gives it a 2-D grid.
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0.0 && self.height() <= 0.0
    }

    /// Grow the box by `margin` on every side.
    pub fn expanded(&self, margin: f32) -> Self {
        BoundingBox {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }
}

/// Copy `points` into an immutable snapshot, rejecting non-finite values.
pub fn snapshot(points: &[Point2]) -> Result<Arc<[Point2]>> {
    if let Some(index) = points.iter().position(|p| !p.is_finite()) {
        return Err(Error::NonFiniteCoordinate { index });
    }
    Ok(Arc::from(points))
}

/// Extract columns `dim_x` and `dim_y` from a row-major buffer with
/// `dimensions` values per point.
///
/// Trailing values that do not fill a whole row are ignored.
pub fn from_columns(
    data: &[f32],
    dimensions: usize,
    dim_x: usize,
    dim_y: usize,
) -> Result<Vec<Point2>> {
    if dimensions < 2 || dim_x >= dimensions || dim_y >= dimensions {
        return Err(Error::Dimensionality { dimensions, dim_x, dim_y });
    }
    Ok(data
        .chunks_exact(dimensions)
        .map(|row| Point2::new(row[dim_x], row[dim_y]))
        .collect())
}
