// grid.rs — Runtime-sized f32 raster and its placement in world space.
//
// The density surface is stored as three of these grids (density, ∂f/∂x,
// ∂f/∂y). A `GridFrame` ties cell indices to world coordinates:
//
//   world(col, row) = origin + (col, row) * cell
//
// so cell (0, 0) is *centred* on `origin`, and the grid spans
// [origin, origin + (width-1, height-1) * cell] in world units. Keeping the
// sample points at cell centres means bilinear interpolation between four
// neighbouring samples is exact for any bilinear function.
//
// Memory layout is row-major with no padding (stride == width): unlike
// camera frames, nothing here is ever uploaded with row alignment, the GPU
// path writes a flat storage buffer instead of a texture.

use std::fmt;

use crate::points::{BoundingBox, Point2};

/// A 2-D grid of f32 samples, row-major.
#[derive(Clone, PartialEq)]
pub struct Grid {
    data: Vec<f32>,
    width: usize,
    height: usize,
}

impl Grid {
    /// Zero-filled grid.
    pub fn new(width: usize, height: usize) -> Self {
        Grid {
            data: vec![0.0; width * height],
            width,
            height,
        }
    }

    /// Wrap an existing buffer.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        Grid { data, width, height }
    }

    /// A 0×0 grid.
    pub fn empty() -> Self {
        Grid::new(0, 0)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Sample at (col, row).
    ///
    /// # Panics
    /// Panics if (col, row) is out of bounds.
    #[inline]
    pub fn get(&self, col: usize, row: usize) -> f32 {
        self.bounds_check(col, row);
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, col: usize, row: usize, value: f32) {
        self.bounds_check(col, row);
        self.data[row * self.width + col] = value;
    }

    /// Add `value` to the sample at (col, row).
    #[inline]
    pub fn add(&mut self, col: usize, row: usize, value: f32) {
        self.bounds_check(col, row);
        self.data[row * self.width + col] += value;
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[f32] {
        assert!(row < self.height, "row {row} out of bounds (height {})", self.height);
        let start = row * self.width;
        &self.data[start..start + self.width]
    }

    #[inline]
    pub fn row_mut(&mut self, row: usize) -> &mut [f32] {
        assert!(row < self.height, "row {row} out of bounds (height {})", self.height);
        let start = row * self.width;
        &mut self.data[start..start + self.width]
    }

    /// Iterate over all samples as `(col, row, value)`.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        (0..self.height).flat_map(move |row| {
            (0..self.width).map(move |col| (col, row, self.data[row * self.width + col]))
        })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Largest sample, or 0 for an empty grid.
    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }

    /// Sum of all samples.
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    #[inline]
    fn bounds_check(&self, col: usize, row: usize) {
        assert!(
            col < self.width && row < self.height,
            "cell ({col},{row}) out of bounds for grid {}×{}",
            self.width,
            self.height,
        );
    }
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Grid {{ {}×{} }}", self.width, self.height)?;
        for row in 0..self.height.min(8) {
            write!(f, "  row {row}: [")?;
            for col in 0..self.width.min(12) {
                if col > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:.3}", self.get(col, row))?;
            }
            if self.width > 12 {
                write!(f, ", ...")?;
            }
            writeln!(f, "]")?;
        }
        if self.height > 8 {
            writeln!(f, "  ...")?;
        }
        Ok(())
    }
}

impl std::ops::Index<(usize, usize)> for Grid {
    type Output = f32;

    #[inline]
    fn index(&self, (col, row): (usize, usize)) -> &f32 {
        self.bounds_check(col, row);
        &self.data[row * self.width + col]
    }
}

impl std::ops::IndexMut<(usize, usize)> for Grid {
    #[inline]
    fn index_mut(&mut self, (col, row): (usize, usize)) -> &mut f32 {
        self.bounds_check(col, row);
        let idx = row * self.width + col;
        &mut self.data[idx]
    }
}

// ---------------------------------------------------------------------------
// GridFrame
// ---------------------------------------------------------------------------

/// Placement of a grid in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridFrame {
    /// World position of the centre of cell (0, 0).
    pub origin: Point2,
    /// Edge length of one cell in world units.
    pub cell: f32,
    pub width: usize,
    pub height: usize,
}

impl GridFrame {
    /// Frame covering `bounds` with `resolution` cells along the longer axis.
    ///
    /// The shorter axis gets as many cells as it needs at the same cell size,
    /// so cells stay square.
    ///
    /// # Panics
    /// Panics if `resolution < 2` or `bounds` has zero extent on both axes.
    pub fn covering(bounds: &BoundingBox, resolution: usize) -> Self {
        assert!(resolution >= 2, "grid resolution must be at least 2 (got {resolution})");
        let longer = bounds.width().max(bounds.height());
        assert!(longer > 0.0, "cannot build a grid over a zero-extent box");

        let cell = longer / (resolution - 1) as f32;
        let cells_for = |extent: f32| {
            if extent >= longer {
                resolution
            } else {
                ((extent / cell).ceil() as usize + 1).clamp(2, resolution)
            }
        };

        GridFrame {
            origin: Point2::new(bounds.min_x, bounds.min_y),
            cell,
            width: cells_for(bounds.width()),
            height: cells_for(bounds.height()),
        }
    }

    /// Frame of an empty surface.
    pub fn empty() -> Self {
        GridFrame {
            origin: Point2::default(),
            cell: 0.0,
            width: 0,
            height: 0,
        }
    }

    /// Fractional (col, row) of a world position.
    #[inline]
    pub fn to_grid(&self, p: Point2) -> (f32, f32) {
        ((p.x - self.origin.x) / self.cell, (p.y - self.origin.y) / self.cell)
    }

    /// World position of the centre of cell (col, row).
    #[inline]
    pub fn to_world(&self, col: usize, row: usize) -> Point2 {
        Point2::new(
            self.origin.x + col as f32 * self.cell,
            self.origin.y + row as f32 * self.cell,
        )
    }

    /// World-space box spanned by the cell centres.
    pub fn bounds(&self) -> BoundingBox {
        let far = self.to_world(self.width.saturating_sub(1), self.height.saturating_sub(1));
        BoundingBox {
            min_x: self.origin.x,
            min_y: self.origin.y,
            max_x: far.x,
            max_y: far.y,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }
}

// ---------------------------------------------------------------------------
// Bilinear interpolation
// ---------------------------------------------------------------------------

/// Bilinear interpolation at fractional grid coordinates.
///
/// Coordinates are clamped to the grid, so queries outside the frame return
/// the edge value. Returns 0 for an empty grid.
pub fn interpolate_bilinear(grid: &Grid, x: f32, y: f32) -> f32 {
    if grid.is_empty() {
        return 0.0;
    }

    let max_x = (grid.width() - 1) as f32;
    let max_y = (grid.height() - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let x1 = (x0 + 1).min(grid.width() - 1);
    let y1 = (y0 + 1).min(grid.height() - 1);

    let w = grid.width();
    let d = grid.as_slice();
    let p00 = d[y0 * w + x0];
    let p10 = d[y0 * w + x1];
    let p01 = d[y1 * w + x0];
    let p11 = d[y1 * w + x1];

    (1.0 - fx) * (1.0 - fy) * p00 + fx * (1.0 - fy) * p10 + (1.0 - fx) * fy * p01 + fx * fy * p11
}
