// gradient.rs — Finite-difference gradients of a density grid.
//
// Used by the binned rasterizer, where the density is only known at cell
// centres. Central differences in the interior,
//
//   ∂f/∂x ≈ (f[x+1] - f[x-1]) / 2h
//
// and one-sided differences on the first and last column/row. Results are in
// density units per *world* unit (divided by the cell size `h`), so the
// tracker can combine them directly with world-space positions.
//
// The exact and GPU rasterizers compute the analytic gradient instead and
// never call into this module.

use crate::grid::Grid;

/// ∂f/∂x of `src`, sampled on the same grid.
pub fn gradient_x(src: &Grid, cell: f32) -> Grid {
    let w = src.width();
    let h = src.height();
    let mut dst = Grid::new(w, h);
    if w < 2 {
        return dst;
    }
    let inv_h = 1.0 / cell;
    for y in 0..h {
        let row = src.row(y);
        let out = dst.row_mut(y);
        out[0] = (row[1] - row[0]) * inv_h;
        out[w - 1] = (row[w - 1] - row[w - 2]) * inv_h;
        for x in 1..w - 1 {
            out[x] = 0.5 * (row[x + 1] - row[x - 1]) * inv_h;
        }
    }
    dst
}

/// ∂f/∂y of `src`, sampled on the same grid.
pub fn gradient_y(src: &Grid, cell: f32) -> Grid {
    let w = src.width();
    let h = src.height();
    let mut dst = Grid::new(w, h);
    if h < 2 {
        return dst;
    }
    let inv_h = 1.0 / cell;
    for y in 0..h {
        let (lo, hi, scale) = if y == 0 {
            (0, 1, inv_h)
        } else if y == h - 1 {
            (h - 2, h - 1, inv_h)
        } else {
            (y - 1, y + 1, 0.5 * inv_h)
        };
        for x in 0..w {
            let v = (src.get(x, hi) - src.get(x, lo)) * scale;
            dst.set(x, y, v);
        }
    }
    dst
}

/// Both gradients at once.
pub fn gradient_xy(src: &Grid, cell: f32) -> (Grid, Grid) {
    (gradient_x(src, cell), gradient_y(src, cell))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_ramp_x() {
        // f = 3·col on a grid with cell size 0.5 → ∂f/∂x = 6 per world unit.
        let mut g = Grid::new(8, 4);
        for y in 0..4 {
            for x in 0..8 {
                g.set(x, y, 3.0 * x as f32);
            }
        }
        let (gx, gy) = gradient_xy(&g, 0.5);
        for (x, y, v) in gx.cells() {
            assert!((v - 6.0).abs() < 1e-4, "gx at ({x},{y}) = {v}");
        }
        for (x, y, v) in gy.cells() {
            assert!(v.abs() < 1e-6, "gy at ({x},{y}) = {v}");
        }
    }

    #[test]
    fn test_linear_ramp_y() {
        let mut g = Grid::new(3, 5);
        for y in 0..5 {
            for x in 0..3 {
                g.set(x, y, -2.0 * y as f32);
            }
        }
        let gy = gradient_y(&g, 1.0);
        for (_, _, v) in gy.cells() {
            assert!((v + 2.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_peak_has_zero_gradient_at_centre() {
        // Symmetric bump: central difference vanishes at the peak.
        let g = Grid::from_vec(5, 1, vec![0.0, 1.0, 2.0, 1.0, 0.0]);
        let gx = gradient_x(&g, 1.0);
        assert_eq!(gx.get(2, 0), 0.0);
        assert!(gx.get(1, 0) > 0.0);
        assert!(gx.get(3, 0) < 0.0);
    }

    #[test]
    fn test_single_column_has_no_x_gradient() {
        let g = Grid::from_vec(1, 3, vec![1.0, 2.0, 3.0]);
        let gx = gradient_x(&g, 1.0);
        assert!(gx.as_slice().iter().all(|&v| v == 0.0));
    }
}
