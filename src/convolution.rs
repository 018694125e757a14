// convolution.rs — Separable 1-D convolution over density grids.
//
// The binned rasterizer turns a histogram of splatted points into a KDE by
// convolving with a Gaussian. That Gaussian is separable,
//
//   exp(-(dx² + dy²) / 2s²) = exp(-dx² / 2s²) · exp(-dy² / 2s²)
//
// so the 2-D convolution decomposes into a row pass and a column pass,
// O(2k) instead of O(k²) per cell.
//
// BORDER HANDLING: zero padding.
// A KDE has no mass outside the data, so taps that fall off the grid
// contribute nothing. (Replicating edge cells would invent density along
// the border and pull modes outward.)
//
// Rows are independent in the horizontal pass and columns in the vertical
// pass; both are split across the rayon pool by output row.

use rayon::prelude::*;

use crate::grid::Grid;

/// Convolve each row of `src` with a centred, odd-length kernel.
///
/// # Panics
/// Panics if the kernel is empty or has even length.
pub fn convolve_rows(src: &Grid, kernel: &[f32]) -> Grid {
    check_kernel(kernel);
    let w = src.width();
    let h = src.height();
    let half = (kernel.len() / 2) as isize;
    let mut dst = Grid::new(w, h);
    if src.is_empty() {
        return dst;
    }

    let src_data = src.as_slice();
    dst.as_mut_slice()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, out_row)| {
            let in_row = &src_data[y * w..(y + 1) * w];
            for (x, out) in out_row.iter_mut().enumerate() {
                let mut acc = 0.0f32;
                for (ki, &kv) in kernel.iter().enumerate() {
                    let sx = x as isize + ki as isize - half;
                    if sx >= 0 && (sx as usize) < w {
                        acc += in_row[sx as usize] * kv;
                    }
                }
                *out = acc;
            }
        });
    dst
}

/// Convolve each column of `src` with a centred, odd-length kernel.
///
/// # Panics
/// Panics if the kernel is empty or has even length.
pub fn convolve_cols(src: &Grid, kernel: &[f32]) -> Grid {
    check_kernel(kernel);
    let w = src.width();
    let h = src.height();
    let half = (kernel.len() / 2) as isize;
    let mut dst = Grid::new(w, h);
    if src.is_empty() {
        return dst;
    }

    let src_data = src.as_slice();
    dst.as_mut_slice()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, out_row)| {
            for (ki, &kv) in kernel.iter().enumerate() {
                let sy = y as isize + ki as isize - half;
                if sy < 0 || sy as usize >= h {
                    continue;
                }
                let in_row = &src_data[sy as usize * w..(sy as usize + 1) * w];
                for (out, &v) in out_row.iter_mut().zip(in_row) {
                    *out += v * kv;
                }
            }
        });
    dst
}

/// Row pass then column pass.
pub fn convolve_separable(src: &Grid, kernel_row: &[f32], kernel_col: &[f32]) -> Grid {
    let intermediate = convolve_rows(src, kernel_row);
    convolve_cols(&intermediate, kernel_col)
}

/// Unnormalised 1-D Gaussian: `k[i] = exp(-(i - half)² / 2s²)`.
///
/// The centre tap is exactly 1, so convolving a unit impulse reproduces the
/// KDE kernel `exp(-‖x‖² / 2σ²)` sampled at cell centres (with `s` in cells).
///
/// # Examples
/// ```
/// let k = kdeshift::convolution::gaussian_kernel_1d(3, 1.5);
/// assert_eq!(k.len(), 7);
/// assert_eq!(k[3], 1.0);
/// ```
pub fn gaussian_kernel_1d(half_size: usize, sigma_cells: f32) -> Vec<f32> {
    assert!(sigma_cells > 0.0, "sigma must be positive");
    let two_sigma_sq = 2.0 * sigma_cells * sigma_cells;
    (0..2 * half_size + 1)
        .map(|i| {
            let x = i as f32 - half_size as f32;
            (-x * x / two_sigma_sq).exp()
        })
        .collect()
}

fn check_kernel(kernel: &[f32]) {
    assert!(!kernel.is_empty(), "kernel must not be empty");
    assert!(kernel.len() % 2 == 1, "kernel length must be odd (got {})", kernel.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_kernel_properties() {
        let k = gaussian_kernel_1d(2, 1.0);
        assert_eq!(k.len(), 5);
        assert_eq!(k[2], 1.0);
        assert!((k[0] - k[4]).abs() < 1e-6);
        assert!((k[1] - (-0.5f32).exp()).abs() < 1e-6);
        assert!(k[1] > k[0]);
    }

    #[test]
    fn test_identity_kernel() {
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let g = Grid::from_vec(4, 3, data);
        let k = [0.0, 0.0, 1.0, 0.0, 0.0];
        let out = convolve_separable(&g, &k, &k);
        assert_eq!(out, g);
    }

    #[test]
    fn test_impulse_reproduces_kernel() {
        // A unit impulse at the centre spreads into the outer product k ⊗ k.
        let mut g = Grid::new(7, 7);
        g.set(3, 3, 1.0);
        let k = gaussian_kernel_1d(3, 1.2);
        let out = convolve_separable(&g, &k, &k);
        for (x, y, v) in out.cells() {
            let expected = k[x] * k[y];
            assert!((v - expected).abs() < 1e-6, "({x},{y}): {v} vs {expected}");
        }
    }

    #[test]
    fn test_zero_border() {
        // Row [10, 20, 30] with [0.25, 0.5, 0.25]: the tap left of x=0 is zero.
        let g = Grid::from_vec(3, 1, vec![10.0, 20.0, 30.0]);
        let out = convolve_rows(&g, &[0.25, 0.5, 0.25]);
        assert!((out.get(0, 0) - 10.0).abs() < 1e-6);
        assert!((out.get(1, 0) - 20.0).abs() < 1e-6);
        assert!((out.get(2, 0) - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_column_pass_matches_row_pass_transposed() {
        let g = Grid::from_vec(1, 3, vec![10.0, 20.0, 30.0]);
        let out = convolve_cols(&g, &[0.25, 0.5, 0.25]);
        assert!((out.get(0, 0) - 10.0).abs() < 1e-6);
        assert!((out.get(0, 2) - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_mass_preserved_away_from_border() {
        // Interior impulse, normalised kernel: total mass is unchanged.
        let mut g = Grid::new(21, 21);
        g.set(10, 10, 4.0);
        let raw = gaussian_kernel_1d(4, 1.5);
        let s: f32 = raw.iter().sum();
        let k: Vec<f32> = raw.iter().map(|v| v / s).collect();
        let out = convolve_separable(&g, &k, &k);
        assert!((out.sum() - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty_grid() {
        let out = convolve_separable(&Grid::empty(), &[1.0], &[1.0]);
        assert!(out.is_empty());
    }

    #[test]
    #[should_panic(expected = "odd")]
    fn test_even_kernel_panics() {
        let g = Grid::new(4, 4);
        convolve_rows(&g, &[0.5, 0.5]);
    }
}
