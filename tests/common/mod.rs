// tests/common/mod.rs — Deterministic point-set fixtures.

#![allow(dead_code)]

use kdeshift::Point2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

/// Fixed-seed generator, so fixtures are identical on every run.
pub fn seeded(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// `n` points around `center` with per-axis standard deviation `std`.
pub fn gaussian_blob(rng: &mut StdRng, center: Point2, std: f32, n: usize) -> Vec<Point2> {
    (0..n)
        .map(|_| {
            let dx: f32 = StandardNormal.sample(rng);
            let dy: f32 = StandardNormal.sample(rng);
            Point2::new(center.x + std * dx, center.y + std * dy)
        })
        .collect()
}

/// 50 points around (0, 0) followed by 50 around (10, 10), std 0.5.
pub fn two_blobs(seed: u64) -> Vec<Point2> {
    let mut rng = seeded(seed);
    let mut pts = gaussian_blob(&mut rng, Point2::new(0.0, 0.0), 0.5, 50);
    pts.extend(gaussian_blob(&mut rng, Point2::new(10.0, 10.0), 0.5, 50));
    pts
}

pub fn uniform_points(seed: u64, n: usize, half_extent: f32) -> Vec<Point2> {
    let mut rng = seeded(seed);
    (0..n)
        .map(|_| Point2::new(rng.gen_range(-half_extent..half_extent), rng.gen_range(-half_extent..half_extent)))
        .collect()
}

/// Every index in 0..n appears in exactly one cluster.
pub fn assert_partition(clusters: &[kdeshift::Cluster], n: usize) {
    let mut seen = vec![false; n];
    for c in clusters {
        assert!(!c.indices.is_empty(), "empty cluster in output");
        for &i in &c.indices {
            assert!(i < n, "index {i} out of range 0..{n}");
            assert!(!seen[i], "index {i} appears twice");
            seen[i] = true;
        }
    }
    if let Some(missing) = seen.iter().position(|s| !s) {
        panic!("index {missing} missing from every cluster");
    }
}
