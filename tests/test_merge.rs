// tests/test_merge.rs — Tracker output through the mode merger.

mod common;

use common::{assert_partition, gaussian_blob, two_blobs, seeded};
use kdeshift::tracker::TrackingOutcome;
use kdeshift::{DensityField, DensityRasterizer, ExactKde, GradientAscentTracker, ModeMerger, Point2, TrackStatus};

fn track(points: &[Point2], field: &impl DensityField) -> TrackingOutcome {
    GradientAscentTracker::default().track(points, field)
}

#[test]
fn converged_blob_merges_to_one_mode() {
    let mut rng = seeded(31);
    let pts = gaussian_blob(&mut rng, Point2::new(2.0, 2.0), 0.4, 120);
    let field = DensityRasterizer::new(128).build(&pts, 0.8);
    let out = track(&pts, &field);
    assert!(out.points.iter().all(|t| t.status == TrackStatus::Converged));

    let merger = ModeMerger::default();
    let tol = merger.tolerance(0.8, field.cell_size());
    let clusters = merger.assemble(&out.positions(), tol);
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].len(), 120);
}

#[test]
fn blobs_merge_without_cross_contamination() {
    let pts = two_blobs(32);
    let kde = ExactKde::new(&pts, 1.0, 4.0);
    let out = track(&pts, &kde);
    let merger = ModeMerger::default();
    let clusters = merger.assemble(&out.positions(), merger.tolerance(1.0, 0.0));

    assert_partition(&clusters, pts.len());
    assert_eq!(clusters.len(), 2);
    assert!(clusters[0].indices.iter().all(|&i| i < 50));
    assert!(clusters[1].indices.iter().all(|&i| i >= 50));
}

#[test]
fn modes_closer_than_sigma_stay_apart_below_tolerance() {
    // Converged positions 0.6σ apart: above the 0.5σ tolerance cap.
    let sigma = 1.0;
    let merger = ModeMerger { merge_fraction: 0.45, merge_cells: 100.0 };
    let tol = merger.tolerance(sigma, 0.1);
    assert!((tol - 0.5).abs() < 1e-6);
    let positions = vec![Point2::new(0.0, 0.0), Point2::new(0.6, 0.0), Point2::new(0.0, 0.0)];
    let clusters = merger.assemble(&positions, tol);
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].indices, vec![0, 2]);
}

#[test]
fn chained_positions_follow_nearest_mode() {
    // A run of positions spaced under the tolerance: union-find chains them
    // into one set, and every member ends up in exactly one cluster.
    let positions: Vec<Point2> = (0..40).map(|i| Point2::new(i as f32 * 0.05, 0.0)).collect();
    let clusters = ModeMerger::default().assemble(&positions, 0.1);
    assert_partition(&clusters, positions.len());
    for c in &clusters {
        assert!(c.indices.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn assembly_is_order_stable() {
    let pts = two_blobs(33);
    let kde = ExactKde::new(&pts, 1.0, 4.0);
    let positions = track(&pts, &kde).positions();
    let merger = ModeMerger::default();
    let a = merger.assemble(&positions, 0.25);
    let b = merger.assemble(&positions, 0.25);
    assert_eq!(a, b);
}
