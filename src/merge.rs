// merge.rs — Mode merger / cluster assembler.
//
// Turns N converged positions into a partition of 0..N.
//
// 1. GREEDY UNION-FIND. Points are visited in index order and hashed into
//    square buckets of side `tol`. A point is unioned with every *anchor*
//    closer than `tol` in the 3×3 buckets around it, and becomes an anchor
//    itself unless one already sits within `tol / 2`. Points that converged
//    onto the same mode therefore collapse onto one or two anchors, and the
//    pass stays O(N) instead of O(N²) even when thousands of points share a
//    mode.
//
// 2. MERGED MODES. Each union set's mode is the mean of its members'
//    converged positions.
//
// 3. NEAREST-MODE ASSIGNMENT. Every point moves to the nearest merged mode
//    within its 3×3 bucket neighbourhood (ties to the lower id); a point
//    with no mode in reach keeps its union set. Sets emptied by this step
//    disappear.
//
// 4. ORDERING. Clusters are numbered by their smallest member index and
//    members are listed in ascending order, so identical input always gives
//    identical labels.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::points::Point2;

/// One cluster of the output partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Original point indices, ascending.
    pub indices: Vec<usize>,
    /// Merged mode position (mean of the members' converged positions).
    pub mode: Point2,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Merge tolerance policy and assembler.
///
/// The tolerance for a run is
/// `max(merge_fraction · σ, merge_cells · cell)`, capped at `0.5 · σ` so two
/// genuinely distinct modes (which a Gaussian KDE never places closer than
/// about σ apart) are never fused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeMerger {
    pub merge_fraction: f32,
    pub merge_cells: f32,
}

impl Default for ModeMerger {
    fn default() -> Self {
        ModeMerger {
            merge_fraction: 0.25,
            merge_cells: 2.0,
        }
    }
}

/// Largest tolerance allowed, as a fraction of σ.
const MAX_TOLERANCE_FRACTION: f32 = 0.5;

impl ModeMerger {
    pub fn validate(&self) -> Result<()> {
        if !(self.merge_fraction > 0.0 && self.merge_fraction < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "merge_fraction must be in (0, 1) (got {})",
                self.merge_fraction
            )));
        }
        if !(self.merge_cells >= 0.0) || !self.merge_cells.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "merge_cells must be finite and >= 0 (got {})",
                self.merge_cells
            )));
        }
        Ok(())
    }

    /// Tolerance for bandwidth `sigma` on a field of resolution `cell`.
    pub fn tolerance(&self, sigma: f32, cell: f32) -> f32 {
        (self.merge_fraction * sigma)
            .max(self.merge_cells * cell)
            .min(MAX_TOLERANCE_FRACTION * sigma)
    }

    /// Partition the indices of `positions` into clusters.
    ///
    /// `tolerance` must be positive.
    pub fn assemble(&self, positions: &[Point2], tolerance: f32) -> Vec<Cluster> {
        assert!(tolerance > 0.0, "merge tolerance must be positive (got {tolerance})");
        if positions.is_empty() {
            return Vec::new();
        }

        let sets = union_positions(positions, tolerance);
        let modes = set_modes(positions, &sets);
        let labels = assign_nearest(positions, &sets, &modes, tolerance);
        let clusters = collect_clusters(positions, &labels);

        debug!(
            "merged {} positions into {} clusters (tolerance {tolerance:.4})",
            positions.len(),
            clusters.len()
        );
        clusters
    }
}

// ---------------------------------------------------------------------------
// Union-find
// ---------------------------------------------------------------------------

struct DisjointSets {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        DisjointSets {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

fn bucket_of(p: Point2, size: f32) -> (i64, i64) {
    ((p.x / size).floor() as i64, (p.y / size).floor() as i64)
}

fn neighbourhood((bx, by): (i64, i64)) -> impl Iterator<Item = (i64, i64)> {
    (by - 1..=by + 1).flat_map(move |y| (bx - 1..=bx + 1).map(move |x| (x, y)))
}

/// Union-set id (a dense root label) for every position.
fn union_positions(positions: &[Point2], tol: f32) -> Vec<usize> {
    let tol_sq = tol * tol;
    let absorb_sq = tol_sq * 0.25;
    let mut sets = DisjointSets::new(positions.len());
    let mut anchors: HashMap<(i64, i64), Vec<usize>> = HashMap::new();

    for (i, &p) in positions.iter().enumerate() {
        let key = bucket_of(p, tol);
        let mut absorbed = false;
        for nb in neighbourhood(key) {
            let Some(list) = anchors.get(&nb) else {
                continue;
            };
            for &j in list {
                let d2 = p.distance_sq(positions[j]);
                if d2 < tol_sq {
                    sets.union(i, j);
                    absorbed |= d2 <= absorb_sq;
                }
            }
        }
        if !absorbed {
            anchors.entry(key).or_default().push(i);
        }
    }

    (0..positions.len()).map(|i| sets.find(i)).collect()
}

/// Mean position of every union set, keyed by root.
fn set_modes(positions: &[Point2], sets: &[usize]) -> HashMap<usize, Point2> {
    let mut sums: HashMap<usize, (f64, f64, usize)> = HashMap::new();
    for (&root, p) in sets.iter().zip(positions) {
        let e = sums.entry(root).or_insert((0.0, 0.0, 0));
        e.0 += p.x as f64;
        e.1 += p.y as f64;
        e.2 += 1;
    }
    sums.into_iter()
        .map(|(root, (sx, sy, n))| (root, Point2::new((sx / n as f64) as f32, (sy / n as f64) as f32)))
        .collect()
}

/// Root of the nearest merged mode for every position.
fn assign_nearest(
    positions: &[Point2],
    sets: &[usize],
    modes: &HashMap<usize, Point2>,
    tol: f32,
) -> Vec<usize> {
    // Modes bucketed like the anchors; roots sorted so ties resolve the same
    // way on every run regardless of hash iteration order.
    let mut roots: Vec<usize> = modes.keys().copied().collect();
    roots.sort_unstable();
    let mut buckets: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for &root in &roots {
        buckets.entry(bucket_of(modes[&root], tol)).or_default().push(root);
    }

    positions
        .iter()
        .zip(sets)
        .map(|(&p, &own)| {
            let mut best = own;
            let mut best_d2 = p.distance_sq(modes[&own]);
            for nb in neighbourhood(bucket_of(p, tol)) {
                let Some(list) = buckets.get(&nb) else {
                    continue;
                };
                for &root in list {
                    let d2 = p.distance_sq(modes[&root]);
                    if d2 < best_d2 || (d2 == best_d2 && root < best) {
                        best = root;
                        best_d2 = d2;
                    }
                }
            }
            best
        })
        .collect()
}

/// Group indices by label, ordered by smallest member.
fn collect_clusters(positions: &[Point2], labels: &[usize]) -> Vec<Cluster> {
    let mut id_of: HashMap<usize, usize> = HashMap::new();
    let mut members: Vec<Vec<usize>> = Vec::new();
    for (i, &label) in labels.iter().enumerate() {
        let id = *id_of.entry(label).or_insert_with(|| {
            members.push(Vec::new());
            members.len() - 1
        });
        members[id].push(i);
    }

    members
        .into_iter()
        .map(|indices| {
            let n = indices.len() as f64;
            let (sx, sy) = indices.iter().fold((0.0f64, 0.0f64), |(sx, sy), &i| {
                (sx + positions[i].x as f64, sy + positions[i].y as f64)
            });
            Cluster {
                mode: Point2::new((sx / n) as f32, (sy / n) as f32),
                indices,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition_ok(clusters: &[Cluster], n: usize) -> bool {
        let mut seen = vec![false; n];
        for c in clusters {
            for &i in &c.indices {
                if i >= n || seen[i] {
                    return false;
                }
                seen[i] = true;
            }
        }
        seen.into_iter().all(|s| s)
    }

    #[test]
    fn test_empty() {
        assert!(ModeMerger::default().assemble(&[], 0.1).is_empty());
    }

    #[test]
    fn test_two_modes_interleaved() {
        let a = Point2::new(0.0, 0.0);
        let b = Point2::new(5.0, 5.0);
        let pos = vec![b, a, b, a, Point2::new(5.01, 4.99), a];
        let clusters = ModeMerger::default().assemble(&pos, 0.25);

        assert_eq!(clusters.len(), 2);
        // Ordered by smallest index: the cluster holding index 0 comes first.
        assert_eq!(clusters[0].indices, vec![0, 2, 4]);
        assert_eq!(clusters[1].indices, vec![1, 3, 5]);
        assert!(clusters[1].mode.distance(a) < 1e-6);
        assert!(clusters[0].mode.distance(b) < 0.01);
        assert!(partition_ok(&clusters, pos.len()));
    }

    #[test]
    fn test_within_tolerance_merges() {
        let pos = vec![Point2::new(0.0, 0.0), Point2::new(0.05, 0.0), Point2::new(0.0, 0.08)];
        let clusters = ModeMerger::default().assemble(&pos, 0.1);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_beyond_tolerance_splits() {
        let pos = vec![Point2::new(0.0, 0.0), Point2::new(0.3, 0.0)];
        let clusters = ModeMerger::default().assemble(&pos, 0.1);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_bucket_boundary_does_not_split() {
        // Straddles the bucket edge at x = 0.
        let pos = vec![Point2::new(-0.01, 0.0), Point2::new(0.01, 0.0)];
        let clusters = ModeMerger::default().assemble(&pos, 0.1);
        assert_eq!(clusters.len(), 1);
    }

    #[test]
    fn test_many_identical_positions() {
        let pos = vec![Point2::new(1.0, 1.0); 10_000];
        let clusters = ModeMerger::default().assemble(&pos, 0.1);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 10_000);
    }

    #[test]
    fn test_scattered_partition() {
        let pos: Vec<Point2> = (0..500)
            .map(|i| {
                let t = i as f32 * 0.611;
                Point2::new(t.sin() * 10.0, (t * 0.37).cos() * 10.0)
            })
            .collect();
        let clusters = ModeMerger::default().assemble(&pos, 0.2);
        assert!(partition_ok(&clusters, pos.len()));
        // Sorted by first member.
        let firsts: Vec<usize> = clusters.iter().map(|c| c.indices[0]).collect();
        assert!(firsts.windows(2).all(|w| w[0] < w[1]));
        for c in &clusters {
            assert!(c.indices.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_tolerance_policy() {
        let m = ModeMerger::default();
        // Fraction of sigma dominates on a fine grid.
        assert!((m.tolerance(1.0, 0.01) - 0.25).abs() < 1e-6);
        // Coarse grid: cells dominate, but never beyond sigma / 2.
        assert!((m.tolerance(1.0, 0.2) - 0.4).abs() < 1e-6);
        assert!((m.tolerance(1.0, 1.0) - 0.5).abs() < 1e-6);
        // Continuous field.
        assert!((m.tolerance(2.0, 0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_validate() {
        assert!(ModeMerger { merge_fraction: 1.5, ..Default::default() }.validate().is_err());
        assert!(ModeMerger { merge_cells: -1.0, ..Default::default() }.validate().is_err());
        assert!(ModeMerger::default().validate().is_ok());
    }
}
