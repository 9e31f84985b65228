//! Multi-pin net decomposition into two-pad connections.

use pcb_common::geom::point::Point;
use pcb_common::util::config::Topology;

/// Prim's minimum spanning tree under Manhattan distance.
/// Edges come back sorted by increasing length; ties keep discovery order.
pub fn build_mst(points: &[Point<f64>]) -> Vec<(usize, usize)> {
    let n = points.len();
    if n < 2 {
        return Vec::new();
    }
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut link = vec![0usize; n];
    in_tree[0] = true;
    for i in 1..n {
        best[i] = points[0].manhattan(points[i]);
    }

    let mut edges: Vec<(usize, usize, f64)> = Vec::with_capacity(n - 1);
    for _ in 1..n {
        let mut next = None;
        for i in 0..n {
            if in_tree[i] {
                continue;
            }
            if next.is_none_or(|j: usize| best[i] < best[j]) {
                next = Some(i);
            }
        }
        let Some(v) = next else {
            break;
        };
        in_tree[v] = true;
        edges.push((link[v], v, best[v]));
        for i in 0..n {
            if !in_tree[i] {
                let d = points[v].manhattan(points[i]);
                if d < best[i] {
                    best[i] = d;
                    link[i] = v;
                }
            }
        }
    }
    edges.sort_by(|a, b| a.2.total_cmp(&b.2));
    edges.into_iter().map(|(a, b, _)| (a, b)).collect()
}

/// Every pad connected straight to the first one, nearest first.
pub fn build_star(points: &[Point<f64>]) -> Vec<(usize, usize)> {
    let Some(&hub) = points.first() else {
        return Vec::new();
    };
    let mut edges: Vec<(usize, usize)> = (1..points.len()).map(|i| (0, i)).collect();
    edges.sort_by(|a, b| {
        hub.manhattan(points[a.1])
            .total_cmp(&hub.manhattan(points[b.1]))
    });
    edges
}

pub fn decompose(points: &[Point<f64>], topology: Topology) -> Vec<(usize, usize)> {
    match topology {
        Topology::Mst => build_mst(points),
        Topology::Star => build_star(points),
    }
}

pub fn tree_length(points: &[Point<f64>], edges: &[(usize, usize)]) -> f64 {
    edges
        .iter()
        .map(|&(a, b)| points[a].manhattan(points[b]))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Decodes a Prüfer sequence into the edges of a labelled tree.
    fn prufer_tree(seq: &[usize], n: usize) -> Vec<(usize, usize)> {
        let mut degree = vec![1usize; n];
        for &s in seq {
            degree[s] += 1;
        }
        let mut edges = Vec::with_capacity(n - 1);
        for &s in seq {
            let leaf = (0..n).find(|&i| degree[i] == 1).unwrap();
            edges.push((leaf, s));
            degree[leaf] -= 1;
            degree[s] -= 1;
        }
        let rest: Vec<usize> = (0..n).filter(|&i| degree[i] == 1).collect();
        edges.push((rest[0], rest[1]));
        edges
    }

    fn brute_force_min(points: &[Point<f64>]) -> f64 {
        let n = points.len();
        if n < 2 {
            return 0.0;
        }
        if n == 2 {
            return points[0].manhattan(points[1]);
        }
        let mut best = f64::INFINITY;
        let mut seq = vec![0usize; n - 2];
        loop {
            best = best.min(tree_length(points, &prufer_tree(&seq, n)));
            let mut k = 0;
            loop {
                if k == seq.len() {
                    return best;
                }
                seq[k] += 1;
                if seq[k] < n {
                    break;
                }
                seq[k] = 0;
                k += 1;
            }
        }
    }

    fn spans_all(n: usize, edges: &[(usize, usize)]) -> bool {
        let mut seen = vec![false; n];
        seen[0] = true;
        let mut changed = true;
        while changed {
            changed = false;
            for &(a, b) in edges {
                if seen[a] != seen[b] {
                    seen[a] = true;
                    seen[b] = true;
                    changed = true;
                }
            }
        }
        seen.into_iter().all(|s| s)
    }

    #[test]
    fn star_hangs_off_first_pad() {
        let pts = [
            Point::new(0.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(1.0, 1.0),
        ];
        assert_eq!(build_star(&pts), vec![(0, 2), (0, 1)]);
        assert_eq!(decompose(&pts, Topology::Mst).len(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn mst_is_minimal(coords in prop::collection::vec((0i32..40, 0i32..40), 1..=8)) {
            let points: Vec<Point<f64>> = coords
                .iter()
                .map(|&(x, y)| Point::new(x as f64 * 0.5, y as f64 * 0.5))
                .collect();
            let edges = build_mst(&points);
            prop_assert_eq!(edges.len(), points.len() - 1);
            prop_assert!(spans_all(points.len(), &edges));
            let got = tree_length(&points, &edges);
            let want = brute_force_min(&points);
            prop_assert!((got - want).abs() < 1e-9, "mst {} vs brute force {}", got, want);
            let lengths: Vec<f64> = edges
                .iter()
                .map(|&(a, b)| points[a].manhattan(points[b]))
                .collect();
            prop_assert!(lengths.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
