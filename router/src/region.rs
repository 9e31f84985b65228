//! Coarse row/column partition of the board for global path planning.

use crate::algo::COST_SCALE;
use crate::grid::RoutingGrid;
use crate::utils::conversion::round6;
use pcb_common::geom::point::Point;
use pcb_common::geom::rect::Rect;
use pcb_common::util::config::{DesignRules, GlobalRoutingConfig};
use priority_queue::PriorityQueue;
use std::cmp::Reverse;

#[derive(Clone, Debug)]
pub struct Region {
    pub bounds: Rect,
    pub row: usize,
    pub col: usize,
    /// Fraction of the region's cells on routable layers taken by static copper or keepouts.
    pub obstacle_density: f64,
    pub capacity: f64,
    pub utilization: f64,
}

impl Region {
    pub fn center(&self) -> Point<f64> {
        self.bounds.center()
    }
}

#[derive(Clone, Debug)]
pub struct RegionEdge {
    pub a: usize,
    pub b: usize,
    pub capacity: f64,
    pub utilization: f64,
}

impl RegionEdge {
    pub fn cost_multiplier(&self, weight: f64) -> f64 {
        let ratio = self.utilization / self.capacity.max(0.5);
        1.0 + weight * ratio * ratio
    }

    pub fn other(&self, from: usize) -> usize {
        if self.a == from { self.b } else { self.a }
    }
}

pub struct RegionGraph {
    rows: usize,
    cols: usize,
    origin: Point<f64>,
    size: f64,
    pub regions: Vec<Region>,
    pub edges: Vec<RegionEdge>,
    adjacency: Vec<Vec<usize>>,
    congestion_weight: f64,
    heuristic_weight: f64,
}

impl RegionGraph {
    pub fn build(grid: &RoutingGrid, rules: &DesignRules, config: &GlobalRoutingConfig) -> Self {
        let conv = grid.converter();
        let bounds = conv.bounds();
        let size = config.region_size;
        let cols = (round6(bounds.width() / size).ceil() as usize).max(1);
        let rows = (round6(bounds.height() / size).ceil() as usize).max(1);
        let pitch = rules.trace_width + rules.clearance;
        let layers = grid.routable_layers();
        let tracks = (size / pitch).floor() * layers.len() as f64;

        let mut regions = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                let min = Point::new(
                    bounds.min.x + col as f64 * size,
                    bounds.min.y + row as f64 * size,
                );
                let max = Point::new(
                    (min.x + size).min(bounds.max.x),
                    (min.y + size).min(bounds.max.y),
                );
                let rect = Rect::new(min, max);
                let mut total = 0usize;
                let mut blocked = 0usize;
                if let Some((x0, x1, y0, y1)) = conv.cell_span(&rect) {
                    for z in layers.iter() {
                        for y in y0..=y1 {
                            for x in x0..=x1 {
                                let cell = grid.cell(x, y, z);
                                total += 1;
                                if cell.obstacle || cell.keepout {
                                    blocked += 1;
                                }
                            }
                        }
                    }
                }
                let obstacle_density = if total == 0 {
                    0.0
                } else {
                    blocked as f64 / total as f64
                };
                regions.push(Region {
                    bounds: rect,
                    row,
                    col,
                    obstacle_density,
                    capacity: tracks * (1.0 - obstacle_density),
                    utilization: 0.0,
                });
            }
        }

        let mut edges = Vec::new();
        let mut adjacency = vec![Vec::new(); regions.len()];
        for row in 0..rows {
            for col in 0..cols {
                let a = row * cols + col;
                for (nr, nc) in [(row, col + 1), (row + 1, col)] {
                    if nr >= rows || nc >= cols {
                        continue;
                    }
                    let b = nr * cols + nc;
                    let density = (regions[a].obstacle_density + regions[b].obstacle_density) / 2.0;
                    adjacency[a].push(edges.len());
                    adjacency[b].push(edges.len());
                    edges.push(RegionEdge {
                        a,
                        b,
                        capacity: tracks * (1.0 - density),
                        utilization: 0.0,
                    });
                }
            }
        }

        log::info!(
            "Region Graph: {}x{} regions of {:.1}mm, {} edges",
            cols,
            rows,
            size,
            edges.len()
        );
        Self {
            rows,
            cols,
            origin: bounds.min,
            size,
            regions,
            edges,
            adjacency,
            congestion_weight: config.congestion_weight,
            heuristic_weight: config.heuristic_weight,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn region_of(&self, p: Point<f64>) -> usize {
        let col = ((p.x - self.origin.x) / self.size).floor().max(0.0) as usize;
        let row = ((p.y - self.origin.y) / self.size).floor().max(0.0) as usize;
        row.min(self.rows - 1) * self.cols + col.min(self.cols - 1)
    }

    fn edge_cost(&self, e: usize) -> i64 {
        let edge = &self.edges[e];
        let over = (self.regions[edge.b].utilization / self.regions[edge.b].capacity.max(0.5))
            .max(self.regions[edge.a].utilization / self.regions[edge.a].capacity.max(0.5));
        let fill = 1.0 + self.congestion_weight * over * over;
        let cost = self.size * edge.cost_multiplier(self.congestion_weight).max(fill);
        (cost * COST_SCALE).round() as i64
    }

    fn estimate(&self, from: usize, to: usize) -> i64 {
        let (a, b) = (&self.regions[from], &self.regions[to]);
        let hops = a.row.abs_diff(b.row) + a.col.abs_diff(b.col);
        (hops as f64 * self.size * self.heuristic_weight * COST_SCALE).floor() as i64
    }

    /// Cheapest region sequence from `from` to `to`, both included.
    pub fn find_path(&self, from: usize, to: usize) -> Option<Vec<usize>> {
        let n = self.regions.len();
        let mut g = vec![i64::MAX; n];
        let mut parent = vec![usize::MAX; n];
        let mut closed = vec![false; n];
        let mut open: PriorityQueue<usize, Reverse<i64>> = PriorityQueue::new();
        g[from] = 0;
        open.push(from, Reverse(self.estimate(from, to)));

        while let Some((r, _)) = open.pop() {
            if r == to {
                let mut path = vec![to];
                let mut cur = to;
                while cur != from {
                    cur = parent[cur];
                    path.push(cur);
                }
                path.reverse();
                return Some(path);
            }
            closed[r] = true;
            for &e in &self.adjacency[r] {
                let next = self.edges[e].other(r);
                if closed[next] {
                    continue;
                }
                let tentative = g[r] + self.edge_cost(e);
                if tentative < g[next] {
                    g[next] = tentative;
                    parent[next] = r;
                    open.push_increase(next, Reverse(tentative + self.estimate(next, to)));
                }
            }
        }
        None
    }

    fn edge_between(&self, a: usize, b: usize) -> Option<usize> {
        self.adjacency[a]
            .iter()
            .copied()
            .find(|&e| self.edges[e].other(a) == b)
    }

    /// Records one track of usage along a region path.
    pub fn commit(&mut self, path: &[usize]) {
        for &r in path {
            self.regions[r].utilization += 1.0;
        }
        for w in path.windows(2) {
            if let Some(e) = self.edge_between(w[0], w[1]) {
                self.edges[e].utilization += 1.0;
            }
        }
    }

    pub fn overflowed_edges(&self) -> usize {
        self.edges
            .iter()
            .filter(|e| e.utilization > e.capacity)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcb_common::db::core::{Board, Keepout};

    fn graph(board: &Board) -> RegionGraph {
        let rules = DesignRules::default();
        let grid = RoutingGrid::build(board, &rules).unwrap();
        RegionGraph::build(&grid, &rules, &GlobalRoutingConfig::default())
    }

    fn board() -> Board {
        Board::new(Rect::new(Point::new(0.0, 0.0), Point::new(20.0, 10.0)), 2)
    }

    #[test]
    fn partitions_board_into_rows_and_columns() {
        let g = graph(&board());
        assert_eq!((g.cols(), g.rows()), (4, 2));
        assert_eq!(g.regions.len(), 8);
        assert_eq!(g.edges.len(), 3 * 2 + 4);
        assert_eq!(g.region_of(Point::new(7.0, 6.0)), 5);
        assert_eq!(g.region_of(Point::new(25.0, -1.0)), 3);
    }

    #[test]
    fn keepouts_reduce_capacity() {
        let mut b = board();
        b.keepouts.push(Keepout {
            area: Rect::new(Point::new(5.0, 0.0), Point::new(10.0, 5.0)),
            layers: Vec::new(),
        });
        let g = graph(&b);
        assert!(g.regions[1].obstacle_density > 0.9);
        assert!(g.regions[1].capacity < g.regions[0].capacity / 5.0);
    }

    #[test]
    fn path_avoids_used_edges() {
        let mut g = graph(&board());
        let straight = g.find_path(0, 3).unwrap();
        assert_eq!(straight, vec![0, 1, 2, 3]);
        for _ in 0..200 {
            g.commit(&[1, 2]);
        }
        let detour = g.find_path(0, 3).unwrap();
        assert_eq!(detour.first(), Some(&0));
        assert_eq!(detour.last(), Some(&3));
        assert!(!detour.windows(2).any(|w| w == [1, 2]));
    }
}
