//! Turns a cell path into trace segments and vias.

use super::space::Terminal;
use crate::grid::RoutingGrid;
use crate::rules::NetParams;
use pcb_common::db::core::{Route, Segment, Via};
use pcb_common::geom::point::Point;
use pcb_common::util::config::DesignRules;

const COLLINEAR_EPS: f64 = 1e-9;

struct Run {
    layer: u8,
    points: Vec<Point<f64>>,
}

/// Drops repeated points and interior points of straight stretches.
pub fn simplify(points: &[Point<f64>]) -> Vec<Point<f64>> {
    let mut out: Vec<Point<f64>> = Vec::with_capacity(points.len());
    for &p in points {
        if out.last().is_some_and(|q| q.approx_eq(p, 1e-9)) {
            continue;
        }
        if out.len() >= 2 {
            let a = out[out.len() - 2];
            let b = out[out.len() - 1];
            let ab = b - a;
            let bp = p - b;
            if ab.cross(bp).abs() < COLLINEAR_EPS && ab.dot(bp) > 0.0 {
                out.pop();
            }
        }
        out.push(p);
    }
    out
}

/// Builds the copper of a path from `start` to `goal`.
///
/// Each layer run becomes a polyline; the first run starts at the start pad
/// centre and the last ends at the goal pad centre. Layer changes at the same
/// cell become one via spanning every layer crossed.
pub fn build_route(
    cells: &[(u32, u32, u8)],
    start: &Terminal,
    goal: &Terminal,
    grid: &RoutingGrid,
    params: &NetParams,
    rules: &DesignRules,
) -> Route {
    let conv = grid.converter();
    let mut route = Route::new(params.net);
    let Some(&(_, _, first_layer)) = cells.first() else {
        return route;
    };

    let mut runs: Vec<Run> = vec![Run {
        layer: first_layer,
        points: vec![start.center],
    }];
    for (i, &(x, y, z)) in cells.iter().enumerate() {
        let p = conv.xy_to_world(x, y);
        let Some(run) = runs.last_mut() else {
            break;
        };
        if z == run.layer {
            run.points.push(p);
            continue;
        }
        let lo = z.min(run.layer);
        let hi = z.max(run.layer);
        // A run holding only the via cell means we passed straight through its layer.
        let stacked = i > 1 && run.points.len() == 1 && runs.len() > 1;
        match route.vias.last_mut() {
            Some(via) if stacked && via.position.approx_eq(p, 1e-9) => {
                via.layers = (via.layers.0.min(lo), via.layers.1.max(hi));
                runs.pop();
            }
            _ => route.vias.push(Via {
                position: p,
                drill: params.via_drill,
                diameter: params.via_diameter,
                layers: (lo, hi),
                net: params.net,
            }),
        }
        runs.push(Run {
            layer: z,
            points: vec![p],
        });
    }
    if let Some(run) = runs.last_mut() {
        run.points.push(goal.center);
    }

    let start_taper = rules.neck_down && grid.is_fine_pitch(start.pad);
    let goal_taper = rules.neck_down && grid.is_fine_pitch(goal.pad);
    let last = runs.len() - 1;
    for (i, run) in runs.iter().enumerate() {
        let points = simplify(&run.points);
        let taper = Taper {
            trace: params.trace_width,
            neck: rules.neck_down_width.min(params.trace_width),
            length: rules.neck_down_length,
            at_start: start_taper && i == 0,
            at_end: goal_taper && i == last,
        };
        for (a, b, width) in taper.pieces(&points) {
            route.segments.push(Segment {
                start: a,
                end: b,
                width,
                layer: run.layer,
                net: params.net,
            });
        }
    }
    route
}

/// Two-step width reduction near fine-pitch pads.
struct Taper {
    trace: f64,
    neck: f64,
    length: f64,
    at_start: bool,
    at_end: bool,
}

impl Taper {
    fn width_at(&self, from_pad: f64) -> f64 {
        if from_pad < self.length / 2.0 {
            self.neck
        } else if from_pad < self.length {
            (self.neck + self.trace) / 2.0
        } else {
            self.trace
        }
    }

    fn pieces(&self, points: &[Point<f64>]) -> Vec<(Point<f64>, Point<f64>, f64)> {
        let active = (self.at_start || self.at_end) && self.neck < self.trace;
        if !active {
            return points
                .windows(2)
                .map(|w| (w[0], w[1], self.trace))
                .collect();
        }

        let total: f64 = points.windows(2).map(|w| w[0].dist(w[1])).sum();
        let mut cuts = Vec::new();
        if self.at_start {
            cuts.extend([self.length / 2.0, self.length]);
        }
        if self.at_end {
            cuts.extend([total - self.length, total - self.length / 2.0]);
        }
        cuts.retain(|&c| c > 0.0 && c < total);
        cuts.sort_by(f64::total_cmp);

        let mut out = Vec::new();
        let mut walked = 0.0;
        for w in points.windows(2) {
            let (a, b) = (w[0], w[1]);
            let len = a.dist(b);
            if len == 0.0 {
                continue;
            }
            let mut marks = vec![0.0];
            marks.extend(
                cuts.iter()
                    .filter(|&&c| c > walked && c < walked + len)
                    .map(|&c| (c - walked) / len),
            );
            marks.push(1.0);
            for m in marks.windows(2) {
                let (p, q) = (a.lerp(b, m[0]), a.lerp(b, m[1]));
                let mid = walked + len * (m[0] + m[1]) / 2.0;
                let mut width = self.trace;
                if self.at_start {
                    width = width.min(self.width_at(mid));
                }
                if self.at_end {
                    width = width.min(self.width_at(total - mid));
                }
                out.push((p, q, width));
            }
            walked += len;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simplify_merges_straight_runs_only() {
        let pts = [
            Point::new(0.0, 0.0),
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(3.0, 1.0),
            Point::new(4.0, 2.0),
        ];
        let out = simplify(&pts);
        assert_eq!(
            out,
            vec![
                Point::new(0.0, 0.0),
                Point::new(2.0, 0.0),
                Point::new(4.0, 2.0)
            ]
        );
    }

    #[test]
    fn taper_narrows_both_ends() {
        let taper = Taper {
            trace: 0.2,
            neck: 0.1,
            length: 0.5,
            at_start: true,
            at_end: true,
        };
        let pieces = taper.pieces(&[Point::new(0.0, 0.0), Point::new(3.0, 0.0)]);
        let expected = [0.1, 0.15, 0.2, 0.15, 0.1];
        assert_eq!(pieces.len(), expected.len());
        for (piece, w) in pieces.iter().zip(expected) {
            assert!((piece.2 - w).abs() < 1e-12);
        }
        assert!(pieces[0].0.approx_eq(Point::new(0.0, 0.0), 1e-12));
        assert!(pieces[4].1.approx_eq(Point::new(3.0, 0.0), 1e-12));
        let total: f64 = pieces.iter().map(|p| p.0.dist(p.1)).sum();
        assert!((total - 3.0).abs() < 1e-9);
    }
}
