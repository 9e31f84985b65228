//! Copper primitives and exact edge-to-edge distances between them.

use super::point::Point;
use super::rect::Rect;
use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// Trace with round ends.
    Segment {
        a: Point<f64>,
        b: Point<f64>,
        width: f64,
    },
    Circle {
        center: Point<f64>,
        radius: f64,
    },
    Rect(Rect),
}

impl Shape {
    pub fn bbox(&self) -> Rect {
        match *self {
            Shape::Segment { a, b, width } => Rect::spanning(a, b).expand(width / 2.0),
            Shape::Circle { center, radius } => Rect::from_center(center, radius * 2.0, radius * 2.0),
            Shape::Rect(r) => r,
        }
    }

    /// Edge-to-edge gap between two copper shapes. Zero or negative when they touch.
    pub fn gap(&self, other: &Shape) -> f64 {
        match (*self, *other) {
            (Shape::Segment { a, b, width: w1 }, Shape::Segment { a: c, b: d, width: w2 }) => {
                segment_segment_distance(a, b, c, d) - w1 / 2.0 - w2 / 2.0
            }
            (Shape::Segment { a, b, width }, Shape::Circle { center, radius })
            | (Shape::Circle { center, radius }, Shape::Segment { a, b, width }) => {
                point_segment_distance(center, a, b) - width / 2.0 - radius
            }
            (Shape::Segment { a, b, width }, Shape::Rect(r))
            | (Shape::Rect(r), Shape::Segment { a, b, width }) => {
                segment_rect_distance(a, b, &r) - width / 2.0
            }
            (Shape::Circle { center: c1, radius: r1 }, Shape::Circle { center: c2, radius: r2 }) => {
                c1.dist(c2) - r1 - r2
            }
            (Shape::Circle { center, radius }, Shape::Rect(r))
            | (Shape::Rect(r), Shape::Circle { center, radius }) => {
                point_rect_distance(center, &r) - radius
            }
            (Shape::Rect(r1), Shape::Rect(r2)) => rect_rect_distance(&r1, &r2),
        }
    }
}

pub fn point_segment_distance(p: Point<f64>, a: Point<f64>, b: Point<f64>) -> f64 {
    let ab = b - a;
    let len_sq = ab.dot(ab);
    if len_sq < EPS {
        return p.dist(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.dist(a.lerp(b, t))
}

fn orientation(a: Point<f64>, b: Point<f64>, c: Point<f64>) -> f64 {
    (b - a).cross(c - a)
}

fn on_segment(a: Point<f64>, b: Point<f64>, p: Point<f64>) -> bool {
    p.x >= a.x.min(b.x) - EPS
        && p.x <= a.x.max(b.x) + EPS
        && p.y >= a.y.min(b.y) - EPS
        && p.y <= a.y.max(b.y) + EPS
}

pub fn segments_intersect(a: Point<f64>, b: Point<f64>, c: Point<f64>, d: Point<f64>) -> bool {
    let o1 = orientation(a, b, c);
    let o2 = orientation(a, b, d);
    let o3 = orientation(c, d, a);
    let o4 = orientation(c, d, b);

    if ((o1 > EPS && o2 < -EPS) || (o1 < -EPS && o2 > EPS))
        && ((o3 > EPS && o4 < -EPS) || (o3 < -EPS && o4 > EPS))
    {
        return true;
    }

    (o1.abs() <= EPS && on_segment(a, b, c))
        || (o2.abs() <= EPS && on_segment(a, b, d))
        || (o3.abs() <= EPS && on_segment(c, d, a))
        || (o4.abs() <= EPS && on_segment(c, d, b))
}

pub fn segment_segment_distance(
    a: Point<f64>,
    b: Point<f64>,
    c: Point<f64>,
    d: Point<f64>,
) -> f64 {
    if segments_intersect(a, b, c, d) {
        return 0.0;
    }
    point_segment_distance(a, c, d)
        .min(point_segment_distance(b, c, d))
        .min(point_segment_distance(c, a, b))
        .min(point_segment_distance(d, a, b))
}

pub fn point_rect_distance(p: Point<f64>, r: &Rect) -> f64 {
    let dx = (r.min.x - p.x).max(0.0).max(p.x - r.max.x);
    let dy = (r.min.y - p.y).max(0.0).max(p.y - r.max.y);
    (dx * dx + dy * dy).sqrt()
}

pub fn segment_rect_distance(a: Point<f64>, b: Point<f64>, r: &Rect) -> f64 {
    if r.contains(a) || r.contains(b) {
        return 0.0;
    }
    let corners = r.corners();
    let mut best = f64::MAX;
    for i in 0..4 {
        let c = corners[i];
        let d = corners[(i + 1) % 4];
        best = best.min(segment_segment_distance(a, b, c, d));
        if best <= 0.0 {
            return 0.0;
        }
    }
    best
}

pub fn rect_rect_distance(r1: &Rect, r2: &Rect) -> f64 {
    let dx = (r2.min.x - r1.max.x).max(r1.min.x - r2.max.x).max(0.0);
    let dy = (r2.min.y - r1.max.y).max(r1.min.y - r2.max.y).max(0.0);
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point<f64> {
        Point::new(x, y)
    }

    #[test]
    fn parallel_traces_gap_accounts_for_width() {
        let a = Shape::Segment { a: p(0.0, 0.0), b: p(10.0, 0.0), width: 0.2 };
        let b = Shape::Segment { a: p(0.0, 0.5), b: p(10.0, 0.5), width: 0.2 };
        assert!((a.gap(&b) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn crossing_traces_touch() {
        let a = Shape::Segment { a: p(0.0, -1.0), b: p(0.0, 1.0), width: 0.2 };
        let b = Shape::Segment { a: p(-1.0, 0.0), b: p(1.0, 0.0), width: 0.2 };
        assert!(a.gap(&b) < 0.0);
    }

    #[test]
    fn trace_to_pad_gap() {
        let pad = Shape::Rect(Rect::from_center(p(0.0, 0.0), 1.0, 1.0));
        let trace = Shape::Segment { a: p(-2.0, 1.0), b: p(2.0, 1.0), width: 0.2 };
        assert!((pad.gap(&trace) - 0.4).abs() < 1e-9);

        let through = Shape::Segment { a: p(-2.0, 0.0), b: p(2.0, 0.0), width: 0.2 };
        assert!(pad.gap(&through) <= 0.0);
    }

    #[test]
    fn via_to_pad_corner_gap() {
        let pad = Shape::Rect(Rect::from_center(p(0.0, 0.0), 2.0, 2.0));
        let via = Shape::Circle { center: p(4.0, 5.0), radius: 0.3 };
        assert!((via.gap(&pad) - (5.0 - 0.3)).abs() < 1e-9);
    }

    #[test]
    fn degenerate_segment_behaves_like_point() {
        assert!((point_segment_distance(p(3.0, 4.0), p(0.0, 0.0), p(0.0, 0.0)) - 5.0).abs() < 1e-9);
    }
}
