use crate::db::core::{Board, LayerSet, Route};
use crate::db::indices::NetId;
use crate::geom::point::Point;
use crate::geom::rtree::{CopperIndex, CopperItem, CopperOwner};
use crate::geom::shape::Shape;
use crate::util::config::Config;
use rayon::prelude::*;
use std::collections::HashMap;

/// Touching copper counts as connected up to this slack (mm).
const CONNECT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct CheckRules {
    pub clearance: f64,
    pub via_clearance: f64,
    pub per_net: HashMap<NetId, f64>,
    pad_clearance: Vec<Option<f64>>,
}

impl CheckRules {
    pub fn from_config(board: &Board, config: &Config) -> Self {
        let rules = &config.rules;
        let mut per_net = HashMap::new();
        for net in &board.nets {
            if let Some(c) = config
                .class_for(&net.name, net.class.as_deref())
                .and_then(|class| class.clearance)
            {
                per_net.insert(net.id, c);
            }
        }
        let fine = board.fine_pitch_flags(rules.fine_pitch_threshold);
        let pad_clearance = board
            .pads
            .iter()
            .zip(fine)
            .map(|(pad, fine)| rules.pad_clearance(&pad.reference, fine))
            .collect();
        Self {
            clearance: rules.clearance,
            via_clearance: rules.via_clearance,
            per_net,
            pad_clearance,
        }
    }

    /// Clearance a net's copper demands from every other net.
    pub fn net_clearance(&self, net: NetId) -> f64 {
        self.per_net.get(&net).copied().unwrap_or(self.clearance)
    }
}

#[derive(Debug, Clone)]
pub struct ClearanceViolation {
    pub net: NetId,
    pub other_net: NetId,
    pub location: Point<f64>,
    pub gap: f64,
    pub required: f64,
}

#[derive(Debug, Default, Clone)]
pub struct CheckReport {
    pub violations: Vec<ClearanceViolation>,
    /// Nets with copper whose pads are not all joined.
    pub opens: Vec<NetId>,
    /// Nets with two or more pads and no copper at all.
    pub unrouted: Vec<NetId>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.opens.is_empty()
    }
}

/// Indexes static copper (pads and keepouts) plus every routed primitive.
pub fn build_index(board: &Board, routes: &[Route], rules: &CheckRules) -> CopperIndex {
    let mut index = CopperIndex::new();
    for (i, pad) in board.pads.iter().enumerate() {
        index.insert(CopperItem {
            shape: pad.shape(),
            net: pad.net,
            layers: pad.layers(board.layer_count),
            owner: CopperOwner::Pad(crate::db::indices::PadId::new(i)),
            clearance: rules.pad_clearance.get(i).copied().flatten(),
        });
    }
    for (i, keepout) in board.keepouts.iter().enumerate() {
        index.insert(CopperItem {
            shape: Shape::Rect(keepout.area),
            net: NetId::NONE,
            layers: keepout.layer_set(board.layer_count),
            owner: CopperOwner::Keepout(i),
            clearance: Some(0.0),
        });
    }
    for route in routes {
        for (shape, layers) in route.copper() {
            index.insert(CopperItem {
                shape,
                net: route.net,
                layers,
                owner: CopperOwner::Route,
                clearance: Some(rules.net_clearance(route.net)),
            });
        }
    }
    index
}

pub fn check_clearance(
    board: &Board,
    routes: &[Route],
    rules: &CheckRules,
) -> Vec<ClearanceViolation> {
    let index = build_index(board, routes, rules);
    let max_pad = rules
        .pad_clearance
        .iter()
        .flatten()
        .copied()
        .fold(0.0f64, f64::max);
    let max_net = rules.per_net.values().copied().fold(0.0f64, f64::max);
    let max_clearance = rules
        .clearance
        .max(rules.via_clearance)
        .max(max_pad)
        .max(max_net);

    routes
        .par_iter()
        .flat_map_iter(|route| {
            let net_clearance = rules.net_clearance(route.net);
            let mut found = Vec::new();
            let primitives = route
                .segments
                .iter()
                .map(|s| (s.shape(), LayerSet::single(s.layer), net_clearance, s.end))
                .chain(route.vias.iter().map(|v| {
                    (
                        v.shape(),
                        v.layer_set(),
                        rules.via_clearance.max(net_clearance),
                        v.position,
                    )
                }));
            for (shape, layers, clearance, location) in primitives {
                if let Some(other) = index.first_violation(
                    &shape,
                    layers,
                    route.net,
                    clearance,
                    max_clearance,
                    true,
                ) {
                    let required = match (other.owner, other.clearance) {
                        (CopperOwner::Route, Some(c)) => clearance.max(c),
                        (_, c) => c.unwrap_or(clearance),
                    };
                    found.push(ClearanceViolation {
                        net: route.net,
                        other_net: other.net,
                        location,
                        gap: shape.gap(&other.shape),
                        required,
                    });
                }
            }
            found
        })
        .collect()
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
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
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Splits nets into (open, unrouted). Nets with fewer than two pads are ignored.
pub fn check_connectivity(board: &Board, routes: &[Route]) -> (Vec<NetId>, Vec<NetId>) {
    let mut copper_by_net: HashMap<NetId, Vec<(Shape, LayerSet)>> = HashMap::new();
    for route in routes {
        copper_by_net
            .entry(route.net)
            .or_default()
            .extend(route.copper());
    }

    let verdicts: Vec<(NetId, Option<bool>)> = board
        .nets
        .par_iter()
        .filter_map(|net| {
            let pads = board.net_pads(net.id);
            if pads.len() < 2 {
                return None;
            }
            let Some(copper) = copper_by_net.get(&net.id) else {
                return Some((net.id, None));
            };

            let mut items: Vec<(Shape, LayerSet)> = pads
                .iter()
                .map(|&p| {
                    let pad = board.pad(p);
                    (pad.shape(), pad.layers(board.layer_count))
                })
                .collect();
            items.extend(copper.iter().copied());

            let mut sets = DisjointSet::new(items.len());
            for i in 0..items.len() {
                for j in (i + 1)..items.len() {
                    let (a, la) = &items[i];
                    let (b, lb) = &items[j];
                    if la.intersects(*lb) && a.gap(b) <= CONNECT_TOLERANCE {
                        sets.union(i, j);
                    }
                }
            }
            let root = sets.find(0);
            let joined = (1..pads.len()).all(|i| sets.find(i) == root);
            Some((net.id, Some(joined)))
        })
        .collect();

    let mut opens = Vec::new();
    let mut unrouted = Vec::new();
    for (net, verdict) in verdicts {
        match verdict {
            Some(true) => {}
            Some(false) => opens.push(net),
            None => unrouted.push(net),
        }
    }
    opens.sort();
    unrouted.sort();
    (opens, unrouted)
}

pub fn run(board: &Board, routes: &[Route], rules: &CheckRules) -> CheckReport {
    log::info!("Starting Design Verification (clearance / connectivity)");

    let (violations, (opens, unrouted)) = rayon::join(
        || check_clearance(board, routes, rules),
        || check_connectivity(board, routes),
    );

    if violations.is_empty() {
        log::info!("\x1b[32mPASS\x1b[0m: No clearance violations.");
    } else {
        log::error!(
            "\x1b[31mFAIL\x1b[0m: {} clearance violation(s)",
            violations.len()
        );
        for v in violations.iter().take(10) {
            log::error!(
                "  net {} vs net {} at ({:.3},{:.3}): gap {:.4} < {:.4}",
                v.net,
                v.other_net,
                v.location.x,
                v.location.y,
                v.gap,
                v.required
            );
        }
    }

    if opens.is_empty() {
        log::info!("\x1b[32mPASS\x1b[0m: All routed nets are fully connected.");
    } else {
        log::error!(
            "\x1b[31mFAIL\x1b[0m: {} open net(s): {:?}",
            opens.len(),
            opens
        );
    }
    if !unrouted.is_empty() {
        log::warn!("{} net(s) have no copper", unrouted.len());
    }

    CheckReport {
        violations,
        opens,
        unrouted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::{Pad, PadKey, Segment, Via};
    use crate::geom::rect::Rect;
    use crate::util::config::NetClassRouting;

    fn pad(reference: &str, x: f64, y: f64, layer: u8) -> Pad {
        Pad {
            reference: reference.to_string(),
            pin: "1".to_string(),
            position: Point::new(x, y),
            layer,
            width: 1.0,
            height: 1.0,
            through_hole: false,
            drill: 0.0,
            net: NetId::NONE,
        }
    }

    fn seg(net: NetId, a: (f64, f64), b: (f64, f64), layer: u8) -> Segment {
        Segment {
            start: Point::new(a.0, a.1),
            end: Point::new(b.0, b.1),
            width: 0.2,
            layer,
            net,
        }
    }

    fn board() -> (Board, NetId, NetId) {
        let mut board = Board::new(Rect::new(Point::new(-5.0, -5.0), Point::new(15.0, 5.0)), 2);
        board.add_pad(pad("A", 0.0, 0.0, 0));
        board.add_pad(pad("B", 10.0, 0.0, 1));
        board.add_pad(pad("C", 0.0, 3.0, 0));
        board.add_pad(pad("D", 10.0, 3.0, 0));
        let n1 = board.add_net("N1", vec![PadKey::new("A", "1"), PadKey::new("B", "1")]);
        let n2 = board.add_net("N2", vec![PadKey::new("C", "1"), PadKey::new("D", "1")]);
        (board, n1, n2)
    }

    #[test]
    fn via_joins_layers_and_clean_board_passes() {
        let (board, n1, n2) = board();
        let config = Config::default();
        let rules = CheckRules::from_config(&board, &config);

        let mut r1 = Route::new(n1);
        r1.segments.push(seg(n1, (0.0, 0.0), (5.0, 0.0), 0));
        r1.segments.push(seg(n1, (5.0, 0.0), (10.0, 0.0), 1));
        r1.vias.push(Via {
            position: Point::new(5.0, 0.0),
            drill: 0.3,
            diameter: 0.6,
            layers: (0, 1),
            net: n1,
        });
        let mut r2 = Route::new(n2);
        r2.segments.push(seg(n2, (0.0, 3.0), (10.0, 3.0), 0));

        let report = run(&board, &[r1.clone(), r2], &rules);
        assert!(report.is_clean(), "{:?}", report);
        assert!(report.unrouted.is_empty());

        r1.vias.clear();
        let (opens, _) = check_connectivity(&board, &[r1]);
        assert_eq!(opens, vec![n1]);
    }

    #[test]
    fn close_foreign_trace_is_reported() {
        let (board, n1, n2) = board();
        let rules = CheckRules::from_config(&board, &Config::default());
        let mut r1 = Route::new(n1);
        r1.segments.push(seg(n1, (0.0, 0.0), (10.0, 0.0), 0));
        let mut r2 = Route::new(n2);
        r2.segments.push(seg(n2, (0.0, 3.0), (3.0, 3.0), 0));
        r2.segments.push(seg(n2, (3.0, 3.0), (3.0, 0.3), 0));

        let violations = check_clearance(&board, &[r1, r2], &rules);
        assert!(violations.iter().any(|v| v.net == n2 && v.other_net == n1));
        assert!(violations.iter().any(|v| v.net == n1 && v.other_net == n2));
    }

    #[test]
    fn wide_class_clearance_binds_both_nets() {
        let (board, n1, n2) = board();
        let mut config = Config::default();
        let mut wide = NetClassRouting::new("wide");
        wide.nets.push("N1".to_string());
        wide.clearance = Some(0.5);
        config.net_classes.push(wide);
        let rules = CheckRules::from_config(&board, &config);

        // 0.3mm edge to edge: fine for N2's default 0.2mm, too close for N1's 0.5mm.
        let mut r1 = Route::new(n1);
        r1.segments.push(seg(n1, (0.0, 0.0), (10.0, 0.0), 0));
        let mut r2 = Route::new(n2);
        r2.segments.push(seg(n2, (2.0, 0.5), (8.0, 0.5), 0));

        let violations = check_clearance(&board, &[r1, r2], &rules);
        let from_default = violations
            .iter()
            .find(|v| v.net == n2 && v.other_net == n1)
            .expect("default-class net sees the wide clearance");
        assert!((from_default.required - 0.5).abs() < 1e-9);
        assert!(violations.iter().any(|v| v.net == n1 && v.other_net == n2));
    }

    #[test]
    fn nets_without_copper_are_unrouted_not_open() {
        let (board, n1, n2) = board();
        let (opens, unrouted) = check_connectivity(&board, &[]);
        assert!(opens.is_empty());
        assert_eq!(unrouted, vec![n1, n2]);
    }
}
