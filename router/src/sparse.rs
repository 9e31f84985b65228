//! Sparse visibility graph: waypoints only at pad centres, around obstacle
//! clearance contours and on a coarse interior lattice, joined where a trace
//! fits between them.

use crate::algo::{COST_SCALE, mst};
use crate::detailed_router::RoutingSession;
use crate::grid::{Corridor, RoutingGrid, Waypoint};
use crate::result::Progress;
use pcb_common::db::core::{Board, LayerSet};
use pcb_common::db::indices::{NetId, PadId};
use pcb_common::geom::point::Point;
use pcb_common::geom::rect::Rect;
use pcb_common::geom::shape::Shape;
use pcb_common::util::config::{DesignRules, SparseConfig, Topology};
use priority_queue::PriorityQueue;
use rstar::RTree;
use rstar::primitives::GeomWithData;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::time::Instant;

/// Nearest candidates inspected per node when building visibility edges.
const CANDIDATES: usize = 32;
const MAX_DEGREE: usize = 12;
const CONTOUR_EPS: f64 = 1e-3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeKind {
    Pad(PadId),
    Contour,
    Interior,
}

#[derive(Clone, Debug)]
pub struct SparseNode {
    pub pos: Point<f64>,
    pub layer: u8,
    pub kind: NodeKind,
}

#[derive(Clone, Copy, Debug)]
pub struct SparseEdge {
    pub to: usize,
    pub cost: i64,
    /// Edges touching a pad are only usable by that pad's net.
    pub net: NetId,
}

type NodeRef = GeomWithData<[f64; 2], usize>;

pub struct SparseRoutingGraph {
    nodes: Vec<SparseNode>,
    adjacency: Vec<Vec<SparseEdge>>,
    pad_nodes: HashMap<PadId, Vec<usize>>,
    reserved: Vec<NetId>,
}

/// Point where the ray from the rectangle centre at `angle` leaves the rectangle grown by `margin`.
fn contour_point(rect: &Rect, margin: f64, angle: f64) -> Point<f64> {
    let c = rect.center();
    let hx = rect.width() / 2.0 + margin;
    let hy = rect.height() / 2.0 + margin;
    let (dy, dx) = angle.sin_cos();
    let tx = if dx.abs() > 1e-12 { hx / dx.abs() } else { f64::INFINITY };
    let ty = if dy.abs() > 1e-12 { hy / dy.abs() } else { f64::INFINITY };
    let t = tx.min(ty);
    Point::new(c.x + dx * t, c.y + dy * t)
}

struct Builder<'a> {
    grid: &'a RoutingGrid,
    rules: &'a DesignRules,
    bounds: Rect,
    nodes: Vec<SparseNode>,
    pad_nodes: HashMap<PadId, Vec<usize>>,
    clearance: f64,
}

impl Builder<'_> {
    fn fits(&self, shape: &Shape, layers: LayerSet, net: NetId) -> bool {
        self.grid
            .copper()
            .first_violation(
                shape,
                layers,
                net,
                self.clearance,
                self.grid.max_static_clearance(),
                false,
            )
            .is_none()
    }

    fn add_free(&mut self, pos: Point<f64>, layer: u8, kind: NodeKind) {
        if !self.bounds.contains(pos) {
            return;
        }
        let probe = Shape::Circle {
            center: pos,
            radius: self.rules.trace_width / 2.0,
        };
        if self.fits(&probe, LayerSet::single(layer), NetId::NONE) {
            self.nodes.push(SparseNode { pos, layer, kind });
        }
    }

    fn edge_net(&self, a: usize, b: usize, board: &Board) -> NetId {
        for n in [a, b] {
            if let NodeKind::Pad(p) = self.nodes[n].kind {
                return board.pad(p).net;
            }
        }
        NetId::NONE
    }
}

impl SparseRoutingGraph {
    pub fn build(
        board: &Board,
        grid: &RoutingGrid,
        rules: &DesignRules,
        config: &SparseConfig,
    ) -> Self {
        let routable = grid.routable_layers();
        let clearance = rules.clearance;
        let margin = rules.trace_width / 2.0 + clearance.max(grid.max_static_clearance()) + CONTOUR_EPS;
        let mut b = Builder {
            grid,
            rules,
            bounds: board.bounds,
            nodes: Vec::new(),
            pad_nodes: HashMap::new(),
            clearance,
        };

        for (i, pad) in board.pads.iter().enumerate() {
            let id = PadId::new(i);
            for z in pad.layers(board.layer_count).intersection(routable).iter() {
                b.pad_nodes.entry(id).or_default().push(b.nodes.len());
                b.nodes.push(SparseNode {
                    pos: pad.position,
                    layer: z,
                    kind: NodeKind::Pad(id),
                });
            }
        }

        let samples = config.contour_samples.max(3);
        let mut obstacles: Vec<(Rect, LayerSet)> = board
            .pads
            .iter()
            .map(|p| (p.metal_area(), p.layers(board.layer_count)))
            .collect();
        obstacles.extend(
            board
                .keepouts
                .iter()
                .map(|k| (k.area, k.layer_set(board.layer_count))),
        );
        for (rect, layers) in &obstacles {
            for z in layers.intersection(routable).iter() {
                for k in 0..samples {
                    let angle = std::f64::consts::TAU * k as f64 / samples as f64;
                    b.add_free(contour_point(rect, margin, angle), z, NodeKind::Contour);
                }
            }
        }

        let spacing = config.interior_spacing;
        if spacing > 0.0 {
            let nx = (board.bounds.width() / spacing).floor() as usize;
            let ny = (board.bounds.height() / spacing).floor() as usize;
            for j in 0..=ny {
                for i in 0..=nx {
                    let p = Point::new(
                        board.bounds.min.x + i as f64 * spacing,
                        board.bounds.min.y + j as f64 * spacing,
                    );
                    for z in routable.iter() {
                        b.add_free(p, z, NodeKind::Interior);
                    }
                }
            }
        }

        let n = b.nodes.len();
        let mut adjacency: Vec<Vec<SparseEdge>> = vec![Vec::new(); n];
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let max_sq = config.max_edge_length * config.max_edge_length;

        for z in routable.iter() {
            let refs: Vec<NodeRef> = b
                .nodes
                .iter()
                .enumerate()
                .filter(|(_, node)| node.layer == z)
                .map(|(i, node)| GeomWithData::new([node.pos.x, node.pos.y], i))
                .collect();
            let tree = RTree::bulk_load(refs);
            for a in 0..n {
                if b.nodes[a].layer != z {
                    continue;
                }
                let pa = b.nodes[a].pos;
                let mut degree = 0usize;
                for (cand, d2) in tree
                    .nearest_neighbor_iter_with_distance_2(&[pa.x, pa.y])
                    .take(CANDIDATES)
                {
                    if degree >= MAX_DEGREE || d2 > max_sq {
                        break;
                    }
                    let other = cand.data;
                    if other == a {
                        continue;
                    }
                    let key = (a.min(other), a.max(other));
                    if seen.contains(&key) {
                        degree += 1;
                        continue;
                    }
                    let net = b.edge_net(a, other, board);
                    let pb = b.nodes[other].pos;
                    let trace = Shape::Segment {
                        a: pa,
                        b: pb,
                        width: rules.trace_width,
                    };
                    if !b.fits(&trace, LayerSet::single(z), net) {
                        continue;
                    }
                    seen.insert(key);
                    degree += 1;
                    let cost = (pa.dist(pb) * COST_SCALE).round() as i64;
                    adjacency[a].push(SparseEdge { to: other, cost, net });
                    adjacency[other].push(SparseEdge { to: a, cost, net });
                }
            }
        }

        // Vias between nodes stacked at the same position.
        let via_cost = (rules.cost_via * rules.grid_resolution * COST_SCALE).round() as i64;
        let mut stacks: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, node) in b.nodes.iter().enumerate() {
            let key = ((node.pos.x * 1e4).round() as i64, (node.pos.y * 1e4).round() as i64);
            stacks.entry(key).or_default().push(i);
        }
        for stack in stacks.values() {
            for (k, &a) in stack.iter().enumerate() {
                for &c in &stack[k + 1..] {
                    let (na, nc) = (&b.nodes[a], &b.nodes[c]);
                    if na.layer == nc.layer {
                        continue;
                    }
                    let (cost, net) = match (na.kind, nc.kind) {
                        (NodeKind::Pad(p), NodeKind::Pad(q)) if p == q => (0, board.pad(p).net),
                        _ => {
                            let net = b.edge_net(a, c, board);
                            let via = Shape::Circle {
                                center: na.pos,
                                radius: rules.via_diameter / 2.0,
                            };
                            let span = LayerSet::span(na.layer.min(nc.layer), na.layer.max(nc.layer));
                            if !b.fits(&via, span, net) {
                                continue;
                            }
                            (via_cost, net)
                        }
                    };
                    adjacency[a].push(SparseEdge { to: c, cost, net });
                    adjacency[c].push(SparseEdge { to: a, cost, net });
                }
            }
        }

        let graph = Self {
            reserved: vec![NetId::NONE; n],
            nodes: b.nodes,
            adjacency,
            pad_nodes: b.pad_nodes,
        };
        log::info!(
            "Sparse Graph: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        graph
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }

    pub fn node(&self, i: usize) -> &SparseNode {
        &self.nodes[i]
    }

    fn usable(&self, node: usize, net: NetId) -> bool {
        let owner = self.reserved[node];
        owner.is_none() || owner == net
    }

    /// Cheapest node sequence from any layer of pad `from` to any layer of pad `to`.
    pub fn find_path(&self, from: PadId, to: PadId, net: NetId) -> Option<Vec<usize>> {
        let sources = self.pad_nodes.get(&from)?;
        let targets = self.pad_nodes.get(&to)?;
        let goal = self.nodes[*targets.first()?].pos;
        let estimate = |i: usize| (self.nodes[i].pos.dist(goal) * COST_SCALE).floor() as i64;

        let n = self.nodes.len();
        let mut g = vec![i64::MAX; n];
        let mut parent = vec![usize::MAX; n];
        let mut closed = vec![false; n];
        let mut open: PriorityQueue<usize, Reverse<i64>> = PriorityQueue::new();
        for &s in sources {
            g[s] = 0;
            open.push(s, Reverse(estimate(s)));
        }

        while let Some((cur, _)) = open.pop() {
            if targets.contains(&cur) {
                let mut path = vec![cur];
                let mut at = cur;
                while parent[at] != usize::MAX {
                    at = parent[at];
                    path.push(at);
                }
                path.reverse();
                return Some(path);
            }
            closed[cur] = true;
            for edge in &self.adjacency[cur] {
                if closed[edge.to] || !(edge.net.is_none() || edge.net == net) {
                    continue;
                }
                if !self.usable(edge.to, net) {
                    continue;
                }
                let tentative = g[cur] + edge.cost;
                if tentative < g[edge.to] {
                    g[edge.to] = tentative;
                    parent[edge.to] = cur;
                    open.push_increase(edge.to, Reverse(tentative + estimate(edge.to)));
                }
            }
        }
        None
    }

    /// Claims the free waypoints of a path for `net`; other nets can no longer pass them.
    pub fn reserve(&mut self, path: &[usize], net: NetId) {
        for &i in path {
            if self.nodes[i].kind != NodeKind::Interior && self.reserved[i].is_none() {
                self.reserved[i] = net;
            }
        }
    }

    pub fn clear_reservations(&mut self) {
        self.reserved.fill(NetId::NONE);
    }

    pub fn corridor(&self, path: &[usize], half_width: f64) -> Corridor {
        Corridor {
            waypoints: path
                .iter()
                .map(|&i| Waypoint::new(self.nodes[i].pos, self.nodes[i].layer))
                .collect(),
            half_width,
        }
    }
}

/// Global phase on the sparse graph.
pub struct SparseRouter {
    graph: SparseRoutingGraph,
    half_width: f64,
}

impl SparseRouter {
    pub fn new(graph: SparseRoutingGraph, half_width: f64) -> Self {
        Self { graph, half_width }
    }

    pub fn graph(&self) -> &SparseRoutingGraph {
        &self.graph
    }

    pub fn plan_net(
        &mut self,
        board: &Board,
        pads: &[PadId],
        net: NetId,
        topology: Topology,
    ) -> Option<Vec<Corridor>> {
        let points: Vec<Point<f64>> = pads.iter().map(|&p| board.pad(p).position).collect();
        let mut corridors = Vec::new();
        for (a, b) in mst::decompose(&points, topology) {
            let path = self.graph.find_path(pads[a], pads[b], net)?;
            self.graph.reserve(&path, net);
            corridors.push(self.graph.corridor(&path, self.half_width));
        }
        Some(corridors)
    }
}

/// Sparse counterpart of the region-graph corridor pass.
pub fn assign_corridors(
    session: &mut RoutingSession,
    order: &[usize],
    progress: &mut Progress,
) -> usize {
    log::info!("Starting Sparse Global Routing...");
    let start_time = Instant::now();
    let config = session.config;
    let graph = SparseRoutingGraph::build(session.board, &session.grid, &config.rules, &config.sparse);
    let mut router = SparseRouter::new(graph, config.sparse.corridor_half_width);

    let mut planned = 0usize;
    let total = order.len().max(1);
    for (k, &ni) in order.iter().enumerate() {
        let message = format!("Planning {}", session.params(ni).name);
        if !progress.report(k as f64 / total as f64, &message) {
            break;
        }
        let net = session.params(ni).net;
        let pads = session.pads_of(ni).to_vec();
        match router.plan_net(session.board, &pads, net, config.session.topology) {
            Some(corridors) => {
                session.grid.set_corridors(net, &corridors);
                planned += 1;
            }
            None => log::debug!("Sparse: no visibility path for {}", session.params(ni).name),
        }
        if (k + 1) % 50 == 0 || k + 1 == order.len() {
            eprint!(
                "\r\x1b[36m[Sparse] {}/{} Time: {:.1}s\x1b[0m\x1b[K",
                k + 1,
                order.len(),
                start_time.elapsed().as_secs_f32()
            );
            let _ = std::io::stderr().flush();
        }
    }
    eprint!("\r\x1b[K");
    log::info!(
        "Sparse Global Routing: {}/{} nets planned, Time: {}ms",
        planned,
        order.len(),
        start_time.elapsed().as_millis()
    );
    planned
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcb_common::db::core::{Keepout, Pad, PadKey};

    fn smd(reference: &str, x: f64, y: f64) -> Pad {
        Pad {
            reference: reference.to_string(),
            pin: "1".to_string(),
            position: Point::new(x, y),
            layer: 0,
            width: 1.0,
            height: 1.0,
            through_hole: false,
            drill: 0.0,
            net: NetId::NONE,
        }
    }

    fn graph_for(board: &Board) -> (RoutingGrid, SparseRoutingGraph) {
        let rules = DesignRules::default();
        let grid = RoutingGrid::build(board, &rules).unwrap();
        let graph = SparseRoutingGraph::build(board, &grid, &rules, &SparseConfig::default());
        (grid, graph)
    }

    #[test]
    fn contour_point_lies_on_grown_rectangle() {
        let r = Rect::from_center(Point::new(0.0, 0.0), 2.0, 1.0);
        let p = contour_point(&r, 0.5, 0.0);
        assert!(p.approx_eq(Point::new(1.5, 0.0), 1e-9));
        let q = contour_point(&r, 0.5, std::f64::consts::FRAC_PI_2);
        assert!(q.approx_eq(Point::new(0.0, 1.0), 1e-9));
    }

    #[test]
    fn far_fewer_nodes_than_grid_cells() {
        let mut board = Board::new(Rect::new(Point::new(0.0, 0.0), Point::new(60.0, 60.0)), 2);
        for i in 0..6 {
            let x = 5.0 + 10.0 * i as f64;
            board.add_pad(smd(&format!("U{}", i), x, 10.0));
            board.add_pad(smd(&format!("V{}", i), x, 50.0));
            board.add_net(
                format!("N{}", i),
                vec![PadKey::new(format!("U{}", i), "1"), PadKey::new(format!("V{}", i), "1")],
            );
        }
        let (grid, graph) = graph_for(&board);
        let cells = grid.width() as usize * grid.height() as usize * grid.layers() as usize;
        assert!(graph.node_count() > 12);
        assert!(graph.node_count() * 10 <= cells, "{} nodes vs {} cells", graph.node_count(), cells);
        assert!(graph.edge_count() > graph.node_count() / 2);
    }

    #[test]
    fn path_goes_around_keepout_and_reservation_blocks_others() {
        let mut board = Board::new(Rect::new(Point::new(0.0, 0.0), Point::new(30.0, 20.0)), 1);
        let a = board.add_pad(smd("J1", 5.0, 10.0));
        let b = board.add_pad(smd("J2", 25.0, 10.0));
        let net = board.add_net("SIG", vec![PadKey::new("J1", "1"), PadKey::new("J2", "1")]);
        board.keepouts.push(Keepout {
            area: Rect::new(Point::new(14.0, 6.0), Point::new(16.0, 14.0)),
            layers: Vec::new(),
        });
        let (_grid, mut graph) = graph_for(&board);

        let path = graph.find_path(a, b, net).unwrap();
        let length: f64 = path
            .windows(2)
            .map(|w| graph.node(w[0]).pos.dist(graph.node(w[1]).pos))
            .sum();
        assert!(length > 20.0);
        assert!(
            path.iter()
                .any(|&i| (graph.node(i).pos.y - 10.0).abs() > 4.0),
            "path must leave the pad row to clear the keepout"
        );

        graph.reserve(&path, net);
        let other = NetId(99);
        let blocked = path[1..path.len() - 1]
            .iter()
            .filter(|&&i| graph.node(i).kind == NodeKind::Contour)
            .all(|&i| !graph.usable(i, other));
        assert!(blocked);
        graph.clear_reservations();
        assert!(path.iter().all(|&i| graph.usable(i, other)));
    }
}
