use crate::algo::astar::{RouteRequest, Router};
use crate::algo::{mst, validate};
use crate::error::{RouteError, RouterError};
use crate::grid::{RoutingGrid, Waypoint, disk_offsets};
use crate::result::{FailureCause, Progress, RoutingFailure, RoutingResult, RoutingStats};
use crate::rules::NetParams;
use pcb_common::db::core::{Board, MAX_LAYERS, Route};
use pcb_common::db::indices::{NetId, PadId};
use pcb_common::geom::point::Point;
use pcb_common::geom::rect::Rect;
use pcb_common::util::config::Config;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::time::Instant;

/// Integer cells on the line between two cells.
pub fn bresenham(a: (u32, u32), b: (u32, u32)) -> Vec<(u32, u32)> {
    let (mut x, mut y) = (a.0 as i64, a.1 as i64);
    let (x1, y1) = (b.0 as i64, b.1 as i64);
    let dx = (x1 - x).abs();
    let dy = -(y1 - y).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let mut out = Vec::with_capacity((dx - dy) as usize + 1);
    loop {
        out.push((x as u32, y as u32));
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
    out
}

/// What lies on the straight line between two pads of a net.
#[derive(Debug, Default)]
pub struct Blockers {
    /// Indices of routed nets.
    pub nets: BTreeSet<usize>,
    pub components: BTreeSet<String>,
}

/// Routes and failure records of a set of nets.
pub(crate) struct Snapshot(Vec<(usize, Option<Route>, Option<RoutingFailure>)>);

/// Grid, router and per-net state of one routing run. Nets are addressed by
/// their index in `board.nets`.
pub struct RoutingSession<'a> {
    pub board: &'a Board,
    pub config: &'a Config,
    pub grid: RoutingGrid,
    params: Vec<NetParams>,
    pads: Vec<Vec<PadId>>,
    net_index: HashMap<NetId, usize>,
    router: Router,
    routes: Vec<Option<Route>>,
    failures: Vec<Option<RoutingFailure>>,
    ripups: Vec<usize>,
    pub iterations: usize,
    pub overflow_history: Vec<usize>,
    started: Instant,
}

impl<'a> RoutingSession<'a> {
    pub fn new(board: &'a Board, config: &'a Config) -> Result<Self, RouterError> {
        config.validate()?;
        if board.pads.is_empty() || board.nets.is_empty() {
            return Err(RouterError::EmptyBoard);
        }
        if board.layer_count > MAX_LAYERS {
            return Err(RouterError::TooManyLayers {
                layers: board.layer_count,
                max: MAX_LAYERS,
            });
        }
        if let Some(pad) = board.misplaced_pad() {
            return Err(RouterError::PadLayerOutOfRange {
                reference: pad.reference.clone(),
                pin: pad.pin.clone(),
                layer: pad.layer,
                layer_count: board.layer_count,
            });
        }
        let mut grid = RoutingGrid::build(board, &config.rules)?;
        let params = NetParams::for_board(board, config);
        for p in &params {
            grid.set_net_clearance(p.net, p.clearance);
        }
        let pads: Vec<Vec<PadId>> = board.nets.iter().map(|n| board.net_pads(n.id)).collect();
        let net_index = board
            .nets
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id, i))
            .collect();
        let n = board.nets.len();
        Ok(Self {
            board,
            config,
            grid,
            params,
            pads,
            net_index,
            router: Router::new(),
            routes: vec![None; n],
            failures: vec![None; n],
            ripups: vec![0; n],
            iterations: 0,
            overflow_history: Vec::new(),
            started: Instant::now(),
        })
    }

    pub fn net_count(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self, ni: usize) -> &NetParams {
        &self.params[ni]
    }

    pub fn index_of(&self, net: NetId) -> Option<usize> {
        self.net_index.get(&net).copied()
    }

    pub fn route_of(&self, ni: usize) -> Option<&Route> {
        self.routes[ni].as_ref()
    }

    pub fn failure_of(&self, ni: usize) -> Option<&RoutingFailure> {
        self.failures[ni].as_ref()
    }

    pub fn is_routed(&self, ni: usize) -> bool {
        self.routes[ni].is_some()
    }

    fn half_perimeter(&self, ni: usize) -> f64 {
        let mut it = self.pads[ni].iter().map(|&p| self.board.pad(p).position);
        let Some(first) = it.next() else {
            return 0.0;
        };
        let bbox = it.fold(Rect::spanning(first, first), |r, p| {
            r.union(&Rect::spanning(p, p))
        });
        bbox.width() + bbox.height()
    }

    /// Nets with at least two pads, by class priority, then pad count, then
    /// bounding-box half perimeter.
    pub fn net_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.net_count())
            .filter(|&i| self.pads[i].len() >= 2)
            .collect();
        order.sort_by(|&a, &b| {
            (self.params[a].priority, self.pads[a].len())
                .cmp(&(self.params[b].priority, self.pads[b].len()))
                .then_with(|| self.half_perimeter(a).total_cmp(&self.half_perimeter(b)))
                .then_with(|| a.cmp(&b))
        });
        order
    }

    pub fn pads_of(&self, ni: usize) -> &[PadId] {
        &self.pads[ni]
    }

    pub fn pad_waypoints(&self, ni: usize) -> Vec<Waypoint> {
        self.pads[ni]
            .iter()
            .map(|&p| {
                let pad = self.board.pad(p);
                Waypoint::new(pad.position, pad.layer)
            })
            .collect()
    }

    fn pad_points(&self, ni: usize) -> Vec<Point<f64>> {
        self.pads[ni]
            .iter()
            .map(|&p| self.board.pad(p).position)
            .collect()
    }

    /// Routes every connection of the net's tree. Nothing is committed; if any
    /// connection fails the whole net fails.
    pub fn route_net(
        &mut self,
        ni: usize,
        present: Option<f64>,
    ) -> Result<Route, (FailureCause, String)> {
        let points = self.pad_points(ni);
        let edges = mst::decompose(&points, self.config.session.topology);
        let mut route = Route::new(self.params[ni].net);
        for (a, b) in edges {
            let req = RouteRequest {
                start: self.pads[ni][a],
                goal: self.pads[ni][b],
                present,
            };
            let solved = self.router.route_auto(
                &self.grid,
                self.board,
                &self.config.rules,
                &self.params[ni],
                &req,
            );
            match solved {
                Ok(sol) => route.append(sol.route),
                Err(e) => return Err(self.classify(ni, req.start, req.goal, e)),
            }
        }
        Ok(route)
    }

    fn pad_label(&self, pad: PadId) -> String {
        self.board.pad(pad).key().to_string()
    }

    fn under_keepout(&self, pad: PadId) -> bool {
        let p = self.board.pad(pad);
        let (x0, x1, y0, y1) = self.grid.static_span(&p.metal_area());
        p.layers(self.board.layer_count).iter().any(|z| {
            (y0..=y1).any(|y| (x0..=x1).any(|x| self.grid.cell(x, y, z).keepout))
        })
    }

    fn classify(&self, ni: usize, a: PadId, b: PadId, err: RouteError) -> (FailureCause, String) {
        let ends = format!("{} -> {}", self.pad_label(a), self.pad_label(b));
        match err {
            RouteError::LayerConflict => (
                FailureCause::LayerConflict,
                format!("{}: no routable layer reaches both pads", ends),
            ),
            RouteError::NoAccess => {
                let covered = [a, b].into_iter().find(|&p| self.under_keepout(p));
                match covered {
                    Some(p) => (
                        FailureCause::Keepout,
                        format!("{}: pad {} lies under a keepout", ends, self.pad_label(p)),
                    ),
                    None => (
                        FailureCause::PinAccess,
                        format!("{}: no legal escape from pad", ends),
                    ),
                }
            }
            RouteError::InvalidGeometry => (
                FailureCause::Clearance,
                format!("{}: every path found violates exact clearance", ends),
            ),
            RouteError::NotFound | RouteError::Timeout => {
                let blockers = self.blockers_between(ni, a, b);
                let what = if err == RouteError::Timeout {
                    "search budget exhausted"
                } else {
                    "no path"
                };
                if blockers.nets.is_empty() && blockers.components.is_empty() {
                    (FailureCause::Congestion, format!("{}: {}", ends, what))
                } else {
                    let nets: Vec<String> = blockers
                        .nets
                        .iter()
                        .map(|&n| self.params[n].name.clone())
                        .collect();
                    let components: Vec<String> = blockers.components.into_iter().collect();
                    let message = format!(
                        "{}: {}, blocked by nets [{}] components [{}]",
                        ends,
                        what,
                        nets.join(", "),
                        components.join(", ")
                    );
                    (FailureCause::BlockedPath { components, nets }, message)
                }
            }
        }
    }

    /// Samples the straight line between two pads and collects foreign copper
    /// within one trace halo of it.
    pub fn blockers_between(&self, ni: usize, a: PadId, b: PadId) -> Blockers {
        let params = &self.params[ni];
        let net = params.net;
        let conv = self.grid.converter();
        let ga = conv.to_grid(self.board.pad(a).position, 0);
        let gb = conv.to_grid(self.board.pad(b).position, 0);
        let reach = params.clearance.max(self.grid.max_clearance());
        let radius = conv.cells_for(params.trace_width / 2.0 + reach);
        let disk = disk_offsets(radius);
        let cells = self.grid.cells();

        let mut out = Blockers::default();
        for (x, y) in bresenham((ga.x, ga.y), (gb.x, gb.y)) {
            for z in self.grid.routable_layers().iter() {
                for &(dx, dy, _) in &disk {
                    let px = x as i64 + dx as i64;
                    let py = y as i64 + dy as i64;
                    if !cells.in_bounds(px, py) {
                        continue;
                    }
                    let idx = self.grid.index(px as u32, py as u32, z);
                    if self.grid.foreign_static(idx, net) {
                        if let Some(pad) = cells.get(idx).pad_id() {
                            out.components
                                .insert(self.board.pad(pad).reference.clone());
                        }
                    }
                    for other in self.grid.routed_nets_at(idx) {
                        if other != net {
                            if let Some(oi) = self.index_of(other) {
                                out.nets.insert(oi);
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// Routed nets blocking any tree connection of `ni`.
    pub fn blocking_nets(&self, ni: usize) -> Vec<usize> {
        let points = self.pad_points(ni);
        let mut nets = BTreeSet::new();
        for (a, b) in mst::decompose(&points, self.config.session.topology) {
            let found = self.blockers_between(ni, self.pads[ni][a], self.pads[ni][b]);
            nets.extend(found.nets);
        }
        nets.into_iter().collect()
    }

    pub fn commit(&mut self, ni: usize, route: Route) {
        self.grid.mark_route(&route);
        self.routes[ni] = Some(route);
        self.failures[ni] = None;
    }

    pub fn rip_up(&mut self, ni: usize) -> Option<Route> {
        let route = self.routes[ni].take()?;
        self.grid.unmark_route(&route);
        self.ripups[ni] += 1;
        Some(route)
    }

    pub(crate) fn snapshot(&self, nets: &[usize]) -> Snapshot {
        Snapshot(
            nets.iter()
                .map(|&ni| (ni, self.routes[ni].clone(), self.failures[ni].clone()))
                .collect(),
        )
    }

    /// Puts the saved nets back exactly as they were when the snapshot was taken.
    pub(crate) fn restore(&mut self, snapshot: Snapshot) {
        for (ni, route, failure) in snapshot.0 {
            if let Some(current) = self.routes[ni].take() {
                self.grid.unmark_route(&current);
            }
            if let Some(route) = route {
                self.grid.mark_route(&route);
                self.routes[ni] = Some(route);
            }
            self.failures[ni] = failure;
        }
    }

    pub fn ripup_count(&self, ni: usize) -> usize {
        self.ripups[ni]
    }

    pub fn fail(&mut self, ni: usize, cause: FailureCause, message: String) {
        let p = &self.params[ni];
        log::debug!("Net {} failed: {}", p.name, message);
        self.failures[ni] = Some(RoutingFailure {
            net: p.net,
            net_name: p.name.clone(),
            cause,
            message,
        });
    }

    pub fn clearance_of(&self, net: NetId) -> f64 {
        self.index_of(net)
            .map_or(self.config.rules.clearance, |i| self.params[i].clearance)
    }

    pub fn overflow(&self) -> usize {
        self.grid.total_overflow(&|n| self.clearance_of(n))
    }

    /// Net indices owning copper in over-capacity cells.
    pub fn overflowed_nets(&self) -> Vec<usize> {
        let cells = self.grid.overflow_cells(&|n| self.clearance_of(n));
        let mut nets = BTreeSet::new();
        for idx in cells {
            for net in self.grid.routed_nets_at(idx) {
                if let Some(ni) = self.index_of(net) {
                    nets.insert(ni);
                }
            }
        }
        nets.into_iter().collect()
    }

    /// Routed nets whose copper violates exact clearance against anything on the board.
    pub fn illegal_nets(&self) -> Vec<usize> {
        (0..self.net_count())
            .filter(|&ni| {
                self.routes[ni]
                    .as_ref()
                    .is_some_and(|r| !validate::is_legal(&self.grid, r, &self.params[ni], true))
            })
            .collect()
    }

    /// Rips up the nets blocking `ni`, routes `ni`, then the displaced nets.
    /// Any failure restores the previous routes.
    pub fn targeted_ripup(&mut self, ni: usize) -> bool {
        let cap = self.config.negotiated.max_ripups_per_net;
        let victims: Vec<usize> = self
            .blocking_nets(ni)
            .into_iter()
            .filter(|&v| v != ni && self.routes[v].is_some() && self.ripups[v] < cap)
            .collect();
        if victims.is_empty() {
            return false;
        }

        let mut touched = victims.clone();
        touched.push(ni);
        let saved = self.snapshot(&touched);
        for &v in &victims {
            self.rip_up(v);
        }

        let route = match self.route_net(ni, None) {
            Ok(route) => route,
            Err(_) => {
                self.restore(saved);
                return false;
            }
        };
        self.commit(ni, route);

        for &v in &victims {
            match self.route_net(v, None) {
                Ok(r) => self.commit(v, r),
                Err(_) => {
                    log::debug!(
                        "Rip-up for {} undone: {} could not be rerouted",
                        self.params[ni].name,
                        self.params[v].name
                    );
                    self.restore(saved);
                    return false;
                }
            }
        }
        log::debug!(
            "Net {} routed after ripping up {} net(s)",
            self.params[ni].name,
            victims.len()
        );
        true
    }

    /// Routes one net strictly and commits it, trying targeted rip-up on failure.
    pub fn route_and_commit(&mut self, ni: usize) -> bool {
        match self.route_net(ni, None) {
            Ok(route) => {
                self.commit(ni, route);
                true
            }
            Err((cause, message)) => {
                if self.config.session.targeted_ripup && self.targeted_ripup(ni) {
                    return true;
                }
                self.fail(ni, cause, message);
                false
            }
        }
    }

    /// Sequential pass over `order`.
    pub fn run_standard(&mut self, order: &[usize], progress: &mut Progress) {
        let total = order.len().max(1);
        let mut done = 0usize;
        for (k, &ni) in order.iter().enumerate() {
            if self.routes[ni].is_some() {
                continue;
            }
            let name = &self.params[ni].name;
            if !progress.report(k as f64 / total as f64, &format!("Routing {}", name)) {
                break;
            }
            if self.route_and_commit(ni) {
                done += 1;
            }
            if (k + 1) % 10 == 0 || k + 1 == order.len() {
                eprint!(
                    "\r\x1b[36m[Route] {}/{} ({} ok)\x1b[0m\x1b[K",
                    k + 1,
                    order.len(),
                    done
                );
                let _ = std::io::stderr().flush();
            }
        }
        eprint!("\r\x1b[K");
    }

    fn length_failures(&self) -> Vec<RoutingFailure> {
        let mut out = Vec::new();
        let mut groups: HashMap<&str, Vec<(usize, f64)>> = HashMap::new();
        let lengths: Vec<Option<f64>> = self
            .routes
            .iter()
            .map(|r| r.as_ref().map(Route::length))
            .collect();

        for (ni, p) in self.params.iter().enumerate() {
            let (Some(lc), Some(len)) = (&p.length, lengths[ni]) else {
                continue;
            };
            let short = lc.min_length.is_some_and(|m| len < m - lc.tolerance);
            let long = lc.max_length.is_some_and(|m| len > m + lc.tolerance);
            if short || long {
                out.push(RoutingFailure {
                    net: p.net,
                    net_name: p.name.clone(),
                    cause: FailureCause::LengthConstraint {
                        length: len,
                        min: lc.min_length,
                        max: lc.max_length,
                    },
                    message: format!("length {:.3}mm outside limits", len),
                });
            }
            if let Some(group) = &lc.match_group {
                groups.entry(group.as_str()).or_default().push((ni, len));
            }
        }

        for (group, members) in groups {
            let longest = members.iter().map(|m| m.1).fold(0.0, f64::max);
            for &(ni, len) in &members {
                let p = &self.params[ni];
                let tol = p.length.as_ref().map_or(0.0, |l| l.tolerance);
                if longest - len > tol {
                    out.push(RoutingFailure {
                        net: p.net,
                        net_name: p.name.clone(),
                        cause: FailureCause::LengthConstraint {
                            length: len,
                            min: Some(longest - tol),
                            max: None,
                        },
                        message: format!(
                            "match group {}: {:.3}mm vs longest {:.3}mm",
                            group, len, longest
                        ),
                    });
                }
            }
        }

        let by_name: HashMap<&str, usize> = self
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), i))
            .collect();
        for (ni, p) in self.params.iter().enumerate() {
            let Some(base) = p.name.strip_suffix("_P") else {
                continue;
            };
            let Some(&mate) = by_name.get(format!("{}_N", base).as_str()) else {
                continue;
            };
            let (Some(lc), Some(lp), Some(ln)) = (&p.length, lengths[ni], lengths[mate]) else {
                continue;
            };
            let mismatch = (lp - ln).abs();
            if mismatch > lc.tolerance {
                for (a, b) in [(ni, mate), (mate, ni)] {
                    out.push(RoutingFailure {
                        net: self.params[a].net,
                        net_name: self.params[a].name.clone(),
                        cause: FailureCause::DifferentialPair {
                            partner: self.params[b].name.clone(),
                            mismatch,
                        },
                        message: format!("pair length mismatch {:.3}mm", mismatch),
                    });
                }
            }
        }
        out
    }

    /// Nets with pads to join that were never reached before routing stopped.
    fn unattempted(&self, progress: &Progress) -> Vec<RoutingFailure> {
        let (cause, reason) = if progress.timed_out() {
            (FailureCause::Timeout, "deadline reached")
        } else if progress.cancelled() {
            (FailureCause::Cancelled, "cancelled")
        } else {
            return Vec::new();
        };
        (0..self.net_count())
            .filter(|&ni| {
                self.pads[ni].len() >= 2 && self.routes[ni].is_none() && self.failures[ni].is_none()
            })
            .map(|ni| RoutingFailure {
                net: self.params[ni].net,
                net_name: self.params[ni].name.clone(),
                cause: cause.clone(),
                message: format!("{} before the net was routed", reason),
            })
            .collect()
    }

    pub fn finish(self, progress: &Progress) -> RoutingResult {
        let overflow = self.overflow();
        let mut failures: Vec<RoutingFailure> = self.failures.iter().flatten().cloned().collect();
        failures.extend(self.unattempted(progress));
        failures.extend(self.length_failures());
        let routes: Vec<Route> = self.routes.into_iter().flatten().collect();

        let stats = RoutingStats {
            routed: routes.len(),
            failed: failures.iter().filter(|f| !f.cause.keeps_route()).count(),
            vias: routes.iter().map(Route::via_count).sum(),
            total_length: routes.iter().map(Route::length).sum(),
            iterations: self.iterations,
            overflow,
            overflow_history: self.overflow_history,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            cancelled: progress.cancelled(),
            timed_out: progress.timed_out(),
        };
        log::info!(
            "Routed {}/{} nets, {} vias, {:.1}mm, overflow {}, {:.2}s",
            stats.routed,
            stats.routed + stats.failed,
            stats.vias,
            stats.total_length,
            stats.overflow,
            stats.elapsed_secs
        );
        RoutingResult {
            routes,
            failures,
            stats,
        }
    }
}

/// Standard strategy: one sequential pass in net order with targeted rip-up.
pub fn run(
    board: &Board,
    config: &Config,
    progress: &mut Progress,
) -> Result<RoutingResult, RouterError> {
    log::info!("Starting Detailed Routing...");
    let mut session = RoutingSession::new(board, config)?;
    let order = session.net_order();
    session.run_standard(&order, progress);
    Ok(session.finish(progress))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bresenham_hits_both_ends() {
        let line = bresenham((0, 0), (5, 2));
        assert_eq!(line.first(), Some(&(0, 0)));
        assert_eq!(line.last(), Some(&(5, 2)));
        assert_eq!(line.len(), 6);
        let back = bresenham((5, 2), (0, 0));
        assert_eq!(back.len(), 6);
        assert_eq!(bresenham((3, 3), (3, 3)), vec![(3, 3)]);
    }
}
