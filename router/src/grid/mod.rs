pub mod congestion;
pub mod corridor;
pub mod dense;

pub use congestion::CongestionGrid;
pub use corridor::{Corridor, CorridorMap, Waypoint};
pub use dense::{Cell, DenseGrid};

use crate::error::RouterError;
use crate::utils::conversion::GridConverter;
use pcb_common::db::core::{Board, LayerSet, Route, Segment, Via};
use pcb_common::db::indices::{NetId, PadId};
use pcb_common::geom::rect::Rect;
use pcb_common::geom::rtree::{CopperIndex, CopperItem, CopperOwner};
use pcb_common::geom::shape::{Shape, point_segment_distance};
use pcb_common::util::config::DesignRules;
use std::collections::HashMap;
use std::sync::Arc;

const MAX_CELLS: u64 = 80_000_000;
const RASTER_EPS: f64 = 1e-6;
/// Static copper claims every cell whose centre lies within this many cells of
/// its edge, so off-grid pads keep their clearance after quantization.
const STATIC_SNAP: f64 = 0.999;

/// Disk of cell offsets `(dx, dy, dx² + dy²)` sorted by distance.
pub type Disk = Arc<Vec<(i32, i32, u32)>>;

pub fn disk_offsets(radius: u32) -> Vec<(i32, i32, u32)> {
    let r = radius as i32;
    let r_sq = radius * radius;
    let mut out = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            let d2 = (dx * dx + dy * dy) as u32;
            if d2 < r_sq || (dx == 0 && dy == 0) {
                out.push((dx, dy, d2));
            }
        }
    }
    out.sort_by_key(|&(_, _, d2)| d2);
    out
}

/// Clearance halo of a trace or via for one net: cells closer than the
/// class-specific radius to foreign copper are illegal centre positions.
#[derive(Clone)]
pub struct Halo {
    pub disk: Disk,
    /// Squared radius per static clearance class; class 0 also applies to routed
    /// copper of nets without a registered clearance.
    pub radius_sq: Vec<u32>,
    /// Squared radius per routed clearance class, from the larger of both nets' clearances.
    pub routed_sq: Vec<u32>,
    routed_reach_sq: u32,
}

/// Multi-layer occupancy grid of one board, plus exact copper geometry.
#[derive(Clone)]
pub struct RoutingGrid {
    conv: GridConverter,
    cells: DenseGrid,
    congestion: CongestionGrid,
    corridors: CorridorMap,
    copper: CopperIndex,
    /// Clearance class table. Entry 0 is `None` (the routing net's own clearance).
    classes: Vec<Option<f64>>,
    routable: LayerSet,
    fine_pitch: Vec<bool>,
    max_static_clearance: f64,
    /// Distinct routed-net clearances; nets index into it via `net_clearance`.
    routed_classes: Vec<f64>,
    net_clearance: HashMap<NetId, (f64, u8)>,
}

impl RoutingGrid {
    pub fn build(board: &Board, rules: &DesignRules) -> Result<Self, RouterError> {
        let layer_count = board.layer_count.max(1);
        let mut routable = LayerSet::EMPTY;
        for l in 0..layer_count {
            if rules.layer_allowed(l) {
                routable.insert(l);
            }
        }
        if routable.is_empty() {
            return Err(RouterError::NoRoutableLayers);
        }

        let conv = GridConverter::new(board.bounds, rules.grid_resolution);
        let cells_total = conv.width() as u64 * conv.height() as u64 * layer_count as u64;
        if cells_total > MAX_CELLS {
            return Err(RouterError::GridTooLarge {
                cells: cells_total,
                limit: MAX_CELLS,
            });
        }

        log::info!(
            "Routing Grid: {}x{}x{} (resolution {:.3}mm)",
            conv.width(),
            conv.height(),
            layer_count,
            rules.grid_resolution
        );

        let cells = DenseGrid::new(conv.width(), conv.height(), layer_count);
        let congestion = CongestionGrid::new(
            conv.width(),
            conv.height(),
            layer_count,
            rules.congestion_block as u32,
        );
        let corridors = CorridorMap::new(conv.width(), conv.height());
        let fine_pitch = board.fine_pitch_flags(rules.fine_pitch_threshold);

        let mut grid = Self {
            conv,
            cells,
            congestion,
            corridors,
            copper: CopperIndex::new(),
            classes: vec![None],
            routable,
            fine_pitch,
            max_static_clearance: 0.0,
            routed_classes: Vec::new(),
            net_clearance: HashMap::new(),
        };

        for (i, pad) in board.pads.iter().enumerate() {
            let clearance = rules.pad_clearance(&pad.reference, grid.fine_pitch[i]);
            let class = grid.class_index(clearance);
            let layers = pad.layers(layer_count);
            for (x, y) in grid.static_cells(&pad.metal_area()) {
                for z in layers.iter().filter(|&z| z < layer_count) {
                    let idx = grid.cells.index(x, y, z);
                    let cell = grid.cells.get_mut(idx);
                    cell.obstacle = true;
                    cell.static_net = pad.net;
                    cell.pad = i as u32 + 1;
                    cell.clearance_class = class;
                }
            }
            grid.copper.insert(CopperItem {
                shape: pad.shape(),
                net: pad.net,
                layers,
                owner: CopperOwner::Pad(PadId::new(i)),
                clearance,
            });
        }

        let keepout_class = grid.class_index(Some(0.0));
        for (i, keepout) in board.keepouts.iter().enumerate() {
            let layers = keepout.layer_set(layer_count);
            for (x, y) in grid.static_cells(&keepout.area) {
                for z in layers.iter() {
                    let idx = grid.cells.index(x, y, z);
                    let cell = grid.cells.get_mut(idx);
                    cell.obstacle = true;
                    cell.keepout = true;
                    cell.static_net = NetId::NONE;
                    cell.pad = 0;
                    cell.clearance_class = keepout_class;
                }
            }
            grid.copper.insert(CopperItem {
                shape: Shape::Rect(keepout.area),
                net: NetId::NONE,
                layers,
                owner: CopperOwner::Keepout(i),
                clearance: Some(0.0),
            });
        }

        for zone in &board.zones {
            if zone.layer >= layer_count {
                continue;
            }
            if let Some((x0, x1, y0, y1)) = grid.conv.cell_span(&zone.area) {
                for y in y0..=y1 {
                    for x in x0..=x1 {
                        let idx = grid.cells.index(x, y, zone.layer);
                        grid.cells.get_mut(idx).zone_net = zone.net;
                    }
                }
            }
        }

        Ok(grid)
    }

    fn class_index(&mut self, clearance: Option<f64>) -> u8 {
        let Some(c) = clearance else {
            return 0;
        };
        self.max_static_clearance = self.max_static_clearance.max(c);
        if let Some(pos) = self
            .classes
            .iter()
            .position(|k| k.is_some_and(|k| (k - c).abs() < 1e-9))
        {
            return pos as u8;
        }
        self.classes.push(Some(c));
        (self.classes.len() - 1) as u8
    }

    /// Registers the clearance `net`'s routed copper demands from everyone else.
    pub fn set_net_clearance(&mut self, net: NetId, clearance: f64) {
        let c = clearance.max(0.0);
        let class = match self.routed_classes.iter().position(|k| (k - c).abs() < 1e-9) {
            Some(pos) => pos,
            None => {
                self.routed_classes.push(c);
                self.routed_classes.len() - 1
            }
        };
        self.net_clearance.insert(net, (c, class as u8));
    }

    pub fn net_clearance(&self, net: NetId) -> Option<f64> {
        self.net_clearance.get(&net).map(|&(c, _)| c)
    }

    /// Snapped cell span of a static copper rectangle.
    pub fn static_span(&self, rect: &Rect) -> (u32, u32, u32, u32) {
        let snapped = rect.expand(self.conv.resolution() * STATIC_SNAP);
        self.conv.cell_span(&snapped).unwrap_or_else(|| {
            let g = self.conv.to_grid(rect.center(), 0);
            (g.x, g.x, g.y, g.y)
        })
    }

    fn static_cells(&self, rect: &Rect) -> Vec<(u32, u32)> {
        let (x0, x1, y0, y1) = self.static_span(rect);
        (y0..=y1)
            .flat_map(|y| (x0..=x1).map(move |x| (x, y)))
            .collect()
    }

    #[inline(always)]
    pub fn width(&self) -> u32 {
        self.cells.width()
    }

    #[inline(always)]
    pub fn height(&self) -> u32 {
        self.cells.height()
    }

    #[inline(always)]
    pub fn layers(&self) -> u8 {
        self.cells.layers()
    }

    pub fn converter(&self) -> &GridConverter {
        &self.conv
    }

    pub fn cells(&self) -> &DenseGrid {
        &self.cells
    }

    pub fn copper(&self) -> &CopperIndex {
        &self.copper
    }

    pub fn routable_layers(&self) -> LayerSet {
        self.routable
    }

    pub fn is_fine_pitch(&self, pad: PadId) -> bool {
        self.fine_pitch.get(pad.index()).copied().unwrap_or(false)
    }

    /// Largest clearance any static copper demands.
    pub fn max_static_clearance(&self) -> f64 {
        self.max_static_clearance
    }

    /// Largest clearance any static or routed copper demands.
    pub fn max_clearance(&self) -> f64 {
        self.routed_classes
            .iter()
            .copied()
            .fold(self.max_static_clearance, f64::max)
    }

    #[inline(always)]
    pub fn index(&self, x: u32, y: u32, z: u8) -> usize {
        self.cells.index(x, y, z)
    }

    #[inline(always)]
    pub fn cell(&self, x: u32, y: u32, z: u8) -> &Cell {
        self.cells.get(self.cells.index(x, y, z))
    }

    /// Static copper here belongs to someone other than `net`.
    #[inline(always)]
    pub fn foreign_static(&self, idx: usize, net: NetId) -> bool {
        let c = self.cells.get(idx);
        c.obstacle && (c.static_net != net || c.static_net.is_none())
    }

    /// Derived blocked flag: foreign static copper, or routed copper of another net.
    pub fn is_blocked_for(&self, x: u32, y: u32, z: u8, net: NetId) -> bool {
        let idx = self.index(x, y, z);
        self.foreign_static(idx, net) || self.cells.foreign_routed(idx, net) > 0
    }

    pub fn zone_at(&self, x: u32, y: u32, z: u8) -> Option<NetId> {
        let net = self.cell(x, y, z).zone_net;
        (!net.is_none()).then_some(net)
    }

    pub fn congestion_at(&self, x: u32, y: u32, z: u8) -> f64 {
        self.congestion.density(x, y, z)
    }

    pub fn congestion_region(&self, x0: u32, y0: u32, x1: u32, y1: u32, z: u8) -> f64 {
        self.congestion.region_density(x0, y0, x1, y1, z)
    }

    pub fn layer_load(&self, z: u8) -> u64 {
        self.congestion.layer_total(z)
    }

    pub fn set_corridors(&mut self, net: NetId, corridors: &[Corridor]) {
        self.corridors.set(net, corridors, &self.conv);
    }

    #[inline]
    pub fn in_corridor(&self, net: NetId, x: u32, y: u32) -> bool {
        self.corridors.contains(net, x, y)
    }

    pub fn has_corridor(&self, net: NetId) -> bool {
        self.corridors.has(net)
    }

    pub fn clear_corridors(&mut self) {
        self.corridors.clear();
    }

    pub fn corridor_count(&self) -> usize {
        self.corridors.len()
    }

    #[inline]
    pub fn history(&self, idx: usize) -> f64 {
        self.cells.get(idx).history as f64
    }

    pub fn add_history(&mut self, cells: &[usize], increment: f64) {
        for &idx in cells {
            self.cells.get_mut(idx).history += increment as f32;
        }
    }

    pub fn decay_history(&mut self, factor: f64) {
        if factor >= 1.0 {
            return;
        }
        for cell in self.cells.cells_mut() {
            if cell.history > 0.0 {
                cell.history *= factor as f32;
            }
        }
    }

    /// Clearance halo for copper of half-extent `half_width` demanding `clearance`.
    pub fn halo(&self, half_width: f64, clearance: f64, disks: &mut HashMap<u32, Disk>) -> Halo {
        let radii: Vec<u32> = self
            .classes
            .iter()
            .map(|k| self.conv.cells_for(half_width + k.unwrap_or(clearance)))
            .collect();
        let routed: Vec<u32> = self
            .routed_classes
            .iter()
            .map(|&k| self.conv.cells_for(half_width + clearance.max(k)))
            .collect();
        let max_r = radii.iter().chain(&routed).copied().max().unwrap_or(0);
        let disk = disks
            .entry(max_r)
            .or_insert_with(|| Arc::new(disk_offsets(max_r)))
            .clone();
        let radius_sq: Vec<u32> = radii.iter().map(|r| r * r).collect();
        let routed_sq: Vec<u32> = routed.iter().map(|r| r * r).collect();
        let routed_reach_sq = routed_sq.iter().copied().fold(radius_sq[0], u32::max);
        Halo {
            disk,
            radius_sq,
            routed_sq,
            routed_reach_sq,
        }
    }

    /// Squared halo radius against the foreign routed copper in cell `idx`.
    fn routed_radius_sq(&self, idx: usize, net: NetId, halo: &Halo) -> u32 {
        self.cells
            .routed_nets(idx)
            .into_iter()
            .filter(|&n| n != net)
            .map(|n| {
                self.net_clearance
                    .get(&n)
                    .and_then(|&(_, class)| halo.routed_sq.get(class as usize).copied())
                    .unwrap_or(halo.radius_sq[0])
            })
            .max()
            .unwrap_or(0)
    }

    /// Checks a copper centre at `(x, y, z)` for `net`.
    ///
    /// Returns `None` when static copper of another owner lies inside the halo,
    /// or routed copper does and `share` is false. Otherwise returns the number
    /// of foreign routed cells inside the halo.
    pub fn halo_check(
        &self,
        x: u32,
        y: u32,
        z: u8,
        net: NetId,
        halo: &Halo,
        share: bool,
    ) -> Option<u32> {
        let own_sq = halo.radius_sq[0];
        let mut shared = 0;
        for &(dx, dy, d2) in halo.disk.iter() {
            let px = x as i64 + dx as i64;
            let py = y as i64 + dy as i64;
            if !self.cells.in_bounds(px, py) {
                continue;
            }
            let idx = self.cells.index(px as u32, py as u32, z);
            let cell = self.cells.get(idx);
            if self.foreign_static(idx, net) {
                let class = cell.clearance_class as usize;
                if d2 < halo.radius_sq[class] || d2 == 0 {
                    return None;
                }
            }
            if d2 < halo.routed_reach_sq || d2 == 0 {
                let foreign = self.cells.foreign_routed(idx, net);
                let inside = foreign > 0
                    && (d2 == 0 || d2 < own_sq || d2 < self.routed_radius_sq(idx, net, halo));
                if inside {
                    if !share {
                        return None;
                    }
                    shared += foreign as u32;
                }
            }
        }
        Some(shared)
    }

    fn segment_cells(&self, seg: &Segment) -> Vec<(u32, u32)> {
        let half = seg.width / 2.0;
        let bbox = Rect::spanning(seg.start, seg.end).expand(half);
        let mut out = Vec::new();
        if let Some((x0, x1, y0, y1)) = self.conv.cell_span(&bbox) {
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let p = self.conv.xy_to_world(x, y);
                    if point_segment_distance(p, seg.start, seg.end) <= half + RASTER_EPS {
                        out.push((x, y));
                    }
                }
            }
        }
        if out.is_empty() {
            let g = self.conv.to_grid(seg.start, 0);
            out.push((g.x, g.y));
        }
        out
    }

    fn via_cells(&self, via: &Via) -> Vec<(u32, u32)> {
        let r = via.diameter / 2.0;
        let bbox = Rect::from_center(via.position, via.diameter, via.diameter);
        let mut out = Vec::new();
        if let Some((x0, x1, y0, y1)) = self.conv.cell_span(&bbox) {
            for y in y0..=y1 {
                for x in x0..=x1 {
                    if self.conv.xy_to_world(x, y).dist(via.position) <= r + RASTER_EPS {
                        out.push((x, y));
                    }
                }
            }
        }
        if out.is_empty() {
            let g = self.conv.to_grid(via.position, 0);
            out.push((g.x, g.y));
        }
        out
    }

    /// Every `(cell index)` covered by the route's copper, once per primitive.
    fn route_footprint(&self, route: &Route) -> Vec<usize> {
        let layers = self.layers();
        let mut out = Vec::new();
        for seg in &route.segments {
            if seg.layer >= layers {
                continue;
            }
            for (x, y) in self.segment_cells(seg) {
                out.push(self.cells.index(x, y, seg.layer));
            }
        }
        for via in &route.vias {
            let cells = self.via_cells(via);
            for z in via.layer_set().iter().filter(|&z| z < layers) {
                for &(x, y) in &cells {
                    out.push(self.cells.index(x, y, z));
                }
            }
        }
        out
    }

    /// Records a route's occupancy. Cells get one mark per covering primitive.
    /// The copper carries the net's registered clearance.
    pub fn mark_route(&mut self, route: &Route) {
        let clearance = self.net_clearance(route.net);
        for idx in self.route_footprint(route) {
            self.cells.add_route(idx, route.net);
            let (x, y, z) = self.cells.coord(idx);
            self.congestion.add(x, y, z);
        }
        for (shape, layers) in route.copper() {
            self.copper.insert(CopperItem {
                shape,
                net: route.net,
                layers,
                owner: CopperOwner::Route,
                clearance,
            });
        }
    }

    /// Exact inverse of [`RoutingGrid::mark_route`].
    pub fn unmark_route(&mut self, route: &Route) {
        for idx in self.route_footprint(route) {
            if self.cells.remove_route(idx, route.net) {
                let (x, y, z) = self.cells.coord(idx);
                self.congestion.remove(x, y, z);
            }
        }
        for (shape, layers) in route.copper() {
            if !self.copper.remove_routed(route.net, &shape, layers) {
                log::warn!("Net {}: routed copper missing from index on unmark", route.net);
            }
        }
    }

    /// Routed cells in conflict: two nets in the cell, or another net's copper
    /// closer than the larger of the two nets' clearances.
    pub fn overflow_cells(&self, clearance_of: &dyn Fn(NetId) -> f64) -> Vec<usize> {
        let mut disks: HashMap<u32, Vec<(i32, i32, u32)>> = HashMap::new();
        let mut out = Vec::new();
        let widest = self
            .routed_classes
            .iter()
            .copied()
            .fold(0.0, f64::max);
        for (idx, cell) in self.cells.iter() {
            if cell.route_net.is_none() {
                continue;
            }
            if self.cells.usage(idx) >= 2 {
                out.push(idx);
                continue;
            }
            let net = cell.route_net;
            let own = clearance_of(net);
            let r = self.conv.cells_for(own.max(widest));
            let disk = disks.entry(r).or_insert_with(|| disk_offsets(r));
            let (x, y, z) = self.cells.coord(idx);
            let conflict = disk.iter().any(|&(dx, dy, d2)| {
                if d2 == 0 {
                    return false;
                }
                let px = x as i64 + dx as i64;
                let py = y as i64 + dy as i64;
                if !self.cells.in_bounds(px, py) {
                    return false;
                }
                let other = self.cells.index(px as u32, py as u32, z);
                if self.cells.foreign_routed(other, net) == 0 {
                    return false;
                }
                self.cells.routed_nets(other).into_iter().any(|n| {
                    if n == net {
                        return false;
                    }
                    let reach = self.conv.cells_for(own.max(clearance_of(n)));
                    d2 < reach * reach
                })
            });
            if conflict {
                out.push(idx);
            }
        }
        out
    }

    pub fn total_overflow(&self, clearance_of: &dyn Fn(NetId) -> f64) -> usize {
        self.overflow_cells(clearance_of).len()
    }

    pub fn routed_nets_at(&self, idx: usize) -> Vec<NetId> {
        self.cells.routed_nets(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcb_common::db::core::{Keepout, Pad, PadKey, Zone};
    use pcb_common::geom::point::Point;

    fn board() -> Board {
        let mut board = Board::new(
            Rect::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0)),
            2,
        );
        for (i, x) in [2.0, 8.0].into_iter().enumerate() {
            board.add_pad(Pad {
                reference: format!("R{}", i + 1),
                pin: "1".to_string(),
                position: Point::new(x, 5.0),
                layer: 0,
                width: 1.0,
                height: 1.0,
                through_hole: false,
                drill: 0.0,
                net: NetId::NONE,
            });
        }
        board.add_net("A", vec![PadKey::new("R1", "1")]);
        board.add_net("B", vec![PadKey::new("R2", "1")]);
        board.keepouts.push(Keepout {
            area: Rect::new(Point::new(4.0, 0.0), Point::new(4.5, 2.0)),
            layers: vec![1],
        });
        board.zones.push(Zone {
            area: Rect::new(Point::new(0.0, 8.0), Point::new(10.0, 10.0)),
            layer: 0,
            net: NetId(2),
        });
        board
    }

    fn trace(net: NetId, a: (f64, f64), b: (f64, f64)) -> Route {
        let mut route = Route::new(net);
        route.segments.push(Segment {
            start: Point::new(a.0, a.1),
            end: Point::new(b.0, b.1),
            width: 0.2,
            layer: 0,
            net,
        });
        route
    }

    #[test]
    fn static_copper_is_rasterized() {
        let grid = RoutingGrid::build(&board(), &DesignRules::default()).unwrap();
        assert_eq!(grid.width(), 101);
        let pad_cell = grid.cell(20, 50, 0);
        assert!(pad_cell.obstacle);
        assert_eq!(pad_cell.static_net, NetId(1));
        assert_eq!(pad_cell.pad_id(), Some(PadId(0)));
        assert!(!grid.cell(20, 50, 1).obstacle);
        assert!(grid.cell(42, 10, 1).keepout);
        assert!(!grid.cell(42, 10, 0).obstacle);
        assert_eq!(grid.zone_at(10, 90, 0), Some(NetId(2)));
        assert_eq!(grid.zone_at(10, 90, 1), None);
        assert_eq!(grid.copper().len(), 3);
    }

    #[test]
    fn mark_then_unmark_restores_everything() {
        let mut grid = RoutingGrid::build(&board(), &DesignRules::default()).unwrap();
        let pristine = grid.clone();
        let mut route = trace(NetId(1), (2.0, 5.0), (5.0, 5.0));
        route.vias.push(Via {
            position: Point::new(5.0, 5.0),
            drill: 0.3,
            diameter: 0.6,
            layers: (0, 1),
            net: NetId(1),
        });
        let other = trace(NetId(2), (5.0, 4.0), (5.0, 6.0));

        grid.mark_route(&route);
        grid.mark_route(&other);
        assert_eq!(grid.cells().usage(grid.index(50, 50, 0)), 2);
        assert!(grid.congestion_at(50, 50, 0) > 0.0);

        grid.unmark_route(&other);
        grid.unmark_route(&route);
        for (idx, cell) in pristine.cells().iter() {
            assert_eq!(grid.cells().get(idx), cell);
            assert_eq!(grid.cells().usage(idx), 0);
        }
        assert_eq!(grid.copper().len(), pristine.copper().len());
        assert_eq!(grid.layer_load(0), 0);
    }

    #[test]
    fn halo_blocks_foreign_and_counts_shared_copper() {
        let mut grid = RoutingGrid::build(&board(), &DesignRules::default()).unwrap();
        let mut disks = HashMap::new();
        let halo = grid.halo(0.1, 0.2, &mut disks);
        let net_a = NetId(1);

        // Foreign pad edge at x = 7.5; centre 3 cells away is legal, 2 cells is not.
        assert!(grid.halo_check(72, 50, 0, net_a, &halo, false).is_some());
        assert!(grid.halo_check(73, 50, 0, net_a, &halo, false).is_none());
        // Own pad is never an obstacle.
        assert!(grid.halo_check(22, 50, 0, net_a, &halo, false).is_some());

        grid.mark_route(&trace(NetId(2), (5.0, 1.0), (5.0, 4.0)));
        assert!(grid.halo_check(46, 30, 0, net_a, &halo, false).is_some());
        assert!(grid.halo_check(47, 30, 0, net_a, &halo, false).is_none());
        let shared = grid.halo_check(48, 30, 0, net_a, &halo, true);
        assert!(shared.is_some_and(|n| n > 0));
    }

    #[test]
    fn wide_routed_net_pushes_its_halo_onto_others() {
        let mut grid = RoutingGrid::build(&board(), &DesignRules::default()).unwrap();
        let (a, b) = (NetId(1), NetId(2));
        grid.set_net_clearance(a, 0.2);
        grid.set_net_clearance(b, 0.5);
        assert!((grid.max_clearance() - 0.5).abs() < 1e-9);

        let mut disks = HashMap::new();
        let halo = grid.halo(0.1, 0.2, &mut disks);
        grid.mark_route(&trace(b, (5.0, 1.0), (5.0, 4.0)));
        // B's copper covers columns 49..=51; 0.1mm half width plus B's 0.5mm is 6 cells.
        assert!(grid.halo_check(43, 30, 0, a, &halo, false).is_some());
        assert!(grid.halo_check(44, 30, 0, a, &halo, false).is_none());
        assert!(grid.halo_check(46, 30, 0, a, &halo, true).is_some_and(|n| n > 0));

        let stored = grid.copper().query(Rect::from_center(Point::new(5.0, 2.0), 0.1, 0.1));
        assert!(stored.into_iter().any(|i| i.net == b && i.clearance == Some(0.5)));

        let clearance = |n: NetId| if n == b { 0.5 } else { 0.2 };
        grid.mark_route(&trace(a, (4.6, 1.0), (4.6, 4.0)));
        let overflow = grid.overflow_cells(&clearance);
        assert!(overflow.iter().any(|&idx| grid.routed_nets_at(idx) == vec![a]));
        assert!(overflow.iter().any(|&idx| grid.routed_nets_at(idx) == vec![b]));
    }

    #[test]
    fn blocking_corridors_and_region_congestion() {
        let mut grid = RoutingGrid::build(&board(), &DesignRules::default()).unwrap();
        let (a, b) = (NetId(1), NetId(2));
        assert!(grid.is_blocked_for(80, 50, 0, a));
        assert!(!grid.is_blocked_for(80, 50, 0, b));

        grid.mark_route(&trace(b, (5.0, 1.0), (5.0, 4.0)));
        assert!(grid.is_blocked_for(50, 20, 0, a));
        assert!(!grid.is_blocked_for(50, 20, 0, b));
        assert!(grid.congestion_region(40, 10, 60, 40, 0) > 0.0);
        assert_eq!(grid.congestion_region(0, 60, 30, 100, 0), 0.0);

        assert!(grid.in_corridor(a, 90, 90));
        let corridor = Corridor {
            waypoints: vec![
                Waypoint::new(Point::new(2.0, 5.0), 0),
                Waypoint::new(Point::new(8.0, 5.0), 0),
            ],
            half_width: 1.0,
        };
        grid.set_corridors(a, &[corridor]);
        assert!(grid.has_corridor(a) && !grid.has_corridor(b));
        assert_eq!(grid.corridor_count(), 1);
        assert!(grid.in_corridor(a, 50, 50));
        assert!(!grid.in_corridor(a, 50, 90));
        assert!(grid.in_corridor(b, 50, 90));
        grid.clear_corridors();
        assert_eq!(grid.corridor_count(), 0);
        assert!(grid.in_corridor(a, 50, 90));
    }

    #[test]
    fn overflow_uses_copper_to_copper_clearance() {
        let mut grid = RoutingGrid::build(&board(), &DesignRules::default()).unwrap();
        let clearance = |_: NetId| 0.2;
        grid.mark_route(&trace(NetId(1), (1.0, 2.0), (3.0, 2.0)));
        grid.mark_route(&trace(NetId(2), (1.0, 2.4), (3.0, 2.4)));
        assert_eq!(grid.total_overflow(&clearance), 0);

        grid.mark_route(&trace(NetId(2), (1.0, 1.7), (3.0, 1.7)));
        let overflow = grid.overflow_cells(&clearance);
        assert!(!overflow.is_empty());
        let nets: std::collections::HashSet<NetId> = overflow
            .iter()
            .flat_map(|&idx| grid.routed_nets_at(idx))
            .collect();
        assert!(nets.contains(&NetId(1)) && nets.contains(&NetId(2)));
    }
}
