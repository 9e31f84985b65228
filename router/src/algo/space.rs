//! Move model shared by the unidirectional and bidirectional searches:
//! cell legality, via legality and step costs for one net.

use super::{COST_SCALE, DIRS, turn_steps};
use crate::grid::{Disk, Halo, RoutingGrid};
use crate::rules::NetParams;
use pcb_common::db::core::{Board, LayerSet};
use pcb_common::db::indices::{NetId, PadId};
use pcb_common::geom::point::Point;
use pcb_common::util::config::DesignRules;
use std::collections::HashMap;

/// Via legality per `(x, y, net)`: `None` when illegal, else the foreign copper it shares.
pub type ViaCache = HashMap<(u32, u32, NetId), Option<u32>>;

/// One end of a two-pad connection.
#[derive(Clone, Debug)]
pub struct Terminal {
    pub pad: PadId,
    pub center: Point<f64>,
    pub center_cell: (u32, u32),
    /// Inclusive snapped cell span `(x0, x1, y0, y1)` of the pad.
    pub span: (u32, u32, u32, u32),
    /// Pad layers that are routable.
    pub layers: LayerSet,
}

impl Terminal {
    pub fn new(grid: &RoutingGrid, board: &Board, pad: PadId) -> Self {
        let p = board.pad(pad);
        let g = grid.converter().to_grid(p.position, 0);
        Self {
            pad,
            center: p.position,
            center_cell: (g.x, g.y),
            span: grid.static_span(&p.metal_area()),
            layers: p
                .layers(board.layer_count)
                .intersection(grid.routable_layers()),
        }
    }

    #[inline(always)]
    pub fn covers(&self, x: u32, y: u32, z: u8) -> bool {
        let (x0, x1, y0, y1) = self.span;
        x >= x0 && x <= x1 && y >= y0 && y <= y1 && self.layers.contains(z)
    }

    #[inline(always)]
    pub fn covers_xy(&self, x: u32, y: u32) -> bool {
        let (x0, x1, y0, y1) = self.span;
        x >= x0 && x <= x1 && y >= y0 && y <= y1
    }

    pub fn cells(&self) -> impl Iterator<Item = (u32, u32, u8)> + '_ {
        let (x0, x1, y0, y1) = self.span;
        self.layers.iter().flat_map(move |z| {
            (y0..=y1).flat_map(move |y| (x0..=x1).map(move |x| (x, y, z)))
        })
    }
}

pub struct SearchSpace<'a> {
    pub grid: &'a RoutingGrid,
    pub rules: &'a DesignRules,
    pub params: &'a NetParams,
    pub start: Terminal,
    pub goal: Terminal,
    trace_halo: Halo,
    via_halo: Halo,
    /// Present-congestion factor when foreign routed copper may be shared.
    present: Option<f64>,
    /// Routable layers, most loaded first.
    via_order: Vec<u8>,
    routable: Vec<u8>,
}

impl<'a> SearchSpace<'a> {
    pub fn new(
        grid: &'a RoutingGrid,
        rules: &'a DesignRules,
        params: &'a NetParams,
        start: Terminal,
        goal: Terminal,
        present: Option<f64>,
        disks: &mut HashMap<u32, Disk>,
    ) -> Self {
        let trace_halo = grid.halo(params.trace_width / 2.0, params.clearance, disks);
        let via_halo = grid.halo(params.via_diameter / 2.0, params.via_clearance, disks);
        let routable: Vec<u8> = grid
            .routable_layers()
            .iter()
            .filter(|&z| z < grid.layers())
            .collect();
        let mut via_order = routable.clone();
        via_order.sort_by_key(|&z| std::cmp::Reverse(grid.layer_load(z)));
        Self {
            grid,
            rules,
            params,
            start,
            goal,
            trace_halo,
            via_halo,
            present,
            via_order,
            routable,
        }
    }

    #[inline(always)]
    pub fn net(&self) -> NetId {
        self.params.net
    }

    pub fn negotiated(&self) -> bool {
        self.present.is_some()
    }

    pub fn routable(&self) -> &[u8] {
        &self.routable
    }

    #[inline(always)]
    fn in_terminal(&self, x: u32, y: u32, z: u8) -> bool {
        self.start.covers(x, y, z) || self.goal.covers(x, y, z)
    }

    /// Hard blockers on the cell itself: foreign static copper or a foreign pour.
    #[inline]
    fn cell_open(&self, x: u32, y: u32, z: u8) -> bool {
        let idx = self.grid.index(x, y, z);
        if self.grid.foreign_static(idx, self.net()) {
            return false;
        }
        let zone = self.grid.cells().get(idx).zone_net;
        zone.is_none() || zone == self.net()
    }

    /// Whether trace copper may be centred here. Returns the foreign routed
    /// copper the move would share (always 0 in strict mode).
    pub fn passable(&self, x: u32, y: u32, z: u8) -> Option<u32> {
        if !self.cell_open(x, y, z) {
            return None;
        }
        if self.in_terminal(x, y, z) {
            let idx = self.grid.index(x, y, z);
            let foreign = self.grid.cells().foreign_routed(idx, self.net()) as u32;
            return match (foreign, self.present) {
                (0, _) => Some(0),
                (n, Some(_)) => Some(n),
                (_, None) => None,
            };
        }
        self.grid
            .halo_check(x, y, z, self.net(), &self.trace_halo, self.present.is_some())
    }

    /// A diagonal step may not squeeze between two cells of blocking copper.
    pub fn corner_clear(&self, x: u32, y: u32, dir: u8, z: u8) -> bool {
        let (dx, dy) = DIRS[dir as usize];
        if dx == 0 || dy == 0 {
            return true;
        }
        let blocking = |cx: i64, cy: i64| {
            if !self.grid.cells().in_bounds(cx, cy) {
                return true;
            }
            let idx = self.grid.index(cx as u32, cy as u32, z);
            self.grid.foreign_static(idx, self.net())
                || (self.present.is_none()
                    && self.grid.cells().foreign_routed(idx, self.net()) > 0)
        };
        let (x, y) = (x as i64, y as i64);
        !blocking(x + dx as i64, y) && !blocking(x, y + dy as i64)
    }

    /// Via legality at `(x, y)` on every routable layer.
    pub fn via_legal(&self, x: u32, y: u32, cache: &mut ViaCache) -> Option<u32> {
        *cache.entry((x, y, self.net())).or_insert_with(|| {
            let mut shared = 0;
            for &z in &self.via_order {
                if !self.cell_open(x, y, z) {
                    return None;
                }
                shared += self.grid.halo_check(
                    x,
                    y,
                    z,
                    self.net(),
                    &self.via_halo,
                    self.present.is_some(),
                )?;
            }
            Some(shared)
        })
    }

    #[inline]
    fn congestion_cost(&self, x: u32, y: u32, z: u8) -> f64 {
        let thr = self.rules.congestion_threshold;
        let d = self.grid.congestion_at(x, y, z);
        if d <= thr {
            return 0.0;
        }
        let excess = (d - thr) / (1.0 - thr).max(1e-9);
        self.rules.cost_congestion * excess * self.params.cost_multiplier
    }

    #[inline]
    fn sharing_cost(&self, idx: usize, shared: u32) -> f64 {
        let present = self.present.unwrap_or(0.0);
        present * shared as f64 * self.params.cost_multiplier + self.grid.history(idx)
    }

    /// Scaled cost of a planar step from `(x, y)` in heading `dir` onto layer `z`.
    pub fn step_cost(&self, x: u32, y: u32, z: u8, dir: u8, prev_dir: u8, shared: u32) -> i64 {
        let (dx, dy) = DIRS[dir as usize];
        let nx = (x as i64 + dx as i64) as u32;
        let ny = (y as i64 + dy as i64) as u32;
        let idx = self.grid.index(nx, ny, z);

        let mut base = if dir % 2 == 0 {
            self.rules.cost_straight
        } else {
            self.rules.cost_diagonal
        } * self.params.layer_cost(z);
        if self.grid.cells().get(idx).zone_net == self.net() {
            base *= self.rules.cost_zone;
        }
        let turn = self.rules.cost_turn * turn_steps(prev_dir, dir) as f64 / 2.0;
        let corridor = if self.grid.in_corridor(self.net(), nx, ny) {
            0.0
        } else {
            self.rules.corridor_penalty
        };
        let cost = base
            + turn
            + corridor
            + self.congestion_cost(nx, ny, z)
            + self.sharing_cost(idx, shared);
        (cost * COST_SCALE).round() as i64
    }

    /// Scaled penalty for leaving a cell heading `next` after entering it heading `prev`.
    pub fn turn_cost(&self, prev: u8, next: u8) -> i64 {
        (self.rules.cost_turn * turn_steps(prev, next) as f64 / 2.0 * COST_SCALE).round() as i64
    }

    /// Scaled cost of a via at `(x, y)` landing on layer `z`.
    pub fn via_cost(&self, x: u32, y: u32, z: u8, shared: u32) -> i64 {
        let idx = self.grid.index(x, y, z);
        let cost = self.rules.cost_via + self.sharing_cost(idx, shared);
        (cost * COST_SCALE).round() as i64
    }
}
