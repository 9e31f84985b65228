use pcb_common::db::indices::{NetId, PadId};
use std::collections::HashMap;

/// One cell on one layer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Cell {
    /// Static copper (pad or keepout) sits here.
    pub obstacle: bool,
    pub keepout: bool,
    /// Net of the static copper, `NONE` for keepouts and unconnected pads.
    pub static_net: NetId,
    /// Pad index + 1, 0 when no pad.
    pub pad: u32,
    /// Index into the grid's clearance class table; 0 means the routing net's own clearance.
    pub clearance_class: u8,
    /// First routed net with copper here and how many of its primitives cover the cell.
    pub route_net: NetId,
    pub route_count: u16,
    pub history: f32,
    pub zone_net: NetId,
}

impl Cell {
    pub fn pad_id(&self) -> Option<PadId> {
        (self.pad > 0).then(|| PadId(self.pad - 1))
    }
}

/// Flat `layers x height x width` cell storage. Nets beyond the first that
/// share a cell are kept in a side table so unmarking restores a cell exactly.
#[derive(Clone)]
pub struct DenseGrid {
    width: u32,
    height: u32,
    layers: u8,
    cells: Vec<Cell>,
    sharers: HashMap<usize, Vec<(NetId, u16)>>,
}

impl DenseGrid {
    pub fn new(width: u32, height: u32, layers: u8) -> Self {
        let size = (width as usize) * (height as usize) * (layers as usize);
        if size > 20_000_000 {
            log::warn!(
                "Allocating large DenseGrid: {} cells. Ensure sufficient RAM.",
                size
            );
        }
        Self {
            width,
            height,
            layers,
            cells: vec![Cell::default(); size],
            sharers: HashMap::new(),
        }
    }

    #[inline(always)]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline(always)]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline(always)]
    pub fn layers(&self) -> u8 {
        self.layers
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline(always)]
    pub fn index(&self, x: u32, y: u32, z: u8) -> usize {
        (z as usize) * (self.width as usize) * (self.height as usize)
            + (y as usize) * (self.width as usize)
            + (x as usize)
    }

    #[inline(always)]
    pub fn coord(&self, idx: usize) -> (u32, u32, u8) {
        let plane = (self.width as usize) * (self.height as usize);
        let z = idx / plane;
        let rem = idx % plane;
        (
            (rem % self.width as usize) as u32,
            (rem / self.width as usize) as u32,
            z as u8,
        )
    }

    #[inline(always)]
    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64
    }

    #[inline(always)]
    pub fn get(&self, idx: usize) -> &Cell {
        &self.cells[idx]
    }

    #[inline(always)]
    pub fn get_mut(&mut self, idx: usize) -> &mut Cell {
        &mut self.cells[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Cell)> {
        self.cells.iter().enumerate()
    }

    pub fn cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.cells.iter_mut()
    }

    /// Number of distinct routed nets covering the cell.
    #[inline]
    pub fn usage(&self, idx: usize) -> usize {
        let cell = &self.cells[idx];
        if cell.route_net.is_none() {
            return 0;
        }
        1 + self.sharers.get(&idx).map_or(0, |s| s.len())
    }

    /// Routed nets other than `net` covering the cell.
    #[inline]
    pub fn foreign_routed(&self, idx: usize, net: NetId) -> usize {
        let cell = &self.cells[idx];
        if cell.route_net.is_none() {
            return 0;
        }
        let first = usize::from(cell.route_net != net);
        let rest = self
            .sharers
            .get(&idx)
            .map_or(0, |s| s.iter().filter(|(n, _)| *n != net).count());
        first + rest
    }

    pub fn routed_nets(&self, idx: usize) -> Vec<NetId> {
        let cell = &self.cells[idx];
        if cell.route_net.is_none() {
            return Vec::new();
        }
        let mut nets = vec![cell.route_net];
        if let Some(s) = self.sharers.get(&idx) {
            nets.extend(s.iter().map(|(n, _)| *n));
        }
        nets
    }

    pub fn add_route(&mut self, idx: usize, net: NetId) {
        let cell = &mut self.cells[idx];
        if cell.route_net.is_none() {
            cell.route_net = net;
            cell.route_count = 1;
            return;
        }
        if cell.route_net == net {
            cell.route_count += 1;
            return;
        }
        let sharers = self.sharers.entry(idx).or_default();
        match sharers.iter_mut().find(|(n, _)| *n == net) {
            Some((_, count)) => *count += 1,
            None => sharers.push((net, 1)),
        }
    }

    /// Returns false if `net` had no copper on the cell.
    pub fn remove_route(&mut self, idx: usize, net: NetId) -> bool {
        let cell = &mut self.cells[idx];
        if cell.route_net == net && !net.is_none() {
            cell.route_count -= 1;
            if cell.route_count == 0 {
                // Promote the oldest sharer so the side table stays minimal.
                match self.sharers.get_mut(&idx) {
                    Some(sharers) if !sharers.is_empty() => {
                        let (next, count) = sharers.remove(0);
                        cell.route_net = next;
                        cell.route_count = count;
                        if sharers.is_empty() {
                            self.sharers.remove(&idx);
                        }
                    }
                    _ => cell.route_net = NetId::NONE,
                }
            }
            return true;
        }
        let Some(sharers) = self.sharers.get_mut(&idx) else {
            return false;
        };
        let Some(pos) = sharers.iter().position(|(n, _)| *n == net) else {
            return false;
        };
        sharers[pos].1 -= 1;
        if sharers[pos].1 == 0 {
            sharers.remove(pos);
            if sharers.is_empty() {
                self.sharers.remove(&idx);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_cells_restore_exactly() {
        let mut grid = DenseGrid::new(4, 4, 2);
        let idx = grid.index(1, 2, 1);
        assert_eq!(grid.coord(idx), (1, 2, 1));

        let before = *grid.get(idx);
        grid.add_route(idx, NetId(1));
        grid.add_route(idx, NetId(2));
        grid.add_route(idx, NetId(1));
        assert_eq!(grid.usage(idx), 2);
        assert_eq!(grid.foreign_routed(idx, NetId(1)), 1);
        assert_eq!(grid.foreign_routed(idx, NetId(3)), 2);

        assert!(grid.remove_route(idx, NetId(1)));
        assert!(grid.remove_route(idx, NetId(1)));
        assert_eq!(grid.get(idx).route_net, NetId(2));
        assert!(grid.remove_route(idx, NetId(2)));
        assert!(!grid.remove_route(idx, NetId(2)));
        assert_eq!(*grid.get(idx), before);
        assert_eq!(grid.usage(idx), 0);
    }
}
