use crate::utils::conversion::GridConverter;
use pcb_common::db::indices::NetId;
use pcb_common::geom::point::Point;
use pcb_common::geom::rect::Rect;
use pcb_common::geom::shape::point_segment_distance;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    pub layer: u8,
}

impl Waypoint {
    pub fn new(p: Point<f64>, layer: u8) -> Self {
        Self {
            x: p.x,
            y: p.y,
            layer,
        }
    }

    pub fn point(&self) -> Point<f64> {
        Point::new(self.x, self.y)
    }
}

/// Soft-preferred channel for one net: a polyline of waypoints plus a half-width.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corridor {
    pub waypoints: Vec<Waypoint>,
    pub half_width: f64,
}

impl Corridor {
    pub fn contains(&self, p: Point<f64>) -> bool {
        match self.waypoints.len() {
            0 => false,
            1 => self.waypoints[0].point().dist(p) <= self.half_width,
            _ => self.waypoints.windows(2).any(|w| {
                point_segment_distance(p, w[0].point(), w[1].point()) <= self.half_width
            }),
        }
    }

    pub fn bbox(&self) -> Option<Rect> {
        let first = self.waypoints.first()?.point();
        let mut r = Rect::spanning(first, first);
        for w in &self.waypoints {
            r = r.union(&Rect::spanning(w.point(), w.point()));
        }
        Some(r.expand(self.half_width))
    }
}

/// Per-net 2D bitmask of cells inside the net's corridors. Nets without an entry are unconstrained.
#[derive(Clone, Default)]
pub struct CorridorMap {
    width: u32,
    height: u32,
    masks: HashMap<NetId, Vec<u64>>,
}

impl CorridorMap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            masks: HashMap::new(),
        }
    }

    pub fn set(&mut self, net: NetId, corridors: &[Corridor], conv: &GridConverter) {
        let words = ((self.width as usize) * (self.height as usize)).div_ceil(64);
        let mut mask = vec![0u64; words];
        for corridor in corridors {
            let Some(bbox) = corridor.bbox() else {
                continue;
            };
            let (x0, x1, y0, y1) = conv.covering_span(&bbox);
            for y in y0..=y1 {
                for x in x0..=x1 {
                    if corridor.contains(conv.xy_to_world(x, y)) {
                        let bit = (y as usize) * (self.width as usize) + x as usize;
                        mask[bit / 64] |= 1 << (bit % 64);
                    }
                }
            }
        }
        self.masks.insert(net, mask);
    }

    #[inline]
    pub fn contains(&self, net: NetId, x: u32, y: u32) -> bool {
        match self.masks.get(&net) {
            None => true,
            Some(mask) => {
                let bit = (y as usize) * (self.width as usize) + x as usize;
                mask[bit / 64] & (1 << (bit % 64)) != 0
            }
        }
    }

    pub fn has(&self, net: NetId) -> bool {
        self.masks.contains_key(&net)
    }

    pub fn clear(&mut self) {
        self.masks.clear();
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}
