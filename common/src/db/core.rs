use crate::db::indices::*;
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use crate::geom::shape::Shape;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Layers a [`LayerSet`] can hold.
pub const MAX_LAYERS: u8 = 32;

/// Mask bit of `layer`; empty for layers past [`MAX_LAYERS`].
#[inline]
fn bit(layer: u8) -> u32 {
    1u32.checked_shl(layer as u32).unwrap_or(0)
}

/// Copper layers as a bitmask. Layer 0 is the top copper layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerSet(pub u32);

impl LayerSet {
    pub const EMPTY: LayerSet = LayerSet(0);

    pub fn single(layer: u8) -> Self {
        Self(bit(layer))
    }

    pub fn all(layer_count: u8) -> Self {
        if layer_count >= MAX_LAYERS {
            Self(u32::MAX)
        } else {
            Self((1u32 << layer_count) - 1)
        }
    }

    /// Layers `a..=b` in either order.
    pub fn span(a: u8, b: u8) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let mut set = Self::EMPTY;
        for l in lo..=hi {
            set.insert(l);
        }
        set
    }

    pub fn insert(&mut self, layer: u8) {
        self.0 |= bit(layer);
    }

    pub fn remove(&mut self, layer: u8) {
        self.0 &= !bit(layer);
    }

    #[inline]
    pub fn contains(&self, layer: u8) -> bool {
        self.0 & bit(layer) != 0
    }

    #[inline]
    pub fn intersects(&self, other: LayerSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn intersection(&self, other: LayerSet) -> LayerSet {
        LayerSet(self.0 & other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..MAX_LAYERS).filter(move |&l| self.contains(l))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PadKey {
    pub reference: String,
    pub pin: String,
}

impl PadKey {
    pub fn new(reference: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            pin: pin.into(),
        }
    }
}

impl std::fmt::Display for PadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.reference, self.pin)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pad {
    pub reference: String,
    pub pin: String,
    pub position: Point<f64>,
    #[serde(default)]
    pub layer: u8,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub through_hole: bool,
    #[serde(default)]
    pub drill: f64,
    #[serde(default)]
    pub net: NetId,
}

impl Pad {
    pub fn key(&self) -> PadKey {
        PadKey::new(self.reference.clone(), self.pin.clone())
    }

    pub fn metal_area(&self) -> Rect {
        Rect::from_center(self.position, self.width, self.height)
    }

    /// Layers carrying this pad's copper.
    pub fn layers(&self, layer_count: u8) -> LayerSet {
        if self.through_hole {
            LayerSet::all(layer_count)
        } else {
            LayerSet::single(self.layer)
        }
    }

    pub fn shape(&self) -> Shape {
        Shape::Rect(self.metal_area())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Net {
    pub id: NetId,
    pub name: String,
    pub pads: Vec<PadKey>,
    #[serde(default)]
    pub class: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Keepout {
    pub area: Rect,
    /// Empty means every layer.
    #[serde(default)]
    pub layers: Vec<u8>,
}

impl Keepout {
    pub fn layer_set(&self, layer_count: u8) -> LayerSet {
        if self.layers.is_empty() {
            LayerSet::all(layer_count)
        } else {
            let mut set = LayerSet::EMPTY;
            for &l in &self.layers {
                if l < layer_count {
                    set.insert(l);
                }
            }
            set
        }
    }
}

/// Copper pour on one layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Zone {
    pub area: Rect,
    pub layer: u8,
    pub net: NetId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Point<f64>,
    pub end: Point<f64>,
    pub width: f64,
    pub layer: u8,
    pub net: NetId,
}

impl Segment {
    pub fn length(&self) -> f64 {
        self.start.dist(self.end)
    }

    pub fn shape(&self) -> Shape {
        Shape::Segment {
            a: self.start,
            b: self.end,
            width: self.width,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Via {
    pub position: Point<f64>,
    pub drill: f64,
    pub diameter: f64,
    pub layers: (u8, u8),
    pub net: NetId,
}

impl Via {
    pub fn shape(&self) -> Shape {
        Shape::Circle {
            center: self.position,
            radius: self.diameter / 2.0,
        }
    }

    pub fn layer_set(&self) -> LayerSet {
        LayerSet::span(self.layers.0, self.layers.1)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub net: NetId,
    pub segments: Vec<Segment>,
    pub vias: Vec<Via>,
}

impl Route {
    pub fn new(net: NetId) -> Self {
        Self {
            net,
            segments: Vec::new(),
            vias: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.vias.is_empty()
    }

    pub fn length(&self) -> f64 {
        self.segments.iter().map(|s| s.length()).sum()
    }

    pub fn via_count(&self) -> usize {
        self.vias.len()
    }

    pub fn append(&mut self, other: Route) {
        self.segments.extend(other.segments);
        self.vias.extend(other.vias);
    }

    /// Every copper primitive of the route with the layers it occupies.
    pub fn copper(&self) -> Vec<(Shape, LayerSet)> {
        let mut out = Vec::with_capacity(self.segments.len() + self.vias.len());
        for s in &self.segments {
            out.push((s.shape(), LayerSet::single(s.layer)));
        }
        for v in &self.vias {
            out.push((v.shape(), v.layer_set()));
        }
        out
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Board {
    pub bounds: Rect,
    pub layer_count: u8,
    #[serde(default)]
    pub layer_names: Vec<String>,
    #[serde(default)]
    pub pads: Vec<Pad>,
    #[serde(default)]
    pub nets: Vec<Net>,
    #[serde(default)]
    pub keepouts: Vec<Keepout>,
    #[serde(default)]
    pub zones: Vec<Zone>,
}

impl Board {
    pub fn new(bounds: Rect, layer_count: u8) -> Self {
        Self {
            bounds,
            layer_count: layer_count.max(1),
            layer_names: Vec::new(),
            pads: Vec::with_capacity(256),
            nets: Vec::with_capacity(64),
            keepouts: Vec::new(),
            zones: Vec::new(),
        }
    }

    pub fn layer_name(&self, layer: u8) -> String {
        if let Some(name) = self.layer_names.get(layer as usize) {
            return name.clone();
        }
        match layer {
            0 => "F.Cu".to_string(),
            l if l + 1 == self.layer_count => "B.Cu".to_string(),
            l => format!("In{}.Cu", l),
        }
    }

    pub fn add_pad(&mut self, pad: Pad) -> PadId {
        let id = PadId::new(self.pads.len());
        self.pads.push(pad);
        id
    }

    /// Registers a net and stamps its id onto the listed pads. Net ids start at 1.
    pub fn add_net(&mut self, name: impl Into<String>, pads: Vec<PadKey>) -> NetId {
        let id = NetId::new(self.nets.iter().map(|n| n.id.index()).max().unwrap_or(0) + 1);
        for pad in &mut self.pads {
            if pads
                .iter()
                .any(|k| k.reference == pad.reference && k.pin == pad.pin)
            {
                pad.net = id;
            }
        }
        self.nets.push(Net {
            id,
            name: name.into(),
            pads,
            class: None,
        });
        id
    }

    pub fn net(&self, id: NetId) -> Option<&Net> {
        self.nets.iter().find(|n| n.id == id)
    }

    pub fn pad_lookup(&self) -> HashMap<&PadKey, PadId> {
        let mut map = HashMap::with_capacity(self.pads.len());
        for net in &self.nets {
            for key in &net.pads {
                if let Some(idx) = self
                    .pads
                    .iter()
                    .position(|p| p.reference == key.reference && p.pin == key.pin)
                {
                    map.insert(key, PadId::new(idx));
                }
            }
        }
        map
    }

    /// Pads of a net in the net's declared order. Unknown keys are skipped.
    pub fn net_pads(&self, id: NetId) -> Vec<PadId> {
        let Some(net) = self.net(id) else {
            return Vec::new();
        };
        net.pads
            .iter()
            .filter_map(|key| {
                self.pads
                    .iter()
                    .position(|p| p.reference == key.reference && p.pin == key.pin)
                    .map(PadId::new)
            })
            .collect()
    }

    pub fn pad(&self, id: PadId) -> &Pad {
        &self.pads[id.index()]
    }

    /// First surface pad placed on a layer the board does not have.
    pub fn misplaced_pad(&self) -> Option<&Pad> {
        self.pads
            .iter()
            .find(|p| !p.through_hole && p.layer >= self.layer_count)
    }

    /// Flags pads that have a pad of the same component closer than `threshold` (centre to centre).
    pub fn fine_pitch_flags(&self, threshold: f64) -> Vec<bool> {
        let mut by_component: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, pad) in self.pads.iter().enumerate() {
            by_component.entry(pad.reference.as_str()).or_default().push(i);
        }
        let mut flags = vec![false; self.pads.len()];
        for members in by_component.values() {
            for (k, &i) in members.iter().enumerate() {
                for &j in &members[k + 1..] {
                    if self.pads[i].position.dist(self.pads[j].position) < threshold {
                        flags[i] = true;
                        flags[j] = true;
                    }
                }
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smd(reference: &str, pin: &str, x: f64, y: f64) -> Pad {
        Pad {
            reference: reference.to_string(),
            pin: pin.to_string(),
            position: Point::new(x, y),
            layer: 0,
            width: 1.0,
            height: 0.5,
            through_hole: false,
            drill: 0.0,
            net: NetId::NONE,
        }
    }

    #[test]
    fn layer_sets_ignore_layers_past_the_mask() {
        assert!(LayerSet::single(40).is_empty());
        let mut set = LayerSet::single(31);
        set.insert(32);
        set.insert(255);
        assert_eq!(set.len(), 1);
        assert!(set.contains(31) && !set.contains(32));
        set.remove(200);
        assert_eq!(set, LayerSet::single(31));
        assert_eq!(LayerSet::all(40).len(), MAX_LAYERS as usize);

        let mut board = Board::new(Rect::new(Point::new(0.0, 0.0), Point::new(5.0, 5.0)), 2);
        board.add_pad(smd("U1", "1", 1.0, 1.0));
        assert!(board.misplaced_pad().is_none());
        let mut stray = smd("U1", "2", 2.0, 1.0);
        stray.layer = 33;
        board.add_pad(stray);
        assert_eq!(board.misplaced_pad().map(|p| p.pin.as_str()), Some("2"));
    }

    #[test]
    fn add_net_stamps_pads_and_skips_reserved_id() {
        let mut board = Board::new(Rect::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0)), 2);
        board.add_pad(smd("R1", "1", 1.0, 1.0));
        board.add_pad(smd("R1", "2", 3.0, 1.0));
        board.add_pad(smd("C1", "1", 5.0, 1.0));

        let net = board.add_net("VCC", vec![PadKey::new("R1", "2"), PadKey::new("C1", "1")]);
        assert_eq!(net, NetId(1));
        assert_eq!(board.pads[0].net, NetId::NONE);
        assert_eq!(board.pads[1].net, net);
        assert_eq!(board.net_pads(net), vec![PadId(1), PadId(2)]);
        assert_eq!(board.pad_lookup().len(), 2);
    }

    #[test]
    fn through_hole_pads_span_all_layers() {
        let mut pad = smd("J1", "1", 0.0, 0.0);
        assert_eq!(pad.layers(4), LayerSet::single(0));
        pad.through_hole = true;
        assert_eq!(pad.layers(4).len(), 4);
        assert_eq!(LayerSet::span(3, 1).iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn fine_pitch_only_within_a_component() {
        let mut board = Board::new(Rect::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0)), 1);
        board.add_pad(smd("U1", "1", 1.0, 1.0));
        board.add_pad(smd("U1", "2", 1.5, 1.0));
        board.add_pad(smd("R1", "1", 2.0, 1.0));
        assert_eq!(board.fine_pitch_flags(0.65), vec![true, true, false]);
    }

    #[test]
    fn route_totals() {
        let mut route = Route::new(NetId(3));
        route.segments.push(Segment {
            start: Point::new(0.0, 0.0),
            end: Point::new(3.0, 4.0),
            width: 0.2,
            layer: 0,
            net: NetId(3),
        });
        route.vias.push(Via {
            position: Point::new(3.0, 4.0),
            drill: 0.3,
            diameter: 0.6,
            layers: (0, 1),
            net: NetId(3),
        });
        assert!((route.length() - 5.0).abs() < 1e-9);
        assert_eq!(route.via_count(), 1);
        assert_eq!(route.copper().len(), 2);
    }
}
