use super::rect::Rect;
use super::shape::Shape;
use crate::db::core::LayerSet;
use crate::db::indices::{NetId, PadId};
use rstar::{AABB, RTree};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CopperOwner {
    Pad(PadId),
    Keepout(usize),
    Route,
}

#[derive(Clone, Debug)]
pub struct CopperItem {
    pub shape: Shape,
    pub net: NetId,
    pub layers: LayerSet,
    pub owner: CopperOwner,
    /// Clearance demanded by this copper: component override or fine pitch for
    /// pads, the owning net's clearance for routed copper.
    pub clearance: Option<f64>,
}

#[derive(Clone, Debug)]
struct IndexedItem {
    id: u64,
    item: CopperItem,
}

impl PartialEq for IndexedItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl rstar::RTreeObject for IndexedItem {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        let r = self.item.shape.bbox();
        AABB::from_corners([r.min.x, r.min.y], [r.max.x, r.max.y])
    }
}

/// Exact copper geometry of a board (static pads, keepouts and routed copper).
#[derive(Clone)]
pub struct CopperIndex {
    tree: RTree<IndexedItem>,
    routed: Vec<IndexedItem>,
    next_id: u64,
}

impl Default for CopperIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl CopperIndex {
    pub fn new() -> Self {
        Self {
            tree: RTree::new(),
            routed: Vec::new(),
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn insert(&mut self, item: CopperItem) {
        let indexed = IndexedItem {
            id: self.next_id,
            item,
        };
        self.next_id += 1;
        if indexed.item.owner == CopperOwner::Route {
            self.routed.push(indexed.clone());
        }
        self.tree.insert(indexed);
    }

    /// Removes one routed item with exactly this shape and net. Returns false if none matched.
    pub fn remove_routed(&mut self, net: NetId, shape: &Shape, layers: LayerSet) -> bool {
        let pos = self
            .routed
            .iter()
            .position(|i| i.item.net == net && i.item.layers == layers && i.item.shape == *shape);
        match pos {
            Some(pos) => {
                let indexed = self.routed.swap_remove(pos);
                self.tree.remove(&indexed).is_some()
            }
            None => false,
        }
    }

    pub fn query(&self, rect: Rect) -> impl Iterator<Item = &CopperItem> {
        let aabb = AABB::from_corners([rect.min.x, rect.min.y], [rect.max.x, rect.max.y]);
        self.tree
            .locate_in_envelope_intersecting(&aabb)
            .map(|indexed| &indexed.item)
    }

    /// First copper of a different net that sits closer than the required clearance to `shape`.
    ///
    /// A static item carrying its own clearance demand (component override, fine pitch)
    /// uses it in place of `clearance`. Routed copper requires the larger of both nets'
    /// clearances. Routed copper is skipped when `include_routed` is false.
    pub fn first_violation(
        &self,
        shape: &Shape,
        layers: LayerSet,
        net: NetId,
        clearance: f64,
        max_clearance: f64,
        include_routed: bool,
    ) -> Option<&CopperItem> {
        let probe = shape.bbox().expand(max_clearance.max(clearance));
        self.query(probe).find(|other| {
            if other.net == net && !net.is_none() {
                return false;
            }
            if !include_routed && other.owner == CopperOwner::Route {
                return false;
            }
            if !other.layers.intersects(layers) {
                return false;
            }
            let required = match (other.owner, other.clearance) {
                (CopperOwner::Route, Some(c)) => clearance.max(c),
                (_, Some(c)) => c.max(0.0),
                (_, None) => clearance,
            };
            shape.gap(&other.shape) < required - 1e-6
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::point::Point;

    fn pad(net: u32, x: f64) -> CopperItem {
        CopperItem {
            shape: Shape::Rect(Rect::from_center(Point::new(x, 0.0), 1.0, 1.0)),
            net: NetId(net),
            layers: LayerSet::single(0),
            owner: CopperOwner::Pad(PadId(net)),
            clearance: None,
        }
    }

    #[test]
    fn violation_ignores_same_net_and_other_layers() {
        let mut index = CopperIndex::new();
        index.insert(pad(1, 0.0));
        index.insert(pad(2, 3.0));

        let trace = Shape::Segment {
            a: Point::new(0.0, 0.0),
            b: Point::new(2.3, 0.0),
            width: 0.2,
        };
        assert!(
            index
                .first_violation(&trace, LayerSet::single(0), NetId(1), 0.2, 0.2, true)
                .is_some()
        );
        assert!(
            index
                .first_violation(&trace, LayerSet::single(1), NetId(1), 0.2, 0.2, true)
                .is_none()
        );

        let short = Shape::Segment {
            a: Point::new(0.0, 0.0),
            b: Point::new(2.0, 0.0),
            width: 0.2,
        };
        assert!(
            index
                .first_violation(&short, LayerSet::single(0), NetId(1), 0.2, 0.2, true)
                .is_none()
        );
    }

    #[test]
    fn routed_copper_needs_the_larger_clearance() {
        let mut index = CopperIndex::new();
        index.insert(CopperItem {
            shape: Shape::Segment {
                a: Point::new(0.0, 0.0),
                b: Point::new(10.0, 0.0),
                width: 0.2,
            },
            net: NetId(1),
            layers: LayerSet::single(0),
            owner: CopperOwner::Route,
            clearance: Some(0.5),
        });
        // Edge to edge 0.3mm: enough for our own 0.2mm, not for the wide net's 0.5mm.
        let trace = Shape::Segment {
            a: Point::new(2.0, 0.5),
            b: Point::new(8.0, 0.5),
            width: 0.2,
        };
        let hit = index.first_violation(&trace, LayerSet::single(0), NetId(2), 0.2, 0.5, true);
        assert!(hit.is_some_and(|i| i.net == NetId(1)));

        let far = Shape::Segment {
            a: Point::new(2.0, 0.75),
            b: Point::new(8.0, 0.75),
            width: 0.2,
        };
        assert!(
            index
                .first_violation(&far, LayerSet::single(0), NetId(2), 0.2, 0.5, true)
                .is_none()
        );
        assert!(
            index
                .first_violation(&trace, LayerSet::single(0), NetId(2), 0.2, 0.5, false)
                .is_none()
        );
    }

    #[test]
    fn routed_items_round_trip() {
        let mut index = CopperIndex::new();
        let shape = Shape::Circle {
            center: Point::new(1.0, 1.0),
            radius: 0.3,
        };
        index.insert(CopperItem {
            shape,
            net: NetId(4),
            layers: LayerSet::all(2),
            owner: CopperOwner::Route,
            clearance: None,
        });
        assert_eq!(index.len(), 1);
        assert!(index.remove_routed(NetId(4), &shape, LayerSet::all(2)));
        assert!(index.is_empty());
        assert!(!index.remove_routed(NetId(4), &shape, LayerSet::all(2)));
    }
}
