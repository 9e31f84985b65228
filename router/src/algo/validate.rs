use crate::grid::RoutingGrid;
use crate::rules::NetParams;
use pcb_common::db::core::{LayerSet, Route};
use pcb_common::geom::rtree::CopperItem;

/// First piece of existing copper the candidate route would violate.
///
/// Routed copper of other nets is only considered when `include_routed` is set;
/// negotiated passes deliberately overlap it.
pub fn first_conflict<'g>(
    grid: &'g RoutingGrid,
    route: &Route,
    params: &NetParams,
    include_routed: bool,
) -> Option<&'g CopperItem> {
    let index = grid.copper();
    let max = grid.max_clearance();
    for seg in &route.segments {
        let hit = index.first_violation(
            &seg.shape(),
            LayerSet::single(seg.layer),
            params.net,
            params.clearance,
            max,
            include_routed,
        );
        if hit.is_some() {
            return hit;
        }
    }
    for via in &route.vias {
        let hit = index.first_violation(
            &via.shape(),
            via.layer_set(),
            params.net,
            params.via_clearance,
            max,
            include_routed,
        );
        if hit.is_some() {
            return hit;
        }
    }
    None
}

pub fn is_legal(grid: &RoutingGrid, route: &Route, params: &NetParams, include_routed: bool) -> bool {
    first_conflict(grid, route, params, include_routed).is_none()
}
