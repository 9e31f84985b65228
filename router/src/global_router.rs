use crate::algo::mst;
use crate::detailed_router::RoutingSession;
use crate::grid::{Corridor, Waypoint};
use crate::region::RegionGraph;
use crate::result::Progress;
use pcb_common::geom::point::Point;
use pcb_common::util::config::Topology;
use std::io::Write;
use std::time::Instant;

/// Plans a corridor per tree connection over the region graph, recording
/// utilization so later nets steer around busy regions.
pub struct GlobalRouter {
    graph: RegionGraph,
    half_width: f64,
}

impl GlobalRouter {
    pub fn new(graph: RegionGraph, half_width: f64) -> Self {
        Self { graph, half_width }
    }

    pub fn graph(&self) -> &RegionGraph {
        &self.graph
    }

    /// Waypoints run from `from` through the centres of the intermediate
    /// regions to `to`.
    pub fn plan_connection(&mut self, from: Waypoint, to: Waypoint) -> Option<Corridor> {
        let ra = self.graph.region_of(from.point());
        let rb = self.graph.region_of(to.point());
        let path = self.graph.find_path(ra, rb)?;
        self.graph.commit(&path);

        let mut waypoints = Vec::with_capacity(path.len() + 1);
        waypoints.push(from);
        if path.len() > 2 {
            for &r in &path[1..path.len() - 1] {
                waypoints.push(Waypoint::new(self.graph.regions[r].center(), from.layer));
            }
        }
        waypoints.push(to);
        Some(Corridor {
            waypoints,
            half_width: self.half_width,
        })
    }

    pub fn plan_net(
        &mut self,
        pads: &[Waypoint],
        topology: Topology,
    ) -> Option<Vec<Corridor>> {
        let points: Vec<Point<f64>> = pads.iter().map(Waypoint::point).collect();
        mst::decompose(&points, topology)
            .into_iter()
            .map(|(a, b)| self.plan_connection(pads[a], pads[b]))
            .collect()
    }
}

/// Builds the region graph for a session, plans every net in `order` and
/// installs the corridors on the grid. Returns the number of nets with a corridor.
pub fn assign_corridors(
    session: &mut RoutingSession,
    order: &[usize],
    progress: &mut Progress,
) -> usize {
    log::info!("Starting Global Routing...");
    let start_time = Instant::now();
    let config = session.config;
    let graph = RegionGraph::build(&session.grid, &config.rules, &config.global_routing);
    let mut router = GlobalRouter::new(graph, config.global_routing.corridor_half_width);

    let mut planned = 0usize;
    let total = order.len().max(1);
    for (k, &ni) in order.iter().enumerate() {
        let message = format!("Planning {}", session.params(ni).name);
        if !progress.report(k as f64 / total as f64, &message) {
            break;
        }
        let pads = session.pad_waypoints(ni);
        match router.plan_net(&pads, config.session.topology) {
            Some(corridors) => {
                session.grid.set_corridors(session.params(ni).net, &corridors);
                planned += 1;
            }
            None => log::debug!("GR: no region path for {}", session.params(ni).name),
        }
        if (k + 1) % 50 == 0 || k + 1 == order.len() {
            eprint!(
                "\r\x1b[36m[GR] {}/{} Time: {:.1}s\x1b[0m\x1b[K",
                k + 1,
                order.len(),
                start_time.elapsed().as_secs_f32()
            );
            let _ = std::io::stderr().flush();
        }
    }
    eprint!("\r\x1b[K");

    log::info!(
        "Global Routing: {}/{} nets planned, {} overflowed region edges, Time: {}ms",
        planned,
        order.len(),
        router.graph().overflowed_edges(),
        start_time.elapsed().as_millis()
    );
    planned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::RoutingGrid;
    use pcb_common::db::core::Board;
    use pcb_common::geom::rect::Rect;
    use pcb_common::util::config::{DesignRules, GlobalRoutingConfig};

    #[test]
    fn corridor_is_anchored_to_pads() {
        let board = Board::new(Rect::new(Point::new(0.0, 0.0), Point::new(30.0, 10.0)), 2);
        let rules = DesignRules::default();
        let grid = RoutingGrid::build(&board, &rules).unwrap();
        let graph = RegionGraph::build(&grid, &rules, &GlobalRoutingConfig::default());
        let mut router = GlobalRouter::new(graph, 1.0);

        let a = Waypoint::new(Point::new(1.0, 2.0), 0);
        let b = Waypoint::new(Point::new(28.0, 2.5), 0);
        let corridor = router.plan_connection(a, b).unwrap();
        assert_eq!(corridor.waypoints.first(), Some(&a));
        assert_eq!(corridor.waypoints.last(), Some(&b));
        assert_eq!(corridor.waypoints.len(), 6);
        assert!(corridor.contains(Point::new(15.0, 2.5)));
        assert!(!corridor.contains(Point::new(15.0, 8.0)));
        assert!(router.graph().regions[2].utilization > 0.0);
    }
}
