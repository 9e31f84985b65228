//! Global phase plans corridors, detailed phase routes inside them.

use crate::detailed_router::RoutingSession;
use crate::error::RouterError;
use crate::result::{Progress, RoutingResult};
use crate::{global_router, negotiated, sparse};
use pcb_common::db::core::Board;
use pcb_common::util::config::Config;
use pcb_common::util::profiler::ScopedTimer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlobalPhase {
    /// Region graph A*.
    Regions,
    /// Sparse clearance-contour visibility graph.
    Sparse,
}

fn compose(
    board: &Board,
    config: &Config,
    progress: &mut Progress,
    phase: GlobalPhase,
) -> Result<RoutingResult, RouterError> {
    let mut session = RoutingSession::new(board, config)?;
    let order = session.net_order();

    {
        let _t = ScopedTimer::new("Global phase");
        let planned = match phase {
            GlobalPhase::Regions => {
                global_router::assign_corridors(&mut session, &order, progress)
            }
            GlobalPhase::Sparse => sparse::assign_corridors(&mut session, &order, progress),
        };
        if progress.stopped() {
            session.grid.clear_corridors();
            return Ok(session.finish(progress));
        }
        if planned < order.len() {
            log::warn!(
                "{} net(s) have no corridor and route unconstrained",
                order.len() - planned
            );
        }
    }

    {
        let _t = ScopedTimer::new("Detailed phase");
        if config.session.negotiated_detail {
            negotiated::negotiate(&mut session, &order, progress);
        } else {
            session.run_standard(&order, progress);
        }
    }

    session.grid.clear_corridors();
    Ok(session.finish(progress))
}

/// Region-graph corridors, then negotiated or standard detailed routing.
pub fn run_hierarchical(
    board: &Board,
    config: &Config,
    progress: &mut Progress,
) -> Result<RoutingResult, RouterError> {
    log::info!("Starting Hierarchical Routing...");
    compose(board, config, progress, GlobalPhase::Regions)
}

/// Sparse-graph corridors, then negotiated or standard detailed routing.
pub fn run_two_phase(
    board: &Board,
    config: &Config,
    progress: &mut Progress,
) -> Result<RoutingResult, RouterError> {
    log::info!("Starting Two-Phase Routing...");
    compose(board, config, progress, GlobalPhase::Sparse)
}
