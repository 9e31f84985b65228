pub mod algo;
pub mod detailed_router;
pub mod error;
pub mod global_router;
pub mod grid;
pub mod hierarchical;
pub mod monte_carlo;
pub mod negotiated;
pub mod region;
pub mod result;
pub mod rules;
pub mod sparse;
pub mod utils;

pub use error::{RouteError, RouterError};
pub use result::{FailureCause, Progress, RoutingFailure, RoutingResult, RoutingStats};

use pcb_common::db::core::Board;
use pcb_common::util::config::{Config, Strategy};
use pcb_common::util::profiler::ScopedTimer;

/// Routes every net of the board with the configured strategy. Per-net
/// failures are part of the result; only setup problems are errors.
pub fn route(
    board: &Board,
    config: &Config,
    progress: &mut Progress,
) -> Result<RoutingResult, RouterError> {
    let _t = ScopedTimer::new("Routing");
    let result = match config.session.strategy {
        Strategy::Standard => detailed_router::run(board, config, progress),
        Strategy::Negotiated => negotiated::run(board, config, progress),
        Strategy::Hierarchical => hierarchical::run_hierarchical(board, config, progress),
        Strategy::TwoPhase => hierarchical::run_two_phase(board, config, progress),
        Strategy::MonteCarlo => monte_carlo::run(board, config, progress),
    }?;
    progress.done(&format!(
        "Routed {} nets, {} failed",
        result.stats.routed, result.stats.failed
    ));
    Ok(result)
}
