//! PathFinder-style negotiated congestion: nets may share cells at a rising
//! present cost while history accumulates on over-used cells, until no cell
//! is over capacity. A final pass reroutes anything still shared strictly.

use crate::algo::validate;
use crate::detailed_router::RoutingSession;
use crate::error::RouterError;
use crate::result::{FailureCause, Progress, RoutingResult};
use pcb_common::db::core::Board;
use pcb_common::util::config::Config;
use std::collections::BTreeSet;
use std::io::Write;
use std::time::Instant;

fn route_shared(session: &mut RoutingSession, ni: usize, present: f64) -> bool {
    match session.route_net(ni, Some(present)) {
        Ok(route) => {
            session.commit(ni, route);
            true
        }
        Err((cause, message)) => {
            session.fail(ni, cause, message);
            false
        }
    }
}

/// Runs the negotiation loop over `order` on an empty or partially routed session.
pub fn negotiate(session: &mut RoutingSession, order: &[usize], progress: &mut Progress) {
    let cfg = session.config.negotiated.clone();
    let mut present = cfg.initial_present_factor;
    let position: Vec<usize> = {
        let mut pos = vec![usize::MAX; session.net_count()];
        for (k, &ni) in order.iter().enumerate() {
            pos[ni] = k;
        }
        pos
    };

    log::info!("NR: Initial sharing pass for {} nets...", order.len());
    let start_time = Instant::now();
    for (k, &ni) in order.iter().enumerate() {
        if session.is_routed(ni) {
            continue;
        }
        let msg = format!("Initial route {}", session.params(ni).name);
        if !progress.report(0.5 * k as f64 / order.len().max(1) as f64, &msg) {
            break;
        }
        route_shared(session, ni, present);
        if (k + 1) % 10 == 0 || k + 1 == order.len() {
            eprint!(
                "\r\x1b[36m[NR Init] {}/{} Time: {:.1}s\x1b[0m\x1b[K",
                k + 1,
                order.len(),
                start_time.elapsed().as_secs_f32()
            );
            let _ = std::io::stderr().flush();
        }
    }
    eprint!("\r\x1b[K");

    let mut overflow = session.overflow();
    session.overflow_history.push(overflow);
    log::info!("NR: Initial overflow {}", overflow);

    for iter in 0..cfg.max_iterations {
        if overflow == 0 {
            log::info!("Negotiated Routing Converged at iter {}!", iter);
            break;
        }
        let fraction = 0.5 + 0.4 * iter as f64 / cfg.max_iterations.max(1) as f64;
        if !progress.report(fraction, &format!("Negotiation iteration {}", iter)) {
            break;
        }
        let start = Instant::now();

        present *= cfg.present_factor_multiplier;
        let hot = session
            .grid
            .overflow_cells(&|n| session.clearance_of(n));
        session.grid.decay_history(cfg.history_decay);
        session.grid.add_history(&hot, cfg.history_increment);

        let mut victims: BTreeSet<(usize, usize)> = session
            .overflowed_nets()
            .into_iter()
            .map(|ni| (position[ni], ni))
            .collect();
        for &ni in order {
            if !session.is_routed(ni) && session.failure_of(ni).is_some() {
                victims.insert((position[ni], ni));
            }
        }
        let victims: Vec<usize> = victims.into_iter().map(|(_, ni)| ni).collect();

        let saved = session.snapshot(&victims);
        for &ni in &victims {
            session.rip_up(ni);
        }
        let mut rerouted = 0usize;
        for &ni in &victims {
            if route_shared(session, ni, present) {
                rerouted += 1;
            }
        }

        let next = session.overflow();
        session.iterations += 1;
        if next > overflow {
            log::warn!(
                "NR Iter {}: overflow rose {} -> {}, keeping previous routes",
                iter,
                overflow,
                next
            );
            session.restore(saved);
        } else {
            overflow = next;
        }
        session.overflow_history.push(overflow);

        log::info!(
            "NR Iter {}: Overflow: {}, Ripped: {}, Rerouted: {}, Present: {:.2}, Time: {}ms",
            iter,
            overflow,
            victims.len(),
            rerouted,
            present,
            start.elapsed().as_millis()
        );
    }

    legalize(session, &position);
}

/// Strictly reroutes every net that still shares cells or breaks exact
/// clearance. A net that only overlaps on the grid keeps its old route if the
/// strict reroute fails.
fn legalize(session: &mut RoutingSession, position: &[usize]) {
    let mut pending: BTreeSet<(usize, usize)> = BTreeSet::new();
    for ni in session.overflowed_nets() {
        pending.insert((position[ni], ni));
    }
    for ni in session.illegal_nets() {
        pending.insert((position[ni], ni));
    }
    if pending.is_empty() {
        return;
    }
    log::info!("NR: Legalizing {} net(s)", pending.len());

    let mut dropped = 0usize;
    for (_, ni) in pending {
        let Some(route) = session.route_of(ni) else {
            continue;
        };
        let illegal = !validate::is_legal(&session.grid, route, session.params(ni), true);
        let saved = session.snapshot(&[ni]);
        session.rip_up(ni);
        match session.route_net(ni, None) {
            Ok(route) => session.commit(ni, route),
            Err(_) if !illegal => session.restore(saved),
            Err((_, message)) => {
                dropped += 1;
                session.fail(ni, FailureCause::Congestion, message);
            }
        }
    }
    if dropped > 0 {
        log::warn!("NR: {} net(s) could not be legalized", dropped);
    }
}

pub fn run(
    board: &Board,
    config: &Config,
    progress: &mut Progress,
) -> Result<RoutingResult, RouterError> {
    log::info!("Starting Negotiated Routing...");
    let mut session = RoutingSession::new(board, config)?;
    let order = session.net_order();
    negotiate(&mut session, &order, progress);
    Ok(session.finish(progress))
}
