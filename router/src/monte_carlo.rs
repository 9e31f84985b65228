//! Multi-start routing: independent trials with shuffled net orders, best kept.

use crate::detailed_router::RoutingSession;
use crate::error::RouterError;
use crate::negotiated;
use crate::result::{Progress, RoutingResult, deadline_after};
use pcb_common::db::core::Board;
use pcb_common::util::config::{Config, MonteCarloConfig};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

/// How often the caller's callback is polled while parallel trials run.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Completion first; vias and length only break ties between equally complete trials.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrialScore {
    pub routed: usize,
    pub penalty: f64,
}

impl TrialScore {
    pub fn of(result: &RoutingResult, config: &MonteCarloConfig) -> Self {
        Self {
            routed: result.stats.routed,
            penalty: config.via_penalty * result.stats.vias as f64
                + config.length_penalty * result.stats.total_length,
        }
    }

    pub fn value(&self) -> f64 {
        self.routed as f64 * 1e9 - self.penalty
    }
}

impl PartialOrd for TrialScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(
            self.routed
                .cmp(&other.routed)
                .then_with(|| other.penalty.total_cmp(&self.penalty)),
        )
    }
}

/// Shuffles `order` in place without moving any net across a priority boundary.
pub fn shuffle_within_tiers(order: &mut [usize], priority: impl Fn(usize) -> i32, rng: &mut StdRng) {
    let mut start = 0;
    while start < order.len() {
        let tier = priority(order[start]);
        let mut end = start + 1;
        while end < order.len() && priority(order[end]) == tier {
            end += 1;
        }
        order[start..end].shuffle(rng);
        start = end;
    }
}

/// One trial on private copies. Trial 0 keeps the deterministic order.
fn run_trial(
    board: &Board,
    config: &Config,
    trial: usize,
    progress: &mut Progress,
) -> Result<RoutingResult, RouterError> {
    let mut session = RoutingSession::new(board, config)?;
    let mut order = session.net_order();
    if trial > 0 {
        let mut rng = StdRng::seed_from_u64(config.monte_carlo.seed.wrapping_add(trial as u64));
        shuffle_within_tiers(&mut order, |ni| session.params(ni).priority, &mut rng);
    }
    if config.monte_carlo.negotiated {
        negotiated::negotiate(&mut session, &order, progress);
    } else {
        session.run_standard(&order, progress);
    }
    Ok(session.finish(progress))
}

type TrialOutcome = (usize, Option<Result<RoutingResult, RouterError>>);

fn guarded_trial(
    board: &Board,
    config: &Config,
    trial: usize,
    progress: &mut Progress,
) -> TrialOutcome {
    let board = board.clone();
    let config = config.clone();
    match catch_unwind(AssertUnwindSafe(|| run_trial(&board, &config, trial, progress))) {
        Ok(result) => (trial, Some(result)),
        Err(_) => {
            log::error!("MC Trial {} panicked, excluded from scoring", trial);
            (trial, None)
        }
    }
}

/// Runs the trials on a worker pool. Every trial shares the caller's deadline;
/// the calling thread keeps polling the callback and raises a shared stop flag
/// when the caller cancels.
fn run_parallel(
    board: &Board,
    config: &Config,
    progress: &mut Progress,
) -> Option<Vec<TrialOutcome>> {
    let mc = &config.monte_carlo;
    let pool = match rayon::ThreadPoolBuilder::new().num_threads(mc.threads).build() {
        Ok(pool) => pool,
        Err(e) => {
            log::warn!("MC: thread pool unavailable ({}), running trials sequentially", e);
            return None;
        }
    };
    let trials = mc.trials.max(1);
    let deadline = progress.deadline();
    let stop = Arc::new(AtomicBool::new(false));
    let finished = AtomicUsize::new(0);

    let joined = std::thread::scope(|scope| {
        let worker = scope.spawn(|| {
            pool.install(|| {
                (0..trials)
                    .into_par_iter()
                    .filter_map(|trial| {
                        let mut linked = Progress::linked(deadline, Arc::clone(&stop));
                        let outcome = linked
                            .report(0.0, &format!("Monte Carlo trial {}", trial))
                            .then(|| guarded_trial(board, config, trial, &mut linked));
                        finished.fetch_add(1, AtomicOrdering::Relaxed);
                        outcome
                    })
                    .collect::<Vec<_>>()
            })
        });
        while !worker.is_finished() {
            let done = finished.load(AtomicOrdering::Relaxed);
            let message = format!("Monte Carlo: {}/{} trials", done, trials);
            if !progress.report(done as f64 / trials as f64, &message) && progress.cancelled() {
                stop.store(true, AtomicOrdering::Relaxed);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        worker.join()
    });
    match joined {
        Ok(outcomes) => Some(outcomes),
        Err(_) => {
            log::error!("MC: trial pool panicked, no trial results");
            Some(Vec::new())
        }
    }
}

pub fn run(
    board: &Board,
    config: &Config,
    progress: &mut Progress,
) -> Result<RoutingResult, RouterError> {
    let mc = &config.monte_carlo;
    log::info!(
        "Starting Monte Carlo Routing: {} trials, seed {}, {}",
        mc.trials,
        mc.seed,
        if mc.parallel { "parallel" } else { "sequential" }
    );
    let start_time = Instant::now();
    // One deadline for the whole run, not one per trial.
    if let Some(deadline) = deadline_after(config.session.timeout_secs) {
        progress.tighten_deadline(deadline);
    }

    let parallel = if mc.parallel && progress.report(0.0, "Monte Carlo trials") {
        run_parallel(board, config, progress)
    } else {
        None
    };
    let outcomes = match parallel {
        Some(outcomes) => outcomes,
        None => {
            let mut out = Vec::with_capacity(mc.trials);
            for trial in 0..mc.trials.max(1) {
                let fraction = trial as f64 / mc.trials.max(1) as f64;
                if !progress.report(fraction, &format!("Monte Carlo trial {}", trial)) {
                    break;
                }
                out.push(guarded_trial(board, config, trial, progress));
            }
            out
        }
    };

    let mut best: Option<(TrialScore, usize, RoutingResult)> = None;
    for (trial, outcome) in outcomes {
        let result = match outcome {
            Some(Ok(result)) => result,
            Some(Err(e)) => return Err(e),
            None => continue,
        };
        let score = TrialScore::of(&result, mc);
        log::info!(
            "MC Trial {}: Routed: {}, Vias: {}, Length: {:.1}mm, Score: {:.2}",
            trial,
            result.stats.routed,
            result.stats.vias,
            result.stats.total_length,
            score.value()
        );
        if best.as_ref().is_none_or(|(b, _, _)| score > *b) {
            best = Some((score, trial, result));
        }
    }

    match best {
        Some((_, trial, mut result)) => {
            log::info!(
                "MC: kept trial {} after {:.2}s",
                trial,
                start_time.elapsed().as_secs_f64()
            );
            result.stats.elapsed_secs = start_time.elapsed().as_secs_f64();
            result.stats.cancelled |= progress.cancelled();
            result.stats.timed_out |= progress.timed_out();
            Ok(result)
        }
        None => {
            log::warn!("MC: no trial completed, falling back to a single standard pass");
            crate::detailed_router::run(board, config, progress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn more_routed_nets_always_win() {
        let many = TrialScore {
            routed: 5,
            penalty: 1e6,
        };
        let few = TrialScore {
            routed: 4,
            penalty: 0.0,
        };
        assert!(many > few);
        let cheap = TrialScore {
            routed: 5,
            penalty: 10.0,
        };
        assert!(cheap > many);
    }

    #[test]
    fn shuffle_keeps_priority_tiers() {
        let priority = |ni: usize| if ni < 4 { 1 } else { 2 };
        let mut order: Vec<usize> = (0..10).collect();
        let mut rng = StdRng::seed_from_u64(7);
        shuffle_within_tiers(&mut order, priority, &mut rng);
        let mut head = order[..4].to_vec();
        head.sort();
        assert_eq!(head, vec![0, 1, 2, 3]);
        let mut tail = order[4..].to_vec();
        tail.sort();
        assert_eq!(tail, (4..10).collect::<Vec<_>>());

        let mut again: Vec<usize> = (0..10).collect();
        shuffle_within_tiers(&mut again, priority, &mut StdRng::seed_from_u64(7));
        assert_eq!(again, order);
    }
}
