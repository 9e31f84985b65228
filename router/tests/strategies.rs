use pcb_common::db::core::Board;
use pcb_common::util::check::{self, CheckRules};
use pcb_common::util::config::{Config, Strategy};
use pcb_common::util::generator::generate_random_board;
use pcb_router::{FailureCause, Progress, RoutingResult, route};
use std::time::Instant;

fn board() -> Board {
    generate_random_board(24, 8, 11)
}

fn run(board: &Board, config: &Config) -> RoutingResult {
    route(board, config, &mut Progress::silent()).unwrap()
}

fn with_strategy(strategy: Strategy) -> Config {
    let mut config = Config::default();
    config.session.strategy = strategy;
    config
}

/// Nets with at least two pads, the ones a result must account for.
fn connectable(board: &Board) -> usize {
    board
        .nets
        .iter()
        .filter(|n| board.net_pads(n.id).len() >= 2)
        .count()
}

fn assert_legal(board: &Board, config: &Config, result: &RoutingResult) {
    let report = check::run(board, &result.routes, &CheckRules::from_config(board, config));
    assert!(
        report.violations.is_empty(),
        "{} clearance violations",
        report.violations.len()
    );
    assert!(report.opens.is_empty(), "open nets: {:?}", report.opens);
}

#[test]
fn standard_routes_are_legal() {
    let board = board();
    let config = with_strategy(Strategy::Standard);
    let result = run(&board, &config);
    assert!(result.stats.routed > 0);
    assert_eq!(result.stats.routed + result.stats.failed, board.nets.len());
    assert_legal(&board, &config, &result);
}

#[test]
fn standard_is_deterministic() {
    let board = board();
    let config = with_strategy(Strategy::Standard);
    let a = run(&board, &config);
    let b = run(&board, &config);
    assert_eq!(a.routes, b.routes);
}

#[test]
fn negotiated_overflow_never_increases() {
    let board = board();
    let config = with_strategy(Strategy::Negotiated);
    let result = run(&board, &config);
    let history = &result.stats.overflow_history;
    assert!(!history.is_empty());
    assert!(history.windows(2).all(|w| w[1] <= w[0]), "{:?}", history);
    assert_eq!(result.stats.overflow, 0);
    assert_legal(&board, &config, &result);
}

#[test]
fn monte_carlo_never_loses_to_standard() {
    let board = board();
    let standard = run(&board, &with_strategy(Strategy::Standard));

    let mut config = with_strategy(Strategy::MonteCarlo);
    config.monte_carlo.trials = 3;
    let mc = run(&board, &config);
    assert!(mc.stats.routed >= standard.stats.routed);
    assert_legal(&board, &config, &mc);

    config.monte_carlo.parallel = false;
    let sequential = run(&board, &config);
    assert_eq!(sequential.stats.routed, mc.stats.routed);
}

#[test]
fn hierarchical_strategies_route_legally() {
    let board = board();
    for strategy in [Strategy::Hierarchical, Strategy::TwoPhase] {
        for negotiated_detail in [true, false] {
            let mut config = with_strategy(strategy);
            config.session.negotiated_detail = negotiated_detail;
            let result = run(&board, &config);
            assert!(result.stats.routed > 0, "{:?} routed nothing", strategy);
            assert_legal(&board, &config, &result);
        }
    }
}

#[test]
fn cancelling_during_corridor_planning_skips_detailed_routing() {
    let board = board();
    for strategy in [Strategy::Hierarchical, Strategy::TwoPhase] {
        let config = with_strategy(strategy);
        let mut calls = 0usize;
        let mut cb = |_fraction: f64, _message: &str, continuable: bool| {
            if continuable {
                calls += 1;
            }
            false
        };
        let mut progress = Progress::new(Some(&mut cb), None);
        let result = route(&board, &config, &mut progress).unwrap();
        drop(progress);

        assert_eq!(calls, 1, "{:?}", strategy);
        assert!(result.stats.cancelled);
        assert_eq!(result.stats.routed, 0);
        assert_eq!(result.stats.failed, connectable(&board));
    }
}

#[test]
fn timeout_returns_partial_result() {
    let board = generate_random_board(200, 80, 3);
    let mut config = with_strategy(Strategy::Standard);
    config.session.timeout_secs = Some(1e-9);
    let mut progress = Progress::with_deadline(config.session.timeout_secs);
    let result = route(&board, &config, &mut progress).unwrap();
    assert!(result.stats.timed_out);
    assert!(result.stats.routed < 80);
    assert_eq!(result.stats.routed + result.stats.failed, connectable(&board));
    assert!(
        result
            .failures
            .iter()
            .any(|f| f.cause == FailureCause::Timeout)
    );
}

#[test]
fn monte_carlo_shares_one_deadline_across_trials() {
    let board = generate_random_board(400, 160, 3);
    let mut config = with_strategy(Strategy::MonteCarlo);
    config.monte_carlo.trials = 8;
    config.monte_carlo.threads = 1;
    config.session.timeout_secs = Some(0.3);

    for parallel in [true, false] {
        config.monte_carlo.parallel = parallel;
        let started = Instant::now();
        let mut progress = Progress::with_deadline(config.session.timeout_secs);
        let result = route(&board, &config, &mut progress).unwrap();
        let elapsed = started.elapsed().as_secs_f64();
        assert!(result.stats.timed_out);
        assert!(elapsed < 3.0, "parallel={} took {:.2}s", parallel, elapsed);
        assert_eq!(result.stats.routed + result.stats.failed, connectable(&board));
    }
}

#[test]
fn monte_carlo_stops_when_the_caller_cancels() {
    let board = generate_random_board(200, 80, 3);
    let mut config = with_strategy(Strategy::MonteCarlo);
    config.monte_carlo.trials = 4;

    for parallel in [true, false] {
        config.monte_carlo.parallel = parallel;
        let mut calls = 0usize;
        let mut cb = |_fraction: f64, _message: &str, continuable: bool| {
            if continuable {
                calls += 1;
            }
            calls < 2
        };
        let mut progress = Progress::new(Some(&mut cb), None);
        let result = route(&board, &config, &mut progress).unwrap();
        assert!(result.stats.cancelled, "parallel={}", parallel);
        assert!(!result.stats.timed_out);
        assert!(result.stats.routed < board.nets.len());
        assert!(
            result
                .failures
                .iter()
                .any(|f| f.cause == FailureCause::Cancelled)
        );
    }
}
