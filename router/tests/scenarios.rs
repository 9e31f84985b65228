use pcb_common::db::core::{Board, Keepout, Pad};
use pcb_common::db::indices::PadId;
use pcb_common::geom::point::Point;
use pcb_common::geom::rect::Rect;
use pcb_common::util::check::{self, CheckRules};
use pcb_common::util::config::{Config, HeuristicKind, NetClassRouting, Strategy};
use pcb_router::algo::astar::{RouteRequest, Router};
use pcb_router::detailed_router::RoutingSession;
use pcb_router::grid::RoutingGrid;
use pcb_router::rules::NetParams;
use pcb_router::{FailureCause, Progress, RouterError, route};

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Rect {
    Rect::new(Point::new(x0, y0), Point::new(x1, y1))
}

fn smd(reference: &str, x: f64, y: f64, layer: u8, size: f64) -> Pad {
    Pad {
        reference: reference.to_string(),
        pin: "1".to_string(),
        position: Point::new(x, y),
        layer,
        width: size,
        height: size,
        through_hole: false,
        drill: 0.0,
        net: Default::default(),
    }
}

fn two_pad_net(board: &mut Board, name: &str, a: Pad, b: Pad) {
    let keys = vec![a.key(), b.key()];
    board.add_pad(a);
    board.add_pad(b);
    board.add_net(name, keys);
}

#[test]
fn straight_connection_is_a_single_segment() {
    let mut board = Board::new(rect(-5.0, -5.0, 15.0, 5.0), 1);
    two_pad_net(
        &mut board,
        "N1",
        smd("U1", 0.0, 0.0, 0, 1.0),
        smd("U2", 10.0, 0.0, 0, 1.0),
    );
    let config = Config::default();
    let result = route(&board, &config, &mut Progress::silent()).unwrap();

    assert!(result.is_complete());
    let r = result.route_for(board.nets[0].id).unwrap();
    assert!(r.vias.is_empty());
    assert_eq!(r.segments.len(), 1);
    let seg = &r.segments[0];
    assert!(seg.start.approx_eq(Point::new(0.0, 0.0), 1e-6));
    assert!(seg.end.approx_eq(Point::new(10.0, 0.0), 1e-6));
    assert!((seg.width - 0.2).abs() < 1e-9);
    assert!((r.length() - 10.0).abs() < 1e-6);
}

#[test]
fn pads_on_different_layers_get_one_via() {
    let mut board = Board::new(rect(-3.0, -3.0, 8.0, 8.0), 2);
    two_pad_net(
        &mut board,
        "N1",
        smd("U1", 0.0, 0.0, 0, 1.0),
        smd("U2", 5.0, 5.0, 1, 1.0),
    );
    let config = Config::default();
    let result = route(&board, &config, &mut Progress::silent()).unwrap();

    assert_eq!(result.stats.routed, 1);
    let r = &result.routes[0];
    assert_eq!(r.vias.len(), 1);
    assert_eq!(r.vias[0].layers, (0, 1));
    assert_eq!(result.stats.vias, 1);
    assert!(r.segments.iter().any(|s| s.layer == 0));
    assert!(r.segments.iter().any(|s| s.layer == 1));

    let report = check::run(&board, &result.routes, &CheckRules::from_config(&board, &config));
    assert!(report.is_clean());
}

/// Two walls leave a channel that fits exactly one trace.
fn channel_board() -> Board {
    let mut board = Board::new(rect(-10.0, -6.0, 10.0, 6.0), 1);
    board.keepouts.push(Keepout {
        area: rect(-0.5, 0.2, 0.5, 4.0),
        layers: vec![],
    });
    board.keepouts.push(Keepout {
        area: rect(-0.5, -4.0, 0.5, -0.2),
        layers: vec![],
    });
    two_pad_net(
        &mut board,
        "A",
        smd("A1", -8.0, 0.0, 0, 0.6),
        smd("A2", 8.0, 0.0, 0, 0.6),
    );
    two_pad_net(
        &mut board,
        "B",
        smd("B1", -8.0, 1.5, 0, 0.6),
        smd("B2", 8.0, 1.5, 0, 0.6),
    );
    board
}

#[test]
fn negotiation_resolves_shared_channel() {
    let board = channel_board();
    let mut config = Config::default();
    config.session.strategy = Strategy::Negotiated;
    let result = route(&board, &config, &mut Progress::silent()).unwrap();

    assert_eq!(result.stats.routed, 2, "failures: {:?}", result.failures);
    assert!(board.nets.iter().all(|n| result.failure_for(n.id).is_none()));
    assert_eq!(result.stats.overflow, 0);
    let history = &result.stats.overflow_history;
    assert!(!history.is_empty());
    assert!(history.windows(2).all(|w| w[1] <= w[0]), "{:?}", history);

    let detoured = result.routes.iter().any(|r| {
        r.segments
            .iter()
            .any(|s| s.start.y.abs() > 4.0 || s.end.y.abs() > 4.0)
    });
    assert!(detoured);

    let report = check::run(&board, &result.routes, &CheckRules::from_config(&board, &config));
    assert!(report.violations.is_empty());
}

#[test]
fn later_nets_keep_the_wide_class_clearance() {
    let mut board = Board::new(rect(-2.0, -3.0, 12.0, 5.0), 1);
    // The short way for B squeezes between this keepout and A's trace.
    board.keepouts.push(Keepout {
        area: rect(3.0, 0.5, 7.0, 3.5),
        layers: vec![],
    });
    two_pad_net(
        &mut board,
        "A",
        smd("A1", 0.0, 0.0, 0, 0.6),
        smd("A2", 10.0, 0.0, 0, 0.6),
    );
    two_pad_net(
        &mut board,
        "B",
        smd("B1", 2.0, 1.5, 0, 0.6),
        smd("B2", 8.0, 1.5, 0, 0.6),
    );
    let mut config = Config::default();
    let mut wide = NetClassRouting::new("wide");
    wide.priority = 1;
    wide.clearance = Some(0.5);
    wide.nets.push("A".to_string());
    config.net_classes.push(wide);

    let result = route(&board, &config, &mut Progress::silent()).unwrap();
    assert_eq!(result.stats.routed, 2, "failures: {:?}", result.failures);
    let report = check::run(&board, &result.routes, &CheckRules::from_config(&board, &config));
    assert!(report.violations.is_empty(), "{:?}", report.violations);

    let b = result.route_for(board.nets[1].id).unwrap();
    assert!(
        b.segments.iter().all(|s| s.start.y > 0.5 && s.end.y > 0.5),
        "B passed under the keepout: {:?}",
        b.segments
    );
}

#[test]
fn bidirectional_search_matches_unidirectional_cost() {
    let mut board = Board::new(rect(0.0, 0.0, 30.0, 20.0), 1);
    board.keepouts.push(Keepout {
        area: rect(14.0, 4.0, 16.0, 16.0),
        layers: vec![],
    });
    two_pad_net(
        &mut board,
        "N1",
        smd("U1", 3.0, 10.0, 0, 1.0),
        smd("U2", 27.0, 10.0, 0, 1.0),
    );
    let mut config = Config::default();
    config.rules.cost_turn = 0.0;
    config.rules.heuristic = HeuristicKind::Manhattan;

    let grid = RoutingGrid::build(&board, &config.rules).unwrap();
    let params = NetParams::for_board(&board, &config);
    let req = RouteRequest {
        start: PadId::new(0),
        goal: PadId::new(1),
        present: None,
    };
    let mut router = Router::new();
    let uni = router
        .route(&grid, &board, &config.rules, &params[0], &req)
        .unwrap();
    let bi = router
        .route_bidirectional(&grid, &board, &config.rules, &params[0], &req)
        .unwrap();

    assert!((uni.cost - bi.cost).abs() < 1e-9, "{} vs {}", uni.cost, bi.cost);
    assert!(uni.cost > 24.0);
    for sol in [&uni, &bi] {
        let first = sol.route.segments.first().unwrap();
        let last = sol.route.segments.last().unwrap();
        assert!(first.start.approx_eq(Point::new(3.0, 10.0), 1e-6));
        assert!(last.end.approx_eq(Point::new(27.0, 10.0), 1e-6));
    }
}

#[test]
fn bidirectional_search_charges_bends_where_frontiers_meet() {
    let mut board = Board::new(rect(-2.0, -2.0, 7.0, 7.0), 1);
    two_pad_net(
        &mut board,
        "N1",
        smd("U1", 0.0, 0.0, 0, 1.0),
        smd("U2", 5.0, 5.0, 0, 1.0),
    );
    let mut config = Config::default();
    config.rules.allow_diagonal = false;
    config.rules.cost_turn = 5.0;
    config.rules.heuristic = HeuristicKind::Manhattan;

    let grid = RoutingGrid::build(&board, &config.rules).unwrap();
    let params = NetParams::for_board(&board, &config);
    let req = RouteRequest {
        start: PadId::new(0),
        goal: PadId::new(1),
        present: None,
    };
    let mut router = Router::new();
    let uni = router
        .route(&grid, &board, &config.rules, &params[0], &req)
        .unwrap();
    let bi = router
        .route_bidirectional(&grid, &board, &config.rules, &params[0], &req)
        .unwrap();

    // 100 straight steps and at least one right-angle bend.
    assert!(uni.cost >= 105.0 - 1e-9, "{}", uni.cost);
    assert!((uni.cost - bi.cost).abs() < 1e-9, "{} vs {}", uni.cost, bi.cost);
}

#[test]
fn caller_can_cancel_between_nets() {
    let mut board = Board::new(rect(0.0, 0.0, 20.0, 20.0), 1);
    for (i, y) in [3.0, 9.0, 15.0].into_iter().enumerate() {
        two_pad_net(
            &mut board,
            &format!("N{}", i),
            smd(&format!("L{}", i), 2.0, y, 0, 1.0),
            smd(&format!("R{}", i), 18.0, y, 0, 1.0),
        );
    }
    let config = Config::default();

    let mut calls = 0usize;
    let mut finished = false;
    let mut cb = |_fraction: f64, _message: &str, continuable: bool| {
        if !continuable {
            finished = true;
            return false;
        }
        calls += 1;
        calls < 2
    };
    let mut progress = Progress::new(Some(&mut cb), None);
    let result = route(&board, &config, &mut progress).unwrap();

    assert!(result.stats.cancelled);
    assert!(!result.stats.timed_out);
    assert_eq!(result.stats.routed, 1);
    assert_eq!(result.stats.failed, 2);
    assert!(
        result
            .failures
            .iter()
            .all(|f| f.cause == FailureCause::Cancelled)
    );
    drop(progress);
    assert!(finished);
    assert_eq!(calls, 2);
}

#[test]
fn rip_up_and_reroute_reproduces_route() {
    let board = channel_board();
    let config = Config::default();
    let mut session = RoutingSession::new(&board, &config).unwrap();
    let a = session.index_of(board.nets[0].id).unwrap();

    let first = session.route_net(a, None).unwrap();
    session.commit(a, first.clone());
    assert!(session.is_routed(a));

    let removed = session.rip_up(a).unwrap();
    assert_eq!(removed, first);
    assert!(!session.is_routed(a));
    assert_eq!(session.ripup_count(a), 1);

    let again = session.route_net(a, None).unwrap();
    assert_eq!(again, first);
}

#[test]
fn pads_on_missing_layers_are_rejected() {
    let mut board = Board::new(rect(0.0, 0.0, 10.0, 10.0), 2);
    two_pad_net(
        &mut board,
        "N1",
        smd("U1", 2.0, 5.0, 0, 1.0),
        smd("U2", 8.0, 5.0, 40, 1.0),
    );
    let err = route(&board, &Config::default(), &mut Progress::silent()).unwrap_err();
    assert!(matches!(
        err,
        RouterError::PadLayerOutOfRange { layer: 40, layer_count: 2, .. }
    ));

    board.layer_count = 33;
    board.pads[1].layer = 1;
    let err = route(&board, &Config::default(), &mut Progress::silent()).unwrap_err();
    assert!(matches!(err, RouterError::TooManyLayers { layers: 33, .. }));
}
