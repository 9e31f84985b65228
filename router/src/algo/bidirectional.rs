//! Bidirectional A*: one frontier from the start pad, one from the goal pad,
//! expanded alternately. The backward frontier charges each edge the cost of
//! the forward move it reverses; a meeting adds the bend between the forward
//! arrival heading and the backward departure heading.

use super::astar::{
    Arrivals, PathSolution, RoutingWindow, SearchArena, State, expand_forward, seed,
};
use super::heuristic::{Heuristic, HeuristicContext};
use super::space::{SearchSpace, ViaCache};
use super::{DIRS, NO_DIR};
use crate::error::RouteError;
use std::collections::BinaryHeap;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Forward,
    Backward,
}

/// Pushes every legal predecessor of a closed backward node.
#[allow(clippy::too_many_arguments)]
fn expand_backward(
    space: &SearchSpace,
    window: &RoutingWindow,
    ctx: &HeuristicContext,
    heuristic: Heuristic,
    arena: &mut SearchArena,
    heap: &mut BinaryHeap<State>,
    cache: &mut ViaCache,
    index: u32,
    g: i64,
) {
    let (x, y, z) = window.coord(index);
    let next = arena.dir[index as usize];
    let Some(shared_here) = space.passable(x, y, z) else {
        return;
    };

    for dir in 0..8u8 {
        if dir % 2 == 1 && !space.rules.allow_diagonal {
            continue;
        }
        let (dx, dy) = DIRS[dir as usize];
        let (px, py) = (x as i64 - dx as i64, y as i64 - dy as i64);
        if !window.contains(px, py) {
            continue;
        }
        let (px, py) = (px as u32, py as u32);
        if !space.corner_clear(px, py, dir, z) || space.passable(px, py, z).is_none() {
            continue;
        }
        let tentative = g + space.step_cost(px, py, z, dir, next, shared_here);
        let local = window.local(px, py, z);
        if arena.relax(local, tentative, index, dir) {
            heap.push(State {
                f_score: tentative + ctx.estimate(heuristic, px, py, z, NO_DIR),
                g_score: tentative,
                index: local as u32,
            });
        }
    }

    if space.routable().len() < 2 {
        return;
    }
    let Some(via_shared) = space.via_legal(x, y, cache) else {
        return;
    };
    for &pz in space.routable() {
        if pz == z || space.passable(x, y, pz).is_none() {
            continue;
        }
        let tentative = g + space.via_cost(x, y, z, via_shared);
        let local = window.local(x, y, pz);
        if arena.relax(local, tentative, index, NO_DIR) {
            heap.push(State {
                f_score: tentative + ctx.estimate(heuristic, x, y, pz, NO_DIR),
                g_score: tentative,
                index: local as u32,
            });
        }
    }
}

/// Cells from the start seed through the meeting cell to the goal seed.
fn join(
    forward: &SearchArena,
    backward: &SearchArena,
    meet: usize,
    window: &RoutingWindow,
) -> Vec<(u32, u32, u8)> {
    let mut cells = forward.trace(meet, window);
    let mut tail = backward.trace(meet, window);
    tail.pop();
    tail.reverse();
    cells.extend(tail);
    cells
}

/// Terminates once neither frontier's cheapest open node can beat the best
/// validated meeting.
#[allow(clippy::too_many_arguments)]
pub(crate) fn search(
    space: &SearchSpace,
    window: RoutingWindow,
    heuristic: Heuristic,
    forward: &mut SearchArena,
    backward: &mut SearchArena,
    cache: &mut ViaCache,
    max_expansions: usize,
) -> Result<PathSolution, RouteError> {
    forward.ensure_capacity(window.len());
    backward.ensure_capacity(window.len());
    forward.reset();
    backward.reset();

    let ctx_f = HeuristicContext::new(space.grid, space.rules, &space.goal);
    let ctx_b = HeuristicContext::new(space.grid, space.rules, &space.start);
    let mut open_f = BinaryHeap::new();
    let mut open_b = BinaryHeap::new();
    seed(space, &space.start, &window, &ctx_f, heuristic, forward, &mut open_f);
    seed(space, &space.goal, &window, &ctx_b, heuristic, backward, &mut open_b);

    let mut arrivals = Arrivals::new();
    let mut expansions = 0usize;
    let mut exhausted = false;
    let mut turn = Side::Forward;

    loop {
        let best = arrivals.bound();
        let f_done = open_f.peek().is_none_or(|s| s.f_score >= best);
        let b_done = open_b.peek().is_none_or(|s| s.f_score >= best);
        if f_done && b_done {
            break;
        }
        let side = match (f_done, b_done) {
            (true, _) => Side::Backward,
            (_, true) => Side::Forward,
            _ => turn,
        };
        turn = if side == Side::Forward {
            Side::Backward
        } else {
            Side::Forward
        };

        let (heap, arena, other) = match side {
            Side::Forward => (&mut open_f, &mut *forward, &*backward),
            Side::Backward => (&mut open_b, &mut *backward, &*forward),
        };
        let Some(State { g_score, index, .. }) = heap.pop() else {
            continue;
        };
        let idx = index as usize;
        if arena.closed(idx) || g_score > arena.g_score[idx] {
            continue;
        }
        arena.closed_tag[idx] = arena.current_tag;

        expansions += 1;
        if expansions > max_expansions {
            exhausted = true;
            break;
        }

        if other.closed(idx) {
            let (fwd, bwd) = match side {
                Side::Forward => (&*arena, other),
                Side::Backward => (other, &*arena),
            };
            // Neither g counts the bend at the meeting cell itself.
            let cost =
                g_score + other.g_score[idx] + space.turn_cost(fwd.dir[idx], bwd.dir[idx]);
            if cost < arrivals.bound() {
                let cells = join(fwd, bwd, idx, &window);
                arrivals.offer(space, cost, &cells);
            }
        }

        match side {
            Side::Forward => expand_forward(
                space, &window, &ctx_f, heuristic, arena, heap, cache, index, g_score,
            ),
            Side::Backward => expand_backward(
                space, &window, &ctx_b, heuristic, arena, heap, cache, index, g_score,
            ),
        }
    }

    arrivals.finish(expansions, exhausted)
}
