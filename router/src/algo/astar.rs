use super::heuristic::{Heuristic, HeuristicContext};
use super::path::build_route;
use super::space::{SearchSpace, Terminal, ViaCache};
use super::validate;
use super::{COST_SCALE, DIRS, NO_DIR, octile_scaled};
use crate::error::RouteError;
use crate::grid::{Disk, RoutingGrid};
use crate::rules::NetParams;
use pcb_common::db::core::{Board, Route};
use pcb_common::db::indices::PadId;
use pcb_common::util::config::DesignRules;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

#[derive(Copy, Clone, Eq, PartialEq)]
pub(crate) struct State {
    pub f_score: i64,
    pub g_score: i64,
    pub index: u32,
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_score
            .cmp(&self.f_score)
            .then_with(|| self.g_score.cmp(&other.g_score))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct RoutingWindow {
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
    pub width: u32,
    pub height: u32,
    pub layers: u8,
}

impl RoutingWindow {
    pub fn new(
        (x0, x1, y0, y1): (u32, u32, u32, u32),
        margin: u32,
        grid_w: u32,
        grid_h: u32,
        layers: u8,
    ) -> Self {
        let min_x = x0.saturating_sub(margin);
        let max_x = (x1 + margin).min(grid_w - 1);
        let min_y = y0.saturating_sub(margin);
        let max_y = (y1 + margin).min(grid_h - 1);
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
            layers,
        }
    }

    pub fn full(grid: &RoutingGrid) -> Self {
        Self::new(
            (0, grid.width() - 1, 0, grid.height() - 1),
            0,
            grid.width(),
            grid.height(),
            grid.layers(),
        )
    }

    /// Bounding window of both terminals grown by `margin` cells.
    pub fn around(a: &Terminal, b: &Terminal, margin: u32, grid: &RoutingGrid) -> Self {
        let span = (
            a.span.0.min(b.span.0),
            a.span.1.max(b.span.1),
            a.span.2.min(b.span.2),
            a.span.3.max(b.span.3),
        );
        Self::new(span, margin, grid.width(), grid.height(), grid.layers())
    }

    pub fn is_full(&self, grid: &RoutingGrid) -> bool {
        self.min_x == 0
            && self.min_y == 0
            && self.max_x == grid.width() - 1
            && self.max_y == grid.height() - 1
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        (self.width * self.height) as usize * self.layers as usize
    }

    #[inline(always)]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.min_x as i64
            && x <= self.max_x as i64
            && y >= self.min_y as i64
            && y <= self.max_y as i64
    }

    #[inline(always)]
    pub fn local(&self, x: u32, y: u32, z: u8) -> usize {
        let lx = x - self.min_x;
        let ly = y - self.min_y;
        (z as usize) * (self.width * self.height) as usize
            + (ly * self.width + lx) as usize
    }

    #[inline(always)]
    pub fn coord(&self, idx: u32) -> (u32, u32, u8) {
        let plane = self.width * self.height;
        let z = (idx / plane) as u8;
        let rem = idx % plane;
        (rem % self.width + self.min_x, rem / self.width + self.min_y, z)
    }
}

/// Per-node search state indexed by window-local cell. Tags avoid clearing between searches.
#[derive(Clone)]
pub(crate) struct SearchArena {
    pub parents: Vec<u32>,
    pub g_score: Vec<i64>,
    pub dir: Vec<u8>,
    pub visited_tag: Vec<u32>,
    pub closed_tag: Vec<u32>,
    pub current_tag: u32,
    capacity: usize,
}

impl SearchArena {
    pub fn new() -> Self {
        let cap = 100_000;
        Self {
            parents: vec![u32::MAX; cap],
            g_score: vec![i64::MAX; cap],
            dir: vec![NO_DIR; cap],
            visited_tag: vec![0; cap],
            closed_tag: vec![0; cap],
            current_tag: 1,
            capacity: cap,
        }
    }

    pub fn ensure_capacity(&mut self, size: usize) {
        if size > self.capacity {
            self.capacity = size.max(self.capacity * 2);
            self.parents.resize(self.capacity, u32::MAX);
            self.g_score.resize(self.capacity, i64::MAX);
            self.dir.resize(self.capacity, NO_DIR);
            self.visited_tag.resize(self.capacity, 0);
            self.closed_tag.resize(self.capacity, 0);
        }
    }

    pub fn reset(&mut self) {
        self.current_tag = self.current_tag.wrapping_add(1);
        if self.current_tag == 0 {
            self.visited_tag.fill(0);
            self.closed_tag.fill(0);
            self.current_tag = 1;
        }
    }

    #[inline(always)]
    pub fn visited(&self, idx: usize) -> bool {
        self.visited_tag[idx] == self.current_tag
    }

    #[inline(always)]
    pub fn closed(&self, idx: usize) -> bool {
        self.closed_tag[idx] == self.current_tag
    }

    /// Records `g` for `idx` if it improves on what is known.
    #[inline(always)]
    pub fn relax(&mut self, idx: usize, g: i64, parent: u32, dir: u8) -> bool {
        if self.visited(idx) && g >= self.g_score[idx] {
            return false;
        }
        self.visited_tag[idx] = self.current_tag;
        self.g_score[idx] = g;
        self.parents[idx] = parent;
        self.dir[idx] = dir;
        true
    }

    /// Cells from the seed to `idx`.
    pub fn trace(&self, idx: usize, window: &RoutingWindow) -> Vec<(u32, u32, u8)> {
        let mut path = Vec::new();
        let mut curr = idx;
        loop {
            path.push(window.coord(curr as u32));
            let parent = self.parents[curr];
            if parent == u32::MAX {
                break;
            }
            curr = parent as usize;
        }
        path.reverse();
        path
    }
}

/// A two-pad connection to search for.
#[derive(Clone, Copy, Debug)]
pub struct RouteRequest {
    pub start: PadId,
    pub goal: PadId,
    /// Present-congestion factor; `Some` lets the path share routed copper of other nets.
    pub present: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct PathSolution {
    pub route: Route,
    pub cost: f64,
    pub expansions: usize,
}

pub(crate) struct Best {
    pub cost: i64,
    pub route: Route,
}

/// Candidate arrival bookkeeping shared by both search directions.
pub(crate) struct Arrivals {
    pub best: Option<Best>,
    pub rejected: bool,
}

impl Arrivals {
    pub fn new() -> Self {
        Self {
            best: None,
            rejected: false,
        }
    }

    pub fn bound(&self) -> i64 {
        self.best.as_ref().map_or(i64::MAX, |b| b.cost)
    }

    /// Validates the path of a cheaper candidate against exact copper.
    pub fn offer(&mut self, space: &SearchSpace, cost: i64, cells: &[(u32, u32, u8)]) {
        if cost >= self.bound() {
            return;
        }
        let route = build_route(
            cells,
            &space.start,
            &space.goal,
            space.grid,
            space.params,
            space.rules,
        );
        if validate::is_legal(space.grid, &route, space.params, !space.negotiated()) {
            self.best = Some(Best { cost, route });
        } else {
            self.rejected = true;
        }
    }

    pub fn finish(self, expansions: usize, exhausted: bool) -> Result<PathSolution, RouteError> {
        match self.best {
            Some(best) => Ok(PathSolution {
                route: best.route,
                cost: best.cost as f64 / COST_SCALE,
                expansions,
            }),
            None if exhausted => Err(RouteError::Timeout),
            None if self.rejected => Err(RouteError::InvalidGeometry),
            None => Err(RouteError::NotFound),
        }
    }
}

/// Pathfinder for single two-pad connections. Holds reusable search memory;
/// caches are invalidated on every `route*` call.
pub struct Router {
    pub(crate) forward: SearchArena,
    pub(crate) backward: SearchArena,
    disks: HashMap<u32, Disk>,
    pub(crate) via_cache: ViaCache,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            forward: SearchArena::new(),
            backward: SearchArena::new(),
            disks: HashMap::new(),
            via_cache: ViaCache::new(),
        }
    }

    pub(crate) fn prepare<'a>(
        &mut self,
        grid: &'a RoutingGrid,
        board: &Board,
        rules: &'a DesignRules,
        params: &'a NetParams,
        req: &RouteRequest,
    ) -> Result<SearchSpace<'a>, RouteError> {
        self.via_cache.clear();
        let start = Terminal::new(grid, board, req.start);
        let goal = Terminal::new(grid, board, req.goal);
        if start.layers.is_empty() || goal.layers.is_empty() {
            return Err(RouteError::LayerConflict);
        }
        let space = SearchSpace::new(
            grid,
            rules,
            params,
            start,
            goal,
            req.present,
            &mut self.disks,
        );
        let open = |t: &Terminal| t.cells().any(|(x, y, z)| space.passable(x, y, z).is_some());
        if !open(&space.start) || !open(&space.goal) {
            return Err(RouteError::NoAccess);
        }
        Ok(space)
    }

    fn first_window(space: &SearchSpace, rules: &DesignRules) -> RoutingWindow {
        let margin = space.grid.converter().cells_for(rules.search_margin);
        RoutingWindow::around(&space.start, &space.goal, margin, space.grid)
    }

    /// Unidirectional A* between two pads: a window around both pads first,
    /// then the whole board.
    pub fn route(
        &mut self,
        grid: &RoutingGrid,
        board: &Board,
        rules: &DesignRules,
        params: &NetParams,
        req: &RouteRequest,
    ) -> Result<PathSolution, RouteError> {
        let space = self.prepare(grid, board, rules, params, req)?;
        let heuristic = Heuristic::from_rules(rules);
        let window = Self::first_window(&space, rules);
        let first = search(
            &space,
            window,
            heuristic,
            &mut self.forward,
            &mut self.via_cache,
            rules.max_expansions,
        );
        match first {
            Err(RouteError::NotFound | RouteError::InvalidGeometry) if !window.is_full(grid) => {
                log::debug!("Net {}: window search failed, widening to full board", params.name);
                search(
                    &space,
                    RoutingWindow::full(grid),
                    heuristic,
                    &mut self.forward,
                    &mut self.via_cache,
                    rules.max_expansions,
                )
            }
            other => other,
        }
    }

    /// Bidirectional search with the same window policy as [`Router::route`].
    pub fn route_bidirectional(
        &mut self,
        grid: &RoutingGrid,
        board: &Board,
        rules: &DesignRules,
        params: &NetParams,
        req: &RouteRequest,
    ) -> Result<PathSolution, RouteError> {
        let space = self.prepare(grid, board, rules, params, req)?;
        let heuristic = Heuristic::from_rules(rules);
        let window = Self::first_window(&space, rules);
        let first = super::bidirectional::search(
            &space,
            window,
            heuristic,
            &mut self.forward,
            &mut self.backward,
            &mut self.via_cache,
            rules.max_expansions,
        );
        match first {
            Err(RouteError::NotFound | RouteError::InvalidGeometry) if !window.is_full(grid) => {
                super::bidirectional::search(
                    &space,
                    RoutingWindow::full(grid),
                    heuristic,
                    &mut self.forward,
                    &mut self.backward,
                    &mut self.via_cache,
                    rules.max_expansions,
                )
            }
            other => other,
        }
    }

    /// Bidirectional for long connections, falling back to unidirectional.
    pub fn route_auto(
        &mut self,
        grid: &RoutingGrid,
        board: &Board,
        rules: &DesignRules,
        params: &NetParams,
        req: &RouteRequest,
    ) -> Result<PathSolution, RouteError> {
        let a = board.pad(req.start).position;
        let b = board.pad(req.goal).position;
        if a.manhattan(b) > rules.bidirectional_threshold {
            match self.route_bidirectional(grid, board, rules, params, req) {
                Ok(sol) => return Ok(sol),
                Err(RouteError::LayerConflict) => return Err(RouteError::LayerConflict),
                Err(RouteError::NoAccess) => return Err(RouteError::NoAccess),
                Err(e) => log::debug!(
                    "Net {}: bidirectional search gave {:?}, retrying unidirectional",
                    params.name,
                    e
                ),
            }
        }
        self.route(grid, board, rules, params, req)
    }
}

/// Seeds one frontier from every open cell of `terminal` inside the window.
/// Seed cost is the planar distance from the pad centre.
pub(crate) fn seed(
    space: &SearchSpace,
    terminal: &Terminal,
    window: &RoutingWindow,
    ctx: &HeuristicContext,
    heuristic: Heuristic,
    arena: &mut SearchArena,
    heap: &mut BinaryHeap<State>,
) {
    let rules = space.rules;
    for (x, y, z) in terminal.cells() {
        if !window.contains(x as i64, y as i64) || space.passable(x, y, z).is_none() {
            continue;
        }
        let g = octile_scaled(
            x.abs_diff(terminal.center_cell.0),
            y.abs_diff(terminal.center_cell.1),
            rules.cost_straight,
            rules.cost_diagonal,
            rules.allow_diagonal,
        );
        let local = window.local(x, y, z);
        if arena.relax(local, g, u32::MAX, NO_DIR) {
            heap.push(State {
                f_score: g + ctx.estimate(heuristic, x, y, z, NO_DIR),
                g_score: g,
                index: local as u32,
            });
        }
    }
}

/// Planar cost from an arrival cell to the pad centre it lies in.
#[inline]
pub(crate) fn arrival_cost(space: &SearchSpace, terminal: &Terminal, x: u32, y: u32) -> i64 {
    octile_scaled(
        x.abs_diff(terminal.center_cell.0),
        y.abs_diff(terminal.center_cell.1),
        space.rules.cost_straight,
        space.rules.cost_diagonal,
        space.rules.allow_diagonal,
    )
}

/// Pushes every legal successor of a closed forward node.
pub(crate) fn expand_forward(
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
    let prev = arena.dir[index as usize];

    for dir in 0..8u8 {
        if dir % 2 == 1 && !space.rules.allow_diagonal {
            continue;
        }
        let (dx, dy) = DIRS[dir as usize];
        let (nx, ny) = (x as i64 + dx as i64, y as i64 + dy as i64);
        if !window.contains(nx, ny) || !space.corner_clear(x, y, dir, z) {
            continue;
        }
        let (nx, ny) = (nx as u32, ny as u32);
        let Some(shared) = space.passable(nx, ny, z) else {
            continue;
        };
        let tentative = g + space.step_cost(x, y, z, dir, prev, shared);
        let local = window.local(nx, ny, z);
        if arena.relax(local, tentative, index, dir) {
            heap.push(State {
                f_score: tentative + ctx.estimate(heuristic, nx, ny, z, dir),
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
    for &nz in space.routable() {
        if nz == z || space.passable(x, y, nz).is_none() {
            continue;
        }
        let tentative = g + space.via_cost(x, y, nz, via_shared);
        let local = window.local(x, y, nz);
        if arena.relax(local, tentative, index, NO_DIR) {
            heap.push(State {
                f_score: tentative + ctx.estimate(heuristic, x, y, nz, NO_DIR),
                g_score: tentative,
                index: local as u32,
            });
        }
    }
}

/// Weighted A* confined to `window`.
///
/// A popped goal-area cell is a candidate arrival; its path is validated
/// against exact copper and a rejected arrival lets the search continue.
/// The search stops once the cheapest open node cannot beat the best
/// accepted arrival.
pub(crate) fn search(
    space: &SearchSpace,
    window: RoutingWindow,
    heuristic: Heuristic,
    arena: &mut SearchArena,
    cache: &mut ViaCache,
    max_expansions: usize,
) -> Result<PathSolution, RouteError> {
    arena.ensure_capacity(window.len());
    arena.reset();
    let ctx = HeuristicContext::new(space.grid, space.rules, &space.goal);
    let mut heap = BinaryHeap::new();
    seed(space, &space.start, &window, &ctx, heuristic, arena, &mut heap);

    let mut arrivals = Arrivals::new();
    let mut expansions = 0usize;
    let mut exhausted = false;

    while let Some(State {
        f_score,
        g_score,
        index,
    }) = heap.pop()
    {
        if f_score >= arrivals.bound() {
            break;
        }
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

        let (x, y, z) = window.coord(index);
        if space.goal.covers(x, y, z) {
            let cost = g_score + arrival_cost(space, &space.goal, x, y);
            if cost < arrivals.bound() {
                let cells = arena.trace(idx, &window);
                arrivals.offer(space, cost, &cells);
            }
        }

        expand_forward(
            space, &window, &ctx, heuristic, arena, &mut heap, cache, index, g_score,
        );
    }

    arrivals.finish(expansions, exhausted)
}
