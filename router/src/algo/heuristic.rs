use super::space::Terminal;
use super::{COST_SCALE, DIRS, NO_DIR, octile_scaled};
use crate::grid::RoutingGrid;
use pcb_common::util::config::{DesignRules, HeuristicKind};

/// Cost-to-goal estimator. Only `Manhattan` is admissible; the others trade
/// optimality for fewer expansions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Heuristic {
    /// Octile distance when diagonals are enabled, Manhattan otherwise.
    Manhattan,
    DirectionBias { bias: f64 },
    CongestionAware { bias: f64 },
    WeightedCongestion,
    Greedy { factor: f64 },
}

impl Heuristic {
    pub fn from_rules(rules: &DesignRules) -> Self {
        match rules.heuristic {
            HeuristicKind::Manhattan => Heuristic::Manhattan,
            HeuristicKind::DirectionBias => Heuristic::DirectionBias {
                bias: rules.direction_bias,
            },
            HeuristicKind::CongestionAware => Heuristic::CongestionAware {
                bias: rules.direction_bias,
            },
            HeuristicKind::WeightedCongestion => Heuristic::WeightedCongestion,
            HeuristicKind::Greedy => Heuristic::Greedy {
                factor: rules.greedy_factor.max(1.0),
            },
        }
    }
}

pub struct HeuristicContext<'a> {
    grid: &'a RoutingGrid,
    goal: (u32, u32),
    goal_area: Terminal,
    allow_diagonal: bool,
    cost_straight: f64,
    cost_diagonal: f64,
    cost_via: f64,
    cost_turn: f64,
    cost_congestion: f64,
    threshold: f64,
    weight: f64,
}

impl<'a> HeuristicContext<'a> {
    pub fn new(grid: &'a RoutingGrid, rules: &DesignRules, goal: &Terminal) -> Self {
        Self {
            grid,
            goal: goal.center_cell,
            goal_area: goal.clone(),
            allow_diagonal: rules.allow_diagonal,
            cost_straight: rules.cost_straight,
            cost_diagonal: rules.cost_diagonal,
            cost_via: rules.cost_via,
            cost_turn: rules.cost_turn,
            cost_congestion: rules.cost_congestion,
            threshold: rules.congestion_threshold,
            weight: rules.heuristic_weight,
        }
    }

    fn excess(&self, x: u32, y: u32, z: u8) -> f64 {
        let d = self.grid.congestion_at(x, y, z);
        if d <= self.threshold {
            0.0
        } else {
            (d - self.threshold) / (1.0 - self.threshold).max(1e-9)
        }
    }

    /// Mean congestion excess at `samples` evenly spaced points from the cell towards the goal.
    fn line_excess(&self, x: u32, y: u32, z: u8, samples: u32) -> f64 {
        let (gx, gy) = (self.goal.0 as f64, self.goal.1 as f64);
        let mut sum = 0.0;
        for i in 0..samples {
            let t = i as f64 / samples as f64;
            let sx = (x as f64 + (gx - x as f64) * t).round() as u32;
            let sy = (y as f64 + (gy - y as f64) * t).round() as u32;
            sum += self.excess(sx, sy, z);
        }
        sum / samples as f64
    }

    /// Heading `dir` points away from the goal.
    fn facing_away(&self, x: u32, y: u32, dir: u8) -> bool {
        if dir >= NO_DIR {
            return false;
        }
        let (dx, dy) = DIRS[dir as usize];
        let tx = self.goal.0 as i64 - x as i64;
        let ty = self.goal.1 as i64 - y as i64;
        (dx as i64 * tx + dy as i64 * ty) < 0
    }

    /// Scaled estimate from `(x, y, z)` reached with heading `dir`.
    pub fn estimate(&self, h: Heuristic, x: u32, y: u32, z: u8, dir: u8) -> i64 {
        let dx = x.abs_diff(self.goal.0);
        let dy = y.abs_diff(self.goal.1);
        let mut base = octile_scaled(
            dx,
            dy,
            self.cost_straight,
            self.cost_diagonal,
            self.allow_diagonal,
        ) as f64;
        if !self.goal_area.layers.contains(z) {
            base += (self.cost_via * COST_SCALE).round();
        }
        base *= self.weight;

        let in_goal = self.goal_area.covers_xy(x, y);
        let extra = match h {
            Heuristic::Manhattan => 0.0,
            Heuristic::DirectionBias { bias } => {
                if !in_goal && self.facing_away(x, y, dir) {
                    bias * self.cost_turn
                } else {
                    0.0
                }
            }
            Heuristic::CongestionAware { bias } => {
                let mut extra = 0.0;
                if !in_goal && self.facing_away(x, y, dir) {
                    extra += bias * self.cost_turn;
                }
                let mid = ((x + self.goal.0) / 2, (y + self.goal.1) / 2);
                extra + self.cost_congestion * (self.excess(x, y, z) + self.excess(mid.0, mid.1, z))
            }
            Heuristic::WeightedCongestion => 2.0 * self.cost_congestion * self.line_excess(x, y, z, 4),
            Heuristic::Greedy { factor } => {
                base *= factor;
                0.0
            }
        };
        (base + extra * COST_SCALE).floor() as i64
    }
}
