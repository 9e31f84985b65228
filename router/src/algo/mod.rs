pub mod astar;
pub mod bidirectional;
pub mod heuristic;
pub mod mst;
pub mod path;
pub mod space;
pub mod validate;

/// Costs are accumulated as integers in thousandths of a cost unit.
pub const COST_SCALE: f64 = 1000.0;

/// 8-neighbourhood, counter-clockwise from +x. Even indices are orthogonal.
pub const DIRS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Direction of a node reached by seeding or by a via.
pub const NO_DIR: u8 = 8;

/// Number of 45° steps between two headings.
#[inline(always)]
pub fn turn_steps(a: u8, b: u8) -> u32 {
    if a >= NO_DIR || b >= NO_DIR {
        return 0;
    }
    let d = (a as i32 - b as i32).unsigned_abs();
    d.min(8 - d)
}

/// Cheapest planar cost between two cells ignoring obstacles, in scaled
/// units. Built from the same rounded unit costs the search charges per step
/// so it never overestimates.
#[inline(always)]
pub fn octile_scaled(dx: u32, dy: u32, straight: f64, diagonal: f64, allow_diagonal: bool) -> i64 {
    let s = (straight * COST_SCALE).round() as i64;
    if !allow_diagonal {
        return (dx + dy) as i64 * s;
    }
    let d = (diagonal * COST_SCALE).round() as i64;
    let d = d.min(2 * s);
    let lo = dx.min(dy) as i64;
    let hi = dx.max(dy) as i64;
    (hi - lo) * s + lo * d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turns_wrap_around() {
        assert_eq!(turn_steps(0, 0), 0);
        assert_eq!(turn_steps(0, 2), 2);
        assert_eq!(turn_steps(7, 1), 2);
        assert_eq!(turn_steps(0, 4), 4);
        assert_eq!(turn_steps(NO_DIR, 3), 0);
    }

    #[test]
    fn octile_matches_move_set() {
        let d = std::f64::consts::SQRT_2;
        assert_eq!(octile_scaled(3, 1, 1.0, d, true), 2000 + 1414);
        assert_eq!(octile_scaled(3, 1, 1.0, d, false), 4000);
        assert_eq!(octile_scaled(2, 2, 1.0, 3.0, true), 4000);
    }
}
