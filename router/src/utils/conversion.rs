use pcb_common::geom::coord::GridCoord;
use pcb_common::geom::point::Point;
use pcb_common::geom::rect::Rect;

/// Rounds to 6 decimals. Applied before every `ceil()` so values like
/// `0.30000000000000004 / 0.1` do not spill into an extra cell.
#[inline]
pub fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

/// World (mm) <-> grid cell mapping. Cell `(i, j)` is centred on `origin + (i, j) * resolution`.
#[derive(Clone, Debug)]
pub struct GridConverter {
    origin: Point<f64>,
    resolution: f64,
    grid_w: u32,
    grid_h: u32,
}

impl GridConverter {
    pub fn new(bounds: Rect, resolution: f64) -> Self {
        let grid_w = round6(bounds.width() / resolution).ceil() as u32 + 1;
        let grid_h = round6(bounds.height() / resolution).ceil() as u32 + 1;
        Self {
            origin: bounds.min,
            resolution,
            grid_w,
            grid_h,
        }
    }

    pub fn width(&self) -> u32 {
        self.grid_w
    }

    pub fn height(&self) -> u32 {
        self.grid_h
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// World rectangle spanned by the cell centres.
    pub fn bounds(&self) -> Rect {
        Rect::new(
            self.origin,
            self.xy_to_world(self.grid_w - 1, self.grid_h - 1),
        )
    }

    pub fn to_grid(&self, p: Point<f64>, layer: u8) -> GridCoord {
        let raw_x = (p.x - self.origin.x) / self.resolution;
        let raw_y = (p.y - self.origin.y) / self.resolution;

        let x = raw_x.round().max(0.0).min((self.grid_w - 1) as f64) as u32;
        let y = raw_y.round().max(0.0).min((self.grid_h - 1) as f64) as u32;

        GridCoord::new(x, y, layer)
    }

    pub fn to_world(&self, g: GridCoord) -> Point<f64> {
        self.xy_to_world(g.x, g.y)
    }

    #[inline]
    pub fn xy_to_world(&self, x: u32, y: u32) -> Point<f64> {
        Point::new(
            self.origin.x + x as f64 * self.resolution,
            self.origin.y + y as f64 * self.resolution,
        )
    }

    /// Distance in mm to a whole number of cells, rounding up.
    pub fn cells_for(&self, distance: f64) -> u32 {
        round6(distance.max(0.0) / self.resolution).ceil() as u32
    }

    /// Inclusive cell span `(x0, x1, y0, y1)` of cell centres inside `rect`, or `None` if no centre falls inside.
    pub fn cell_span(&self, rect: &Rect) -> Option<(u32, u32, u32, u32)> {
        let lo_x = round6((rect.min.x - self.origin.x) / self.resolution).ceil();
        let hi_x = round6((rect.max.x - self.origin.x) / self.resolution).floor();
        let lo_y = round6((rect.min.y - self.origin.y) / self.resolution).ceil();
        let hi_y = round6((rect.max.y - self.origin.y) / self.resolution).floor();
        let max_x = (self.grid_w - 1) as f64;
        let max_y = (self.grid_h - 1) as f64;
        if hi_x < 0.0 || hi_y < 0.0 || lo_x > max_x || lo_y > max_y || lo_x > hi_x || lo_y > hi_y {
            return None;
        }
        Some((
            lo_x.max(0.0) as u32,
            hi_x.min(max_x) as u32,
            lo_y.max(0.0) as u32,
            hi_y.min(max_y) as u32,
        ))
    }

    /// Cell span touched by `rect` grown by one cell, clamped to the grid.
    pub fn covering_span(&self, rect: &Rect) -> (u32, u32, u32, u32) {
        let a = self.to_grid(rect.min, 0);
        let b = self.to_grid(rect.max, 0);
        (
            a.x.saturating_sub(1),
            (b.x + 1).min(self.grid_w - 1),
            a.y.saturating_sub(1),
            (b.y + 1).min(self.grid_h - 1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> GridConverter {
        GridConverter::new(
            Rect::new(Point::new(-5.0, -5.0), Point::new(15.0, 5.0)),
            0.1,
        )
    }

    #[test]
    fn dimensions_use_guarded_ceil() {
        let c = conv();
        assert_eq!(c.width(), 201);
        assert_eq!(c.height(), 101);
        // 0.1 + 0.2 is 0.30000000000000004 in binary.
        assert_eq!(c.cells_for(0.1 + 0.2), 3);
        assert_eq!(c.cells_for(0.25), 3);
        assert_eq!(c.cells_for(0.0), 0);
    }

    #[test]
    fn round_trip_has_no_drift() {
        let c = conv();
        for (x, y) in [(0u32, 0u32), (50, 50), (137, 99), (200, 100)] {
            let g = GridCoord::new(x, y, 1);
            let back = c.to_grid(c.to_world(g), 1);
            assert_eq!(back, g);
            let again = c.to_grid(c.to_world(back), 1);
            assert_eq!(again, g);
        }
        let p = Point::new(3.14159, -2.71828);
        let g = c.to_grid(p, 0);
        assert_eq!(c.to_grid(c.to_world(g), 0), g);
    }

    #[test]
    fn span_covers_pad_cells() {
        let c = conv();
        let pad = Rect::from_center(Point::new(0.0, 0.0), 1.0, 1.0);
        assert_eq!(c.cell_span(&pad), Some((45, 55, 45, 55)));
        let tiny = Rect::from_center(Point::new(0.03, 0.03), 0.02, 0.02);
        assert_eq!(c.cell_span(&tiny), None);
    }
}
