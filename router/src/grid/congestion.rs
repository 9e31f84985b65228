/// Coarse per-block count of routed copper cells. Only feeds costs and heuristics, never blocks.
#[derive(Clone)]
pub struct CongestionGrid {
    block: u32,
    blocks_x: u32,
    blocks_y: u32,
    counts: Vec<u32>,
    layer_totals: Vec<u64>,
}

impl CongestionGrid {
    pub fn new(width: u32, height: u32, layers: u8, block: u32) -> Self {
        let block = block.max(1);
        let blocks_x = width.div_ceil(block).max(1);
        let blocks_y = height.div_ceil(block).max(1);
        Self {
            block,
            blocks_x,
            blocks_y,
            counts: vec![0; (blocks_x * blocks_y) as usize * layers as usize],
            layer_totals: vec![0; layers as usize],
        }
    }

    #[inline(always)]
    fn index(&self, x: u32, y: u32, z: u8) -> usize {
        let bx = (x / self.block).min(self.blocks_x - 1);
        let by = (y / self.block).min(self.blocks_y - 1);
        (z as usize) * (self.blocks_x * self.blocks_y) as usize
            + (by * self.blocks_x + bx) as usize
    }

    pub fn add(&mut self, x: u32, y: u32, z: u8) {
        let idx = self.index(x, y, z);
        self.counts[idx] += 1;
        self.layer_totals[z as usize] += 1;
    }

    pub fn remove(&mut self, x: u32, y: u32, z: u8) {
        let idx = self.index(x, y, z);
        if self.counts[idx] > 0 {
            self.counts[idx] -= 1;
            self.layer_totals[z as usize] -= 1;
        }
    }

    /// Occupied fraction of the block containing the cell, in `[0, 1]`.
    #[inline]
    pub fn density(&self, x: u32, y: u32, z: u8) -> f64 {
        let area = (self.block * self.block) as f64;
        (self.counts[self.index(x, y, z)] as f64 / area).min(1.0)
    }

    /// Mean density over the blocks covering an inclusive cell rectangle.
    pub fn region_density(&self, x0: u32, y0: u32, x1: u32, y1: u32, z: u8) -> f64 {
        let (bx0, bx1) = (x0 / self.block, (x1 / self.block).min(self.blocks_x - 1));
        let (by0, by1) = (y0 / self.block, (y1 / self.block).min(self.blocks_y - 1));
        let mut sum = 0.0;
        let mut n = 0usize;
        for by in by0..=by1 {
            for bx in bx0..=bx1 {
                sum += self.density(bx * self.block, by * self.block, z);
                n += 1;
            }
        }
        if n == 0 { 0.0 } else { sum / n as f64 }
    }

    pub fn layer_total(&self, z: u8) -> u64 {
        self.layer_totals.get(z as usize).copied().unwrap_or(0)
    }
}
