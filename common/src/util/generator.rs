use crate::db::core::{Board, Pad, PadKey};
use crate::db::indices::NetId;
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Lattice pitch (mm) of component sites.
const SITE_PITCH: f64 = 6.0;
const PAD_SPACING: f64 = 1.6;

/// Random two-layer benchmark board of two-pin SMD components.
///
/// Components sit on a jittered lattice so pads never overlap; every net joins
/// two to four previously unconnected pads.
pub fn generate_random_board(num_pads: usize, num_nets: usize, seed: u64) -> Board {
    let mut rng = StdRng::seed_from_u64(seed);
    let components = num_pads.div_ceil(2).max(1);
    let cols = (components as f64).sqrt().ceil() as usize;
    let rows = components.div_ceil(cols);

    let width = cols as f64 * SITE_PITCH + SITE_PITCH;
    let height = rows as f64 * SITE_PITCH + SITE_PITCH;
    let mut board = Board::new(
        Rect::new(Point::new(0.0, 0.0), Point::new(width, height)),
        2,
    );

    log::info!(
        "Generating Benchmark: {} pads, {} nets, Board: {:.0}x{:.0}mm",
        components * 2,
        num_nets,
        width,
        height
    );

    let mut sites: Vec<usize> = (0..cols * rows).collect();
    sites.shuffle(&mut rng);
    for (c, &site) in sites.iter().take(components).enumerate() {
        let cx = (site % cols) as f64 * SITE_PITCH + SITE_PITCH;
        let cy = (site / cols) as f64 * SITE_PITCH + SITE_PITCH;
        let jitter_x = rng.gen_range(-1.0..1.0);
        let jitter_y = rng.gen_range(-1.0..1.0);
        let layer = if rng.gen_bool(0.8) { 0 } else { 1 };
        let vertical = rng.gen_bool(0.3);
        for pin in 0..2 {
            let offset = if pin == 0 {
                -PAD_SPACING / 2.0
            } else {
                PAD_SPACING / 2.0
            };
            let (dx, dy, w, h) = if vertical {
                (0.0, offset, 0.9, 0.8)
            } else {
                (offset, 0.0, 0.8, 0.9)
            };
            board.add_pad(Pad {
                reference: format!("R{}", c + 1),
                pin: (pin + 1).to_string(),
                position: Point::new(
                    round_to(cx + jitter_x + dx, 0.05),
                    round_to(cy + jitter_y + dy, 0.05),
                ),
                layer,
                width: w,
                height: h,
                through_hole: false,
                drill: 0.0,
                net: NetId::NONE,
            });
        }
    }

    let mut free: Vec<PadKey> = board.pads.iter().map(|p| p.key()).collect();
    free.shuffle(&mut rng);
    for n in 0..num_nets {
        if free.len() < 2 {
            log::warn!("Ran out of free pads after {} nets", n);
            break;
        }
        let size = rng.gen_range(2..=4).min(free.len());
        let members: Vec<PadKey> = free.drain(..size).collect();
        board.add_net(format!("net{}", n + 1), members);
    }
    board
}

fn round_to(v: f64, step: f64) -> f64 {
    (v / step).round() * step
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_seeded_and_consistent() {
        let a = generate_random_board(40, 12, 7);
        let b = generate_random_board(40, 12, 7);
        assert_eq!(a.pads.len(), 40);
        assert_eq!(a.nets.len(), 12);
        for (pa, pb) in a.pads.iter().zip(&b.pads) {
            assert_eq!(pa.position, pb.position);
            assert_eq!(pa.net, pb.net);
        }
        for net in &a.nets {
            assert!(net.pads.len() >= 2);
            assert_eq!(a.net_pads(net.id).len(), net.pads.len());
        }
        for pad in &a.pads {
            assert!(a.bounds.contains(pad.position));
        }
    }
}
