use crate::db::core::{Board, Route};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
};
use imageproc::rect::Rect as ImageRect;
use std::path::Path;

const LAYER_COLORS: [Rgba<u8>; 6] = [
    // F.Cu: red
    Rgba([230, 40, 60, 200]),
    // B.Cu / inner 1: blue
    Rgba([40, 110, 255, 170]),
    Rgba([0, 220, 100, 170]),
    Rgba([255, 215, 0, 170]),
    Rgba([180, 50, 255, 190]),
    Rgba([0, 240, 255, 190]),
];

/// Renders pads, keepouts, traces (to scale) and vias to a PNG, longest side `size` pixels.
pub fn draw_routed_board(
    board: &Board,
    routes: &[Route],
    filename: &str,
    size: u32,
) -> Result<(), image::ImageError> {
    let bw = board.bounds.width();
    let bh = board.bounds.height();
    if bw <= 0.0 || bh <= 0.0 {
        return Ok(());
    }
    let scale = size.max(64) as f64 / bw.max(bh);
    let w = (bw * scale).ceil().max(1.0) as u32;
    let h = (bh * scale).ceil().max(1.0) as u32;

    let mut img = RgbaImage::from_pixel(w, h, Rgba([12, 14, 18, 255]));

    let map = |x: f64, y: f64| {
        (
            ((x - board.bounds.min.x) * scale) as f32,
            (h as f64 - (y - board.bounds.min.y) * scale) as f32,
        )
    };

    let keepout_color = Rgba([90, 60, 60, 255]);
    for keepout in &board.keepouts {
        let (x0, y1) = map(keepout.area.min.x, keepout.area.min.y);
        let (x1, y0) = map(keepout.area.max.x, keepout.area.max.y);
        let rect = ImageRect::at(x0 as i32, y0 as i32)
            .of_size(((x1 - x0) as u32).max(1), ((y1 - y0) as u32).max(1));
        draw_hollow_rect_mut(&mut img, rect, keepout_color);
    }

    let mut segments: Vec<_> = routes.iter().flat_map(|r| r.segments.iter()).collect();
    segments.sort_by_key(|s| std::cmp::Reverse(s.layer));
    for seg in segments {
        let color = LAYER_COLORS[(seg.layer as usize).min(LAYER_COLORS.len() - 1)];
        let (x1, y1) = map(seg.start.x, seg.start.y);
        let (x2, y2) = map(seg.end.x, seg.end.y);
        // Thick traces are drawn as a fan of parallel lines.
        let half = ((seg.width * scale) / 2.0).max(0.5) as f32;
        let (dx, dy) = (x2 - x1, y2 - y1);
        let len = (dx * dx + dy * dy).sqrt().max(1e-3);
        let (nx, ny) = (-dy / len, dx / len);
        let steps = (half * 2.0).ceil() as i32;
        for k in -steps / 2..=steps / 2 {
            let o = k as f32 * 0.5;
            draw_line_segment_mut(
                &mut img,
                (x1 + nx * o, y1 + ny * o),
                (x2 + nx * o, y2 + ny * o),
                color,
            );
        }
        draw_filled_circle_mut(&mut img, (x1 as i32, y1 as i32), half as i32, color);
        draw_filled_circle_mut(&mut img, (x2 as i32, y2 as i32), half as i32, color);
    }

    for pad in &board.pads {
        let area = pad.metal_area();
        let (x0, y1) = map(area.min.x, area.min.y);
        let (x1, y0) = map(area.max.x, area.max.y);
        let color = if pad.through_hole {
            Rgba([200, 170, 60, 255])
        } else {
            LAYER_COLORS[(pad.layer as usize).min(LAYER_COLORS.len() - 1)]
        };
        let rect = ImageRect::at(x0 as i32, y0 as i32)
            .of_size(((x1 - x0) as u32).max(2), ((y1 - y0) as u32).max(2));
        draw_filled_rect_mut(&mut img, rect, color);
    }

    let via_color = Rgba([235, 235, 235, 255]);
    for via in routes.iter().flat_map(|r| r.vias.iter()) {
        let (x, y) = map(via.position.x, via.position.y);
        let r = ((via.diameter * scale) / 2.0).max(1.5) as i32;
        draw_filled_circle_mut(&mut img, (x as i32, y as i32), r, via_color);
    }

    img.save(Path::new(filename))
}
