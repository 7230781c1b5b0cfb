//! Filled polygon rasterization
//!
//! Interiors are filled with an even-odd scanline pass sampled at integer
//! rows, then every edge is traced with Bresenham so the boundary pixels are
//! always set. A rectangle with corners at 500 and 700 therefore covers the
//! pixels 500 through 700 inclusive on both axes. Single-point polygons mark
//! one pixel and two-point polygons draw a line.

use crate::coordinate::{round_half_up, Polygon};

use super::Mask;

/// Draw one polygon, already in canvas coordinates, into the mask
pub fn fill_polygon(mask: &mut Mask, points: &[(i64, i64)]) {
    match points.len() {
        0 => {}
        1 => mask.mark(points[0].0, points[0].1),
        _ => {
            if points.len() > 2 {
                fill_interior(mask, points);
            }
            for (i, &start) in points.iter().enumerate() {
                let end = points[(i + 1) % points.len()];
                draw_line(mask, start, end);
            }
        }
    }
}

fn fill_interior(mask: &mut Mask, points: &[(i64, i64)]) {
    let min_y = points.iter().map(|p| p.1).min().unwrap_or(0).max(0);
    let max_y = points
        .iter()
        .map(|p| p.1)
        .max()
        .unwrap_or(0)
        .min(mask.height() as i64 - 1);

    let mut crossings: Vec<f64> = Vec::with_capacity(points.len());
    for y in min_y..=max_y {
        crossings.clear();
        for (i, &(x0, y0)) in points.iter().enumerate() {
            let (x1, y1) = points[(i + 1) % points.len()];
            if y0 == y1 {
                continue;
            }
            // half-open in y so shared vertices count once
            let (lo, hi) = if y0 < y1 { (y0, y1) } else { (y1, y0) };
            if y < lo || y >= hi {
                continue;
            }
            let t = (y - y0) as f64 / (y1 - y0) as f64;
            crossings.push(x0 as f64 + t * (x1 - x0) as f64);
        }

        crossings.sort_by(|a, b| a.total_cmp(b));
        for pair in crossings.chunks_exact(2) {
            mask.mark_span(y, pair[0].ceil() as i64, pair[1].floor() as i64);
        }
    }
}

/// Bresenham line between two pixel centres, end points included
fn draw_line(mask: &mut Mask, start: (i64, i64), end: (i64, i64)) {
    let (mut x, mut y) = start;
    let dx = (end.0 - x).abs();
    let dy = -(end.1 - y).abs();
    let sx = if x < end.0 { 1 } else { -1 };
    let sy = if y < end.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        mask.mark(x, y);
        if x == end.0 && y == end.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Polygon vertices scaled to the canvas, rounded half-up
pub fn scale_points(polygon: &Polygon, scale: f64) -> Vec<(i64, i64)> {
    polygon
        .points()
        .iter()
        .map(|p| (round_half_up(p.x as f64 * scale), round_half_up(p.y as f64 * scale)))
        .collect()
}

/// Rasterize a class's polygons into a fresh canvas
///
/// # Arguments
/// * `polygons` - Polygons in native slide coordinates
/// * `scale` - Native to canvas factor
/// * `width` - Canvas width
/// * `height` - Canvas height
pub fn rasterize(polygons: &[Polygon], scale: f64, width: u32, height: u32) -> Mask {
    let mut mask = Mask::new(width, height);
    for polygon in polygons {
        fill_polygon(&mut mask, &scale_points(polygon, scale));
    }
    mask
}
