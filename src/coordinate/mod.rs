//! Pixel coordinate primitives
//!
//! Annotation geometry lives in native slide pixel coordinates. This module
//! holds the point, polygon and axis-aligned box types shared by the
//! annotation parsers, the rasterizer and the tile resolver.

pub mod point;
pub mod bbox;

pub use point::{Point, Polygon};
pub use bbox::BoundingBox;

/// Rounds half-way values away from negative infinity (2.5 -> 3, -2.5 -> -2)
///
/// Annotation tools store float coordinates; rounding them this way keeps
/// parsed polygons identical across platforms and formats.
pub fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::round_half_up;

    #[test]
    fn rounds_halves_upwards() {
        assert_eq!(round_half_up(0.5), 1);
        assert_eq!(round_half_up(1.5), 2);
        assert_eq!(round_half_up(2.5), 3);
        assert_eq!(round_half_up(2.49), 2);
        assert_eq!(round_half_up(-2.5), -2);
    }
}
