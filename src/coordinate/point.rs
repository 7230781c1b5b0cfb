//! Points and polygons in slide pixel space

use crate::error::{PatchError, PatchResult};

use super::bbox::BoundingBox;
use super::round_half_up;

/// A pixel position on the slide at native resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    /// X coordinate (pixels from the left edge)
    pub x: i64,
    /// Y coordinate (pixels from the top edge)
    pub y: i64,
}

impl Point {
    /// Create a new point
    pub fn new(x: i64, y: i64) -> Self {
        Point { x, y }
    }

    /// Create a point from float coordinates using round-half-up
    pub fn from_f64(x: f64, y: f64) -> Self {
        Point {
            x: round_half_up(x),
            y: round_half_up(y),
        }
    }
}

/// An implicitly closed ring of points
///
/// A polygon with a single point is a dot annotation. Polygons are never
/// empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    /// Create a polygon from its vertices
    ///
    /// # Arguments
    /// * `points` - Vertices in drawing order
    ///
    /// # Returns
    /// The polygon, or `AnnotationIncomplete` when `points` is empty
    pub fn new(points: Vec<Point>) -> PatchResult<Self> {
        if points.is_empty() {
            return Err(PatchError::AnnotationIncomplete(
                "polygon has no coordinates".to_string(),
            ));
        }
        Ok(Polygon { points })
    }

    /// Create a polygon from float coordinate pairs
    ///
    /// Coordinates are rounded half-up. A trailing vertex equal to the first
    /// one (explicitly closed rings, as GeoJSON stores them) is dropped.
    pub fn from_f64_pairs<I>(pairs: I) -> PatchResult<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut points: Vec<Point> = pairs
            .into_iter()
            .map(|(x, y)| Point::from_f64(x, y))
            .collect();

        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }

        Polygon::new(points)
    }

    /// Four-corner polygon for a box stored as origin and size
    ///
    /// Corners are `[x,y], [x,y+h], [x+w,y+h], [x+w,y]`.
    pub fn from_rect(x: i64, y: i64, width: i64, height: i64) -> Self {
        Polygon {
            points: vec![
                Point::new(x, y),
                Point::new(x, y + height),
                Point::new(x + width, y + height),
                Point::new(x + width, y),
            ],
        }
    }

    /// Vertices in drawing order
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Number of vertices
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the polygon has no vertices; never true for a constructed polygon
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether this polygon is a single-point dot annotation
    pub fn is_dot(&self) -> bool {
        self.points.len() == 1
    }

    /// Axis-aligned bounding rectangle of the vertices
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(&self.points)
    }

    /// Expand a dot into a box centred on it
    ///
    /// The corners are left-top, right-top, right-bottom, left-bottom, each
    /// edge at `center ± size / 2` rounded half-up. Polygons with more than
    /// one vertex are returned unchanged.
    ///
    /// # Arguments
    /// * `width` - Box width in pixels
    /// * `height` - Box height in pixels
    pub fn dot_to_box(&self, width: u32, height: u32) -> Polygon {
        if !self.is_dot() {
            return self.clone();
        }

        let center = self.points[0];
        let half_w = width as f64 / 2.0;
        let half_h = height as f64 / 2.0;
        let left = round_half_up(center.x as f64 - half_w);
        let right = round_half_up(center.x as f64 + half_w);
        let top = round_half_up(center.y as f64 - half_h);
        let bottom = round_half_up(center.y as f64 + half_h);

        Polygon {
            points: vec![
                Point::new(left, top),
                Point::new(right, top),
                Point::new(right, bottom),
                Point::new(left, bottom),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(polygon: &Polygon) -> Vec<(i64, i64)> {
        polygon.points().iter().map(|p| (p.x, p.y)).collect()
    }

    #[test]
    fn dot_expands_to_exact_corners() {
        let dot = Polygon::new(vec![Point::new(100, 100)]).unwrap();
        let expanded = dot.dot_to_box(30, 20);
        assert_eq!(pts(&expanded), vec![(85, 90), (115, 90), (115, 110), (85, 110)]);
    }

    #[test]
    fn odd_dot_sizes_round_half_up() {
        let dot = Polygon::new(vec![Point::new(10, 10)]).unwrap();
        let expanded = dot.dot_to_box(5, 3);
        // 10 - 2.5 = 7.5 -> 8, 10 + 2.5 = 12.5 -> 13
        assert_eq!(pts(&expanded), vec![(8, 9), (13, 9), (13, 12), (8, 12)]);
    }

    #[test]
    fn non_dots_are_untouched() {
        let rect = Polygon::from_rect(0, 0, 10, 10);
        assert_eq!(rect.dot_to_box(30, 20), rect);
    }

    #[test]
    fn rect_corner_order() {
        let rect = Polygon::from_rect(5, 6, 10, 20);
        assert_eq!(pts(&rect), vec![(5, 6), (5, 26), (15, 26), (15, 6)]);
    }

    #[test]
    fn float_pairs_drop_closing_vertex() {
        let polygon = Polygon::from_f64_pairs(vec![
            (0.5, 0.4),
            (10.0, 0.0),
            (10.0, 10.0),
            (0.5, 0.4),
        ])
        .unwrap();
        assert_eq!(pts(&polygon), vec![(1, 0), (10, 0), (10, 10)]);
    }

    #[test]
    fn empty_polygons_are_rejected() {
        assert!(matches!(
            Polygon::new(Vec::new()),
            Err(PatchError::AnnotationIncomplete(_))
        ));
    }
}
