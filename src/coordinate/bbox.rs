//! Axis-aligned bounding boxes in slide pixel space

use super::point::Point;

/// An axis-aligned rectangle given by inclusive corner coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    /// Minimum X coordinate
    pub min_x: i64,
    /// Minimum Y coordinate
    pub min_y: i64,
    /// Maximum X coordinate
    pub max_x: i64,
    /// Maximum Y coordinate
    pub max_y: i64,
}

impl BoundingBox {
    /// Create a new bounding box
    pub fn new(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Self {
        BoundingBox { min_x, min_y, max_x, max_y }
    }

    /// Smallest box containing every point
    ///
    /// An empty slice yields a zero-sized box at the origin.
    pub fn from_points(points: &[Point]) -> Self {
        let mut iter = points.iter();
        let first = match iter.next() {
            Some(p) => *p,
            None => return BoundingBox::new(0, 0, 0, 0),
        };

        iter.fold(
            BoundingBox::new(first.x, first.y, first.x, first.y),
            |b, p| BoundingBox::new(b.min_x.min(p.x), b.min_y.min(p.y), b.max_x.max(p.x), b.max_y.max(p.y)),
        )
    }

    /// Get the width of the bounding box
    pub fn width(&self) -> i64 {
        self.max_x - self.min_x
    }

    /// Get the height of the bounding box
    pub fn height(&self) -> i64 {
        self.max_y - self.min_y
    }

    /// Corners as left-top, right-top, right-bottom, left-bottom
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.min_x, self.min_y),
            Point::new(self.max_x, self.min_y),
            Point::new(self.max_x, self.max_y),
            Point::new(self.min_x, self.max_y),
        ]
    }

    /// Check if this bounding box contains a point (edges included)
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.min_x && point.x <= self.max_x &&
            point.y >= self.min_y && point.y <= self.max_y
    }
}
