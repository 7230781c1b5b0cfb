//! Rectangles in native slide pixels
//!
//! A [`Region`] is what gets cropped from a slide and what the tile grid
//! hands out. Coordinates follow the usual image convention with (0,0) at
//! the top-left corner and `end_x`/`end_y` exclusive.

use std::fmt;

/// Rectangle in native slide pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Region {
    /// X-coordinate of the top-left corner (pixels from left)
    pub x: u32,

    /// Y-coordinate of the top-left corner (pixels from top)
    pub y: u32,

    /// Width of the region in pixels
    pub width: u32,

    /// Height of the region in pixels
    pub height: u32,
}

impl Region {
    /// Create a new region
    ///
    /// # Arguments
    /// * `x` - X-coordinate of the top-left corner
    /// * `y` - Y-coordinate of the top-left corner
    /// * `width` - Width of the region in pixels
    /// * `height` - Height of the region in pixels
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Region { x, y, width, height }
    }

    /// X-coordinate just right of the region
    pub fn end_x(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Y-coordinate just below the region
    pub fn end_y(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Number of pixels covered
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.end_x() && y >= self.y && y < self.end_y()
    }

    /// Overlap with another region, `None` when they do not touch
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let end_x = self.end_x().min(other.end_x());
        let end_y = self.end_y().min(other.end_y());
        if x >= end_x || y >= end_y {
            return None;
        }
        Some(Region::new(x, y, end_x - x, end_y - y))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}
