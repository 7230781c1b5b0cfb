//! Annotation boxes intersecting a tile
//!
//! All comparisons are inclusive: a box edge lying exactly on a tile edge
//! counts as inside. A box is on a tile when one of its corners is inside,
//! when one of its sides crosses the tile, or when it covers the whole tile.

use crate::annotation::{AnnotationSet, FOREGROUND};
use crate::coordinate::BoundingBox;
use crate::error::{PatchError, PatchResult};
use crate::slide::Region;

use super::membership::Membership;
use super::result::BoxRecord;

/// Tile edges as inclusive `(left, top, right, bottom)`
fn edges(tile: Region) -> (i64, i64, i64, i64) {
    let left = tile.x as i64;
    let top = tile.y as i64;
    (left, top, left + tile.width as i64, top + tile.height as i64)
}

fn within(value: i64, low: i64, high: i64) -> bool {
    low <= value && value <= high
}

/// At least one box corner lies inside the tile
pub fn corner_on_tile(bb: &BoundingBox, tile: Region) -> bool {
    let (left, top, right, bottom) = edges(tile);
    let area = BoundingBox::new(left, top, right, bottom);
    bb.corners().iter().any(|corner| area.contains(corner))
}

/// A box side crosses the tile without any corner inside it
///
/// Either a vertical side lies within the tile's columns while the box
/// spans all of its rows, or a horizontal side lies within its rows while
/// the box spans all of its columns.
pub fn side_on_tile(bb: &BoundingBox, tile: Region) -> bool {
    let (left, top, right, bottom) = edges(tile);
    let spans_rows = bb.min_y <= top && bottom <= bb.max_y;
    let spans_columns = bb.min_x <= left && right <= bb.max_x;

    let vertical = (within(bb.min_x, left, right) || within(bb.max_x, left, right)) && spans_rows;
    let horizontal = (within(bb.min_y, top, bottom) || within(bb.max_y, top, bottom)) && spans_columns;
    vertical || horizontal
}

/// The box contains the whole tile
pub fn covers_tile(bb: &BoundingBox, tile: Region) -> bool {
    let (left, top, right, bottom) = edges(tile);
    bb.min_x <= left && right <= bb.max_x && bb.min_y <= top && bottom <= bb.max_y
}

/// Union of the corner, side and cover cases
pub fn box_on_tile(bb: &BoundingBox, tile: Region) -> bool {
    corner_on_tile(bb, tile) || side_on_tile(bb, tile) || covers_tile(bb, tile)
}

/// Box clipped to the tile, relative to the tile origin
///
/// # Returns
/// `(x, y, w, h)` with `x = max(xmin - tile.x, 0)` and
/// `w = min(xmax - xmin + x, tile.w) - x`, likewise for y and h
pub fn clip_to_tile(bb: &BoundingBox, tile: Region) -> (i64, i64, i64, i64) {
    let x = (bb.min_x - tile.x as i64).max(0);
    let y = (bb.min_y - tile.y as i64).max(0);
    let w = (bb.width() + x).min(tile.width as i64) - x;
    let h = (bb.height() + y).min(tile.height as i64) - y;
    (x, y, w, h)
}

/// Clipped boxes of one class that are on the tile
pub fn boxes_on_tile(annotation: &AnnotationSet, class: &str, tile: Region) -> Vec<BoxRecord> {
    annotation
        .polygons(class)
        .iter()
        .map(|polygon| polygon.bounding_box())
        .filter(|bb| box_on_tile(bb, tile))
        .map(|bb| {
            let (x, y, w, h) = clip_to_tile(&bb, tile);
            BoxRecord {
                x,
                y,
                w,
                h,
                class: class.to_string(),
            }
        })
        .collect()
}

/// Finds the detection boxes of a tile
pub struct BoxResolver<'a> {
    annotation: &'a AnnotationSet,
    membership: Membership<'a>,
    classes: &'a [String],
}

impl<'a> BoxResolver<'a> {
    pub fn new(annotation: &'a AnnotationSet, membership: Membership<'a>, classes: &'a [String]) -> Self {
        BoxResolver {
            annotation,
            membership,
            classes,
        }
    }

    /// Boxes of every class the tile is on
    ///
    /// `foreground` never yields boxes. A class whose mask puts the tile
    /// on it while none of its boxes intersects the tile is an error for
    /// this tile.
    pub fn resolve(&self, tile: Region) -> PatchResult<Vec<BoxRecord>> {
        let mut boxes = Vec::new();
        for class in self.classes.iter().filter(|c| c.as_str() != FOREGROUND) {
            if !self.membership.on_class(class, tile)? {
                continue;
            }
            let found = boxes_on_tile(self.annotation, class, tile);
            if found.is_empty() {
                return Err(PatchError::NoMatchingBox {
                    x: tile.x,
                    y: tile.y,
                    class: class.clone(),
                });
            }
            boxes.extend(found);
        }
        Ok(boxes)
    }
}
