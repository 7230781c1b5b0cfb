//! Tile grid over a slide
//!
//! Left-top coordinates start at the offset and advance by
//! `patch - overlap`. The last generated value of each axis is dropped and
//! the right and bottom edges are covered by extra tiles anchored at
//! `width - patch` and `height - patch`, so no strip of the slide is left
//! out no matter where the stride lands.
//!
//! Every origin lies inside the slide, but with a non-zero overlap the last
//! main-grid tiles of an axis can reach past the slide edge; crops there are
//! zero-filled by the backend.

use log::debug;

use crate::error::{PatchError, PatchResult};
use crate::slide::Region;

/// Geometry a grid is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSpec {
    pub slide_width: u32,
    pub slide_height: u32,
    pub patch_width: u32,
    pub patch_height: u32,
    pub overlap_width: u32,
    pub overlap_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl GridSpec {
    /// Check every precondition of the grid
    ///
    /// # Returns
    /// `InvalidGeometry` naming the first violated constraint
    pub fn validate(&self) -> PatchResult<()> {
        check_axis("width", self.slide_width, self.patch_width, self.overlap_width, self.offset_x)?;
        check_axis("height", self.slide_height, self.patch_height, self.overlap_height, self.offset_y)
    }
}

fn check_axis(axis: &str, slide: u32, patch: u32, overlap: u32, offset: u32) -> PatchResult<()> {
    if patch == 0 {
        return Err(PatchError::InvalidGeometry(format!(
            "patch {} larger than 0 required, got patch=0",
            axis
        )));
    }
    if slide <= patch {
        return Err(PatchError::InvalidGeometry(format!(
            "slide {axis} larger than patch {axis} required, got slide={} patch={}",
            slide, patch
        )));
    }
    if patch <= overlap {
        return Err(PatchError::InvalidGeometry(format!(
            "patch {axis} larger than overlap {axis} required, got patch={} overlap={}",
            patch, overlap
        )));
    }
    if offset > slide {
        return Err(PatchError::InvalidGeometry(format!(
            "offset not larger than slide {axis} required, got offset={} slide={}",
            offset, slide
        )));
    }
    Ok(())
}

/// Checks that an expanded dot box fits into one patch
pub fn validate_dot_box(dot: (u32, u32), patch: (u32, u32)) -> PatchResult<()> {
    let ((dot_w, dot_h), (patch_w, patch_h)) = (dot, patch);
    if dot_w > patch_w {
        return Err(PatchError::InvalidGeometry(format!(
            "dot box width not larger than patch width required, got dot={} patch={}",
            dot_w, patch_w
        )));
    }
    if dot_h > patch_h {
        return Err(PatchError::InvalidGeometry(format!(
            "dot box height not larger than patch height required, got dot={} patch={}",
            dot_h, patch_h
        )));
    }
    Ok(())
}

/// Left-top positions of `start, start + stride, ...` below `end`, without the last one
fn axis_positions(start: u32, end: u32, stride: u32) -> Vec<u32> {
    let mut positions: Vec<u32> = (start..end).step_by(stride as usize).collect();
    positions.pop();
    positions
}

/// Every tile position of one slide
#[derive(Debug, Clone)]
pub struct TileGrid {
    spec: GridSpec,
    xs: Vec<u32>,
    ys: Vec<u32>,
}

impl TileGrid {
    /// Build the grid after validating `spec`
    pub fn new(spec: GridSpec) -> PatchResult<Self> {
        spec.validate()?;
        let xs = axis_positions(spec.offset_x, spec.slide_width, spec.patch_width - spec.overlap_width);
        let ys = axis_positions(spec.offset_y, spec.slide_height, spec.patch_height - spec.overlap_height);
        debug!("Grid axes: {} columns, {} rows", xs.len(), ys.len());
        Ok(TileGrid { spec, xs, ys })
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    /// Column origins of the main grid
    pub fn xs(&self) -> &[u32] {
        &self.xs
    }

    /// Row origins of the main grid
    pub fn ys(&self) -> &[u32] {
        &self.ys
    }

    /// Origin of the right edge column
    pub fn last_x(&self) -> u32 {
        self.spec.slide_width - self.spec.patch_width
    }

    /// Origin of the bottom edge row
    pub fn last_y(&self) -> u32 {
        self.spec.slide_height - self.spec.patch_height
    }

    fn tile(&self, x: u32, y: u32) -> Region {
        Region::new(x, y, self.spec.patch_width, self.spec.patch_height)
    }

    /// Cartesian product of the axes, column by column
    pub fn main_tiles(&self) -> impl Iterator<Item = Region> + '_ {
        self.xs
            .iter()
            .flat_map(move |&x| self.ys.iter().map(move |&y| self.tile(x, y)))
    }

    /// All tiles in grid order
    ///
    /// The main grid comes first, then the bottom edge row, the right edge
    /// column and finally the bottom right corner.
    pub fn tiles(&self) -> Vec<Region> {
        let (last_x, last_y) = (self.last_x(), self.last_y());
        let mut tiles = Vec::with_capacity(self.len());
        tiles.extend(self.main_tiles());
        tiles.extend(self.xs.iter().map(|&x| self.tile(x, last_y)));
        tiles.extend(self.ys.iter().map(|&y| self.tile(last_x, y)));
        tiles.push(self.tile(last_x, last_y));
        tiles
    }

    /// Number of tiles [`Self::tiles`] yields
    pub fn len(&self) -> usize {
        self.xs.len() * self.ys.len() + self.xs.len() + self.ys.len() + 1
    }
}
