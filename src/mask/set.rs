//! Tile lookups on the finished masks

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::coordinate::round_half_up;
use crate::error::{PatchError, PatchResult};

use super::pipeline::Canvas;
use super::Mask;

/// Final per-class masks of one slide
///
/// In native mode every mask has the slide's shape and tile rectangles
/// index it directly. In low-memory mode masks stay at canvas scale and
/// each lookup scales the tile down, slices, then scales the slice back up
/// to the tile size.
#[derive(Debug, Clone)]
pub struct MaskSet {
    canvas: Canvas,
    masks: BTreeMap<String, Mask>,
    low_memory: bool,
}

impl MaskSet {
    pub(crate) fn new(canvas: Canvas, masks: BTreeMap<String, Mask>, low_memory: bool) -> Self {
        MaskSet {
            canvas,
            masks,
            low_memory,
        }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn is_low_memory(&self) -> bool {
        self.low_memory
    }

    /// Classes with a mask, sorted
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.masks.keys().map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.masks.contains_key(class)
    }

    pub fn get(&self, class: &str) -> Option<&Mask> {
        self.masks.get(class)
    }

    fn mask(&self, class: &str) -> PatchResult<&Mask> {
        self.masks
            .get(class)
            .ok_or_else(|| PatchError::UnknownClass(class.to_string()))
    }

    /// Canvas rectangle covering a native tile: floor of the origin, ceil of the far edge
    fn scaled_rect(&self, x: u32, y: u32, width: u32, height: u32) -> (i64, i64, u32, u32) {
        let s = self.canvas.scale;
        let x0 = (x as f64 * s).floor() as i64;
        let y0 = (y as f64 * s).floor() as i64;
        let x1 = ((x as f64 + width as f64) * s).ceil() as i64;
        let y1 = ((y as f64 + height as f64) * s).ceil() as i64;
        (x0, y0, (x1 - x0).max(1) as u32, (y1 - y0).max(1) as u32)
    }

    /// Mask of a class cut to a tile, at tile resolution
    ///
    /// # Arguments
    /// * `class` - Class name
    /// * `x`, `y` - Tile origin in native pixels
    /// * `width`, `height` - Tile size
    ///
    /// # Returns
    /// A `width x height` mask, or `UnknownClass`
    pub fn crop(&self, class: &str, x: u32, y: u32, width: u32, height: u32) -> PatchResult<Mask> {
        let mask = self.mask(class)?;
        if !self.low_memory {
            return Ok(mask.crop(x as i64, y as i64, width, height));
        }

        let (cx, cy, cw, ch) = self.scaled_rect(x, y, width, height);
        Ok(mask.crop(cx, cy, cw, ch).resize(width, height))
    }

    /// Share of a tile covered by a class: `sum(mask[tile]) / (w * h)`
    pub fn ratio(&self, class: &str, x: u32, y: u32, width: u32, height: u32) -> PatchResult<f64> {
        let area = width as f64 * height as f64;
        if area == 0.0 {
            return Ok(0.0);
        }

        let covered = if self.low_memory {
            self.crop(class, x, y, width, height)?.count()
        } else {
            self.mask(class)?.sum_region(x as i64, y as i64, width, height)
        };
        Ok(covered as f64 / area)
    }

    /// Write `{class}_thumb.png` per class, long side `size`, values 0/255
    pub fn export_thumbs(&self, dir: &Path, size: u32) -> PatchResult<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(self.masks.len());
        for (class, mask) in &self.masks {
            let (w, h) = mask.dimensions();
            let scale = (size as f64 / w as f64).min(size as f64 / h as f64);
            let thumb = mask.resize(
                round_half_up(w as f64 * scale).max(1) as u32,
                round_half_up(h as f64 * scale).max(1) as u32,
            );
            let path = dir.join(format!("{}_thumb.png", class));
            thumb.to_visible().save(&path)?;
            written.push(path);
        }
        info!("Exported {} mask thumbnails to {}", written.len(), dir.display());
        Ok(written)
    }

    /// Write `{class}.png` per class with raw 0/1 values
    pub fn export_masks(&self, dir: &Path) -> PatchResult<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(self.masks.len());
        for (class, mask) in &self.masks {
            let path = dir.join(format!("{}.png", class));
            mask.as_image().save(&path)?;
            written.push(path);
        }
        info!("Exported {} masks to {}", written.len(), dir.display());
        Ok(written)
    }
}
