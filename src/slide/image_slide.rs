//! Flat image backend
//!
//! Decodes the whole file into memory with the `image` crate. Meant for
//! small scans, exported regions and tests.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use log::info;

use crate::error::{PatchError, PatchResult};

use super::backend::SlideBackend;
use super::properties::{self, SlideProperties};
use super::region::Region;

/// A single-level slide held in memory
#[derive(Debug, Clone)]
pub struct ImageSlide {
    pixels: RgbImage,
    properties: SlideProperties,
}

impl ImageSlide {
    /// # Errors
    /// `SlideLoad` when the file is missing or cannot be decoded
    pub fn open(path: &Path) -> PatchResult<ImageSlide> {
        let image = image::open(path).map_err(|e| PatchError::SlideLoad(format!("{}: {}", path.display(), e)))?;
        info!("Opened image slide {} ({}x{})", path.display(), image.width(), image.height());
        Ok(Self::from_image(image))
    }

    /// Wraps an already decoded image
    pub fn from_image(image: DynamicImage) -> ImageSlide {
        let mut properties = SlideProperties::new();
        properties.insert(properties::LEVEL_COUNT, "1");
        ImageSlide {
            pixels: image.to_rgb8(),
            properties,
        }
    }

    /// Sets a metadata value, e.g. the objective power of the source scan
    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key, value);
        self
    }
}

impl SlideBackend for ImageSlide {
    fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    fn properties(&self) -> &SlideProperties {
        &self.properties
    }

    fn read_region(&self, region: Region) -> PatchResult<RgbImage> {
        let mut out = RgbImage::new(region.width, region.height);
        let (width, height) = self.pixels.dimensions();
        if let Some(visible) = region.intersect(&Region::new(0, 0, width, height)) {
            let view = imageops::crop_imm(&self.pixels, visible.x, visible.y, visible.width, visible.height).to_image();
            imageops::replace(&mut out, &view, (visible.x - region.x) as i64, (visible.y - region.y) as i64);
        }
        Ok(out)
    }

    fn thumbnail(&self, max_dim: u32) -> PatchResult<DynamicImage> {
        let max_dim = max_dim.max(1);
        let image = DynamicImage::ImageRgb8(self.pixels.clone());
        if self.pixels.width().max(self.pixels.height()) > max_dim {
            Ok(image.resize(max_dim, max_dim, FilterType::Triangle))
        } else {
            Ok(image)
        }
    }
}
