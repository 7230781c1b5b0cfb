//! Slide decoding backends
//!
//! The backend is an explicit value chosen per slide, so slides decoded by
//! different backends can be processed side by side in one run.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use image::{DynamicImage, RgbImage};

use crate::error::{PatchError, PatchResult};

use super::image_slide::ImageSlide;
use super::properties::SlideProperties;
use super::region::Region;
use super::tiff_slide::TiffSlide;

/// Decoding service behind a [`super::Slide`]
///
/// `read_region` may be called from many worker threads at once.
pub trait SlideBackend: Send + Sync {
    /// Level 0 `(width, height)`
    fn dimensions(&self) -> (u32, u32);

    fn properties(&self) -> &SlideProperties;

    /// Number of resolution levels, 1 for flat images
    fn level_count(&self) -> usize {
        1
    }

    /// Pixels of a level 0 rectangle; the part outside the slide is black
    fn read_region(&self, region: Region) -> PatchResult<RgbImage>;

    /// Whole slide scaled so its long side is at most `max_dim`
    fn thumbnail(&self, max_dim: u32) -> PatchResult<DynamicImage>;
}

/// Available slide decoders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Tiled or stripped TIFF/BigTIFF pyramids (`.svs`, `.tif`, ...)
    Tiff,
    /// Any flat image the `image` crate decodes, held in memory
    Image,
}

const TIFF_EXTENSIONS: &[&str] = &["tif", "tiff", "svs", "ptif", "btf", "tf8"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp", "pnm", "tga"];

impl Backend {
    /// Backend for a slide path, chosen by file extension
    pub fn detect(path: &Path) -> PatchResult<Backend> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if TIFF_EXTENSIONS.contains(&ext.as_str()) {
            Ok(Backend::Tiff)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Ok(Backend::Image)
        } else {
            Err(PatchError::SlideLoad(format!(
                "no backend for '{}' (extension '{}')",
                path.display(),
                ext
            )))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Tiff => "tiff",
            Backend::Image => "image",
        }
    }

    /// Opens a slide with this backend
    pub fn open(&self, path: &Path) -> PatchResult<Box<dyn SlideBackend>> {
        match self {
            Backend::Tiff => Ok(Box::new(TiffSlide::open(path)?)),
            Backend::Image => Ok(Box::new(ImageSlide::open(path)?)),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tiff" => Ok(Backend::Tiff),
            "image" => Ok(Backend::Image),
            other => Err(PatchError::InvalidConfig(format!(
                "unknown backend '{}', expected tiff or image",
                other
            ))),
        }
    }
}
