//! Tissue (foreground) detection on a grayscale thumbnail
//!
//! Tissue is darker than the glass around it, so every built-in policy maps
//! dark pixels to 1. Callers can plug their own binarization through
//! [`FnPolicy`].

use std::fmt;

use image::GrayImage;
use imageproc::contrast::otsu_level;

use crate::error::PatchResult;

use super::Mask;

/// Turns a grayscale thumbnail into a binary foreground mask
pub trait ForegroundPolicy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Binarize the thumbnail; the result must have the thumbnail's shape
    fn binarize(&self, gray: &GrayImage) -> PatchResult<Mask>;
}

/// Otsu's global threshold; pixels at or below the level are tissue
#[derive(Debug, Clone, Copy, Default)]
pub struct OtsuPolicy;

impl ForegroundPolicy for OtsuPolicy {
    fn name(&self) -> &str {
        "otsu"
    }

    fn binarize(&self, gray: &GrayImage) -> PatchResult<Mask> {
        let level = otsu_level(gray);
        log::debug!("Otsu level {}", level);
        Ok(threshold_with(gray, |v| v <= level))
    }
}

/// Intensity band `min <= pixel <= max`
#[derive(Debug, Clone, Copy)]
pub struct MinMaxPolicy {
    pub min: u8,
    pub max: u8,
}

impl Default for MinMaxPolicy {
    fn default() -> Self {
        MinMaxPolicy { min: 30, max: 190 }
    }
}

impl ForegroundPolicy for MinMaxPolicy {
    fn name(&self) -> &str {
        "minmax"
    }

    fn binarize(&self, gray: &GrayImage) -> PatchResult<Mask> {
        let (min, max) = (self.min, self.max);
        Ok(threshold_with(gray, |v| min <= v && v <= max))
    }
}

/// Treats the thumbnail as a mask already; any non-zero pixel is foreground
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughPolicy;

impl ForegroundPolicy for PassThroughPolicy {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn binarize(&self, gray: &GrayImage) -> PatchResult<Mask> {
        Ok(Mask::from_gray(gray.clone()))
    }
}

/// Caller supplied binarization
pub struct FnPolicy<F> {
    name: String,
    func: F,
}

impl<F> FnPolicy<F>
where
    F: Fn(&GrayImage) -> PatchResult<Mask> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        FnPolicy {
            name: name.into(),
            func,
        }
    }
}

impl<F> fmt::Debug for FnPolicy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPolicy").field("name", &self.name).finish()
    }
}

impl<F> ForegroundPolicy for FnPolicy<F>
where
    F: Fn(&GrayImage) -> PatchResult<Mask> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn binarize(&self, gray: &GrayImage) -> PatchResult<Mask> {
        (self.func)(gray)
    }
}

fn threshold_with(gray: &GrayImage, keep: impl Fn(u8) -> bool) -> Mask {
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel.0[0] = u8::from(keep(pixel.0[0]));
    }
    Mask::from_gray(out)
}
