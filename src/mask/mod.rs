//! Per-class binary masks
//!
//! A [`Mask`] is a single-channel raster whose pixels are exactly 0 or 1.
//! Annotation polygons are drawn into masks by [`raster`], tissue masks come
//! from a [`foreground`] policy, and [`pipeline`] chains rasterization, rule
//! application and the final resize into a [`MaskSet`] the patcher queries
//! tile by tile.

pub mod foreground;
pub mod pipeline;
pub mod raster;
pub mod set;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};

pub use foreground::{ForegroundPolicy, MinMaxPolicy, OtsuPolicy, PassThroughPolicy};
pub use pipeline::{Canvas, ExcludedMasks, IncludedMasks, MaskBuilder, RawMasks, ResizedMasks};
pub use set::MaskSet;

/// Binary raster with pixel values 0 or 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pixels: GrayImage,
}

impl Mask {
    /// All-zero mask
    pub fn new(width: u32, height: u32) -> Self {
        Mask {
            pixels: GrayImage::new(width, height),
        }
    }

    /// Wrap a grayscale image, mapping every non-zero pixel to 1
    pub fn from_gray(mut image: GrayImage) -> Self {
        for pixel in image.pixels_mut() {
            pixel.0[0] = u8::from(pixel.0[0] != 0);
        }
        Mask { pixels: image }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// `(width, height)`
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Value at a pixel; 0 outside the mask
    pub fn get(&self, x: i64, y: i64) -> u8 {
        if x < 0 || y < 0 || x >= self.width() as i64 || y >= self.height() as i64 {
            return 0;
        }
        self.pixels.get_pixel(x as u32, y as u32).0[0]
    }

    /// Set a pixel to 1; coordinates outside the mask are ignored
    pub fn mark(&mut self, x: i64, y: i64) {
        if x < 0 || y < 0 || x >= self.width() as i64 || y >= self.height() as i64 {
            return;
        }
        self.pixels.put_pixel(x as u32, y as u32, Luma([1]));
    }

    /// Set the pixels `x0..=x1` of row `y` to 1, clipped to the mask
    pub fn mark_span(&mut self, y: i64, x0: i64, x1: i64) {
        if y < 0 || y >= self.height() as i64 {
            return;
        }
        let start = x0.max(0);
        let end = x1.min(self.width() as i64 - 1);
        if start > end {
            return;
        }
        let row_start = y as usize * self.width() as usize;
        let raw: &mut [u8] = &mut self.pixels;
        raw[row_start + start as usize..=row_start + end as usize].fill(1);
    }

    /// Underlying 0/1 image
    pub fn as_image(&self) -> &GrayImage {
        &self.pixels
    }

    /// Number of set pixels
    pub fn count(&self) -> u64 {
        self.pixels.as_raw().iter().map(|&v| v as u64).sum()
    }

    /// Number of set pixels inside a rectangle, clipped to the mask
    pub fn sum_region(&self, x: i64, y: i64, width: u32, height: u32) -> u64 {
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + width as i64).min(self.width() as i64);
        let y1 = (y + height as i64).min(self.height() as i64);
        if x0 >= x1 || y0 >= y1 {
            return 0;
        }

        let stride = self.width() as usize;
        let raw = self.pixels.as_raw();
        (y0..y1)
            .map(|row| {
                let start = row as usize * stride;
                raw[start + x0 as usize..start + x1 as usize]
                    .iter()
                    .map(|&v| v as u64)
                    .sum::<u64>()
            })
            .sum()
    }

    /// Rectangle copy; the part outside the mask reads as 0
    pub fn crop(&self, x: i64, y: i64, width: u32, height: u32) -> Mask {
        let mut out = Mask::new(width, height);
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + width as i64).min(self.width() as i64);
        let y1 = (y + height as i64).min(self.height() as i64);
        if x0 >= x1 || y0 >= y1 {
            return out;
        }

        let src_stride = self.width() as usize;
        let dst_stride = width as usize;
        let span = (x1 - x0) as usize;
        let src = self.pixels.as_raw();
        let dst: &mut [u8] = &mut out.pixels;
        for row in y0..y1 {
            let s = row as usize * src_stride + x0 as usize;
            let d = (row - y) as usize * dst_stride + (x0 - x) as usize;
            dst[d..d + span].copy_from_slice(&src[s..s + span]);
        }
        out
    }

    /// Nearest-neighbour resize; keeps values binary
    pub fn resize(&self, width: u32, height: u32) -> Mask {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        Mask {
            pixels: imageops::resize(&self.pixels, width.max(1), height.max(1), FilterType::Nearest),
        }
    }

    fn combine(&self, other: &Mask, op: impl Fn(u8, u8) -> u8) -> Mask {
        let resized;
        let other = if other.dimensions() == self.dimensions() {
            other
        } else {
            resized = other.resize(self.width(), self.height());
            &resized
        };

        let mut out = self.clone();
        let dst: &mut [u8] = &mut out.pixels;
        for (d, &o) in dst.iter_mut().zip(other.pixels.as_raw()) {
            *d = op(*d, o);
        }
        out
    }

    /// Pixelwise OR; `other` is resized first if its shape differs
    pub fn or(&self, other: &Mask) -> Mask {
        self.combine(other, |a, b| a | b)
    }

    /// Pixelwise AND; `other` is resized first if its shape differs
    pub fn and(&self, other: &Mask) -> Mask {
        self.combine(other, |a, b| a & b)
    }

    /// Pixelwise XOR; `other` is resized first if its shape differs
    pub fn xor(&self, other: &Mask) -> Mask {
        self.combine(other, |a, b| a ^ b)
    }

    /// Copy with 1 mapped to 255, for viewing
    pub fn to_visible(&self) -> GrayImage {
        let mut image = self.pixels.clone();
        for pixel in image.pixels_mut() {
            pixel.0[0] = pixel.0[0].saturating_mul(255);
        }
        image
    }
}
