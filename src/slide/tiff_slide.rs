//! Pyramidal TIFF backend
//!
//! Reads 8-bit chunky RGB or grayscale levels stored as tiles or strips,
//! uncompressed, Deflate or Zstandard, with or without the horizontal
//! predictor. Every reduced copy with the base level's aspect ratio becomes
//! a pyramid level and is used for thumbnails.

use std::fs::File;
use std::io::{BufReader, SeekFrom};
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use log::{debug, info};

use crate::compression::{CompressionFactory, CompressionHandler};
use crate::error::{PatchError, PatchResult};
use crate::io::seekable::SeekableReader;
use crate::tiff::constants::{compression, photometric, planar_config, predictor, tags};
use crate::tiff::errors::{TiffError, TiffResult};
use crate::tiff::ifd::IFD;
use crate::tiff::reader::TiffReader;
use crate::tiff::validation;

use super::backend::SlideBackend;
use super::properties::{self, SlideProperties};
use super::region::Region;

/// Relative aspect ratio difference still accepted as the same pyramid
const ASPECT_TOLERANCE: f64 = 0.02;

#[derive(Debug, Clone, Copy)]
enum ChunkLayout {
    Tiles { width: u32, height: u32 },
    Strips { rows: u32 },
}

/// One decodable IFD
#[derive(Debug, Clone)]
struct Level {
    ifd: usize,
    width: u32,
    height: u32,
    samples: usize,
    invert: bool,
    compression: u64,
    predictor: bool,
    layout: ChunkLayout,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
}

impl Level {
    /// Checks that the IFD holds pixels this backend decodes and loads its chunk table
    fn from_ifd(reader: &TiffReader, source: &mut dyn SeekableReader, ifd: &IFD) -> TiffResult<Level> {
        let (width, height) = ifd.get_dimensions().ok_or(TiffError::MissingDimensions)?;
        if width == 0 || height == 0 {
            return Err(TiffError::MissingDimensions);
        }

        let samples = ifd.get_samples_per_pixel() as usize;
        if !matches!(samples, 1 | 3 | 4) {
            return Err(TiffError::UnsupportedLayout(format!("{} samples per pixel", samples)));
        }

        let bits = if ifd.has_tag(tags::BITS_PER_SAMPLE) {
            reader.read_tag_values(source, ifd, tags::BITS_PER_SAMPLE)?
        } else {
            vec![1]
        };
        if bits.iter().any(|&b| b != 8) {
            return Err(TiffError::UnsupportedLayout(format!("{:?} bits per sample", bits)));
        }

        let planar = ifd.get_tag_value(tags::PLANAR_CONFIGURATION).unwrap_or(planar_config::CHUNKY);
        if samples > 1 && planar != planar_config::CHUNKY {
            return Err(TiffError::UnsupportedLayout("planar sample storage".to_string()));
        }

        let default_photometric = if samples == 1 {
            photometric::BLACK_IS_ZERO
        } else {
            photometric::RGB
        };
        let invert = match (samples, ifd.get_tag_value(tags::PHOTOMETRIC_INTERPRETATION).unwrap_or(default_photometric)) {
            (1, photometric::WHITE_IS_ZERO) => true,
            (1, photometric::BLACK_IS_ZERO) | (3 | 4, photometric::RGB) => false,
            (_, other) => {
                return Err(TiffError::UnsupportedLayout(format!("photometric interpretation {}", other)))
            }
        };

        let compression = ifd.get_tag_value(tags::COMPRESSION).unwrap_or(compression::NONE);
        CompressionFactory::create_handler(compression)?;

        let predictor = match ifd.get_tag_value(tags::PREDICTOR).unwrap_or(predictor::NONE) {
            predictor::NONE => false,
            predictor::HORIZONTAL_DIFFERENCING => true,
            other => return Err(TiffError::UnsupportedLayout(format!("predictor {}", other))),
        };

        let (layout, offsets, byte_counts) = if ifd.is_tiled() {
            let tile_width = ifd.get_tag_value(tags::TILE_WIDTH).ok_or(TiffError::TagNotFound(tags::TILE_WIDTH))?;
            let tile_height = ifd.get_tag_value(tags::TILE_LENGTH).ok_or(TiffError::TagNotFound(tags::TILE_LENGTH))?;
            let layout = ChunkLayout::Tiles {
                width: clamp_dim(tile_width)?,
                height: clamp_dim(tile_height)?,
            };
            (
                layout,
                reader.read_tag_values(source, ifd, tags::TILE_OFFSETS)?,
                reader.read_tag_values(source, ifd, tags::TILE_BYTE_COUNTS)?,
            )
        } else {
            let rows = ifd
                .get_tag_value(tags::ROWS_PER_STRIP)
                .unwrap_or(height as u64)
                .clamp(1, height as u64) as u32;
            (
                ChunkLayout::Strips { rows },
                reader.read_tag_values(source, ifd, tags::STRIP_OFFSETS)?,
                reader.read_tag_values(source, ifd, tags::STRIP_BYTE_COUNTS)?,
            )
        };

        let level = Level {
            ifd: ifd.number,
            width,
            height,
            samples,
            invert,
            compression,
            predictor,
            layout,
            offsets,
            byte_counts,
        };

        let (_, _, across, down) = level.chunk_grid();
        let expected = across as usize * down as usize;
        if level.offsets.len() < expected || level.byte_counts.len() < expected {
            return Err(TiffError::Malformed(format!(
                "IFD #{} lists {} chunks, {} needed",
                ifd.number,
                level.offsets.len().min(level.byte_counts.len()),
                expected
            )));
        }
        Ok(level)
    }

    /// `(chunk_width, chunk_height, chunks_across, chunks_down)`
    fn chunk_grid(&self) -> (u32, u32, u32, u32) {
        match self.layout {
            ChunkLayout::Tiles { width, height } => (
                width,
                height,
                self.width.div_ceil(width),
                self.height.div_ceil(height),
            ),
            ChunkLayout::Strips { rows } => (self.width, rows, 1, self.height.div_ceil(rows)),
        }
    }

    /// Rows actually stored in chunk row `cy`; the last strip may be short
    fn rows_in_chunk(&self, cy: u32) -> u32 {
        match self.layout {
            ChunkLayout::Tiles { height, .. } => height,
            ChunkLayout::Strips { rows } => rows.min(self.height - cy * rows),
        }
    }

    fn long_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

fn clamp_dim(value: u64) -> TiffResult<u32> {
    match u32::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(TiffError::Malformed(format!("chunk dimension {}", value))),
    }
}

/// A TIFF slide opened for random access
#[derive(Debug)]
pub struct TiffSlide {
    path: PathBuf,
    file_size: u64,
    /// Largest first
    levels: Vec<Level>,
    properties: SlideProperties,
}

impl TiffSlide {
    /// Parses the directory structure and keeps every decodable pyramid level
    ///
    /// # Errors
    /// `SlideLoad` when the file is missing, not a TIFF, or its first IFD
    /// cannot be decoded
    pub fn open(path: &Path) -> PatchResult<TiffSlide> {
        let load_error = |e: &dyn std::fmt::Display| PatchError::SlideLoad(format!("{}: {}", path.display(), e));

        let file = File::open(path).map_err(|e| load_error(&e))?;
        let mut source = BufReader::new(file);
        let mut reader = TiffReader::new();
        let tiff = reader.read(&mut source).map_err(|e| load_error(&e))?;
        let file_size = validation::get_file_size(&mut source)?;

        let main = tiff.main_ifd().ok_or_else(|| load_error(&"no image directory"))?;
        let base = Level::from_ifd(&reader, &mut source, main).map_err(|e| load_error(&e))?;
        let base_aspect = base.width as f64 / base.height as f64;

        let mut levels = vec![base];
        for ifd in tiff.ifds.iter().skip(1) {
            match Level::from_ifd(&reader, &mut source, ifd) {
                Ok(level) => {
                    let aspect = level.width as f64 / level.height as f64;
                    if level.width < levels[0].width && (aspect - base_aspect).abs() <= ASPECT_TOLERANCE * base_aspect {
                        levels.push(level);
                    } else {
                        debug!("IFD #{} ({}x{}) is not a pyramid level", ifd.number, level.width, level.height);
                    }
                }
                Err(e) => debug!("Skipping IFD #{}: {}", ifd.number, e),
            }
        }
        levels.sort_by(|a, b| b.width.cmp(&a.width));

        let mut properties = if main.has_tag(tags::IMAGE_DESCRIPTION) {
            let description = reader.read_ascii(&mut source, main, tags::IMAGE_DESCRIPTION)?;
            SlideProperties::from_description(&description)
        } else {
            SlideProperties::new()
        };
        properties.insert(properties::LEVEL_COUNT, levels.len().to_string());

        info!(
            "Opened TIFF slide {} ({}x{}, {} levels, {})",
            path.display(),
            levels[0].width,
            levels[0].height,
            levels.len(),
            if tiff.is_big_tiff { "BigTIFF" } else { "TIFF" }
        );

        Ok(TiffSlide {
            path: path.to_path_buf(),
            file_size,
            levels,
            properties,
        })
    }

    /// `(width, height)` of every level, largest first
    pub fn level_dimensions(&self) -> Vec<(u32, u32)> {
        self.levels.iter().map(|l| (l.width, l.height)).collect()
    }

    /// Reads one chunk, undoing compression and prediction
    fn read_chunk(
        &self,
        source: &mut dyn SeekableReader,
        level: &Level,
        handler: &dyn CompressionHandler,
        index: usize,
        width: u32,
        rows: u32,
    ) -> PatchResult<Vec<u8>> {
        let offset = level.offsets[index];
        let count = level.byte_counts[index];
        validation::validate_data_range(offset, count, self.file_size)?;

        source.seek(SeekFrom::Start(offset))?;
        let mut packed = vec![0u8; count as usize];
        source.read_exact(&mut packed)?;
        let mut data = handler.decompress(&packed)?;

        let row_len = width as usize * level.samples;
        let needed = row_len * rows as usize;
        if data.len() < needed {
            return Err(TiffError::Malformed(format!(
                "chunk {} of IFD #{} decodes to {} bytes, {} expected",
                index,
                level.ifd,
                data.len(),
                needed
            ))
            .into());
        }

        if level.predictor {
            for row in data[..needed].chunks_mut(row_len) {
                for i in level.samples..row.len() {
                    row[i] = row[i].wrapping_add(row[i - level.samples]);
                }
            }
        }
        Ok(data)
    }

    /// Rectangle of a level in that level's pixel coordinates
    fn read_level_region(&self, level: &Level, region: Region) -> PatchResult<RgbImage> {
        let mut out = RgbImage::new(region.width, region.height);
        let Some(visible) = region.intersect(&Region::new(0, 0, level.width, level.height)) else {
            return Ok(out);
        };

        let handler = CompressionFactory::create_handler(level.compression)?;
        let (chunk_w, chunk_h, across, _) = level.chunk_grid();
        let mut source = BufReader::new(File::open(&self.path)?);

        for cy in visible.y / chunk_h..=(visible.end_y() - 1) / chunk_h {
            for cx in visible.x / chunk_w..=(visible.end_x() - 1) / chunk_w {
                let index = (cy * across + cx) as usize;
                let rows = level.rows_in_chunk(cy);
                let data = self.read_chunk(&mut source, level, handler.as_ref(), index, chunk_w, rows)?;
                let chunk = Region::new(cx * chunk_w, cy * chunk_h, chunk_w, rows);
                copy_chunk(&data, level, chunk, visible, region, &mut out);
            }
        }
        Ok(out)
    }
}

/// Copies the visible part of a decoded chunk into the output crop
fn copy_chunk(data: &[u8], level: &Level, chunk: Region, visible: Region, region: Region, out: &mut RgbImage) {
    let Some(area) = chunk.intersect(&visible) else {
        return;
    };
    let spp = level.samples;
    for gy in area.y..area.end_y() {
        let row_start = (gy - chunk.y) as usize * chunk.width as usize;
        for gx in area.x..area.end_x() {
            let idx = (row_start + (gx - chunk.x) as usize) * spp;
            let pixel = if spp == 1 {
                let v = if level.invert { 255 - data[idx] } else { data[idx] };
                [v, v, v]
            } else {
                [data[idx], data[idx + 1], data[idx + 2]]
            };
            out.put_pixel(gx - region.x, gy - region.y, Rgb(pixel));
        }
    }
}

impl SlideBackend for TiffSlide {
    fn dimensions(&self) -> (u32, u32) {
        (self.levels[0].width, self.levels[0].height)
    }

    fn properties(&self) -> &SlideProperties {
        &self.properties
    }

    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn read_region(&self, region: Region) -> PatchResult<RgbImage> {
        self.read_level_region(&self.levels[0], region)
    }

    fn thumbnail(&self, max_dim: u32) -> PatchResult<DynamicImage> {
        let max_dim = max_dim.max(1);
        // smallest level that still has max_dim pixels on its long side
        let level = self
            .levels
            .iter()
            .rev()
            .find(|l| l.long_side() >= max_dim)
            .unwrap_or(&self.levels[0]);
        debug!("Thumbnail from IFD #{} ({}x{})", level.ifd, level.width, level.height);

        let pixels = self.read_level_region(level, Region::new(0, 0, level.width, level.height))?;
        let image = DynamicImage::ImageRgb8(pixels);
        if level.long_side() > max_dim {
            Ok(image.resize(max_dim, max_dim, FilterType::Triangle))
        } else {
            Ok(image)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiff::tests::fixtures::{self, FixtureImage, FixtureLayout};
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, images: &[FixtureImage], big_endian: bool) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, fixtures::build(images, big_endian)).unwrap();
        path
    }

    fn gradient_at(x: u32, y: u32) -> Rgb<u8> {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    }

    #[test]
    fn tiled_crop_spans_tile_borders() {
        let dir = TempDir::new().unwrap();
        let base = FixtureImage::gradient(70, 50, FixtureLayout::Tiled { width: 16, height: 16 });
        let path = write(&dir, "tiled.tif", &[base], false);

        let slide = TiffSlide::open(&path).unwrap();
        assert_eq!(slide.dimensions(), (70, 50));
        let crop = slide.read_region(Region::new(10, 12, 20, 20)).unwrap();
        for (x, y, pixel) in crop.enumerate_pixels() {
            assert_eq!(*pixel, gradient_at(x + 10, y + 12));
        }
    }

    #[test]
    fn crop_past_the_edge_is_black() {
        let dir = TempDir::new().unwrap();
        let base = FixtureImage::gradient(40, 30, FixtureLayout::Stripped { rows: 7 });
        let path = write(&dir, "strips.tif", &[base], true);

        let slide = TiffSlide::open(&path).unwrap();
        let crop = slide.read_region(Region::new(30, 20, 16, 16)).unwrap();
        assert_eq!(crop.dimensions(), (16, 16));
        assert_eq!(*crop.get_pixel(9, 9), gradient_at(39, 29));
        assert_eq!(*crop.get_pixel(10, 0), Rgb([0, 0, 0]));
        assert_eq!(*crop.get_pixel(0, 10), Rgb([0, 0, 0]));

        let outside = slide.read_region(Region::new(100, 100, 4, 4)).unwrap();
        assert!(outside.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn compressed_chunks_with_predictor() {
        let dir = TempDir::new().unwrap();
        for code in [compression::DEFLATE, compression::ZSTD] {
            let mut base = FixtureImage::gradient(48, 40, FixtureLayout::Tiled { width: 16, height: 16 });
            base.compression = code;
            base.predictor = true;
            let path = write(&dir, &format!("c{}.tif", code), &[base], false);

            let slide = TiffSlide::open(&path).unwrap();
            let crop = slide.read_region(Region::new(5, 5, 30, 30)).unwrap();
            assert_eq!(*crop.get_pixel(29, 29), gradient_at(34, 34));
            assert_eq!(*crop.get_pixel(0, 17), gradient_at(5, 22));
        }
    }

    #[test]
    fn grayscale_is_expanded_to_rgb() {
        let dir = TempDir::new().unwrap();
        let mut gray = FixtureImage::gradient(8, 8, FixtureLayout::Stripped { rows: 8 });
        gray.samples = 1;
        gray.pixels = (0..64).map(|v| v as u8).collect();
        let path = write(&dir, "gray.tif", &[gray], false);

        let slide = TiffSlide::open(&path).unwrap();
        let crop = slide.read_region(Region::new(0, 1, 2, 1)).unwrap();
        assert_eq!(*crop.get_pixel(1, 0), Rgb([9, 9, 9]));
    }

    #[test]
    fn pyramid_levels_feed_thumbnails() {
        let dir = TempDir::new().unwrap();
        let mut base = FixtureImage::gradient(64, 48, FixtureLayout::Tiled { width: 16, height: 16 });
        base.description = Some("Aperio Image Library v12 |AppMag = 40|MPP = 0.25".to_string());
        let mut small = FixtureImage::gradient(16, 12, FixtureLayout::Stripped { rows: 4 });
        small.reduced = true;
        let mut label = FixtureImage::gradient(20, 20, FixtureLayout::Stripped { rows: 20 });
        label.reduced = false;
        let path = write(&dir, "pyramid.svs", &[base, small, label], false);

        let slide = TiffSlide::open(&path).unwrap();
        assert_eq!(slide.level_dimensions(), vec![(64, 48), (16, 12)]);
        assert_eq!(slide.properties().objective_power(), Some(40.0));

        let thumb = slide.thumbnail(16).unwrap().to_rgb8();
        assert_eq!(thumb.dimensions(), (16, 12));
        assert_eq!(*thumb.get_pixel(5, 3), gradient_at(5, 3));

        let thumb = slide.thumbnail(40).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (40, 30));
    }

    #[test]
    fn missing_or_foreign_files_fail_to_load() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            TiffSlide::open(&dir.path().join("absent.svs")),
            Err(PatchError::SlideLoad(_))
        ));

        let junk = dir.path().join("junk.tif");
        std::fs::write(&junk, b"not a tiff at all").unwrap();
        assert!(matches!(TiffSlide::open(&junk), Err(PatchError::SlideLoad(_))));
    }
}
