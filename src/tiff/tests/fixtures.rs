//! In-memory TIFF files for tests
//!
//! Writes classic TIFF with one IFD per [`FixtureImage`], tiled or stripped,
//! in either byte order. Payloads are encoded with the crate's own
//! compression handlers.

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

use crate::compression::CompressionFactory;
use crate::tiff::constants::{field_types, header, tags};

#[derive(Debug, Clone, Copy)]
pub enum FixtureLayout {
    Tiled { width: u32, height: u32 },
    Stripped { rows: u32 },
}

#[derive(Debug, Clone)]
pub struct FixtureImage {
    pub width: u32,
    pub height: u32,
    /// 1 (gray) or 3 (RGB)
    pub samples: u16,
    /// Chunky samples, row major
    pub pixels: Vec<u8>,
    pub layout: FixtureLayout,
    pub compression: u64,
    pub predictor: bool,
    pub reduced: bool,
    pub description: Option<String>,
}

impl FixtureImage {
    /// RGB image whose pixel at (x, y) is `(x % 256, y % 256, (x + y) % 256)`
    pub fn gradient(width: u32, height: u32, layout: FixtureLayout) -> Self {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
            }
        }
        FixtureImage {
            width,
            height,
            samples: 3,
            pixels,
            layout,
            compression: 1,
            predictor: false,
            reduced: false,
            description: None,
        }
    }

    /// Block of `width x height` samples starting at (x0, y0), zero padded
    fn block(&self, x0: u32, y0: u32, width: u32, height: u32) -> Vec<u8> {
        let spp = self.samples as usize;
        let mut out = vec![0u8; width as usize * height as usize * spp];
        for y in 0..height {
            for x in 0..width {
                let (gx, gy) = (x0 + x, y0 + y);
                if gx >= self.width || gy >= self.height {
                    continue;
                }
                let src = (gy as usize * self.width as usize + gx as usize) * spp;
                let dst = (y as usize * width as usize + x as usize) * spp;
                out[dst..dst + spp].copy_from_slice(&self.pixels[src..src + spp]);
            }
        }
        if self.predictor {
            let row = width as usize * spp;
            for line in out.chunks_mut(row) {
                for i in (spp..line.len()).rev() {
                    line[i] = line[i].wrapping_sub(line[i - spp]);
                }
            }
        }
        out
    }

    fn chunks(&self) -> Vec<Vec<u8>> {
        let handler = CompressionFactory::create_handler(self.compression).unwrap();
        let mut raw = Vec::new();
        match self.layout {
            FixtureLayout::Tiled { width, height } => {
                for ty in 0..self.height.div_ceil(height) {
                    for tx in 0..self.width.div_ceil(width) {
                        raw.push(self.block(tx * width, ty * height, width, height));
                    }
                }
            }
            FixtureLayout::Stripped { rows } => {
                for s in 0..self.height.div_ceil(rows) {
                    let y0 = s * rows;
                    raw.push(self.block(0, y0, self.width, rows.min(self.height - y0)));
                }
            }
        }
        raw.iter().map(|chunk| handler.compress(chunk).unwrap()).collect()
    }
}

struct Writer {
    buf: Vec<u8>,
    big_endian: bool,
}

impl Writer {
    fn u16(&mut self, v: u16) {
        if self.big_endian {
            self.buf.write_u16::<BigEndian>(v).unwrap();
        } else {
            self.buf.write_u16::<LittleEndian>(v).unwrap();
        }
    }

    fn u32(&mut self, v: u32) {
        if self.big_endian {
            self.buf.write_u32::<BigEndian>(v).unwrap();
        } else {
            self.buf.write_u32::<LittleEndian>(v).unwrap();
        }
    }

    fn patch_u32(&mut self, at: usize, v: u32) {
        let bytes = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.buf[at..at + 4].copy_from_slice(&bytes);
    }

    fn pos(&self) -> u32 {
        self.buf.len() as u32
    }

    /// Writes an out-of-line array and returns its offset
    fn array_u32(&mut self, values: &[u32]) -> u32 {
        let at = self.pos();
        for &v in values {
            self.u32(v);
        }
        at
    }
}

enum Value {
    Short(u16),
    Long(u32),
    Longs(Vec<u32>),
    Shorts(Vec<u16>),
    Ascii(Vec<u8>),
}

/// Serializes the images as one classic TIFF, first image first
pub fn build(images: &[FixtureImage], big_endian: bool) -> Vec<u8> {
    let mut w = Writer {
        buf: Vec::new(),
        big_endian,
    };
    w.u16(if big_endian {
        header::BIG_ENDIAN_MARKER
    } else {
        header::LITTLE_ENDIAN_MARKER
    });
    w.u16(header::TIFF_VERSION);
    let mut link_at = w.buf.len();
    w.u32(0);

    for image in images {
        let chunks = image.chunks();
        let mut offsets = Vec::with_capacity(chunks.len());
        let mut counts = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            offsets.push(w.pos());
            counts.push(chunk.len() as u32);
            w.buf.extend_from_slice(chunk);
        }

        let mut entries: Vec<(u16, Value)> = vec![
            (tags::NEW_SUBFILE_TYPE, Value::Long(u32::from(image.reduced))),
            (tags::IMAGE_WIDTH, Value::Long(image.width)),
            (tags::IMAGE_LENGTH, Value::Long(image.height)),
            (tags::BITS_PER_SAMPLE, Value::Shorts(vec![8; image.samples as usize])),
            (tags::COMPRESSION, Value::Short(image.compression as u16)),
            (tags::PHOTOMETRIC_INTERPRETATION, Value::Short(if image.samples == 3 { 2 } else { 1 })),
            (tags::SAMPLES_PER_PIXEL, Value::Short(image.samples)),
            (tags::PLANAR_CONFIGURATION, Value::Short(1)),
        ];
        if let Some(text) = &image.description {
            let mut bytes = text.as_bytes().to_vec();
            bytes.push(0);
            entries.push((tags::IMAGE_DESCRIPTION, Value::Ascii(bytes)));
        }
        if image.predictor {
            entries.push((tags::PREDICTOR, Value::Short(2)));
        }
        match image.layout {
            FixtureLayout::Tiled { width, height } => {
                entries.push((tags::TILE_WIDTH, Value::Long(width)));
                entries.push((tags::TILE_LENGTH, Value::Long(height)));
                entries.push((tags::TILE_OFFSETS, Value::Longs(offsets)));
                entries.push((tags::TILE_BYTE_COUNTS, Value::Longs(counts)));
            }
            FixtureLayout::Stripped { rows } => {
                entries.push((tags::STRIP_OFFSETS, Value::Longs(offsets)));
                entries.push((tags::ROWS_PER_STRIP, Value::Long(rows)));
                entries.push((tags::STRIP_BYTE_COUNTS, Value::Longs(counts)));
            }
        }
        entries.sort_by_key(|(tag, _)| *tag);

        // out-of-line data first, then the directory pointing at it
        let mut resolved = Vec::with_capacity(entries.len());
        for (tag, value) in entries {
            let entry = match value {
                Value::Short(v) => (tag, field_types::SHORT, 1, Inline::Short(v)),
                Value::Long(v) => (tag, field_types::LONG, 1, Inline::Long(v)),
                Value::Longs(vs) if vs.len() == 1 => (tag, field_types::LONG, 1, Inline::Long(vs[0])),
                Value::Longs(vs) => {
                    let at = w.array_u32(&vs);
                    (tag, field_types::LONG, vs.len() as u32, Inline::Long(at))
                }
                Value::Shorts(vs) if vs.len() <= 2 => {
                    let second = vs.get(1).copied().unwrap_or(0);
                    (tag, field_types::SHORT, vs.len() as u32, Inline::Pair(vs[0], second))
                }
                Value::Shorts(vs) => {
                    let at = w.pos();
                    for v in &vs {
                        w.u16(*v);
                    }
                    (tag, field_types::SHORT, vs.len() as u32, Inline::Long(at))
                }
                Value::Ascii(bytes) => {
                    let at = w.pos();
                    w.buf.extend_from_slice(&bytes);
                    (tag, field_types::ASCII, bytes.len() as u32, Inline::Long(at))
                }
            };
            resolved.push(entry);
        }
        if w.buf.len() % 2 == 1 {
            w.buf.push(0);
        }

        let ifd_at = w.pos();
        w.patch_u32(link_at, ifd_at);
        w.u16(resolved.len() as u16);
        for (tag, field_type, count, inline) in resolved {
            w.u16(tag);
            w.u16(field_type);
            w.u32(count);
            match inline {
                Inline::Short(v) => {
                    w.u16(v);
                    w.u16(0);
                }
                Inline::Pair(a, b) => {
                    w.u16(a);
                    w.u16(b);
                }
                Inline::Long(v) => w.u32(v),
            }
        }
        link_at = w.buf.len();
        w.u32(0);
    }

    w.buf
}

enum Inline {
    Short(u16),
    Pair(u16, u16),
    Long(u32),
}
