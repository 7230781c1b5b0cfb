//! TIFF/BigTIFF directory reader
//!
//! Reads the header, follows the IFD chain and decodes tag values. Pixel data
//! is not touched here; the slide backend reads tiles and strips itself using
//! the offsets this reader resolves.

use log::{debug, info, warn};
use std::fs::File;
use std::io::{BufReader, Cursor, SeekFrom};
use std::path::Path;

use byteorder::ReadBytesExt;

use crate::io::byte_order::{ByteOrder, ByteOrderHandler};
use crate::io::seekable::SeekableReader;
use crate::tiff::constants::{field_types, header};
use crate::tiff::errors::{TiffError, TiffResult};
use crate::tiff::ifd::{IFDEntry, IFD};
use crate::tiff::types::TIFF;
use crate::tiff::validation;

/// Reader for TIFF and BigTIFF files
///
/// The byte order and variant are fixed by [`TiffReader::read`]; tag values
/// can be resolved afterwards against any reader positioned on the same file.
pub struct TiffReader {
    byte_order: ByteOrder,
    handler: Box<dyn ByteOrderHandler>,
    is_big_tiff: bool,
}

impl Default for TiffReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TiffReader {
    pub fn new() -> Self {
        TiffReader {
            byte_order: ByteOrder::LittleEndian,
            handler: ByteOrder::LittleEndian.create_handler(),
            is_big_tiff: false,
        }
    }

    pub fn is_big_tiff(&self) -> bool {
        self.is_big_tiff
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Opens and parses a TIFF file
    ///
    /// # Arguments
    /// * `path` - Path to the TIFF file
    ///
    /// # Returns
    /// The parsed directories
    pub fn load(&mut self, path: &Path) -> TiffResult<TIFF> {
        info!("Loading TIFF file: {}", path.display());
        let file = File::open(path)?;
        let mut reader = BufReader::with_capacity(1024 * 1024, file);
        self.read(&mut reader)
    }

    /// Parses the header and every IFD reachable from it
    pub fn read(&mut self, reader: &mut dyn SeekableReader) -> TiffResult<TIFF> {
        reader.seek(SeekFrom::Start(0))?;
        self.byte_order = ByteOrder::detect(reader)?;
        self.handler = self.byte_order.create_handler();
        debug!("Detected byte order: {}", self.byte_order.name());

        let version = self.handler.read_u16(reader)?;
        self.is_big_tiff = match version {
            header::TIFF_VERSION => false,
            header::BIG_TIFF_VERSION => {
                validation::validate_bigtiff_header(reader, self.handler.as_ref())?;
                true
            }
            other => return Err(TiffError::UnsupportedVersion(other)),
        };
        debug!("TIFF version {} (BigTIFF: {})", version, self.is_big_tiff);

        let first_offset = self.handler.read_offset(reader, self.is_big_tiff)?;
        let file_size = validation::get_file_size(reader)?;
        validation::validate_ifd_offset(first_offset, file_size)?;

        let mut tiff = TIFF::new(self.is_big_tiff, self.byte_order);
        tiff.ifds = self.read_ifd_chain(reader, first_offset, file_size)?;
        if tiff.ifds.is_empty() {
            return Err(TiffError::Malformed("no readable IFD".to_string()));
        }

        info!("Read {} IFDs", tiff.ifds.len());
        Ok(tiff)
    }

    /// Follows next-IFD links until 0, a bad offset, or a loop
    fn read_ifd_chain(
        &self,
        reader: &mut dyn SeekableReader,
        first_offset: u64,
        file_size: u64,
    ) -> TiffResult<Vec<IFD>> {
        let mut ifds: Vec<IFD> = Vec::new();
        let mut offset = first_offset;

        while offset != 0 && ifds.len() < header::MAX_IFDS {
            if ifds.iter().any(|ifd| ifd.offset == offset) {
                warn!("IFD chain loops back to offset {}, stopping", offset);
                break;
            }
            if validation::validate_ifd_offset(offset, file_size).is_err() {
                warn!("IFD offset {} outside file of {} bytes, stopping", offset, file_size);
                break;
            }

            let ifd = match self.read_ifd(reader, offset, ifds.len()) {
                Ok(ifd) => ifd,
                Err(e) => {
                    // earlier levels stay usable
                    warn!("Error reading IFD {}: {}", ifds.len(), e);
                    break;
                }
            };
            debug!("{}", ifd);
            ifds.push(ifd);

            offset = match self.handler.read_offset(reader, self.is_big_tiff) {
                Ok(next) => next,
                Err(e) => {
                    warn!("Error reading next IFD offset: {}", e);
                    break;
                }
            };
        }

        Ok(ifds)
    }

    /// Reads one IFD; the reader is left on the next-IFD offset field
    pub fn read_ifd(&self, reader: &mut dyn SeekableReader, offset: u64, number: usize) -> TiffResult<IFD> {
        reader.seek(SeekFrom::Start(offset))?;
        let entry_count = if self.is_big_tiff {
            self.handler.read_u64(reader)?
        } else {
            u64::from(self.handler.read_u16(reader)?)
        };

        let mut ifd = IFD::new(number, offset);
        for _ in 0..entry_count {
            ifd.add_entry(self.read_ifd_entry(reader)?);
        }
        Ok(ifd)
    }

    fn read_ifd_entry(&self, reader: &mut dyn SeekableReader) -> TiffResult<IFDEntry> {
        let tag = self.handler.read_u16(reader)?;
        let field_type = self.handler.read_u16(reader)?;
        let count = if self.is_big_tiff {
            self.handler.read_u64(reader)?
        } else {
            u64::from(self.handler.read_u32(reader)?)
        };

        let mut field = vec![0u8; if self.is_big_tiff { 8 } else { 4 }];
        reader.read_exact(&mut field)?;

        if IFDEntry::fits_inline(field_type, count, self.is_big_tiff) {
            let mut cursor = Cursor::new(field.as_slice());
            let values = (0..count)
                .map(|_| self.read_value(&mut cursor, field_type))
                .collect::<TiffResult<Vec<u64>>>();
            if let Ok(values) = values {
                return Ok(IFDEntry::inline(tag, field_type, count, values));
            }
        }

        let mut cursor = Cursor::new(field.as_slice());
        let offset = self.handler.read_offset(&mut cursor, self.is_big_tiff)?;
        Ok(IFDEntry::at_offset(tag, field_type, count, offset))
    }

    /// One value of an integer-like field type, widened to u64
    ///
    /// Rationals pack the numerator into the high 32 bits.
    fn read_value(&self, reader: &mut dyn SeekableReader, field_type: u16) -> TiffResult<u64> {
        let value = match field_type {
            field_types::BYTE | field_types::SBYTE | field_types::UNDEFINED | field_types::ASCII => {
                u64::from(reader.read_u8()?)
            }
            field_types::SHORT | field_types::SSHORT => u64::from(self.handler.read_u16(reader)?),
            field_types::LONG | field_types::SLONG | field_types::FLOAT => {
                u64::from(self.handler.read_u32(reader)?)
            }
            field_types::RATIONAL | field_types::SRATIONAL => {
                let num = u64::from(self.handler.read_u32(reader)?);
                let den = u64::from(self.handler.read_u32(reader)?);
                (num << 32) | den
            }
            field_types::DOUBLE | field_types::LONG8 | field_types::SLONG8 | field_types::IFD8 => {
                self.handler.read_u64(reader)?
            }
            other => return Err(TiffError::UnsupportedFieldType(other)),
        };
        Ok(value)
    }

    /// All values of a tag, widened to u64
    ///
    /// # Arguments
    /// * `reader` - Reader on the same file the IFD came from
    /// * `ifd` - IFD holding the tag
    /// * `tag` - Tag number
    ///
    /// # Returns
    /// The values, or `TagNotFound`
    pub fn read_tag_values(&self, reader: &mut dyn SeekableReader, ifd: &IFD, tag: u16) -> TiffResult<Vec<u64>> {
        let entry = ifd.get_entry(tag).ok_or(TiffError::TagNotFound(tag))?;
        if let Some(values) = &entry.inline_values {
            return Ok(values.clone());
        }

        let file_size = validation::get_file_size(reader)?;
        validation::validate_data_range(entry.value_offset, entry.byte_size(), file_size)?;
        reader.seek(SeekFrom::Start(entry.value_offset))?;
        (0..entry.count)
            .map(|_| self.read_value(reader, entry.field_type))
            .collect()
    }

    /// An ASCII tag as a string, trailing NULs removed
    pub fn read_ascii(&self, reader: &mut dyn SeekableReader, ifd: &IFD, tag: u16) -> TiffResult<String> {
        let mut bytes: Vec<u8> = self
            .read_tag_values(reader, ifd, tag)?
            .into_iter()
            .map(|v| v as u8)
            .collect();
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
