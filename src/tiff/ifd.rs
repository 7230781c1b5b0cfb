//! Image File Directory (IFD) structures
//!
//! Each pyramid level, label and macro image of a slide lives in its own IFD.
//! An IFD is a list of tag entries; small values sit inside the entry itself
//! and larger ones are stored elsewhere in the file at `value_offset`.

use std::collections::HashMap;
use std::fmt;

use log::trace;

use crate::tiff::constants::{field_types, new_subfile_type, tags};

/// One tag of an IFD
#[derive(Debug, Clone)]
pub struct IFDEntry {
    /// TIFF tag identifier
    pub tag: u16,
    /// Field type
    pub field_type: u16,
    /// Number of values
    pub count: u64,
    /// Offset of the values, or the first value when stored inline
    pub value_offset: u64,
    /// Decoded values when they fit inside the entry
    pub inline_values: Option<Vec<u64>>,
}

impl IFDEntry {
    /// Entry whose values live elsewhere in the file
    pub fn at_offset(tag: u16, field_type: u16, count: u64, value_offset: u64) -> Self {
        IFDEntry {
            tag,
            field_type,
            count,
            value_offset,
            inline_values: None,
        }
    }

    /// Entry whose values were decoded from the entry's own value field
    pub fn inline(tag: u16, field_type: u16, count: u64, values: Vec<u64>) -> Self {
        IFDEntry {
            tag,
            field_type,
            count,
            value_offset: values.first().copied().unwrap_or(0),
            inline_values: Some(values),
        }
    }

    /// Total size of the entry's values in bytes
    pub fn byte_size(&self) -> u64 {
        field_types::size_of(self.field_type).saturating_mul(self.count)
    }

    /// Whether the values fit in the 4 (TIFF) or 8 (BigTIFF) byte value field
    pub fn fits_inline(field_type: u16, count: u64, is_big_tiff: bool) -> bool {
        let limit = if is_big_tiff { 8 } else { 4 };
        field_types::size_of(field_type).saturating_mul(count) <= limit
    }
}

/// A parsed Image File Directory
#[derive(Debug, Clone)]
pub struct IFD {
    /// Entries in file order
    pub entries: Vec<IFDEntry>,
    /// IFD number (0-based)
    pub number: usize,
    /// Offset to this IFD in the file
    pub offset: u64,
    tag_map: HashMap<u16, usize>,
}

impl IFD {
    pub fn new(number: usize, offset: u64) -> Self {
        IFD {
            entries: Vec::new(),
            number,
            offset,
            tag_map: HashMap::new(),
        }
    }

    /// Adds an entry; a repeated tag replaces the earlier lookup
    pub fn add_entry(&mut self, entry: IFDEntry) {
        trace!("IFD #{}: tag {} type {} count {}", self.number, entry.tag, entry.field_type, entry.count);
        self.tag_map.insert(entry.tag, self.entries.len());
        self.entries.push(entry);
    }

    pub fn get_entry(&self, tag: u16) -> Option<&IFDEntry> {
        self.tag_map.get(&tag).map(|&i| &self.entries[i])
    }

    pub fn has_tag(&self, tag: u16) -> bool {
        self.tag_map.contains_key(&tag)
    }

    /// First value of a tag, for scalar tags stored inline
    pub fn get_tag_value(&self, tag: u16) -> Option<u64> {
        self.get_entry(tag).map(|entry| entry.value_offset)
    }

    /// `(width, height)` if both tags are present
    pub fn get_dimensions(&self) -> Option<(u32, u32)> {
        let width = self.get_tag_value(tags::IMAGE_WIDTH)?;
        let height = self.get_tag_value(tags::IMAGE_LENGTH)?;
        Some((u32::try_from(width).ok()?, u32::try_from(height).ok()?))
    }

    /// Samples per pixel, 1 when the tag is absent
    pub fn get_samples_per_pixel(&self) -> u64 {
        self.get_tag_value(tags::SAMPLES_PER_PIXEL).unwrap_or(1)
    }

    pub fn is_tiled(&self) -> bool {
        self.has_tag(tags::TILE_OFFSETS)
    }

    /// Whether NewSubfileType marks this as a reduced resolution copy
    pub fn is_reduced_resolution(&self) -> bool {
        self.get_tag_value(tags::NEW_SUBFILE_TYPE)
            .map(|v| v & new_subfile_type::REDUCED_RESOLUTION != 0)
            .unwrap_or(false)
    }
}

impl fmt::Display for IFD {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IFD #{} at {}", self.number, self.offset)?;
        if let Some((width, height)) = self.get_dimensions() {
            write!(f, ", {}x{}", width, height)?;
        }
        write!(
            f,
            ", {} samples, {}",
            self.get_samples_per_pixel(),
            if self.is_tiled() { "tiled" } else { "stripped" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_tag() {
        let mut ifd = IFD::new(0, 8);
        ifd.add_entry(IFDEntry::inline(tags::IMAGE_WIDTH, field_types::LONG, 1, vec![800]));
        ifd.add_entry(IFDEntry::inline(tags::IMAGE_LENGTH, field_types::SHORT, 1, vec![600]));
        ifd.add_entry(IFDEntry::at_offset(tags::TILE_OFFSETS, field_types::LONG, 12, 4096));

        assert_eq!(ifd.get_dimensions(), Some((800, 600)));
        assert_eq!(ifd.get_samples_per_pixel(), 1);
        assert!(ifd.is_tiled());
        assert!(!ifd.is_reduced_resolution());
        assert_eq!(ifd.get_entry(tags::TILE_OFFSETS).map(|e| e.byte_size()), Some(48));
    }

    #[test]
    fn inline_capacity_depends_on_format() {
        assert!(IFDEntry::fits_inline(field_types::SHORT, 2, false));
        assert!(!IFDEntry::fits_inline(field_types::SHORT, 3, false));
        assert!(IFDEntry::fits_inline(field_types::SHORT, 4, true));
        assert!(!IFDEntry::fits_inline(field_types::LONG8, 1, false));
    }
}
