//! Sanity checks on container structure
//!
//! Slide files come from many scanners and some are truncated or carry
//! broken directory chains. These checks turn such files into errors
//! instead of out-of-range seeks.

use log::{debug, error, warn};
use std::io::SeekFrom;

use crate::io::byte_order::ByteOrderHandler;
use crate::io::seekable::SeekableReader;
use crate::tiff::constants::header;
use crate::tiff::errors::{TiffError, TiffResult};

/// Fails unless `offset` points past the header and inside the file
pub fn validate_ifd_offset(offset: u64, file_size: u64) -> TiffResult<()> {
    if offset >= file_size || offset < 8 {
        return Err(TiffError::Malformed(format!(
            "IFD offset {} outside file of {} bytes",
            offset, file_size
        )));
    }
    Ok(())
}

/// Fails unless `[offset, offset + len)` lies inside the file
pub fn validate_data_range(offset: u64, len: u64, file_size: u64) -> TiffResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= file_size => Ok(()),
        _ => Err(TiffError::Malformed(format!(
            "data at {}+{} runs past end of file ({} bytes)",
            offset, len, file_size
        ))),
    }
}

/// Size of the underlying source, leaving the position unchanged
///
/// Returns `u64::MAX` when the source cannot seek to its end.
pub fn get_file_size(reader: &mut dyn SeekableReader) -> TiffResult<u64> {
    let current = reader.stream_position()?;
    let size = match reader.seek(SeekFrom::End(0)) {
        Ok(size) => size,
        Err(e) => {
            warn!("Could not determine file size: {}", e);
            u64::MAX
        }
    };
    reader.seek(SeekFrom::Start(current))?;
    Ok(size)
}

/// Checks the two BigTIFF header words after the version number
///
/// The offset size must be 8 and the reserved word 0.
pub fn validate_bigtiff_header(
    reader: &mut dyn SeekableReader,
    handler: &dyn ByteOrderHandler,
) -> TiffResult<()> {
    let offset_size = handler.read_u16(reader)?;
    let reserved = handler.read_u16(reader)?;
    debug!("BigTIFF offset size {}, reserved {}", offset_size, reserved);

    if offset_size != header::BIGTIFF_OFFSET_SIZE || reserved != 0 {
        error!("Invalid BigTIFF header: offset_size={}, reserved={}", offset_size, reserved);
        return Err(TiffError::InvalidBigTiffHeader);
    }
    Ok(())
}
