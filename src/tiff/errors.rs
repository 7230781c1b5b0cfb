//! Error types for TIFF container parsing

use std::io;

use thiserror::Error;

/// Errors raised while reading a TIFF/BigTIFF slide
#[derive(Debug, Error)]
pub enum TiffError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Invalid byte order marker
    #[error("invalid byte order marker: {0:#06x}")]
    InvalidByteOrder(u16),
    /// Invalid BigTIFF header
    #[error("invalid BigTIFF header")]
    InvalidBigTiffHeader,
    /// Unsupported TIFF version
    #[error("unsupported TIFF version: {0}")]
    UnsupportedVersion(u16),
    /// Tag not found
    #[error("tag not found: {0}")]
    TagNotFound(u16),
    /// Unsupported field type
    #[error("unsupported field type: {0}")]
    UnsupportedFieldType(u16),
    /// Unsupported compression method
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u64),
    /// Pixel layout the tile readers cannot decode
    #[error("unsupported pixel layout: {0}")]
    UnsupportedLayout(String),
    /// Image dimensions not found
    #[error("image dimensions not found")]
    MissingDimensions,
    /// Malformed file structure
    #[error("malformed TIFF: {0}")]
    Malformed(String),
}

/// Result type for TIFF operations
pub type TiffResult<T> = Result<T, TiffError>;
