//! Compression handler trait

use crate::tiff::errors::TiffResult;

/// One TIFF compression scheme
pub trait CompressionHandler: Send + Sync {
    /// Decode a tile or strip payload
    fn decompress(&self, data: &[u8]) -> TiffResult<Vec<u8>>;

    /// Encode a payload with this scheme
    fn compress(&self, data: &[u8]) -> TiffResult<Vec<u8>>;

    fn name(&self) -> &'static str;

    /// Value of the Compression tag (259) for this scheme
    fn code(&self) -> u64;
}
