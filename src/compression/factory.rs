//! Compression code to handler mapping

use crate::tiff::constants::compression;
use crate::tiff::errors::{TiffError, TiffResult};

use super::deflate::AdobeDeflateHandler;
use super::handler::CompressionHandler;
use super::uncompressed::UncompressedHandler;
use super::zstd::ZstdHandler;

/// Builds the handler for a Compression tag value
pub struct CompressionFactory;

impl CompressionFactory {
    /// # Errors
    /// `UnsupportedCompression` for JPEG, LZW and every other scheme without a handler
    pub fn create_handler(code: u64) -> TiffResult<Box<dyn CompressionHandler>> {
        match code {
            compression::NONE => Ok(Box::new(UncompressedHandler)),
            compression::DEFLATE => Ok(Box::new(AdobeDeflateHandler)),
            compression::ZSTD => Ok(Box::new(ZstdHandler::new())),
            _ => Err(TiffError::UnsupportedCompression(code)),
        }
    }
}
