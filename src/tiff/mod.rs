//! TIFF and BigTIFF container parsing
//!
//! Only the directory structure is handled here: header, IFD chain and tag
//! values. Decoding of pixel data lives in the slide backend.

pub(crate) mod constants;
pub mod errors;
pub mod ifd;
pub mod reader;
pub mod types;
pub(crate) mod validation;

#[cfg(test)]
pub(crate) mod tests;

pub use crate::io::byte_order::{BigEndianHandler, ByteOrder, ByteOrderHandler, LittleEndianHandler};
pub use errors::{TiffError, TiffResult};
pub use ifd::{IFDEntry, IFD};
pub use reader::TiffReader;
pub use types::TIFF;
