//! Codecs for tile and strip payloads
//!
//! Each TIFF compression code maps to one [`CompressionHandler`] through
//! [`CompressionFactory`]. Slides are only ever decoded; encoding is kept so
//! in-memory fixtures can be produced with the same handlers.

mod deflate;
mod factory;
mod handler;
mod uncompressed;
mod zstd;

pub use deflate::AdobeDeflateHandler;
pub use factory::CompressionFactory;
pub use handler::CompressionHandler;
pub use uncompressed::UncompressedHandler;
pub use zstd::ZstdHandler;
