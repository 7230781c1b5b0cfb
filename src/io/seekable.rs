//! Readers the slide container code accepts

use std::io::{Read, Seek};

/// A source that can both read and seek
///
/// Implemented for files and in-memory cursors alike, so TIFF parsing is
/// tested against byte buffers and run against slide files unchanged.
pub trait SeekableReader: Read + Seek + Send + Sync {}

impl<T: Read + Seek + Send + Sync> SeekableReader for T {}
