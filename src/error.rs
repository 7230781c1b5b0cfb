//! Error types for patch extraction
//!
//! All fallible operations in the crate return [`PatchResult`]. Variants are
//! grouped by when they can occur: configuration and parse errors stop a run
//! before any tile is touched, per-tile errors are collected and summarised,
//! and backend errors come from reading the slide or writing outputs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::tiff::errors::TiffError;

/// Result alias used throughout the crate
pub type PatchResult<T> = Result<T, PatchError>;

/// Coarse classification of a [`PatchError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid geometry, thresholds, rules or option combinations
    Configuration,
    /// The annotation file could not be turned into polygons
    Parse,
    /// A single tile failed; the run continues
    PerTile,
    /// Slide decoding or output I/O failed
    Backend,
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("threshold {name} must be in (0, 1], got {value}")]
    ThresholdRange { name: String, value: f64 },

    #[error("failed to parse rule: {0}")]
    RuleParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("method '{method}' requires an annotation file")]
    MissCombination { method: String },

    #[error("requested magnification {requested} exceeds slide magnification {available}")]
    Magnification { requested: f64, available: f64 },

    #[error("unsupported annotation format: {0}")]
    UnsupportedFormat(String),

    #[error("incomplete annotation: {0}")]
    AnnotationIncomplete(String),

    #[error("failed to parse annotation {}: {message}", .path.display())]
    AnnotationParse { path: PathBuf, message: String },

    #[error("unknown class '{0}'")]
    UnknownClass(String),

    #[error("tile ({x}, {y}) is on class '{class}' but no annotation box intersects it")]
    NoMatchingBox { x: u32, y: u32, class: String },

    #[error("method '{0}' is not implemented")]
    MethodNotImplemented(String),

    #[error("failed to load slide: {0}")]
    SlideLoad(String),

    #[error(transparent)]
    Tiff(#[from] TiffError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("XML error: {0}")]
    Xml(String),
}

impl PatchError {
    /// Which part of the error taxonomy this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            PatchError::InvalidGeometry(_)
            | PatchError::ThresholdRange { .. }
            | PatchError::RuleParse(_)
            | PatchError::InvalidConfig(_)
            | PatchError::MissCombination { .. }
            | PatchError::Magnification { .. } => ErrorKind::Configuration,
            PatchError::UnsupportedFormat(_)
            | PatchError::AnnotationIncomplete(_)
            | PatchError::AnnotationParse { .. }
            | PatchError::Json(_)
            | PatchError::Sqlite(_)
            | PatchError::Xml(_) => ErrorKind::Parse,
            PatchError::UnknownClass(_)
            | PatchError::NoMatchingBox { .. }
            | PatchError::MethodNotImplemented(_) => ErrorKind::PerTile,
            PatchError::SlideLoad(_)
            | PatchError::Tiff(_)
            | PatchError::Io(_)
            | PatchError::Image(_) => ErrorKind::Backend,
        }
    }

    /// Whether retrying the same backend call may succeed
    pub fn is_transient(&self) -> bool {
        let io_error = match self {
            PatchError::Io(e) => Some(e),
            PatchError::Tiff(TiffError::Io(e)) => Some(e),
            _ => None,
        };

        matches!(
            io_error.map(|e| e.kind()),
            Some(io::ErrorKind::Interrupted) | Some(io::ErrorKind::WouldBlock) | Some(io::ErrorKind::TimedOut)
        )
    }

    /// Short label used to group errors in the end-of-run summary
    pub fn summary_key(&self) -> &'static str {
        match self {
            PatchError::UnknownClass(_) => "unknown class",
            PatchError::NoMatchingBox { .. } => "no matching box",
            PatchError::MethodNotImplemented(_) => "method not implemented",
            PatchError::Tiff(_) => "slide read",
            PatchError::Io(_) => "i/o",
            PatchError::Image(_) => "image encode",
            _ => "other",
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        PatchError::AnnotationParse {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
