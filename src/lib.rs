//! Patch selection and annotation rasterization for whole-slide images
//!
//! Annotations are parsed into per-class polygons ([`annotation`]),
//! rasterized into coverage masks ([`mask`]) and matched against a tile
//! grid over the slide ([`patcher`]). Slides are read through a
//! [`slide::Backend`]; the TIFF backend is built on the container parser in
//! [`tiff`].

pub mod annotation;
pub mod commands;
pub mod compression;
pub mod config;
pub mod coordinate;
pub mod error;
pub mod io;
pub mod mask;
pub mod patcher;
pub mod slide;
pub mod tiff;
pub mod utils;

pub use annotation::{AnnotationFormat, AnnotationSet, Rule};
pub use config::PatchConfig;
pub use error::{PatchError, PatchResult};
pub use mask::{MaskBuilder, MaskSet};
pub use patcher::{Method, Patcher, RunSummary, TileGrid};
pub use slide::{Backend, Slide};
