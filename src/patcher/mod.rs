//! Patch extraction over a tile grid
//!
//! [`TileGrid`] enumerates tile positions, [`Membership`] decides which
//! classes a tile belongs to, [`BoxResolver`] finds detection boxes and
//! [`Patcher`] runs all of it in parallel and writes the outputs.

pub mod geometry;
pub mod grid;
pub mod membership;
pub mod result;
pub mod runner;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PatchError;

pub use geometry::BoxResolver;
pub use grid::{GridSpec, TileGrid};
pub use membership::{Membership, Thresholds};
pub use result::{BoxRecord, MaskRecord, ResultsFile, TileResult};
pub use runner::{Patcher, RunSummary};

/// What is recorded for an accepted tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    /// Position only
    #[default]
    None,
    /// Position and class
    Classification,
    /// Position and clipped annotation boxes
    Detection,
    /// Position and per-class mask images
    Segmentation,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::None => "none",
            Method::Classification => "classification",
            Method::Detection => "detection",
            Method::Segmentation => "segmentation",
        }
    }

    /// Whether the method has nothing to work with without annotations
    pub fn requires_annotation(&self) -> bool {
        !matches!(self, Method::None)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = PatchError;

    /// `evaluation` is accepted as another name for `none`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "evaluation" => Ok(Method::None),
            "classification" => Ok(Method::Classification),
            "detection" => Ok(Method::Detection),
            "segmentation" => Ok(Method::Segmentation),
            _ => Err(PatchError::MethodNotImplemented(s.to_string())),
        }
    }
}

impl TryFrom<String> for Method {
    type Error = PatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}
