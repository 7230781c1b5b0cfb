//! Per-tile membership tests
//!
//! A tile belongs to a class when `sum(mask[tile]) / (w * h) >= threshold`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::annotation::FOREGROUND;
use crate::error::{PatchError, PatchResult};
use crate::mask::MaskSet;
use crate::slide::Region;

/// Overlap thresholds of a run
///
/// `None` disables a test. Per-class values override the annotation
/// default and only apply while the annotation test is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub on_foreground: Option<f64>,
    pub on_annotation: Option<f64>,
    #[serde(default)]
    pub classes: BTreeMap<String, f64>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            on_foreground: Some(0.5),
            on_annotation: Some(1.0),
            classes: BTreeMap::new(),
        }
    }
}

fn check_range(name: &str, value: f64) -> PatchResult<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(PatchError::ThresholdRange {
            name: name.to_string(),
            value,
        })
    }
}

impl Thresholds {
    pub fn new(on_foreground: Option<f64>, on_annotation: Option<f64>) -> Self {
        Thresholds {
            on_foreground,
            on_annotation,
            classes: BTreeMap::new(),
        }
    }

    /// Override the annotation threshold of one class
    pub fn with_class(mut self, class: &str, value: f64) -> Self {
        self.classes.insert(class.to_string(), value);
        self
    }

    /// Every configured value must lie in `(0, 1]`; NaN is rejected too
    pub fn validate(&self) -> PatchResult<()> {
        if let Some(value) = self.on_foreground {
            check_range("on_foreground", value)?;
        }
        if let Some(value) = self.on_annotation {
            check_range("on_annotation", value)?;
        }
        for (class, value) in &self.classes {
            check_range(&format!("on_annotation[{}]", class), *value)?;
        }
        Ok(())
    }

    /// Threshold a class must reach, `None` when the annotation test is off
    pub fn annotation_threshold(&self, class: &str) -> Option<f64> {
        self.on_annotation
            .map(|default| self.classes.get(class).copied().unwrap_or(default))
    }
}

/// Membership decisions against one mask set
#[derive(Debug, Clone, Copy)]
pub struct Membership<'a> {
    masks: &'a MaskSet,
    thresholds: &'a Thresholds,
}

impl<'a> Membership<'a> {
    pub fn new(masks: &'a MaskSet, thresholds: &'a Thresholds) -> Self {
        Membership { masks, thresholds }
    }

    /// Coverage ratio of `class` inside `tile`
    pub fn ratio(&self, class: &str, tile: Region) -> PatchResult<f64> {
        self.masks.ratio(class, tile.x, tile.y, tile.width, tile.height)
    }

    /// Whether the tile shows enough tissue; always true when the test is off
    pub fn on_foreground(&self, tile: Region) -> PatchResult<bool> {
        match self.thresholds.on_foreground {
            Some(threshold) => Ok(self.ratio(FOREGROUND, tile)? >= threshold),
            None => Ok(true),
        }
    }

    /// Whether the tile belongs to `class`
    ///
    /// With the annotation test disabled any overlap counts.
    pub fn on_class(&self, class: &str, tile: Region) -> PatchResult<bool> {
        let ratio = self.ratio(class, tile)?;
        Ok(match self.thresholds.annotation_threshold(class) {
            Some(threshold) => ratio >= threshold,
            None => ratio > 0.0,
        })
    }

    /// Classes a tile is extracted for
    ///
    /// Without an annotation test every tile is a `foreground` tile.
    /// Otherwise these are the classes reaching their threshold, possibly
    /// none or several.
    pub fn members(&self, classes: &[String], tile: Region) -> PatchResult<Vec<String>> {
        if self.thresholds.on_annotation.is_none() {
            return Ok(vec![FOREGROUND.to_string()]);
        }

        let mut members = Vec::new();
        for class in classes {
            if self.on_class(class, tile)? {
                members.push(class.clone());
            }
        }
        Ok(members)
    }
}
