//! Run configuration
//!
//! A [`PatchConfig`] can be read from a TOML file; every field has a
//! default, and command line flags are applied on top of it. Thresholds
//! are switched off in TOML with `false`:
//!
//! ```toml
//! method = "classification"
//! patch_width = 512
//! patch_height = 512
//! on_foreground = false
//! on_annotation = 0.8
//!
//! [annotation_thresholds]
//! tumor = 0.5
//!
//! [foreground]
//! policy = "minmax"
//! min = 20
//! max = 200
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PatchError, PatchResult};
use crate::mask::{ForegroundPolicy, MinMaxPolicy, OtsuPolicy};
use crate::patcher::grid::{self, GridSpec};
use crate::patcher::{Method, Thresholds};

/// Size dots are expanded to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotBox {
    pub width: u32,
    pub height: u32,
}

fn default_min() -> u8 {
    30
}

fn default_max() -> u8 {
    190
}

/// How the foreground mask is computed from the slide thumbnail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum ForegroundConfig {
    #[default]
    Otsu,
    Minmax {
        #[serde(default = "default_min")]
        min: u8,
        #[serde(default = "default_max")]
        max: u8,
    },
    None,
}

impl ForegroundConfig {
    /// Parse a policy name; `minmax` gets the default band
    pub fn from_name(name: &str) -> PatchResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "otsu" => Ok(ForegroundConfig::Otsu),
            "minmax" => Ok(ForegroundConfig::Minmax {
                min: default_min(),
                max: default_max(),
            }),
            "none" => Ok(ForegroundConfig::None),
            other => Err(PatchError::InvalidConfig(format!(
                "unknown foreground policy '{}', expected otsu, minmax or none",
                other
            ))),
        }
    }

    /// The policy to run, `None` when foreground detection is off
    pub fn policy(&self) -> Option<Box<dyn ForegroundPolicy>> {
        match *self {
            ForegroundConfig::Otsu => Some(Box::new(OtsuPolicy)),
            ForegroundConfig::Minmax { min, max } => Some(Box::new(MinMaxPolicy { min, max })),
            ForegroundConfig::None => None,
        }
    }
}

/// Accepts a number or `false` for a threshold that can be switched off
fn threshold<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Value(f64),
        Switch(bool),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Value(value) => Ok(Some(value)),
        Raw::Switch(false) => Ok(None),
        Raw::Switch(true) => Err(serde::de::Error::custom("give a number to enable a threshold")),
    }
}

/// Every option of a patch extraction run
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatchConfig {
    pub method: Method,
    pub patch_width: u32,
    pub patch_height: u32,
    pub overlap_width: u32,
    pub overlap_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    /// Minimum foreground ratio, `None` to accept tiles regardless of tissue
    #[serde(deserialize_with = "threshold")]
    pub on_foreground: Option<f64>,
    /// Minimum annotation ratio, `None` to extract every foreground tile
    #[serde(deserialize_with = "threshold")]
    pub on_annotation: Option<f64>,
    /// Per-class overrides of `on_annotation`
    pub annotation_thresholds: BTreeMap<String, f64>,
    pub dot_bbox: Option<DotBox>,
    /// Long side of the mask canvas
    pub working_size: u32,
    pub foreground: ForegroundConfig,
    /// Native masks above this many bytes switch to low-memory mode
    pub max_mask_bytes: u64,
    /// Force low-memory mode
    pub low_memory: bool,
    /// Worker threads, `None` for one per core
    pub threads: Option<usize>,
    /// Only process the first N tiles of the grid
    pub dry_run: Option<usize>,
    pub start_sample: bool,
    pub finished_sample: bool,
    pub sample_count: usize,
    pub sample_seed: Option<u64>,
    pub no_patches: bool,
    pub save_to: PathBuf,
    /// Magnification the patches are meant for; checked against the slide
    pub magnification: Option<f64>,
    /// Extra attempts for transient slide read errors
    pub backend_retries: u32,
    /// Write a thumbnail of every mask next to the results
    pub export_thumbs: bool,
    /// Long side of the exported mask thumbnails
    pub thumb_size: u32,
}

impl Default for PatchConfig {
    fn default() -> Self {
        PatchConfig {
            method: Method::None,
            patch_width: 256,
            patch_height: 256,
            overlap_width: 0,
            overlap_height: 0,
            offset_x: 0,
            offset_y: 0,
            on_foreground: Some(0.5),
            on_annotation: Some(1.0),
            annotation_thresholds: BTreeMap::new(),
            dot_bbox: None,
            working_size: 2000,
            foreground: ForegroundConfig::Otsu,
            max_mask_bytes: 4 << 30,
            low_memory: false,
            threads: None,
            dry_run: None,
            start_sample: false,
            finished_sample: false,
            sample_count: 3,
            sample_seed: None,
            no_patches: false,
            save_to: PathBuf::from("."),
            magnification: None,
            backend_retries: 2,
            export_thumbs: false,
            thumb_size: 500,
        }
    }
}

impl PatchConfig {
    /// Read a TOML configuration file
    pub fn from_path(path: &Path) -> PatchResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| PatchError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> PatchResult<Self> {
        toml::from_str(content).map_err(|e| PatchError::InvalidConfig(e.to_string()))
    }

    /// Thresholds of the run
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            on_foreground: self.on_foreground,
            on_annotation: self.on_annotation,
            classes: self.annotation_thresholds.clone(),
        }
    }

    /// Grid geometry for a slide of the given size
    pub fn grid_spec(&self, slide_width: u32, slide_height: u32) -> GridSpec {
        GridSpec {
            slide_width,
            slide_height,
            patch_width: self.patch_width,
            patch_height: self.patch_height,
            overlap_width: self.overlap_width,
            overlap_height: self.overlap_height,
            offset_x: self.offset_x,
            offset_y: self.offset_y,
        }
    }

    /// Checks that do not need the slide
    ///
    /// Slide dependent geometry is checked when the grid is built.
    pub fn validate(&self) -> PatchResult<()> {
        self.thresholds().validate()?;

        if self.patch_width == 0 || self.patch_height == 0 {
            return Err(PatchError::InvalidGeometry(format!(
                "patch size larger than 0 required, got {}x{}",
                self.patch_width, self.patch_height
            )));
        }
        if let Some(dot) = self.dot_bbox {
            grid::validate_dot_box((dot.width, dot.height), (self.patch_width, self.patch_height))?;
        }
        if self.working_size == 0 {
            return Err(PatchError::InvalidConfig("working_size must be positive".to_string()));
        }
        if let ForegroundConfig::Minmax { min, max } = self.foreground {
            if min > max {
                return Err(PatchError::InvalidConfig(format!(
                    "minmax foreground needs min <= max, got min={} max={}",
                    min, max
                )));
            }
        }
        if self.threads == Some(0) {
            return Err(PatchError::InvalidConfig("threads must be at least 1".to_string()));
        }
        if let Some(magnification) = self.magnification {
            if magnification <= 0.0 || magnification.is_nan() {
                return Err(PatchError::InvalidConfig(format!(
                    "magnification must be positive, got {}",
                    magnification
                )));
            }
        }

        debug!("Configuration valid: {:?}", self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PatchConfig::default();
        assert_eq!(config.on_foreground, Some(0.5));
        assert_eq!(config.on_annotation, Some(1.0));
        assert_eq!(config.working_size, 2000);
        assert_eq!(config.sample_count, 3);
        assert_eq!(config.max_mask_bytes, 4 * 1024 * 1024 * 1024);
        assert!(config.validate().is_ok());
        assert_eq!(PatchConfig::from_toml_str("").unwrap(), config);
    }

    #[test]
    fn toml_overrides() {
        let config = PatchConfig::from_toml_str(
            r#"
            method = "evaluation"
            patch_width = 512
            on_foreground = false
            on_annotation = 0.8
            dot_bbox = { width = 30, height = 20 }

            [annotation_thresholds]
            tumor = 0.5

            [foreground]
            policy = "minmax"
            max = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.method, Method::None);
        assert_eq!(config.patch_width, 512);
        assert_eq!(config.patch_height, 256);
        assert_eq!(config.on_foreground, None);
        assert_eq!(config.thresholds().annotation_threshold("tumor"), Some(0.5));
        assert_eq!(config.thresholds().annotation_threshold("stroma"), Some(0.8));
        assert_eq!(config.foreground, ForegroundConfig::Minmax { min: 30, max: 200 });
        assert_eq!(config.dot_bbox, Some(DotBox { width: 30, height: 20 }));
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(PatchConfig::from_toml_str("patch_size = 3").is_err());
        assert!(PatchConfig::from_toml_str("method = \"coco\"").is_err());
        assert!(PatchConfig::from_toml_str("on_annotation = true").is_err());

        let config = PatchConfig {
            on_annotation: Some(0.0),
            ..PatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(PatchError::ThresholdRange { .. })));

        let config = PatchConfig {
            dot_bbox: Some(DotBox { width: 300, height: 10 }),
            ..PatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(PatchError::InvalidGeometry(_))));
    }

    #[test]
    fn foreground_policies() {
        assert!(ForegroundConfig::from_name("none").unwrap().policy().is_none());
        assert_eq!(ForegroundConfig::from_name("OTSU").unwrap().policy().unwrap().name(), "otsu");
        assert!(ForegroundConfig::from_name("triangle").is_err());
    }
}
