//! Slide metadata
//!
//! Backends expose their metadata as a flat string map using
//! OpenSlide-style keys. The patcher only needs the objective power to check
//! a requested magnification; everything else is carried for logging.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

/// Objective power of the scanner, e.g. `"40"`
pub const OBJECTIVE_POWER: &str = "openslide.objective-power";
/// Microns per pixel along x
pub const MPP_X: &str = "openslide.mpp-x";
/// Microns per pixel along y
pub const MPP_Y: &str = "openslide.mpp-y";
/// Number of pyramid levels
pub const LEVEL_COUNT: &str = "openslide.level-count";
/// Scanner vendor when it can be told from the metadata
pub const VENDOR: &str = "openslide.vendor";
/// Raw TIFF ImageDescription of the base level
pub const IMAGE_DESCRIPTION: &str = "tiff.ImageDescription";

lazy_static! {
    // Aperio writes "Aperio Image Library ... |AppMag = 40|MPP = 0.2520|..."
    static ref APP_MAG: Option<Regex> = Regex::new(r"\|\s*AppMag\s*=\s*([0-9]+(?:\.[0-9]+)?)").ok();
    static ref APERIO_MPP: Option<Regex> = Regex::new(r"\|\s*MPP\s*=\s*([0-9]+(?:\.[0-9]+)?)").ok();
}

/// Key/value metadata of one slide
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlideProperties {
    values: BTreeMap<String, String>,
}

impl SlideProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Properties derived from a TIFF ImageDescription
    ///
    /// The description is always stored; Aperio descriptions also yield
    /// objective power, resolution and vendor.
    pub fn from_description(description: &str) -> Self {
        let mut properties = SlideProperties::new();
        properties.insert(IMAGE_DESCRIPTION, description);

        if description.starts_with("Aperio") {
            properties.insert(VENDOR, "aperio");
        }
        if let Some(mag) = capture(&APP_MAG, description) {
            debug!("Aperio AppMag {}", mag);
            properties.insert(OBJECTIVE_POWER, mag);
        }
        if let Some(mpp) = capture(&APERIO_MPP, description) {
            properties.insert(MPP_X, mpp);
            properties.insert(MPP_Y, mpp);
        }
        properties
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Objective power, `None` when absent or not a positive number
    pub fn objective_power(&self) -> Option<f64> {
        self.get(OBJECTIVE_POWER)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| *v > 0.0)
    }
}

fn capture<'t>(pattern: &Option<Regex>, text: &'t str) -> Option<&'t str> {
    pattern
        .as_ref()?
        .captures(text)?
        .get(1)
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aperio_description_is_parsed() {
        let text = "Aperio Image Library v11.2.1 \r\n46000x32914 [0,100 46000x32814] (256x256) JPEG/RGB Q=30|AppMag = 20|StripeWidth = 2040|MPP = 0.4990";
        let props = SlideProperties::from_description(text);
        assert_eq!(props.objective_power(), Some(20.0));
        assert_eq!(props.get(MPP_X), Some("0.4990"));
        assert_eq!(props.get(VENDOR), Some("aperio"));
        assert_eq!(props.get(IMAGE_DESCRIPTION), Some(text));
    }

    #[test]
    fn other_descriptions_have_no_power() {
        let props = SlideProperties::from_description("ImageJ=1.52a");
        assert_eq!(props.objective_power(), None);
        assert_eq!(props.len(), 1);

        let mut props = SlideProperties::new();
        props.insert(OBJECTIVE_POWER, "0");
        assert_eq!(props.objective_power(), None);
    }
}
