//! Annotation loading
//!
//! Annotation tools store regions of interest in very different containers:
//! ASAP writes XML, WSIDissector writes JSON, SlideRunner keeps a SQLite
//! database and QuPath exports GeoJSON. Every parser in this module yields
//! the same [`AnnotationSet`]: an ordered list of class names and, for every
//! class, the polygons drawn for it in native slide pixel coordinates.
//!
//! Format selection is a two-step affair. [`detect_format`] inspects the
//! extension and, where that is not conclusive, the content of the file and
//! returns an [`AnnotationFormat`] tag. [`parse`] then dispatches on that tag.

pub mod asap;
pub mod wsidissector;
pub mod sliderunner;
pub mod qupath;
pub mod geo_json;
pub mod rule;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, info, warn};
use serde_json::Value;

use crate::coordinate::Polygon;
use crate::error::{PatchError, PatchResult};

pub use rule::{Rule, RuleEntry};

/// Reserved class name of the synthetic tissue mask
pub const FOREGROUND: &str = "foreground";

/// First bytes of every SQLite 3 database file
const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Supported annotation containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationFormat {
    /// ASAP polygon XML (`ASAP_Annotations` root)
    Asap,
    /// WSIDissector JSON with `classes` and `result`
    WsiDissector,
    /// SlideRunner SQLite database
    SlideRunner,
    /// QuPath GeoJSON export with `classification` properties
    QuPath,
    /// Plain GeoJSON feature collection with a `class` property
    GeoJson,
    /// An empty annotation file
    Empty,
}

impl AnnotationFormat {
    /// Human readable format name
    pub fn name(&self) -> &'static str {
        match self {
            AnnotationFormat::Asap => "ASAP",
            AnnotationFormat::WsiDissector => "WSIDissector",
            AnnotationFormat::SlideRunner => "SlideRunner",
            AnnotationFormat::QuPath => "QuPath",
            AnnotationFormat::GeoJson => "GeoJSON",
            AnnotationFormat::Empty => "Empty",
        }
    }
}

/// Per-class polygons parsed from an annotation file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationSet {
    /// Class names in first-seen order, without duplicates
    classes: Vec<String>,
    /// Polygons per class
    polygons: BTreeMap<String, Vec<Polygon>>,
}

impl AnnotationSet {
    /// Create an empty annotation set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class name, ignoring duplicates
    pub fn add_class(&mut self, class: &str) {
        if !self.has_class(class) {
            self.classes.push(class.to_string());
            self.polygons.entry(class.to_string()).or_default();
        }
    }

    /// Append a polygon to a class, registering the class if needed
    pub fn push(&mut self, class: &str, polygon: Polygon) {
        self.add_class(class);
        self.polygons.entry(class.to_string()).or_default().push(polygon);
    }

    /// Class names in first-seen order
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Whether the class is known
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    /// Polygons of a class; empty for unknown classes
    pub fn polygons(&self, class: &str) -> &[Polygon] {
        self.polygons.get(class).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether no class was found
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Total number of polygons across all classes
    pub fn polygon_count(&self) -> usize {
        self.polygons.values().map(Vec::len).sum()
    }

    /// Copy of the set with every dot polygon expanded to a box
    ///
    /// # Arguments
    /// * `width` - Box width in pixels
    /// * `height` - Box height in pixels
    pub fn dot_to_bbox(&self, width: u32, height: u32) -> AnnotationSet {
        let polygons = self
            .polygons
            .iter()
            .map(|(class, list)| {
                let expanded = list.iter().map(|p| p.dot_to_box(width, height)).collect();
                (class.clone(), expanded)
            })
            .collect();

        AnnotationSet {
            classes: self.classes.clone(),
            polygons,
        }
    }

    /// Copy of the set where every class also owns the polygons of its included classes
    ///
    /// Included classes absent from the set are skipped.
    pub fn merge_includes(&self, rule: &Rule) -> AnnotationSet {
        let mut out = self.clone();
        for class in &self.classes {
            let Some(entry) = rule.entry(class) else {
                continue;
            };
            for include in &entry.includes {
                if include == class || !self.has_class(include) {
                    continue;
                }
                let merged = self.polygons(include).to_vec();
                out.polygons.entry(class.clone()).or_default().extend(merged);
            }
        }
        out
    }
}

/// Work out which parser understands the file
///
/// The extension is checked first; the content decides when the extension
/// is unknown. Zero-length or whitespace-only files are [`AnnotationFormat::Empty`].
///
/// # Arguments
/// * `path` - Annotation file
///
/// # Returns
/// The detected format, or `UnsupportedFormat` when nothing matches
pub fn detect_format(path: &Path) -> PatchResult<AnnotationFormat> {
    let mut head = Vec::with_capacity(SQLITE_MAGIC.len());
    File::open(path)?
        .take(SQLITE_MAGIC.len() as u64)
        .read_to_end(&mut head)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    debug!("Detecting annotation format of {} (extension '{}')", path.display(), extension);

    if head.as_slice() == SQLITE_MAGIC {
        return if sliderunner::has_required_tables(path)? {
            Ok(AnnotationFormat::SlideRunner)
        } else {
            Err(PatchError::UnsupportedFormat(format!(
                "{} is a SQLite database without the SlideRunner tables",
                path.display()
            )))
        };
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        PatchError::UnsupportedFormat(format!("{} is not a text annotation: {}", path.display(), e))
    })?;
    let trimmed = content.trim_start();

    if trimmed.is_empty() {
        return Ok(AnnotationFormat::Empty);
    }

    let detected = match extension.as_str() {
        "xml" => detect_xml(trimmed),
        "json" | "geojson" => detect_json(trimmed),
        _ if trimmed.starts_with('<') => detect_xml(trimmed),
        _ if trimmed.starts_with('{') || trimmed.starts_with('[') => detect_json(trimmed),
        _ => None,
    };

    match detected {
        Some(format) => {
            info!("Detected {} annotation: {}", format.name(), path.display());
            Ok(format)
        }
        None => Err(PatchError::UnsupportedFormat(format!(
            "no parser recognises {}",
            path.display()
        ))),
    }
}

fn detect_xml(content: &str) -> Option<AnnotationFormat> {
    match asap::root_element(content) {
        Some(root) if root == asap::ROOT_ELEMENT => Some(AnnotationFormat::Asap),
        Some(root) => {
            debug!("XML root element '{}' is not an ASAP annotation", root);
            None
        }
        None => None,
    }
}

fn detect_json(content: &str) -> Option<AnnotationFormat> {
    let value: Value = serde_json::from_str(content).ok()?;
    classify_json(&value)
}

/// Decide between the JSON based formats by their distinguishing keys
fn classify_json(value: &Value) -> Option<AnnotationFormat> {
    match value {
        Value::Object(object) if object.contains_key("classes") && object.contains_key("result") => {
            Some(AnnotationFormat::WsiDissector)
        }
        Value::Object(object) => match object.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => {
                let features = object.get("features").and_then(Value::as_array)?;
                if features.iter().any(qupath::has_classification) {
                    Some(AnnotationFormat::QuPath)
                } else {
                    Some(AnnotationFormat::GeoJson)
                }
            }
            Some("Feature") if qupath::has_classification(value) => Some(AnnotationFormat::QuPath),
            Some("Feature") => Some(AnnotationFormat::GeoJson),
            _ => None,
        },
        Value::Array(items) if items.is_empty() => Some(AnnotationFormat::Empty),
        Value::Array(items) => {
            let all_features = items
                .iter()
                .all(|item| item.get("type").and_then(Value::as_str) == Some("Feature"));
            all_features.then_some(AnnotationFormat::QuPath)
        }
        _ => None,
    }
}

/// Parse an annotation file of a known format
pub fn parse(format: AnnotationFormat, path: &Path) -> PatchResult<AnnotationSet> {
    parse_for_slide(format, path, None)
}

/// Parse an annotation file, keeping only entries of the given slide
///
/// Only databases that hold several slides (SlideRunner) use the filter;
/// other formats describe exactly one slide and ignore it.
///
/// # Arguments
/// * `format` - Format returned by [`detect_format`]
/// * `path` - Annotation file
/// * `slide` - File name of the slide as registered in the annotation database
pub fn parse_for_slide(
    format: AnnotationFormat,
    path: &Path,
    slide: Option<&str>,
) -> PatchResult<AnnotationSet> {
    let set = match format {
        AnnotationFormat::Asap => asap::parse(path)?,
        AnnotationFormat::WsiDissector => wsidissector::parse(path)?,
        AnnotationFormat::SlideRunner => sliderunner::parse(path, slide)?,
        AnnotationFormat::QuPath => qupath::parse(path)?,
        AnnotationFormat::GeoJson => geo_json::parse(path)?,
        AnnotationFormat::Empty => {
            warn!("Annotation file {} is empty", path.display());
            AnnotationSet::new()
        }
    };

    info!(
        "Parsed {} annotation: {} classes, {} polygons",
        format.name(),
        set.classes().len(),
        set.polygon_count()
    );
    Ok(set)
}

/// Detect the format of a file and parse it
pub fn load(path: &Path, slide: Option<&str>) -> PatchResult<AnnotationSet> {
    let format = detect_format(path)?;
    parse_for_slide(format, path, slide)
}
