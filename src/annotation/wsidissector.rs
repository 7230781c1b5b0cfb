//! WSIDissector JSON annotations
//!
//! Entries either list polygon points or give a box by origin and size:
//!
//! ```json
//! {"slide": "case1.svs", "classes": ["tumor"],
//!  "result": [{"class": "tumor", "points": [{"x": 1, "y": 2}, {"x": 5, "y": 9}]},
//!             {"class": "tumor", "x": 10, "y": 10, "w": 40, "h": 30}]}
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::coordinate::{round_half_up, Polygon};
use crate::error::{PatchError, PatchResult};

use super::AnnotationSet;

#[derive(Debug, Deserialize)]
struct DissectorFile {
    #[serde(default)]
    slide: Option<String>,
    #[serde(default)]
    classes: Vec<String>,
    #[serde(default)]
    result: Vec<DissectorEntry>,
}

#[derive(Debug, Deserialize)]
struct DissectorPoint {
    x: f64,
    y: f64,
}

#[derive(Debug, Deserialize)]
struct DissectorEntry {
    class: Option<String>,
    points: Option<Vec<DissectorPoint>>,
    x: Option<f64>,
    y: Option<f64>,
    w: Option<f64>,
    h: Option<f64>,
}

impl DissectorEntry {
    fn polygon(&self, index: usize) -> PatchResult<Polygon> {
        if let Some(points) = &self.points {
            return Polygon::from_f64_pairs(points.iter().map(|p| (p.x, p.y))).map_err(|_| {
                PatchError::AnnotationIncomplete(format!("result entry {} has an empty point list", index))
            });
        }

        match (self.x, self.y, self.w, self.h) {
            (Some(x), Some(y), Some(w), Some(h)) => Ok(Polygon::from_rect(
                round_half_up(x),
                round_half_up(y),
                round_half_up(w),
                round_half_up(h),
            )),
            _ => Err(PatchError::AnnotationIncomplete(format!(
                "result entry {} has neither points nor x/y/w/h",
                index
            ))),
        }
    }
}

/// Parse a WSIDissector annotation file
pub fn parse(path: &Path) -> PatchResult<AnnotationSet> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content).map_err(|e| match e {
        PatchError::Json(inner) => PatchError::parse(path, inner),
        other => other,
    })
}

/// Parse WSIDissector JSON held in memory
pub fn parse_str(content: &str) -> PatchResult<AnnotationSet> {
    let file: DissectorFile = serde_json::from_str(content)?;
    if let Some(slide) = &file.slide {
        log::debug!("WSIDissector annotation for slide {}", slide);
    }

    let mut set = AnnotationSet::new();
    for class in &file.classes {
        set.add_class(class);
    }

    for (index, entry) in file.result.iter().enumerate() {
        let class = entry.class.as_deref().ok_or_else(|| {
            PatchError::AnnotationIncomplete(format!("result entry {} has no class", index))
        })?;
        set.push(class, entry.polygon(index)?);
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_points_and_boxes() {
        let set = parse_str(
            r#"{"slide": "a.svs", "classes": ["tumor", "normal"],
                "result": [
                  {"class": "tumor", "points": [{"x": 1.5, "y": 2.4}, {"x": 5, "y": 9}]},
                  {"class": "tumor", "x": 10, "y": 10, "w": 40, "h": 30}]}"#,
        )
        .unwrap();

        assert_eq!(set.classes(), &["tumor", "normal"]);
        let polygons = set.polygons("tumor");
        assert_eq!(polygons.len(), 2);
        assert_eq!((polygons[0].points()[0].x, polygons[0].points()[0].y), (2, 2));
        assert_eq!(polygons[1], Polygon::from_rect(10, 10, 40, 30));
        assert!(set.polygons("normal").is_empty());
    }

    #[test]
    fn entry_without_class_is_incomplete() {
        let err = parse_str(r#"{"classes": [], "result": [{"x": 1, "y": 1, "w": 1, "h": 1}]}"#).unwrap_err();
        assert!(matches!(err, PatchError::AnnotationIncomplete(_)));
    }

    #[test]
    fn entry_without_geometry_is_incomplete() {
        let err = parse_str(r#"{"classes": ["a"], "result": [{"class": "a", "x": 1}]}"#).unwrap_err();
        assert!(matches!(err, PatchError::AnnotationIncomplete(_)));
    }
}
