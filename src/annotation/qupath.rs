//! QuPath GeoJSON exports
//!
//! QuPath writes either a feature collection or a bare array of features.
//! The class sits in `properties.classification.name`.

use std::path::Path;

use serde_json::Value;

use crate::error::{PatchError, PatchResult};

use super::geo_json::{feature_polygons, features};
use super::AnnotationSet;

/// Whether a feature value carries a QuPath classification
pub fn has_classification(feature: &Value) -> bool {
    feature
        .get("properties")
        .and_then(|p| p.get("classification"))
        .is_some()
}

/// Parse a QuPath annotation export
pub fn parse(path: &Path) -> PatchResult<AnnotationSet> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content).map_err(|e| match e {
        PatchError::Json(inner) => PatchError::parse(path, inner),
        other => other,
    })
}

/// Parse a QuPath export held in memory
///
/// Every feature must be classified; a single unlabelled feature rejects
/// the whole file.
pub fn parse_str(content: &str) -> PatchResult<AnnotationSet> {
    let value: Value = serde_json::from_str(content)?;
    let mut set = AnnotationSet::new();

    for (index, feature) in features(value)?.iter().enumerate() {
        let class = feature
            .properties
            .as_ref()
            .and_then(|p| p.get("classification"))
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PatchError::AnnotationIncomplete(format!("feature {} has no classification name", index))
            })?;

        for polygon in feature_polygons(feature)? {
            set.push(class, polygon);
        }
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_feature_arrays() {
        let set = parse_str(
            r#"[{"type": "Feature", "id": "a",
                 "properties": {"classification": {"name": "Tumor", "colorRGB": -3670016}},
                 "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [4, 0], [4, 4], [0, 0]]]}},
                {"type": "Feature",
                 "properties": {"classification": {"name": "Stroma"}},
                 "geometry": {"type": "LineString", "coordinates": [[1, 1], [2, 2]]}}]"#,
        )
        .unwrap();

        assert_eq!(set.classes(), &["Tumor", "Stroma"]);
        assert_eq!(set.polygons("Tumor")[0].len(), 3);
        assert_eq!(set.polygons("Stroma")[0].len(), 2);
    }

    #[test]
    fn unlabelled_feature_rejects_file() {
        let err = parse_str(
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {"classification": {"name": "x"}},
                 "geometry": {"type": "Point", "coordinates": [1, 2]}},
                {"type": "Feature", "properties": {"objectType": "annotation"},
                 "geometry": {"type": "Point", "coordinates": [3, 4]}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::AnnotationIncomplete(_)));
    }

    #[test]
    fn classification_detection() {
        let labelled: Value = serde_json::json!({"properties": {"classification": {"name": "x"}}});
        let plain: Value = serde_json::json!({"properties": {"class": "x"}});
        assert!(has_classification(&labelled));
        assert!(!has_classification(&plain));
    }
}
