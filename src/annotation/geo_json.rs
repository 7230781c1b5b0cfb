//! Plain GeoJSON annotations
//!
//! Every feature carries its class in `properties.class`, either as a string
//! or as a number. The geometry helpers here are shared with the QuPath
//! parser, which differs only in where the class name lives.

use std::path::Path;

use geojson::{Feature, GeoJson, Value as Geometry};
use serde_json::Value;

use crate::coordinate::Polygon;
use crate::error::{PatchError, PatchResult};

use super::AnnotationSet;

/// Features of a document, accepting a collection, a single feature or a bare array
pub(crate) fn features(value: Value) -> PatchResult<Vec<Feature>> {
    if let Value::Array(items) = value {
        return items
            .into_iter()
            .map(|item| serde_json::from_value::<Feature>(item).map_err(PatchError::from))
            .collect();
    }

    match serde_json::from_value::<GeoJson>(value)? {
        GeoJson::FeatureCollection(collection) => Ok(collection.features),
        GeoJson::Feature(feature) => Ok(vec![feature]),
        GeoJson::Geometry(_) => Err(PatchError::AnnotationIncomplete(
            "bare geometry has no class".to_string(),
        )),
    }
}

fn ring(positions: &[Vec<f64>]) -> PatchResult<Polygon> {
    let pairs = positions
        .iter()
        .map(|position| match position.as_slice() {
            [x, y, ..] => Ok((*x, *y)),
            _ => Err(PatchError::AnnotationIncomplete(format!(
                "position {:?} needs two coordinates",
                position
            ))),
        })
        .collect::<PatchResult<Vec<_>>>()?;
    Polygon::from_f64_pairs(pairs)
}

/// Polygons described by a feature geometry
///
/// Only exterior rings are used; holes are ignored. Multi-geometries yield
/// one polygon per member.
pub(crate) fn feature_polygons(feature: &Feature) -> PatchResult<Vec<Polygon>> {
    let geometry = feature.geometry.as_ref().ok_or_else(|| {
        PatchError::AnnotationIncomplete("feature has no geometry".to_string())
    })?;

    match &geometry.value {
        Geometry::Point(position) => Ok(vec![ring(std::slice::from_ref(position))?]),
        Geometry::MultiPoint(positions) => positions
            .iter()
            .map(|p| ring(std::slice::from_ref(p)))
            .collect(),
        Geometry::LineString(line) => Ok(vec![ring(line)?]),
        Geometry::MultiLineString(lines) => lines.iter().map(|l| ring(l)).collect(),
        Geometry::Polygon(rings) => match rings.first() {
            Some(exterior) => Ok(vec![ring(exterior)?]),
            None => Err(PatchError::AnnotationIncomplete("polygon has no rings".to_string())),
        },
        Geometry::MultiPolygon(polygons) => polygons
            .iter()
            .filter_map(|rings| rings.first())
            .map(|exterior| ring(exterior))
            .collect(),
        Geometry::GeometryCollection(_) => Err(PatchError::UnsupportedFormat(
            "geometry collections are not supported".to_string(),
        )),
    }
}

/// Class of a plain GeoJSON feature
fn feature_class(feature: &Feature, index: usize) -> PatchResult<String> {
    let class = feature
        .properties
        .as_ref()
        .and_then(|properties| properties.get("class"));

    match class {
        Some(Value::String(name)) => Ok(name.clone()),
        Some(Value::Number(number)) => Ok(number.to_string()),
        _ => Err(PatchError::AnnotationIncomplete(format!(
            "feature {} has no class property",
            index
        ))),
    }
}

/// Parse a GeoJSON annotation file
pub fn parse(path: &Path) -> PatchResult<AnnotationSet> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content).map_err(|e| match e {
        PatchError::Json(inner) => PatchError::parse(path, inner),
        other => other,
    })
}

/// Parse GeoJSON held in memory
pub fn parse_str(content: &str) -> PatchResult<AnnotationSet> {
    let value: Value = serde_json::from_str(content)?;
    let mut set = AnnotationSet::new();

    for (index, feature) in features(value)?.iter().enumerate() {
        let class = feature_class(feature, index)?;
        for polygon in feature_polygons(feature)? {
            set.push(&class, polygon);
        }
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::Point;

    #[test]
    fn reads_string_and_numeric_classes() {
        let set = parse_str(
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {"class": "tumor"},
                 "geometry": {"type": "Polygon", "coordinates": [
                    [[0, 0], [10, 0], [10, 10], [0, 10], [0, 0]],
                    [[2, 2], [3, 2], [3, 3], [2, 2]]]}},
                {"type": "Feature", "properties": {"class": 3},
                 "geometry": {"type": "Point", "coordinates": [5.5, 6.4]}}]}"#,
        )
        .unwrap();

        assert_eq!(set.classes(), &["tumor", "3"]);
        // closing vertex dropped, hole ignored
        assert_eq!(set.polygons("tumor")[0].len(), 4);
        assert_eq!(set.polygons("3")[0].points(), &[Point::new(6, 6)]);
    }

    #[test]
    fn multipolygon_yields_one_polygon_per_member() {
        let set = parse_str(
            r#"{"type": "Feature", "properties": {"class": "a"},
                "geometry": {"type": "MultiPolygon", "coordinates": [
                    [[[0, 0], [1, 0], [1, 1]]],
                    [[[5, 5], [6, 5], [6, 6]]]]}}"#,
        )
        .unwrap();
        assert_eq!(set.polygons("a").len(), 2);
    }

    #[test]
    fn missing_class_is_incomplete() {
        let err = parse_str(
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "Point", "coordinates": [1, 2]}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::AnnotationIncomplete(_)));
    }
}
