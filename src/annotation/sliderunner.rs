//! SlideRunner SQLite annotations
//!
//! A SlideRunner database can hold annotations of many slides. The tables
//! used here are:
//!
//! * `Classes(uid, name)`
//! * `Slides(uid, filename)`
//! * `Annotations(uid, type, slide)`
//! * `Annotations_label(class, annoId)`
//! * `Annotations_coordinates(coordinateX, coordinateY, annoId, orderIdx)`
//!
//! The annotation `type` selects how the coordinate rows are read.

use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;
use std::path::Path;

use log::debug;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::coordinate::{round_half_up, BoundingBox, Point, Polygon};
use crate::error::{PatchError, PatchResult};

use super::AnnotationSet;

const REQUIRED_TABLES: [&str; 5] = [
    "Classes",
    "Slides",
    "Annotations",
    "Annotations_label",
    "Annotations_coordinates",
];

/// Annotation types stored in the `Annotations.type` column
mod kinds {
    pub const DOT: i64 = 1;
    pub const RECTANGLE: i64 = 2;
    pub const POLYGON: i64 = 3;
    pub const IMPORTANT_POSITION: i64 = 4;
    pub const CIRCLE: i64 = 5;
}

fn open(path: &Path) -> PatchResult<Connection> {
    Ok(Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?)
}

/// Whether the database has every SlideRunner table
pub fn has_required_tables(path: &Path) -> PatchResult<bool> {
    let conn = open(path)?;
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(REQUIRED_TABLES.iter().all(|t| names.iter().any(|n| n == t)))
}

/// Parse a SlideRunner database
///
/// # Arguments
/// * `path` - Database file
/// * `slide` - Optional slide file name; only that slide's annotations are read
///
/// # Returns
/// The annotation set, or `AnnotationIncomplete` when label, annotation and
/// coordinate rows do not line up
pub fn parse(path: &Path, slide: Option<&str>) -> PatchResult<AnnotationSet> {
    let conn = open(path)?;

    let mut stmt = conn.prepare("SELECT uid, name FROM Classes ORDER BY uid")?;
    let classes = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let class_names: HashMap<i64, String> = classes.iter().cloned().collect();

    let slide_uid = match slide {
        Some(name) => {
            let uid: Option<i64> = conn
                .query_row("SELECT uid FROM Slides WHERE filename = ?1", params![name], |row| row.get(0))
                .optional()?;
            Some(uid.ok_or_else(|| {
                PatchError::AnnotationIncomplete(format!("slide '{}' is not registered in {}", name, path.display()))
            })?)
        }
        None => None,
    };

    let annotations: BTreeMap<i64, i64> = match slide_uid {
        Some(uid) => {
            let mut stmt = conn.prepare("SELECT uid, type FROM Annotations WHERE slide = ?1")?;
            let rows = stmt.query_map(params![uid], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        }
        None => {
            let mut stmt = conn.prepare("SELECT uid, type FROM Annotations")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        }
    };

    let mut stmt = conn.prepare("SELECT class, annoId FROM Annotations_label")?;
    let labels: HashMap<i64, i64> = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(1)?, row.get::<_, i64>(0)?)))?
        .collect::<Result<_, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT coordinateX, coordinateY, annoId, orderIdx FROM Annotations_coordinates ORDER BY annoId, orderIdx",
    )?;
    let mut coordinates: BTreeMap<i64, Vec<(f64, f64)>> = BTreeMap::new();
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?, row.get::<_, i64>(2)?))
    })?;
    for row in rows {
        let (x, y, anno_id) = row?;
        coordinates.entry(anno_id).or_default().push((x, y));
    }

    if slide_uid.is_none() {
        if let Some(orphan) = coordinates.keys().find(|id| !annotations.contains_key(id)) {
            return Err(PatchError::AnnotationIncomplete(format!(
                "coordinates reference annotation {} which does not exist",
                orphan
            )));
        }
    }

    let mut set = AnnotationSet::new();
    for (_, name) in &classes {
        set.add_class(name);
    }

    for (&uid, &kind) in &annotations {
        let class_uid = labels.get(&uid).ok_or_else(|| {
            PatchError::AnnotationIncomplete(format!("annotation {} has no label row", uid))
        })?;
        let class = class_names.get(class_uid).ok_or_else(|| {
            PatchError::AnnotationIncomplete(format!("annotation {} is labelled with unknown class {}", uid, class_uid))
        })?;
        let points = coordinates.get(&uid).ok_or_else(|| {
            PatchError::AnnotationIncomplete(format!("annotation {} has no coordinate rows", uid))
        })?;

        set.push(class, to_polygon(uid, kind, points)?);
    }

    debug!(
        "SlideRunner: {} annotations, {} labels, {} coordinate sets",
        annotations.len(),
        labels.len(),
        coordinates.len()
    );
    Ok(set)
}

fn to_polygon(uid: i64, kind: i64, points: &[(f64, f64)]) -> PatchResult<Polygon> {
    let too_few = |needed: usize| {
        PatchError::AnnotationIncomplete(format!(
            "annotation {} of type {} needs {} coordinates, found {}",
            uid,
            kind,
            needed,
            points.len()
        ))
    };

    match kind {
        kinds::DOT | kinds::IMPORTANT_POSITION => {
            let &(x, y) = points.first().ok_or_else(|| too_few(1))?;
            Polygon::new(vec![Point::from_f64(x, y)])
        }
        kinds::RECTANGLE => {
            if points.len() < 2 {
                return Err(too_few(2));
            }
            let corners: Vec<Point> = points.iter().map(|&(x, y)| Point::from_f64(x, y)).collect();
            let b = BoundingBox::from_points(&corners);
            Ok(Polygon::from_rect(b.min_x, b.min_y, b.width(), b.height()))
        }
        kinds::POLYGON => Polygon::from_f64_pairs(points.iter().copied()),
        kinds::CIRCLE => {
            if points.len() < 2 {
                return Err(too_few(2));
            }
            let (x1, y1) = points[0];
            let (x2, y2) = points[1];
            let radius = ((x2 - x1).abs().max((y2 - y1).abs())) / 2.0;
            Ok(sample_circle((x1 + x2) / 2.0, (y1 + y2) / 2.0, radius))
        }
        other => Err(PatchError::UnsupportedFormat(format!(
            "annotation {} has unknown SlideRunner type {}",
            uid, other
        ))),
    }
}

/// Polygon of `2·radius` points evenly spread over the circle
fn sample_circle(cx: f64, cy: f64, radius: f64) -> Polygon {
    let count = round_half_up(2.0 * radius).max(1) as usize;
    let points = (0..count)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / count as f64;
            Point::from_f64(cx + radius * angle.cos(), cy + radius * angle.sin())
        })
        .collect();

    // count is at least one, so the polygon is never empty
    Polygon::new(points).unwrap_or_else(|_| Polygon::from_rect(cx as i64, cy as i64, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_db(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("annotations.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE Classes (uid INTEGER PRIMARY KEY, name TEXT);
            CREATE TABLE Slides (uid INTEGER PRIMARY KEY, filename TEXT);
            CREATE TABLE Annotations (uid INTEGER PRIMARY KEY, type INTEGER, agreedClass INTEGER, slide INTEGER);
            CREATE TABLE Annotations_label (uid INTEGER PRIMARY KEY, class INTEGER, annoId INTEGER);
            CREATE TABLE Annotations_coordinates (uid INTEGER PRIMARY KEY, coordinateX REAL, coordinateY REAL, annoId INTEGER, orderIdx INTEGER, slide INTEGER);

            INSERT INTO Classes VALUES (1, 'mitosis'), (2, 'region');
            INSERT INTO Slides VALUES (1, 'a.svs'), (2, 'b.svs');

            INSERT INTO Annotations VALUES (10, 1, 1, 1);
            INSERT INTO Annotations_label VALUES (1, 1, 10);
            INSERT INTO Annotations_coordinates VALUES (1, 100.4, 200.5, 10, 1, 1);

            INSERT INTO Annotations VALUES (11, 2, 2, 1);
            INSERT INTO Annotations_label VALUES (2, 2, 11);
            INSERT INTO Annotations_coordinates VALUES (2, 50, 60, 11, 1, 1);
            INSERT INTO Annotations_coordinates VALUES (3, 10, 20, 11, 2, 1);

            INSERT INTO Annotations VALUES (12, 5, 1, 2);
            INSERT INTO Annotations_label VALUES (3, 1, 12);
            INSERT INTO Annotations_coordinates VALUES (4, 0, 0, 12, 1, 2);
            INSERT INTO Annotations_coordinates VALUES (5, 8, 8, 12, 2, 2);
            "#,
        )
        .unwrap();
        path
    }

    #[test]
    fn reads_all_slides() {
        let dir = TempDir::new().unwrap();
        let path = create_db(&dir);
        assert!(has_required_tables(&path).unwrap());

        let set = parse(&path, None).unwrap();
        assert_eq!(set.classes(), &["mitosis", "region"]);
        assert_eq!(set.polygons("mitosis").len(), 2);

        let dot = &set.polygons("mitosis")[0];
        assert_eq!(dot.points(), &[Point::new(100, 201)]);

        // rectangle given by two corners becomes four corners
        assert_eq!(set.polygons("region")[0], Polygon::from_rect(10, 20, 40, 40));

        // circle of radius 4 is sampled with 8 points
        assert_eq!(set.polygons("mitosis")[1].len(), 8);
    }

    #[test]
    fn filters_by_slide() {
        let dir = TempDir::new().unwrap();
        let path = create_db(&dir);

        let set = parse(&path, Some("b.svs")).unwrap();
        assert_eq!(set.polygons("mitosis").len(), 1);
        assert!(set.polygons("region").is_empty());

        assert!(matches!(
            parse(&path, Some("missing.svs")),
            Err(PatchError::AnnotationIncomplete(_))
        ));
    }

    #[test]
    fn missing_label_fails_the_file() {
        let dir = TempDir::new().unwrap();
        let path = create_db(&dir);
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("DELETE FROM Annotations_label WHERE annoId = 11", []).unwrap();
        }

        assert!(matches!(parse(&path, None), Err(PatchError::AnnotationIncomplete(_))));
    }

    #[test]
    fn orphan_coordinates_fail_the_file() {
        let dir = TempDir::new().unwrap();
        let path = create_db(&dir);
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("DELETE FROM Annotations WHERE uid = 11", []).unwrap();
        }

        assert!(matches!(parse(&path, None), Err(PatchError::AnnotationIncomplete(_))));
    }
}
