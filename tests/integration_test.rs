//! End-to-end checks of masks, tile geometry and extraction runs

use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use wsipatch::annotation;
use wsipatch::coordinate::{BoundingBox, Point, Polygon};
use wsipatch::patcher::geometry::{box_on_tile, clip_to_tile, corner_on_tile, covers_tile, side_on_tile};
use wsipatch::patcher::result::dedup;
use wsipatch::patcher::{BoxRecord, Membership, ResultsFile, Thresholds, TileResult};
use wsipatch::slide::Region;
use wsipatch::{AnnotationSet, MaskBuilder, MaskSet, Method, PatchConfig, Patcher, Rule, Slide};

fn masks_for(annotation: &AnnotationSet, rule: Option<&Rule>, size: u32) -> MaskSet {
    MaskBuilder::new(annotation)
        .rule(rule)
        .working_size(size)
        .build(size, size, |_| unreachable!("no foreground policy"))
        .unwrap()
}

#[test]
fn partial_overlap_ratio_decides_membership() {
    let mut annotation = AnnotationSet::new();
    annotation.push("tumor", Polygon::from_rect(500, 500, 200, 200));
    let masks = masks_for(&annotation, None, 2000);
    let tile = Region::new(512, 512, 256, 256);

    // rows and columns 512 through 700 are covered
    let expected = 189.0 * 189.0 / (256.0 * 256.0);
    let strict = Thresholds::new(None, Some(1.0));
    let membership = Membership::new(&masks, &strict);
    assert!((membership.ratio("tumor", tile).unwrap() - expected).abs() < 1e-9);
    assert!(!membership.on_class("tumor", tile).unwrap());

    let relaxed = Thresholds::new(None, Some(0.5));
    assert!(Membership::new(&masks, &relaxed).on_class("tumor", tile).unwrap());
}

#[test]
fn rasterized_polygon_covers_tiles_inside_it() {
    let mut annotation = AnnotationSet::new();
    annotation.push("stroma", Polygon::from_rect(100, 100, 400, 400));
    let masks = masks_for(&annotation, None, 1000);

    assert_eq!(masks.ratio("stroma", 200, 200, 100, 100).unwrap(), 1.0);
    assert_eq!(masks.ratio("stroma", 600, 600, 100, 100).unwrap(), 0.0);
}

#[test]
fn rule_without_relations_changes_nothing() {
    let mut annotation = AnnotationSet::new();
    annotation.push("tumor", Polygon::from_rect(0, 0, 300, 300));
    annotation.push("necrosis", Polygon::from_rect(100, 100, 50, 50));
    let rule = Rule::from_json_str(
        r#"{"tumor": {"includes": [], "excludes": []}, "necrosis": {"includes": [], "excludes": []}}"#,
    )
    .unwrap();

    let plain = masks_for(&annotation, None, 500);
    let ruled = masks_for(&annotation, Some(&rule), 500);
    assert_eq!(plain.get("tumor"), ruled.get("tumor"));
    assert_eq!(plain.get("necrosis"), ruled.get("necrosis"));
}

#[test]
fn exclude_cuts_a_hole() {
    let mut annotation = AnnotationSet::new();
    annotation.push("tumor", Polygon::from_rect(0, 0, 300, 300));
    annotation.push("necrosis", Polygon::from_rect(100, 100, 99, 99));
    let rule = Rule::from_json_str(r#"{"tumor": {"includes": [], "excludes": ["necrosis"]}}"#).unwrap();
    let masks = masks_for(&annotation, Some(&rule), 500);

    assert_eq!(masks.ratio("tumor", 100, 100, 100, 100).unwrap(), 0.0);
    assert_eq!(masks.ratio("tumor", 0, 0, 100, 100).unwrap(), 1.0);
    // necrosis is not a rule class, so no mask is kept for it
    assert!(!masks.has_class("necrosis"));
}

#[test]
fn dot_expands_to_box_corners() {
    let dot = Polygon::new(vec![Point::new(100, 100)]).unwrap();
    let expanded = dot.dot_to_box(30, 20);
    assert_eq!(
        expanded.points(),
        &[
            Point::new(85, 90),
            Point::new(115, 90),
            Point::new(115, 110),
            Point::new(85, 110),
        ]
    );
}

#[test]
fn tile_inside_box_is_reported_by_the_cover_case() {
    let tile = Region::new(100, 100, 50, 50);
    let bb = BoundingBox::new(0, 0, 1000, 1000);
    assert!(!corner_on_tile(&bb, tile));
    assert!(!side_on_tile(&bb, tile));
    assert!(covers_tile(&bb, tile));
    assert!(box_on_tile(&bb, tile));
    assert_eq!(clip_to_tile(&bb, tile), (0, 0, 50, 50));
}

#[test]
fn repeated_records_collapse() {
    let record = |x, y| TileResult::Plain { x, y, w: 100, h: 100 };
    let results = dedup(vec![record(200, 0), record(0, 100), record(200, 0), record(0, 0)]).unwrap();
    assert_eq!(results, vec![record(0, 0), record(0, 100), record(200, 0)]);
}

/// 600x400 slide, tissue on the left half, annotated as tumor
fn write_case(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let slide_path = dir.join("case_01.png");
    let image = RgbImage::from_fn(600, 400, |x, _| if x < 300 { Rgb([60, 20, 80]) } else { Rgb([245, 245, 245]) });
    image.save(&slide_path).unwrap();

    let annotation_path = dir.join("case_01.json");
    fs::write(
        &annotation_path,
        r#"{"slide": "case_01.png", "classes": ["tumor"],
            "result": [{"class": "tumor", "x": 0, "y": 0, "w": 300, "h": 400}]}"#,
    )
    .unwrap();
    (slide_path, annotation_path)
}

fn run_config(out: &Path, method: Method) -> PatchConfig {
    PatchConfig {
        method,
        patch_width: 100,
        patch_height: 100,
        working_size: 600,
        threads: Some(2),
        save_to: out.to_path_buf(),
        ..PatchConfig::default()
    }
}

#[test]
fn classification_run_writes_results_and_patches() {
    let dir = TempDir::new().unwrap();
    let (slide_path, annotation_path) = write_case(dir.path());
    let out = dir.path().join("out");
    fs::create_dir_all(&out).unwrap();

    let slide = Slide::open_auto(&slide_path).unwrap();
    let annotation = annotation::load(&annotation_path, None).unwrap();
    let config = run_config(&out, Method::Classification);
    let patcher = Patcher::new(&slide, Some(annotation), None, &config).unwrap().quiet(true);
    let summary = patcher.run().unwrap();

    assert_eq!(summary.tiles_total, 24);
    assert_eq!(summary.error_count(), 0);
    // columns 0, 100 and 200 over four rows including the bottom edge
    assert_eq!(summary.accepted, 12);

    let results = ResultsFile::load(&out.join("case_01").join("results.json")).unwrap();
    assert_eq!(results.method, "classification");
    assert_eq!((results.wsi_width, results.wsi_height), (600, 400));
    assert_eq!(results.classes, vec!["tumor".to_string()]);
    assert_eq!(results.on_annotation.default, Some(1.0));
    assert_eq!(results.result.len(), 12);
    assert!(results
        .result
        .iter()
        .all(|r| matches!(r, TileResult::Classification { class, .. } if class == "tumor")));

    let mut origins: Vec<(u32, u32)> = results.result.iter().map(TileResult::origin).collect();
    origins.dedup();
    assert_eq!(origins.len(), 12);

    let patches = fs::read_dir(out.join("case_01/patches/tumor")).unwrap().count();
    assert_eq!(patches, 12);
}

#[test]
fn detection_run_records_clipped_boxes() {
    let dir = TempDir::new().unwrap();
    let (slide_path, annotation_path) = write_case(dir.path());

    let slide = Slide::open_auto(&slide_path).unwrap();
    let annotation = annotation::load(&annotation_path, None).unwrap();
    let config = PatchConfig {
        no_patches: true,
        ..run_config(dir.path(), Method::Detection)
    };
    let patcher = Patcher::new(&slide, Some(annotation), None, &config).unwrap().quiet(true);
    patcher.run().unwrap();

    let results = ResultsFile::load(&patcher.out_dir().join("results.json")).unwrap();
    let first = results.result.first().unwrap();
    assert_eq!(
        first,
        &TileResult::Detection {
            x: 0,
            y: 0,
            w: 100,
            h: 100,
            bbs: vec![BoxRecord {
                x: 0,
                y: 0,
                w: 100,
                h: 100,
                class: "tumor".to_string(),
            }],
        }
    );
    assert!(!patcher.out_dir().join("patches").exists());
}
