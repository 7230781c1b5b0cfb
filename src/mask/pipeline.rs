//! Staged mask construction
//!
//! Each stage consumes the previous one and hands back a new value:
//!
//! ```text
//! RawMasks --include--> IncludedMasks --exclude--> ExcludedMasks --resize--> ResizedMasks
//! ```
//!
//! Rule stages read the masks of the stage before them, so one class's
//! result never feeds into another class's rule within the same stage.

use std::collections::BTreeMap;
use std::time::Instant;

use image::imageops::{self, FilterType};
use image::DynamicImage;
use log::{debug, info};
use rayon::prelude::*;

use crate::annotation::{AnnotationSet, Rule, FOREGROUND};
use crate::coordinate::round_half_up;
use crate::error::PatchResult;

use super::foreground::ForegroundPolicy;
use super::raster;
use super::set::MaskSet;
use super::Mask;

/// Masks after the final resize, ready for tile lookups
pub type ResizedMasks = MaskSet;

/// Working resolution of the masks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    /// Slide width at native resolution
    pub slide_width: u32,
    /// Slide height at native resolution
    pub slide_height: u32,
    /// Canvas width
    pub width: u32,
    /// Canvas height
    pub height: u32,
    /// Native to canvas factor
    pub scale: f64,
}

impl Canvas {
    /// Canvas whose long side is `working_size`, never larger than the slide
    ///
    /// # Arguments
    /// * `slide_width` - Native slide width
    /// * `slide_height` - Native slide height
    /// * `working_size` - Target length of the long side
    pub fn new(slide_width: u32, slide_height: u32, working_size: u32) -> Self {
        let long_side = slide_width.max(slide_height).max(1) as f64;
        let scale = (working_size as f64 / long_side).min(1.0);
        Canvas {
            slide_width,
            slide_height,
            width: round_half_up(slide_width as f64 * scale).max(1) as u32,
            height: round_half_up(slide_height as f64 * scale).max(1) as u32,
            scale,
        }
    }

    /// Whether the canvas already has the slide's shape
    pub fn is_native(&self) -> bool {
        self.width == self.slide_width && self.height == self.slide_height
    }
}

/// Polygons drawn per class, before any rule
#[derive(Debug, Clone)]
pub struct RawMasks {
    canvas: Canvas,
    masks: BTreeMap<String, Mask>,
}

impl RawMasks {
    /// Rasterize every class of the annotation onto the canvas
    pub fn rasterize(annotation: &AnnotationSet, canvas: Canvas) -> Self {
        let masks = annotation
            .classes()
            .par_iter()
            .map(|class| {
                let mask = raster::rasterize(
                    annotation.polygons(class),
                    canvas.scale,
                    canvas.width,
                    canvas.height,
                );
                (class.clone(), mask)
            })
            .collect();
        RawMasks { canvas, masks }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn get(&self, class: &str) -> Option<&Mask> {
        self.masks.get(class)
    }

    /// OR each class with the raw masks of its included classes
    ///
    /// Included classes without a mask are skipped. Classes the rule does
    /// not mention, or mention with an empty include list, are unchanged.
    pub fn include(&self, rule: Option<&Rule>) -> IncludedMasks {
        let mut masks = self.masks.clone();
        if let Some(rule) = rule {
            for (class, mask) in masks.iter_mut() {
                let Some(entry) = rule.entry(class) else {
                    continue;
                };
                for include in &entry.includes {
                    if include == class {
                        continue;
                    }
                    if let Some(other) = self.masks.get(include) {
                        *mask = mask.or(other);
                    }
                }
            }
        }
        IncludedMasks {
            canvas: self.canvas,
            masks,
        }
    }
}

/// Masks after include rules
#[derive(Debug, Clone)]
pub struct IncludedMasks {
    canvas: Canvas,
    masks: BTreeMap<String, Mask>,
}

impl IncludedMasks {
    pub fn get(&self, class: &str) -> Option<&Mask> {
        self.masks.get(class)
    }

    /// Remove excluded areas from each class
    ///
    /// For every excluded class in rule order the overlap with the running
    /// class mask is XORed away; the excluded masks are read from this
    /// stage.
    pub fn exclude(&self, rule: Option<&Rule>) -> ExcludedMasks {
        let mut masks = self.masks.clone();
        if let Some(rule) = rule {
            for (class, mask) in masks.iter_mut() {
                let Some(entry) = rule.entry(class) else {
                    continue;
                };
                for exclude in &entry.excludes {
                    if exclude == class {
                        continue;
                    }
                    if let Some(other) = self.masks.get(exclude) {
                        let overlap = mask.and(other);
                        *mask = mask.xor(&overlap);
                    }
                }
            }
        }
        ExcludedMasks {
            canvas: self.canvas,
            masks,
        }
    }
}

/// Masks after exclude rules, with the foreground attached
#[derive(Debug, Clone)]
pub struct ExcludedMasks {
    canvas: Canvas,
    masks: BTreeMap<String, Mask>,
}

impl ExcludedMasks {
    pub fn get(&self, class: &str) -> Option<&Mask> {
        self.masks.get(class)
    }

    /// Keep only the named classes
    pub fn retain(mut self, keep: &[String]) -> Self {
        self.masks.retain(|class, _| keep.contains(class));
        self
    }

    /// Attach the foreground mask, resized to the canvas if its shape differs
    pub fn with_foreground(mut self, mask: Mask) -> Self {
        let mask = mask.resize(self.canvas.width, self.canvas.height);
        self.masks.insert(FOREGROUND.to_string(), mask);
        self
    }

    /// Final stage
    ///
    /// Unless `low_memory` is set, masks are scaled up to the native slide
    /// size so tiles index them directly.
    pub fn resize(self, low_memory: bool) -> ResizedMasks {
        let canvas = self.canvas;
        if low_memory || canvas.is_native() {
            return MaskSet::new(canvas, self.masks, low_memory);
        }

        let masks = self
            .masks
            .into_par_iter()
            .map(|(class, mask)| {
                let resized = mask.resize(canvas.slide_width, canvas.slide_height);
                (class, resized)
            })
            .collect();
        MaskSet::new(canvas, masks, false)
    }
}

/// Whether native-size masks for `classes` would exceed the byte budget
pub fn needs_low_memory(classes: usize, slide_width: u32, slide_height: u32, max_bytes: u64) -> bool {
    let bytes = classes as u128 * slide_width as u128 * slide_height as u128;
    bytes > max_bytes as u128
}

/// Runs the whole pipeline for one slide
pub struct MaskBuilder<'a> {
    annotation: &'a AnnotationSet,
    rule: Option<&'a Rule>,
    foreground: Option<&'a dyn ForegroundPolicy>,
    working_size: u32,
    max_mask_bytes: u64,
    force_low_memory: bool,
}

impl<'a> MaskBuilder<'a> {
    pub fn new(annotation: &'a AnnotationSet) -> Self {
        MaskBuilder {
            annotation,
            rule: None,
            foreground: None,
            working_size: 2000,
            max_mask_bytes: 4 << 30,
            force_low_memory: false,
        }
    }

    pub fn rule(mut self, rule: Option<&'a Rule>) -> Self {
        self.rule = rule;
        self
    }

    pub fn foreground(mut self, policy: Option<&'a dyn ForegroundPolicy>) -> Self {
        self.foreground = policy;
        self
    }

    pub fn working_size(mut self, size: u32) -> Self {
        self.working_size = size;
        self
    }

    pub fn max_mask_bytes(mut self, bytes: u64) -> Self {
        self.max_mask_bytes = bytes;
        self
    }

    pub fn low_memory(mut self, force: bool) -> Self {
        self.force_low_memory = force;
        self
    }

    /// Classes patches are extracted for
    ///
    /// With a rule this is the intersection of annotation and rule classes,
    /// in annotation order. The reserved foreground class is never listed.
    pub fn classes(&self) -> Vec<String> {
        let rule_classes = self.rule.map(Rule::classes);
        self.annotation
            .classes()
            .iter()
            .filter(|class| class.as_str() != FOREGROUND)
            .filter(|class| rule_classes.as_ref().map_or(true, |r| r.contains(class)))
            .cloned()
            .collect()
    }

    /// Build the masks of a slide
    ///
    /// # Arguments
    /// * `slide_width` - Native slide width
    /// * `slide_height` - Native slide height
    /// * `thumbnail` - Called with the working size when a foreground
    ///   policy needs the slide thumbnail
    ///
    /// # Returns
    /// Masks for [`Self::classes`] plus `foreground` when one is available
    pub fn build<F>(&self, slide_width: u32, slide_height: u32, thumbnail: F) -> PatchResult<MaskSet>
    where
        F: FnOnce(u32) -> PatchResult<DynamicImage>,
    {
        let canvas = Canvas::new(slide_width, slide_height, self.working_size);
        info!(
            "Mask canvas {}x{} (scale {:.5}) for slide {}x{}",
            canvas.width, canvas.height, canvas.scale, slide_width, slide_height
        );

        let start = Instant::now();
        let raw = RawMasks::rasterize(self.annotation, canvas);
        debug!("Rasterized {} classes in {:?}", self.annotation.classes().len(), start.elapsed());

        let start = Instant::now();
        let included = raw.include(self.rule);
        let excluded = included.exclude(self.rule);
        debug!("Applied rule in {:?}", start.elapsed());

        let mut keep = self.classes();
        let annotated_foreground = self.annotation.has_class(FOREGROUND);
        if annotated_foreground {
            info!("Annotation defines '{}'; skipping thumbnail threshold", FOREGROUND);
            keep.push(FOREGROUND.to_string());
        }
        let mut excluded = excluded.retain(&keep);

        if !annotated_foreground {
            if let Some(policy) = self.foreground {
                let start = Instant::now();
                let thumb = thumbnail(self.working_size)?.to_luma8();
                let gray = imageops::resize(&thumb, canvas.width, canvas.height, FilterType::Triangle);
                let mask = policy.binarize(&gray)?;
                debug!("Foreground ({}) computed in {:?}", policy.name(), start.elapsed());
                excluded = excluded.with_foreground(mask);
            }
        }

        let mask_count = excluded.masks.len();
        let low_memory = self.force_low_memory
            || needs_low_memory(mask_count, slide_width, slide_height, self.max_mask_bytes);
        if low_memory {
            info!("Low-memory mode: keeping {} masks at canvas scale", mask_count);
        }

        let start = Instant::now();
        let set = excluded.resize(low_memory);
        debug!("Resized masks in {:?}", start.elapsed());
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::Polygon;
    use image::{GrayImage, Luma};

    fn annotation() -> AnnotationSet {
        let mut set = AnnotationSet::new();
        set.push("tumor", Polygon::from_rect(0, 0, 9, 19));
        set.push("dcis", Polygon::from_rect(10, 0, 9, 19));
        set.push("necrosis", Polygon::from_rect(5, 0, 9, 19));
        set
    }

    fn canvas() -> Canvas {
        Canvas::new(20, 20, 20)
    }

    #[test]
    fn canvas_scales_long_side() {
        let canvas = Canvas::new(40000, 20000, 2000);
        assert_eq!((canvas.width, canvas.height), (2000, 1000));
        assert!((canvas.scale - 0.05).abs() < 1e-12);
        assert!(!canvas.is_native());

        let small = Canvas::new(500, 300, 2000);
        assert_eq!((small.width, small.height), (500, 300));
        assert!(small.is_native());
    }

    #[test]
    fn empty_rule_lists_leave_masks_untouched() {
        let raw = RawMasks::rasterize(&annotation(), canvas());
        let rule = Rule::from_json_str(r#"{"tumor": {"includes": [], "excludes": []}}"#).unwrap();

        let included = raw.include(Some(&rule));
        assert_eq!(included.get("tumor"), raw.get("tumor"));
        let excluded = included.exclude(Some(&rule));
        assert_eq!(excluded.get("tumor"), raw.get("tumor"));
    }

    #[test]
    fn include_then_exclude() {
        let raw = RawMasks::rasterize(&annotation(), canvas());
        let rule = Rule::from_json_str(
            r#"{"tumor": {"includes": ["dcis", "missing"], "excludes": ["necrosis"]}}"#,
        )
        .unwrap();

        let included = raw.include(Some(&rule));
        assert_eq!(included.get("tumor").unwrap().count(), 400);
        // other classes keep their raw masks
        assert_eq!(included.get("dcis"), raw.get("dcis"));

        let excluded = included.exclude(Some(&rule));
        let tumor = excluded.get("tumor").unwrap();
        assert_eq!(tumor.count(), 400 - 200);
        assert_eq!(tumor.get(7, 3), 0);
        assert_eq!(tumor.get(2, 3), 1);
    }

    #[test]
    fn rule_restricts_classes() {
        let set = annotation();
        let rule = Rule::from_json_str(
            r#"{"tumor": {"includes": [], "excludes": []}, "other": {"includes": [], "excludes": []}}"#,
        )
        .unwrap();
        let builder = MaskBuilder::new(&set).rule(Some(&rule));
        assert_eq!(builder.classes(), vec!["tumor".to_string()]);
        assert_eq!(MaskBuilder::new(&set).classes().len(), 3);
    }

    #[test]
    fn build_attaches_foreground_and_resizes() {
        let set = annotation();
        let otsu = crate::mask::OtsuPolicy;
        let masks = MaskBuilder::new(&set)
            .working_size(10)
            .foreground(Some(&otsu))
            .build(20, 20, |size| {
                assert_eq!(size, 10);
                let gray = GrayImage::from_fn(10, 10, |x, _| if x < 5 { Luma([40]) } else { Luma([240]) });
                Ok(DynamicImage::ImageLuma8(gray))
            })
            .unwrap();

        assert!(!masks.is_low_memory());
        assert!(masks.has_class(FOREGROUND));
        assert_eq!(masks.get(FOREGROUND).unwrap().dimensions(), (20, 20));
        assert_eq!(masks.ratio(FOREGROUND, 0, 0, 10, 20).unwrap(), 1.0);
        assert_eq!(masks.ratio(FOREGROUND, 10, 0, 10, 20).unwrap(), 0.0);
    }

    #[test]
    fn annotated_foreground_skips_thumbnail() {
        let mut set = annotation();
        set.push(FOREGROUND, Polygon::from_rect(0, 0, 4, 4));
        let otsu = crate::mask::OtsuPolicy;
        let masks = MaskBuilder::new(&set)
            .working_size(20)
            .foreground(Some(&otsu))
            .build(20, 20, |_| panic!("thumbnail must not be read"))
            .unwrap();
        assert_eq!(masks.get(FOREGROUND).unwrap().count(), 25);
    }

    #[test]
    fn byte_budget_triggers_low_memory() {
        assert!(needs_low_memory(3, 100_000, 100_000, 4 << 30));
        assert!(!needs_low_memory(3, 1000, 1000, 4 << 30));

        let set = annotation();
        let masks = MaskBuilder::new(&set)
            .working_size(10)
            .max_mask_bytes(100)
            .build(20, 20, |_| unreachable!())
            .unwrap();
        assert!(masks.is_low_memory());
        assert_eq!(masks.get("tumor").unwrap().dimensions(), (10, 10));
    }
}
