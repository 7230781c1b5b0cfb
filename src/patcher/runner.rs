//! Parallel extraction of one slide
//!
//! Tiles are independent: each worker tests membership, resolves geometry,
//! writes its files and appends records to a shared collector. Failing
//! tiles are logged, counted and skipped.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, info, warn};
use rand::{rngs::StdRng, Rng, RngExt, SeedableRng};
use rayon::prelude::*;

use crate::annotation::{AnnotationSet, Rule, FOREGROUND};
use crate::config::{ForegroundConfig, PatchConfig};
use crate::error::{PatchError, PatchResult};
use crate::mask::{MaskBuilder, MaskSet};
use crate::slide::{Region, Slide};
use crate::utils::progress::ProgressTracker;

use super::geometry::BoxResolver;
use super::grid::TileGrid;
use super::membership::{Membership, Thresholds};
use super::result::{AnnotationThresholds, MaskRecord, ResultCollector, ResultsFile, TileResult};
use super::Method;

/// Outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Tiles in the full grid
    pub tiles_total: usize,
    /// Tiles handed to the workers, fewer on a dry run
    pub tiles_processed: usize,
    /// Processed tiles that produced at least one record
    pub accepted: usize,
    /// Failed tiles per error group
    pub errors: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn error_count(&self) -> usize {
        self.errors.values().sum()
    }
}

/// `{x:06}_{y:06}.{ext}`
fn tile_file_name(tile: Region, ext: &str) -> String {
    format!("{:06}_{:06}.{}", tile.x, tile.y, ext)
}

/// Extracts patches from one slide
pub struct Patcher<'a> {
    slide: &'a Slide,
    config: &'a PatchConfig,
    annotation: AnnotationSet,
    masks: MaskSet,
    grid: TileGrid,
    classes: Vec<String>,
    thresholds: Thresholds,
    out_dir: PathBuf,
    quiet: bool,
}

impl<'a> Patcher<'a> {
    /// Validate the run and build the masks
    ///
    /// Every configuration problem surfaces here, before any tile is read.
    ///
    /// # Arguments
    /// * `slide` - Opened slide
    /// * `annotation` - Parsed annotation; required by every method but `none`
    /// * `rule` - Optional include/exclude rule
    /// * `config` - Run options
    pub fn new(
        slide: &'a Slide,
        annotation: Option<AnnotationSet>,
        rule: Option<&Rule>,
        config: &'a PatchConfig,
    ) -> PatchResult<Self> {
        config.validate()?;
        let method = config.method;
        if method.requires_annotation() && annotation.is_none() {
            return Err(PatchError::MissCombination {
                method: method.to_string(),
            });
        }
        slide.check_magnification(config.magnification)?;

        let (width, height) = slide.dimensions();
        let grid = TileGrid::new(config.grid_spec(width, height))?;
        info!("{}: {}x{}, {} tiles of {}x{}", slide.stem(), width, height, grid.len(), config.patch_width, config.patch_height);

        let mut thresholds = config.thresholds();
        let has_annotation = annotation.is_some();
        if !has_annotation && thresholds.on_annotation.is_some() {
            debug!("No annotation given; annotation threshold disabled");
            thresholds.on_annotation = None;
        }

        let mut annotation = annotation.unwrap_or_default();
        if let Some(dot) = config.dot_bbox {
            annotation = annotation.dot_to_bbox(dot.width, dot.height);
        }
        if thresholds.on_foreground.is_some()
            && config.foreground == ForegroundConfig::None
            && !annotation.has_class(FOREGROUND)
        {
            return Err(PatchError::InvalidConfig(
                "on_foreground needs a foreground policy or a 'foreground' annotation class".to_string(),
            ));
        }
        if let Some(rule) = rule {
            for class in rule.classes().iter().filter(|c| !annotation.has_class(c)) {
                warn!("Rule class '{}' does not appear in the annotation", class);
            }
        }

        let policy = match thresholds.on_foreground {
            Some(_) => config.foreground.policy(),
            None => None,
        };
        let (masks, classes) = {
            let builder = MaskBuilder::new(&annotation)
                .rule(rule)
                .foreground(policy.as_deref())
                .working_size(config.working_size)
                .max_mask_bytes(config.max_mask_bytes)
                .low_memory(config.low_memory);
            let masks = builder.build(width, height, |max_dim| slide.thumbnail(max_dim))?;
            (masks, builder.classes())
        };
        info!("Extraction classes: {:?}", classes);

        let annotation = match rule {
            Some(rule) => annotation.merge_includes(rule),
            None => annotation,
        };

        Ok(Patcher {
            slide,
            config,
            annotation,
            masks,
            grid,
            classes,
            thresholds,
            out_dir: config.save_to.join(slide.stem()),
            quiet: false,
        })
    }

    /// Hide the progress bar
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// `{save_to}/{slide stem}`
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn masks(&self) -> &MaskSet {
        &self.masks
    }

    /// Classes patches are extracted for, without `foreground`
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Directories a tile can be written to
    fn patch_classes(&self) -> Vec<String> {
        if self.thresholds.on_annotation.is_none() {
            vec![FOREGROUND.to_string()]
        } else {
            self.classes.clone()
        }
    }

    fn create_dirs(&self) -> PatchResult<()> {
        fs::create_dir_all(&self.out_dir)?;
        if !self.config.no_patches {
            for class in self.patch_classes() {
                fs::create_dir_all(self.out_dir.join("patches").join(class))?;
            }
        }
        if self.config.method == Method::Segmentation {
            for class in &self.classes {
                fs::create_dir_all(self.out_dir.join("masks").join(class))?;
            }
        }
        Ok(())
    }

    /// Run the whole grid and write `results.json`
    pub fn run(&self) -> PatchResult<RunSummary> {
        let started = Instant::now();
        self.create_dirs()?;
        if self.config.export_thumbs {
            self.masks.export_thumbs(&self.out_dir.join("thumbs"), self.config.thumb_size)?;
        }

        let mut tiles = self.grid.tiles();
        let tiles_total = tiles.len();
        if let Some(limit) = self.config.dry_run {
            tiles.truncate(limit);
            info!("Dry run: processing the first {} of {} tiles", tiles.len(), tiles_total);
        }
        if self.config.start_sample {
            self.write_samples("start")?;
        }

        let collector = ResultCollector::new();
        let accepted = AtomicUsize::new(0);
        let errors: Mutex<BTreeMap<String, usize>> = Mutex::new(BTreeMap::new());
        let progress = ProgressTracker::new(tiles.len() as u64, &self.slide.stem(), self.quiet);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads.unwrap_or(0))
            .thread_name(|i| format!("patcher-{}", i))
            .build()
            .map_err(|e| PatchError::InvalidConfig(format!("cannot start worker pool: {}", e)))?;
        debug!("Processing {} tiles on {} threads", tiles.len(), pool.current_num_threads());

        pool.install(|| {
            tiles.par_iter().for_each(|tile| {
                match self.process_tile(*tile) {
                    Ok(records) => {
                        if !records.is_empty() {
                            accepted.fetch_add(1, Ordering::Relaxed);
                        }
                        collector.extend(records);
                    }
                    Err(e) => {
                        warn!("Skipping tile {}: {}", tile, e);
                        let mut errors = errors.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                        *errors.entry(e.summary_key().to_string()).or_insert(0) += 1;
                    }
                }
                progress.increment(1);
            });
        });
        progress.finish();

        let result = collector.finish()?;
        self.results_file(result)?.save(&self.out_dir.join("results.json"))?;

        if self.config.finished_sample {
            self.write_samples("finished")?;
        }

        let summary = RunSummary {
            tiles_total,
            tiles_processed: tiles.len(),
            accepted: accepted.into_inner(),
            errors: errors.into_inner().unwrap_or_else(|e| e.into_inner()),
        };
        for (group, count) in &summary.errors {
            warn!("{} tiles failed with {}", count, group);
        }
        info!(
            "{}: {} of {} tiles accepted, {} failed, in {:.1?}",
            self.slide.stem(),
            summary.accepted,
            summary.tiles_processed,
            summary.error_count(),
            started.elapsed()
        );
        Ok(summary)
    }

    /// Records of one tile, writing its patch and mask files on the way
    pub fn process_tile(&self, tile: Region) -> PatchResult<Vec<TileResult>> {
        let membership = Membership::new(&self.masks, &self.thresholds);
        if !membership.on_foreground(tile)? {
            return Ok(Vec::new());
        }
        let members = membership.members(&self.classes, tile)?;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let (x, y, w, h) = (tile.x, tile.y, tile.width, tile.height);
        let records = match self.config.method {
            Method::None => vec![TileResult::Plain { x, y, w, h }],
            Method::Classification => members
                .iter()
                .map(|class| TileResult::Classification {
                    x,
                    y,
                    w,
                    h,
                    class: class.clone(),
                })
                .collect(),
            Method::Detection => {
                let bbs = BoxResolver::new(&self.annotation, membership, &self.classes).resolve(tile)?;
                if bbs.is_empty() {
                    Vec::new()
                } else {
                    vec![TileResult::Detection { x, y, w, h, bbs }]
                }
            }
            Method::Segmentation => {
                let masks = self.write_tile_masks(tile, membership)?;
                vec![TileResult::Segmentation { x, y, w, h, masks }]
            }
        };

        if !self.config.no_patches {
            let patch = self.slide.crop(tile)?;
            for class in &members {
                let path = self.out_dir.join("patches").join(class).join(tile_file_name(tile, "jpg"));
                patch.save(&path)?;
            }
        }
        Ok(records)
    }

    /// Write the 0/1 mask of every class the tile is on
    fn write_tile_masks(&self, tile: Region, membership: Membership<'_>) -> PatchResult<Vec<MaskRecord>> {
        let mut records = Vec::new();
        for class in &self.classes {
            if !membership.on_class(class, tile)? {
                continue;
            }
            let mask = self.masks.crop(class, tile.x, tile.y, tile.width, tile.height)?;
            let path = self.out_dir.join("masks").join(class).join(tile_file_name(tile, "png"));
            mask.as_image().save(&path)?;
            records.push(MaskRecord {
                coords: path.to_string_lossy().into_owned(),
                class: class.clone(),
            });
        }
        Ok(records)
    }

    /// Save a few random main-grid tiles to `{phase}_sample/`
    fn write_samples(&self, phase: &str) -> PatchResult<()> {
        let dir = self.out_dir.join(format!("{}_sample", phase));
        fs::create_dir_all(&dir)?;

        let tiles = match self.config.sample_seed {
            Some(seed) => self.sample_tiles(&mut StdRng::seed_from_u64(seed)),
            None => self.sample_tiles(&mut rand::rng()),
        };
        for tile in &tiles {
            self.slide.crop(*tile)?.save(dir.join(tile_file_name(*tile, "png")))?;
        }
        info!("Wrote {} {} samples to {}", tiles.len(), phase, dir.display());
        Ok(())
    }

    fn sample_tiles<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Region> {
        let (xs, ys) = (self.grid.xs(), self.grid.ys());
        if xs.is_empty() || ys.is_empty() {
            warn!("Main grid is empty; no samples written");
            return Vec::new();
        }
        let spec = self.grid.spec();
        (0..self.config.sample_count)
            .map(|_| {
                let x = xs[rng.random_range(0..xs.len())];
                let y = ys[rng.random_range(0..ys.len())];
                Region::new(x, y, spec.patch_width, spec.patch_height)
            })
            .collect()
    }

    fn results_file(&self, result: Vec<TileResult>) -> PatchResult<ResultsFile> {
        let spec = self.grid.spec();
        let save_to = fs::canonicalize(&self.config.save_to)?;
        let mut classes = self.classes.clone();
        classes.sort();

        Ok(ResultsFile {
            slide: self.slide.path().display().to_string(),
            method: self.config.method.to_string(),
            wsi_width: spec.slide_width,
            wsi_height: spec.slide_height,
            patch_width: spec.patch_width,
            patch_height: spec.patch_height,
            overlap_width: spec.overlap_width,
            overlap_height: spec.overlap_height,
            offset_x: spec.offset_x,
            offset_y: spec.offset_y,
            start_sample: self.config.start_sample,
            finished_sample: self.config.finished_sample,
            no_patches: self.config.no_patches,
            on_foreground: self.thresholds.on_foreground,
            on_annotation: AnnotationThresholds {
                default: self.thresholds.on_annotation,
                classes: self.thresholds.classes.clone(),
            },
            save_to: save_to.display().to_string(),
            classes,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::Polygon;
    use crate::slide::{Backend, ImageSlide};
    use image::{DynamicImage, Rgb, RgbImage};
    use tempfile::TempDir;

    fn slide() -> Slide {
        let image = RgbImage::from_fn(600, 400, |x, _| if x < 300 { Rgb([40, 30, 60]) } else { Rgb([240, 240, 240]) });
        let inner = ImageSlide::from_image(DynamicImage::ImageRgb8(image));
        Slide::from_backend(Path::new("/data/case_07.png"), Backend::Image, Box::new(inner))
    }

    fn config(dir: &TempDir, method: Method) -> PatchConfig {
        PatchConfig {
            method,
            patch_width: 100,
            patch_height: 100,
            save_to: dir.path().to_path_buf(),
            working_size: 600,
            threads: Some(2),
            ..PatchConfig::default()
        }
    }

    #[test]
    fn annotated_methods_need_an_annotation() {
        let dir = TempDir::new().unwrap();
        let slide = slide();
        let config = config(&dir, Method::Detection);
        assert!(matches!(
            Patcher::new(&slide, None, None, &config),
            Err(PatchError::MissCombination { ref method }) if method == "detection"
        ));
    }

    #[test]
    fn foreground_tiles_without_annotation() {
        let dir = TempDir::new().unwrap();
        let slide = slide();
        let config = config(&dir, Method::None);
        let patcher = Patcher::new(&slide, None, None, &config).unwrap().quiet(true);
        let summary = patcher.run().unwrap();

        // 5x3 main grid, 5 + 3 edge tiles and the corner
        assert_eq!(summary.tiles_total, 24);
        assert_eq!(summary.error_count(), 0);
        let results = ResultsFile::load(&patcher.out_dir().join("results.json")).unwrap();
        assert!(!results.result.is_empty());
        assert!(results.result.iter().all(|r| r.origin().0 + 100 <= 300));
        assert!(patcher.out_dir().join("patches/foreground/000000_000000.jpg").is_file());
        assert_eq!(results.on_annotation.default, None);
    }

    #[test]
    fn disabled_foreground_needs_a_source() {
        let dir = TempDir::new().unwrap();
        let slide = slide();
        let config = PatchConfig {
            foreground: ForegroundConfig::None,
            ..config(&dir, Method::None)
        };
        assert!(matches!(
            Patcher::new(&slide, None, None, &config),
            Err(PatchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn segmentation_writes_tile_masks() {
        let dir = TempDir::new().unwrap();
        let slide = slide();
        let config = PatchConfig {
            on_foreground: None,
            no_patches: true,
            ..config(&dir, Method::Segmentation)
        };
        let mut annotation = AnnotationSet::new();
        annotation.push("tumor", Polygon::from_rect(0, 0, 250, 250));
        let patcher = Patcher::new(&slide, Some(annotation), None, &config).unwrap().quiet(true);
        patcher.create_dirs().unwrap();

        let records = patcher.process_tile(Region::new(100, 100, 100, 100)).unwrap();
        let TileResult::Segmentation { masks, .. } = &records[0] else {
            panic!("expected a segmentation record");
        };
        assert_eq!(masks.len(), 1);
        assert!(Path::new(&masks[0].coords).is_file());
        assert!(patcher.process_tile(Region::new(300, 100, 100, 100)).unwrap().is_empty());
    }

    #[test]
    fn seeded_samples_repeat() {
        let dir = TempDir::new().unwrap();
        let slide = slide();
        let config = PatchConfig {
            sample_seed: Some(7),
            ..config(&dir, Method::None)
        };
        let patcher = Patcher::new(&slide, None, None, &config).unwrap();
        let first = patcher.sample_tiles(&mut StdRng::seed_from_u64(7));
        let second = patcher.sample_tiles(&mut StdRng::seed_from_u64(7));
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert!(first.iter().all(|t| patcher.grid().xs().contains(&t.x)));
    }
}
