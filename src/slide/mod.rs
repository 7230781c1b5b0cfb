//! Whole-slide image access
//!
//! A [`Slide`] pairs a file with the [`Backend`] that decodes it. The
//! patcher only needs dimensions, metadata, thumbnails and level 0 crops,
//! all of which go through the [`SlideBackend`] trait.

pub mod backend;
pub mod image_slide;
pub mod properties;
pub mod region;
pub mod tiff_slide;

use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbImage};
use log::{debug, info, warn};

use crate::error::{PatchError, PatchResult};

pub use backend::{Backend, SlideBackend};
pub use image_slide::ImageSlide;
pub use properties::SlideProperties;
pub use region::Region;
pub use tiff_slide::TiffSlide;

/// An opened slide
pub struct Slide {
    path: PathBuf,
    backend: Backend,
    inner: Box<dyn SlideBackend>,
    retries: u32,
}

impl Slide {
    /// Opens `path` with the given backend
    ///
    /// # Errors
    /// `SlideLoad` when the file is missing or the backend rejects it
    pub fn open(path: &Path, backend: Backend) -> PatchResult<Slide> {
        if !path.is_file() {
            return Err(PatchError::SlideLoad(format!("{} not found", path.display())));
        }
        let inner = backend.open(path)?;
        Ok(Self::from_backend(path, backend, inner))
    }

    /// Opens `path` with the backend its extension suggests
    pub fn open_auto(path: &Path) -> PatchResult<Slide> {
        let backend = Backend::detect(path)?;
        debug!("Using {} backend for {}", backend, path.display());
        Self::open(path, backend)
    }

    /// Wraps a backend that is already open
    pub fn from_backend(path: &Path, backend: Backend, inner: Box<dyn SlideBackend>) -> Slide {
        Slide {
            path: path.to_path_buf(),
            backend,
            inner,
            retries: 0,
        }
    }

    /// Retry transient crop failures up to `retries` extra times
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without its extension; names the output directory
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "slide".to_string())
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Level 0 `(width, height)`
    pub fn dimensions(&self) -> (u32, u32) {
        self.inner.dimensions()
    }

    pub fn properties(&self) -> &SlideProperties {
        self.inner.properties()
    }

    pub fn level_count(&self) -> usize {
        self.inner.level_count()
    }

    pub fn objective_power(&self) -> Option<f64> {
        self.properties().objective_power()
    }

    /// Level 0 pixels of `region`, zero-filled beyond the slide
    ///
    /// Transient backend errors are retried; anything else is returned at once.
    pub fn crop(&self, region: Region) -> PatchResult<RgbImage> {
        let mut attempt = 0;
        loop {
            match self.inner.read_region(region) {
                Ok(image) => return Ok(image),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!("Transient error reading {} (attempt {}/{}): {}", region, attempt, self.retries, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn thumbnail(&self, max_dim: u32) -> PatchResult<DynamicImage> {
        self.inner.thumbnail(max_dim)
    }

    /// Fails when a requested magnification exceeds the slide's objective power
    ///
    /// A slide without objective power metadata passes with a warning.
    pub fn check_magnification(&self, requested: Option<f64>) -> PatchResult<()> {
        let Some(requested) = requested else {
            return Ok(());
        };
        match self.objective_power() {
            Some(available) if requested > available => Err(PatchError::Magnification { requested, available }),
            Some(available) => {
                info!("Slide objective power {}x, requested {}x", available, requested);
                Ok(())
            }
            None => {
                warn!(
                    "{} has no objective power metadata; cannot check requested {}x",
                    self.path.display(),
                    requested
                );
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Slide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slide")
            .field("path", &self.path)
            .field("backend", &self.backend)
            .field("dimensions", &self.dimensions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with a timeout a fixed number of times before succeeding
    struct Flaky {
        failures: AtomicU32,
        properties: SlideProperties,
    }

    impl SlideBackend for Flaky {
        fn dimensions(&self) -> (u32, u32) {
            (100, 100)
        }

        fn properties(&self) -> &SlideProperties {
            &self.properties
        }

        fn read_region(&self, region: Region) -> PatchResult<RgbImage> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(io::Error::new(io::ErrorKind::TimedOut, "backend busy").into());
            }
            Ok(RgbImage::new(region.width, region.height))
        }

        fn thumbnail(&self, _max_dim: u32) -> PatchResult<DynamicImage> {
            Ok(DynamicImage::new_rgb8(1, 1))
        }
    }

    fn flaky(failures: u32, retries: u32) -> Slide {
        let mut properties = SlideProperties::new();
        properties.insert(properties::OBJECTIVE_POWER, "20");
        let inner = Flaky {
            failures: AtomicU32::new(failures),
            properties,
        };
        Slide::from_backend(Path::new("/data/slide_01.svs"), Backend::Tiff, Box::new(inner)).with_retries(retries)
    }

    #[test]
    fn transient_errors_are_retried() {
        assert!(flaky(2, 2).crop(Region::new(0, 0, 4, 4)).is_ok());
        assert!(flaky(3, 2).crop(Region::new(0, 0, 4, 4)).is_err());
    }

    #[test]
    fn magnification_check() {
        let slide = flaky(0, 0);
        assert_eq!(slide.stem(), "slide_01");
        assert!(slide.check_magnification(None).is_ok());
        assert!(slide.check_magnification(Some(20.0)).is_ok());
        assert!(matches!(
            slide.check_magnification(Some(40.0)),
            Err(PatchError::Magnification { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_load_error() {
        assert!(matches!(
            Slide::open(Path::new("/nonexistent/slide.svs"), Backend::Tiff),
            Err(PatchError::SlideLoad(_))
        ));
    }
}
