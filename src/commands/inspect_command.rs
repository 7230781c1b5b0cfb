//! Slide and annotation inspection command
//!
//! Prints what the extraction commands would see: slide dimensions, levels
//! and metadata, the TIFF directory layout for TIFF slides, and the
//! classes found in an annotation file.

use std::path::{Path, PathBuf};

use clap::ArgMatches;
use log::info;

use crate::annotation;
use crate::commands::args;
use crate::commands::command_traits::Command;
use crate::commands::patch_command::PatchCommand;
use crate::compression::CompressionFactory;
use crate::error::{PatchError, PatchResult};
use crate::slide::{Backend, Slide};
use crate::tiff::constants::tags;
use crate::tiff::ifd::IFD;
use crate::tiff::types::TIFF;
use crate::tiff::TiffReader;

/// Prints slide and annotation summaries
pub struct InspectCommand {
    slide: PathBuf,
    annotation: Option<PathBuf>,
    backend: Option<Backend>,
    slide_name: Option<String>,
}

impl InspectCommand {
    pub fn new(args: &ArgMatches) -> PatchResult<Self> {
        let slide = args
            .get_one::<String>("slide")
            .map(PathBuf::from)
            .ok_or_else(|| PatchError::InvalidConfig("missing slide path".to_string()))?;

        Ok(InspectCommand {
            slide,
            annotation: args.get_one::<String>("annotation").map(PathBuf::from),
            backend: args::backend(args)?,
            slide_name: args::slide_name(args),
        })
    }

    fn display_slide(&self, slide: &Slide) {
        let (width, height) = slide.dimensions();
        info!("Slide: {}", slide.path().display());
        info!("  Backend: {}", slide.backend());
        info!("  Dimensions: {}x{}", width, height);
        info!("  Levels: {}", slide.level_count());
        match slide.objective_power() {
            Some(power) => info!("  Objective power: {}x", power),
            None => info!("  Objective power: unknown"),
        }
        for (key, value) in slide.properties().iter() {
            if key != crate::slide::properties::IMAGE_DESCRIPTION {
                info!("  {} = {}", key, value);
            }
        }
    }

    /// Directory summary with compression support per IFD
    fn display_tiff(&self, tiff: &TIFF) {
        info!("TIFF layout: {}", if tiff.is_big_tiff { "BigTIFF" } else { "TIFF" });
        info!("  Byte order: {}", tiff.byte_order.name());
        info!("  Number of IFDs: {}", tiff.ifd_count());
        for ifd in &tiff.ifds {
            info!("  {}", ifd);
            self.display_compression(ifd);
        }
    }

    fn display_compression(&self, ifd: &IFD) {
        let code = ifd.get_tag_value(tags::COMPRESSION).unwrap_or(1);
        match CompressionFactory::create_handler(code) {
            Ok(handler) => info!("    Compression: {} ({})", handler.name(), code),
            Err(_) => info!("    Compression: {} (not supported)", code),
        }
    }

    fn display_annotation(&self, path: &Path, slide: &Slide) -> PatchResult<()> {
        let format = annotation::detect_format(path)?;
        let set = PatchCommand::load_annotation(path, slide, self.slide_name.as_deref())?;
        info!("Annotation: {} ({})", path.display(), format.name());
        for class in set.classes() {
            info!("  {}: {} polygons", class, set.polygons(class).len());
        }
        Ok(())
    }
}

impl Command for InspectCommand {
    fn execute(&self) -> PatchResult<()> {
        let slide = PatchCommand::open_slide(&self.slide, self.backend, 0)?;
        self.display_slide(&slide);

        if slide.backend() == Backend::Tiff {
            let tiff = TiffReader::new().load(&self.slide)?;
            self.display_tiff(&tiff);
        }
        if let Some(path) = &self.annotation {
            self.display_annotation(path, &slide)?;
        }
        Ok(())
    }
}
