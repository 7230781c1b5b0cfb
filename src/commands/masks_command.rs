//! Mask export command
//!
//! Builds the class masks of a slide exactly as an extraction run would
//! and writes them out for inspection.

use std::path::PathBuf;

use clap::ArgMatches;
use log::info;

use crate::annotation::Rule;
use crate::commands::args;
use crate::commands::command_traits::Command;
use crate::commands::patch_command::PatchCommand;
use crate::config::PatchConfig;
use crate::error::{PatchError, PatchResult};
use crate::mask::MaskBuilder;
use crate::slide::Backend;

/// Writes `{class}.png` masks and `{class}_thumb.png` previews
pub struct MasksCommand {
    slide: PathBuf,
    annotation: PathBuf,
    rule: Option<PathBuf>,
    backend: Option<Backend>,
    slide_name: Option<String>,
    config: PatchConfig,
}

impl MasksCommand {
    pub fn new(args: &ArgMatches) -> PatchResult<Self> {
        let slide = args
            .get_one::<String>("slide")
            .map(PathBuf::from)
            .ok_or_else(|| PatchError::InvalidConfig("missing slide path".to_string()))?;
        let annotation = args
            .get_one::<String>("annotation")
            .map(PathBuf::from)
            .ok_or_else(|| PatchError::MissCombination {
                method: "masks".to_string(),
            })?;

        let mut config = args::load_config(args)?;
        args::apply_overrides(&mut config, args)?;
        config.validate()?;

        Ok(MasksCommand {
            slide,
            annotation,
            rule: args.get_one::<String>("rule").map(PathBuf::from),
            backend: args::backend(args)?,
            slide_name: args::slide_name(args),
            config,
        })
    }
}

impl Command for MasksCommand {
    fn execute(&self) -> PatchResult<()> {
        let slide = PatchCommand::open_slide(&self.slide, self.backend, self.config.backend_retries)?;
        let mut annotation = PatchCommand::load_annotation(&self.annotation, &slide, self.slide_name.as_deref())?;
        if let Some(dot) = self.config.dot_bbox {
            annotation = annotation.dot_to_bbox(dot.width, dot.height);
        }
        let rule = self.rule.as_deref().map(Rule::from_path).transpose()?;
        let policy = self.config.foreground.policy();

        let (width, height) = slide.dimensions();
        let masks = MaskBuilder::new(&annotation)
            .rule(rule.as_ref())
            .foreground(policy.as_deref())
            .working_size(self.config.working_size)
            .max_mask_bytes(self.config.max_mask_bytes)
            .low_memory(self.config.low_memory)
            .build(width, height, |max_dim| slide.thumbnail(max_dim))?;

        let out_dir = self.config.save_to.join(slide.stem());
        let written = masks.export_masks(&out_dir.join("masks"))?;
        let thumbs = masks.export_thumbs(&out_dir.join("thumbs"), self.config.thumb_size)?;
        info!(
            "Exported {} masks and {} thumbnails under {}",
            written.len(),
            thumbs.len(),
            out_dir.display()
        );
        Ok(())
    }
}
