//! Patch extraction command
//!
//! One command per extraction method; they differ only in the
//! [`Method`] written into the configuration.

use std::path::{Path, PathBuf};

use clap::ArgMatches;
use log::{info, warn};

use crate::annotation::{self, AnnotationSet, Rule};
use crate::commands::args;
use crate::commands::command_traits::Command;
use crate::config::PatchConfig;
use crate::error::{PatchError, PatchResult};
use crate::patcher::{Method, Patcher, RunSummary};
use crate::slide::{Backend, Slide};

/// Extracts patches from one slide
pub struct PatchCommand {
    slide: PathBuf,
    annotation: Option<PathBuf>,
    rule: Option<PathBuf>,
    backend: Option<Backend>,
    slide_name: Option<String>,
    config: PatchConfig,
    quiet: bool,
}

impl PatchCommand {
    /// Create a patch command for `method`
    ///
    /// # Arguments
    /// * `method` - Extraction method chosen by the subcommand
    /// * `args` - Matches of the subcommand
    /// * `quiet` - Hide the progress bar
    pub fn new(method: Method, args: &ArgMatches, quiet: bool) -> PatchResult<Self> {
        let slide = args
            .get_one::<String>("slide")
            .map(PathBuf::from)
            .ok_or_else(|| PatchError::InvalidConfig("missing slide path".to_string()))?;

        let mut config = args::load_config(args)?;
        config.method = method;
        args::apply_overrides(&mut config, args)?;
        config.validate()?;

        Ok(PatchCommand {
            slide,
            annotation: args.get_one::<String>("annotation").map(PathBuf::from),
            rule: args.get_one::<String>("rule").map(PathBuf::from),
            backend: args::backend(args)?,
            slide_name: args::slide_name(args),
            config,
            quiet,
        })
    }

    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// Open the slide with the requested or detected backend
    pub(crate) fn open_slide(path: &Path, backend: Option<Backend>, retries: u32) -> PatchResult<Slide> {
        let backend = match backend {
            Some(backend) => backend,
            None => Backend::detect(path)?,
        };
        let slide = Slide::open(path, backend)?.with_retries(retries);
        let (width, height) = slide.dimensions();
        info!(
            "Opened {} with the {} backend: {}x{}, {} levels",
            path.display(),
            backend,
            width,
            height,
            slide.level_count()
        );
        Ok(slide)
    }

    /// Name a multi-slide annotation database knows the slide by
    ///
    /// `explicit` wins; otherwise the slide's file name is used.
    pub(crate) fn annotation_slide_name(slide: &Path, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::to_string)
            .or_else(|| slide.file_name().map(|n| n.to_string_lossy().into_owned()))
    }

    /// Parse the annotation, filtering multi-slide databases by slide name
    pub(crate) fn load_annotation(path: &Path, slide: &Slide, slide_name: Option<&str>) -> PatchResult<AnnotationSet> {
        let name = Self::annotation_slide_name(slide.path(), slide_name);
        annotation::load(path, name.as_deref())
    }

    fn report(&self, summary: &RunSummary) {
        info!(
            "Processed {}/{} tiles, accepted {}",
            summary.tiles_processed, summary.tiles_total, summary.accepted
        );
        if summary.error_count() > 0 {
            warn!("{} tiles were skipped because of errors", summary.error_count());
        }
    }
}

impl Command for PatchCommand {
    fn execute(&self) -> PatchResult<()> {
        info!("Running {} extraction on {}", self.config.method, self.slide.display());
        let slide = Self::open_slide(&self.slide, self.backend, self.config.backend_retries)?;

        let annotation = match &self.annotation {
            Some(path) => Some(Self::load_annotation(path, &slide, self.slide_name.as_deref())?),
            None => None,
        };
        let rule = self.rule.as_deref().map(Rule::from_path).transpose()?;

        let patcher = Patcher::new(&slide, annotation, rule.as_ref(), &self.config)?.quiet(self.quiet);
        let summary = patcher.run()?;
        self.report(&summary);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slide_name_defaults_to_file_name() {
        let path = Path::new("/data/slides/a.svs");
        assert_eq!(PatchCommand::annotation_slide_name(path, None).as_deref(), Some("a.svs"));
        assert_eq!(
            PatchCommand::annotation_slide_name(path, Some("b.svs")).as_deref(),
            Some("b.svs")
        );
    }

    #[test]
    fn slide_name_flag_reaches_the_command() {
        let matches = crate::commands::build_cli()
            .try_get_matches_from(["wsipatch", "detection", "a.svs", "-a", "db.sqlite", "--slide-name", "b.svs"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        let command = PatchCommand::new(Method::Detection, sub, true).unwrap();
        assert_eq!(command.slide_name.as_deref(), Some("b.svs"));
    }
}
