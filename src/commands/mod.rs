//! CLI command implementations
//!
//! Subcommands `evaluation` (alias `none`), `classification`, `detection`
//! and `segmentation` run an extraction; `masks` exports the class masks and
//! `inspect` prints slide and annotation summaries.

pub mod args;
pub mod command_traits;
pub mod inspect_command;
pub mod masks_command;
pub mod patch_command;

pub use command_traits::{Command, CommandFactory};
pub use inspect_command::InspectCommand;
pub use masks_command::MasksCommand;
pub use patch_command::PatchCommand;

use clap::{Arg, ArgAction, ArgMatches, Command as ClapCommand};

use crate::error::{PatchError, PatchResult};
use crate::patcher::Method;

fn extraction(name: &'static str, about: &'static str) -> ClapCommand {
    ClapCommand::new(name)
        .about(about)
        .args(args::input_args())
        .args(args::patch_args())
}

/// The full command line interface
pub fn build_cli() -> ClapCommand {
    ClapCommand::new("wsipatch")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Extract patches from whole-slide images using annotations")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("More log output, repeat for trace")
                .action(ArgAction::Count)
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Hide the progress bar")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .help("Also write the log to this file")
                .value_name("FILE")
                .global(true),
        )
        .subcommand(
            extraction("evaluation", "Extract foreground patches, recording positions only").alias("none"),
        )
        .subcommand(extraction("classification", "Extract patches labelled with their classes"))
        .subcommand(extraction("detection", "Extract patches with the annotation boxes inside them"))
        .subcommand(extraction("segmentation", "Extract patches with per-class mask images"))
        .subcommand(extraction("masks", "Write the class masks and thumbnails of a slide"))
        .subcommand(
            ClapCommand::new("inspect")
                .about("Show slide metadata, TIFF layout and annotation classes")
                .args(args::input_args()),
        )
}

/// Factory for creating command instances based on CLI arguments
pub struct WsiPatchCommandFactory;

impl WsiPatchCommandFactory {
    pub fn new() -> Self {
        WsiPatchCommandFactory
    }
}

impl Default for WsiPatchCommandFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandFactory for WsiPatchCommandFactory {
    fn create_command(&self, args: &ArgMatches) -> PatchResult<Box<dyn Command>> {
        let quiet = args.get_flag("quiet");
        match args.subcommand() {
            Some(("evaluation", sub)) => Ok(Box::new(PatchCommand::new(Method::None, sub, quiet)?)),
            Some(("classification", sub)) => Ok(Box::new(PatchCommand::new(Method::Classification, sub, quiet)?)),
            Some(("detection", sub)) => Ok(Box::new(PatchCommand::new(Method::Detection, sub, quiet)?)),
            Some(("segmentation", sub)) => Ok(Box::new(PatchCommand::new(Method::Segmentation, sub, quiet)?)),
            Some(("masks", sub)) => Ok(Box::new(MasksCommand::new(sub)?)),
            Some(("inspect", sub)) => Ok(Box::new(InspectCommand::new(sub)?)),
            Some((other, _)) => Err(PatchError::MethodNotImplemented(other.to_string())),
            None => Err(PatchError::InvalidConfig("no subcommand given".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch_command(argv: &[&str]) -> PatchResult<PatchCommand> {
        let matches = build_cli().try_get_matches_from(argv.iter().copied()).unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        let method: Method = name.parse()?;
        PatchCommand::new(method, sub, true)
    }

    #[test]
    fn cli_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let command = patch_command(&[
            "wsipatch",
            "classification",
            "slide.svs",
            "-a",
            "anno.xml",
            "--patch-width",
            "512",
            "--on-annotation",
            "0.5",
            "--class-threshold",
            "tumor=0.8",
            "--no-foreground-filter",
            "--minmax",
            "10,200",
            "--dot-bbox",
            "30x20",
        ])
        .unwrap();

        let config = command.config();
        assert_eq!(config.method, Method::Classification);
        assert_eq!(config.patch_width, 512);
        assert_eq!(config.patch_height, 256);
        assert_eq!(config.on_foreground, None);
        assert_eq!(config.thresholds().annotation_threshold("tumor"), Some(0.8));
        assert_eq!(config.thresholds().annotation_threshold("stroma"), Some(0.5));
        assert_eq!(config.foreground, crate::config::ForegroundConfig::Minmax { min: 10, max: 200 });
    }

    #[test]
    fn none_is_an_alias_of_evaluation() {
        let matches = build_cli().try_get_matches_from(["wsipatch", "none", "slide.svs"]).unwrap();
        assert_eq!(matches.subcommand_name(), Some("evaluation"));
    }

    #[test]
    fn invalid_values_fail_before_running() {
        assert!(matches!(
            patch_command(&["wsipatch", "evaluation", "slide.svs", "--on-foreground", "1.5"]),
            Err(PatchError::ThresholdRange { .. })
        ));
        assert!(matches!(
            patch_command(&["wsipatch", "evaluation", "slide.svs", "--patch-width", "0"]),
            Err(PatchError::InvalidGeometry(_))
        ));
    }
}
