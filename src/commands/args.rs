//! Command line arguments shared by the extraction subcommands
//!
//! Flags given on the command line win over values from `--config`.

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, ArgMatches};

use crate::config::{DotBox, ForegroundConfig, PatchConfig};
use crate::error::{PatchError, PatchResult};
use crate::slide::Backend;

fn value(name: &'static str, help: &'static str, value_name: &'static str) -> Arg {
    Arg::new(name).long(name).help(help).value_name(value_name).required(false)
}

fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(name).help(help).action(ArgAction::SetTrue)
}

/// Slide positional plus the annotation, rule, config and backend options
pub fn input_args() -> Vec<Arg> {
    vec![
        Arg::new("slide").help("Whole-slide image").required(true).index(1),
        Arg::new("annotation")
            .short('a')
            .long("annotation")
            .help("Annotation file (ASAP XML, WSIDissector JSON, SlideRunner SQLite, QuPath or GeoJSON)")
            .value_name("FILE"),
        value("rule", "Include/exclude rule JSON", "FILE"),
        value("config", "TOML file with run options", "FILE"),
        value("backend", "Slide decoder (tiff, image); guessed from the extension by default", "NAME"),
        value(
            "slide-name",
            "Slide name registered in a SlideRunner database; the slide's file name by default",
            "NAME",
        ),
    ]
}

/// Every option of an extraction run
pub fn patch_args() -> Vec<Arg> {
    vec![
        Arg::new("save-to")
            .short('o')
            .long("save-to")
            .help("Output directory")
            .value_name("DIR"),
        value("patch-width", "Patch width in pixels", "N").value_parser(value_parser!(u32)),
        value("patch-height", "Patch height in pixels", "N").value_parser(value_parser!(u32)),
        value("overlap-width", "Horizontal overlap between patches", "N").value_parser(value_parser!(u32)),
        value("overlap-height", "Vertical overlap between patches", "N").value_parser(value_parser!(u32)),
        value("offset-x", "Left offset of the grid", "N").value_parser(value_parser!(u32)),
        value("offset-y", "Top offset of the grid", "N").value_parser(value_parser!(u32)),
        value("on-foreground", "Minimum foreground ratio of a patch", "RATIO").value_parser(value_parser!(f64)),
        flag("no-foreground-filter", "Accept patches regardless of tissue"),
        value("on-annotation", "Minimum annotation ratio of a patch", "RATIO").value_parser(value_parser!(f64)),
        flag("no-annotation-filter", "Extract every foreground patch"),
        value("class-threshold", "Per-class annotation ratio, repeatable", "CLASS=RATIO").action(ArgAction::Append),
        value("dot-bbox", "Expand dot annotations to boxes of this size", "WxH"),
        value("foreground", "Foreground policy (otsu, minmax, none)", "NAME"),
        value("minmax", "Intensity band of the minmax policy", "MIN,MAX"),
        value("working-size", "Long side of the mask canvas", "N").value_parser(value_parser!(u32)),
        value("max-mask-bytes", "Mask budget before switching to low-memory mode", "BYTES")
            .value_parser(value_parser!(u64)),
        flag("low-memory", "Keep masks at canvas scale"),
        value("threads", "Worker threads", "N").value_parser(value_parser!(usize)),
        value("dry-run", "Only process the first N tiles", "N").value_parser(value_parser!(usize)),
        flag("start-sample", "Save random sample tiles before extraction"),
        flag("finished-sample", "Save random sample tiles after extraction"),
        value("sample-count", "Number of sample tiles", "N").value_parser(value_parser!(usize)),
        value("seed", "Seed for sample selection", "N").value_parser(value_parser!(u64)),
        flag("no-patches", "Write results.json only"),
        value("magnification", "Magnification the patches are extracted at", "X").value_parser(value_parser!(f64)),
        value("retries", "Retries for transient slide read errors", "N").value_parser(value_parser!(u32)),
        flag("export-thumbs", "Write mask thumbnails next to the results"),
    ]
}

/// Parse `WxH`
pub fn parse_size(text: &str) -> PatchResult<(u32, u32)> {
    let parsed = text
        .split_once(|c| c == 'x' || c == 'X')
        .and_then(|(w, h)| Some((w.trim().parse().ok()?, h.trim().parse().ok()?)));
    parsed.ok_or_else(|| PatchError::InvalidConfig(format!("expected WIDTHxHEIGHT, got '{}'", text)))
}

/// Parse `MIN,MAX`
pub fn parse_band(text: &str) -> PatchResult<(u8, u8)> {
    let parsed = text
        .split_once(',')
        .and_then(|(min, max)| Some((min.trim().parse().ok()?, max.trim().parse().ok()?)));
    parsed.ok_or_else(|| PatchError::InvalidConfig(format!("expected MIN,MAX with values 0-255, got '{}'", text)))
}

/// Parse `CLASS=RATIO`
pub fn parse_class_threshold(text: &str) -> PatchResult<(String, f64)> {
    let parsed = text
        .rsplit_once('=')
        .and_then(|(class, ratio)| Some((class.trim().to_string(), ratio.trim().parse().ok()?)))
        .filter(|(class, _)| !class.is_empty());
    parsed.ok_or_else(|| PatchError::InvalidConfig(format!("expected CLASS=RATIO, got '{}'", text)))
}

/// Backend named by `--backend`, if any
pub fn backend(args: &ArgMatches) -> PatchResult<Option<Backend>> {
    args.get_one::<String>("backend").map(|name| name.parse()).transpose()
}

/// Name given with `--slide-name`, if any
pub fn slide_name(args: &ArgMatches) -> Option<String> {
    args.get_one::<String>("slide-name").cloned()
}

/// Configuration from `--config`, or the defaults
pub fn load_config(args: &ArgMatches) -> PatchResult<PatchConfig> {
    match args.get_one::<String>("config") {
        Some(path) => PatchConfig::from_path(&PathBuf::from(path)),
        None => Ok(PatchConfig::default()),
    }
}

/// Apply command line flags on top of `config`
pub fn apply_overrides(config: &mut PatchConfig, args: &ArgMatches) -> PatchResult<()> {
    macro_rules! set {
        ($field:ident, $name:literal, $ty:ty) => {
            if let Some(value) = args.get_one::<$ty>($name) {
                config.$field = *value;
            }
        };
    }
    macro_rules! set_some {
        ($field:ident, $name:literal, $ty:ty) => {
            if let Some(value) = args.get_one::<$ty>($name) {
                config.$field = Some(*value);
            }
        };
    }

    if let Some(dir) = args.get_one::<String>("save-to") {
        config.save_to = PathBuf::from(dir);
    }
    set!(patch_width, "patch-width", u32);
    set!(patch_height, "patch-height", u32);
    set!(overlap_width, "overlap-width", u32);
    set!(overlap_height, "overlap-height", u32);
    set!(offset_x, "offset-x", u32);
    set!(offset_y, "offset-y", u32);
    set_some!(on_foreground, "on-foreground", f64);
    set_some!(on_annotation, "on-annotation", f64);
    set!(working_size, "working-size", u32);
    set!(max_mask_bytes, "max-mask-bytes", u64);
    set_some!(threads, "threads", usize);
    set_some!(dry_run, "dry-run", usize);
    set!(sample_count, "sample-count", usize);
    set_some!(sample_seed, "seed", u64);
    set_some!(magnification, "magnification", f64);
    set!(backend_retries, "retries", u32);

    if args.get_flag("no-foreground-filter") {
        config.on_foreground = None;
    }
    if args.get_flag("no-annotation-filter") {
        config.on_annotation = None;
    }
    if let Some(values) = args.get_many::<String>("class-threshold") {
        for text in values {
            let (class, ratio) = parse_class_threshold(text)?;
            config.annotation_thresholds.insert(class, ratio);
        }
    }
    if let Some(text) = args.get_one::<String>("dot-bbox") {
        let (width, height) = parse_size(text)?;
        config.dot_bbox = Some(DotBox { width, height });
    }
    if let Some(name) = args.get_one::<String>("foreground") {
        config.foreground = ForegroundConfig::from_name(name)?;
    }
    if let Some(text) = args.get_one::<String>("minmax") {
        let (min, max) = parse_band(text)?;
        config.foreground = ForegroundConfig::Minmax { min, max };
    }

    config.low_memory |= args.get_flag("low-memory");
    config.start_sample |= args.get_flag("start-sample");
    config.finished_sample |= args.get_flag("finished-sample");
    config.no_patches |= args.get_flag("no-patches");
    config.export_thumbs |= args.get_flag("export-thumbs");
    Ok(())
}
