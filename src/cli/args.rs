// src/cli/args.rs
// Command-line flags of the slicing binary
// RELEVANT FILES: src/cli/slice.rs, src/config.rs, src/bin/tileforge.rs

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{BoundingVolumeKind, OutputFormat, SlicingConfig, SplitStrategy, TextureStrategy};
use crate::geo::{GeoError, GeoOrigin};

pub const USAGE: &str = "\
usage: tileforge <input> --out <dir> [options]

  -o, --out <dir>            output directory for tiles and tileset.json
      --lon <deg>            origin longitude (or X with --crs)
      --lat <deg>            origin latitude (or Y with --crs)
      --height <m>           origin ellipsoidal height
      --crs <EPSG:code>      interpret --lon/--lat as projected coordinates
  -c, --config <file>        JSON slicing configuration
      --lods <n>             number of LOD levels
      --depth <n>            split depth of the finest LOD
      --tile-size <m>        KD-tree target cell size
      --strategy <s>         quadtree | octree | kdtree
      --texture <t>          keep | compress | repack | repack-compressed
      --format <f>           b3dm | glb
      --threads <n>          worker threads, 0 = one per core
      --region               write region bounding volumes instead of boxes
      --keep-partial         index tiles already written when cancelled
  -h, --help                 print this help
";

/// Error raised when parsing slicing CLI flags.
#[derive(Debug)]
pub struct SliceCliError {
    msg: String,
}

impl SliceCliError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl fmt::Display for SliceCliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.msg.fmt(f)
    }
}

impl std::error::Error for SliceCliError {}

/// Parsed command line; unset options keep the configuration's values
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SliceCliArgs {
    pub input: PathBuf,
    pub output: PathBuf,
    pub lon: f64,
    pub lat: f64,
    pub height: f64,
    pub crs: Option<String>,
    pub config: Option<PathBuf>,
    pub lods: Option<u32>,
    pub depth: Option<u32>,
    pub tile_size: Option<f64>,
    pub strategy: Option<SplitStrategy>,
    pub texture: Option<TextureStrategy>,
    pub format: Option<OutputFormat>,
    pub threads: Option<usize>,
    pub region: bool,
    pub keep_partial: bool,
    pub help: bool,
}

fn value<'a>(args: &'a [String], idx: usize, flag: &str) -> Result<&'a str, SliceCliError> {
    args.get(idx + 1)
        .map(String::as_str)
        .ok_or_else(|| SliceCliError::new(format!("missing value for {flag}")))
}

fn parse_number<T: std::str::FromStr>(args: &[String], idx: usize, flag: &str) -> Result<T, SliceCliError> {
    let raw = value(args, idx, flag)?;
    raw.parse::<T>()
        .map_err(|_| SliceCliError::new(format!("invalid numeric value '{raw}' for {flag}")))
}

fn parse_choice<T>(args: &[String], idx: usize, flag: &str, parse: fn(&str) -> Option<T>, expected: &str) -> Result<T, SliceCliError> {
    let raw = value(args, idx, flag)?;
    parse(raw).ok_or_else(|| SliceCliError::new(format!("unknown {flag} value '{raw}'; expected one of {expected}")))
}

impl SliceCliArgs {
    pub fn parse(args: &[String]) -> Result<Self, SliceCliError> {
        let mut cli = SliceCliArgs::default();
        let mut input = None;
        let mut output = None;
        let mut i = 0usize;
        while i < args.len() {
            match args[i].as_str() {
                "-h" | "--help" => {
                    cli.help = true;
                    return Ok(cli);
                }
                "-o" | "--out" => {
                    output = Some(PathBuf::from(value(args, i, "--out")?));
                    i += 2;
                }
                "--lon" => {
                    cli.lon = parse_number(args, i, "--lon")?;
                    i += 2;
                }
                "--lat" => {
                    cli.lat = parse_number(args, i, "--lat")?;
                    i += 2;
                }
                "--height" => {
                    cli.height = parse_number(args, i, "--height")?;
                    i += 2;
                }
                "--crs" => {
                    cli.crs = Some(value(args, i, "--crs")?.to_string());
                    i += 2;
                }
                "-c" | "--config" => {
                    cli.config = Some(PathBuf::from(value(args, i, "--config")?));
                    i += 2;
                }
                "--lods" => {
                    cli.lods = Some(parse_number(args, i, "--lods")?);
                    i += 2;
                }
                "--depth" => {
                    cli.depth = Some(parse_number(args, i, "--depth")?);
                    i += 2;
                }
                "--tile-size" => {
                    cli.tile_size = Some(parse_number(args, i, "--tile-size")?);
                    i += 2;
                }
                "--strategy" => {
                    cli.strategy = Some(parse_choice(
                        args,
                        i,
                        "--strategy",
                        SplitStrategy::from_str,
                        "quadtree, octree, kdtree",
                    )?);
                    i += 2;
                }
                "--texture" => {
                    cli.texture = Some(parse_choice(
                        args,
                        i,
                        "--texture",
                        TextureStrategy::from_str,
                        "keep, compress, repack, repack-compressed",
                    )?);
                    i += 2;
                }
                "--format" => {
                    cli.format = Some(parse_choice(args, i, "--format", OutputFormat::from_str, "b3dm, glb")?);
                    i += 2;
                }
                "--threads" => {
                    cli.threads = Some(parse_number(args, i, "--threads")?);
                    i += 2;
                }
                "--region" => {
                    cli.region = true;
                    i += 1;
                }
                "--keep-partial" => {
                    cli.keep_partial = true;
                    i += 1;
                }
                flag if flag.starts_with('-') => {
                    return Err(SliceCliError::new(format!("unknown flag '{flag}'")));
                }
                positional => {
                    if input.is_some() {
                        return Err(SliceCliError::new(format!("unexpected argument '{positional}'")));
                    }
                    input = Some(PathBuf::from(positional));
                    i += 1;
                }
            }
        }

        cli.input = input.ok_or_else(|| SliceCliError::new("missing input model"))?;
        cli.output = output.ok_or_else(|| SliceCliError::new("missing --out directory"))?;
        Ok(cli)
    }

    /// Configuration file (or defaults) with the command-line overrides applied
    pub fn to_config(&self) -> anyhow::Result<SlicingConfig> {
        let mut config = match &self.config {
            Some(path) => SlicingConfig::load(path)?,
            None => SlicingConfig::default(),
        };
        if let Some(lods) = self.lods {
            config.lod_levels = lods;
            config.lod_ratios = None;
        }
        if let Some(depth) = self.depth {
            config.division_depth = depth;
            config.max_split_depth = config.max_split_depth.max(depth);
        }
        if let Some(tile_size) = self.tile_size {
            config.tile_size = tile_size;
        }
        if let Some(strategy) = self.strategy {
            config.split_strategy = strategy;
        }
        if let Some(texture) = self.texture {
            config.texture_strategy = texture;
        }
        if let Some(format) = self.format {
            config.output_format = format;
        }
        if let Some(threads) = self.threads {
            config.worker_threads = threads;
        }
        if self.region {
            config.bounding_volume = BoundingVolumeKind::Region;
        }
        config.keep_partial_output |= self.keep_partial;
        config.validate()?;
        Ok(config)
    }

    pub fn origin(&self) -> Result<GeoOrigin, GeoError> {
        match &self.crs {
            Some(crs) => GeoOrigin::from_projected(self.lon, self.lat, self.height, crs),
            None => GeoOrigin::new(self.lon, self.lat, self.height),
        }
    }

    /// Task id derived from the input file name
    pub fn task_id(&self) -> String {
        self.input
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| "slice".to_string())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_full_command() {
        let cli = SliceCliArgs::parse(&args(&[
            "model.obj", "--out", "tiles", "--lon", "116.39", "--lat", "39.9", "--height", "50", "--lods", "4",
            "--strategy", "kdtree", "--texture", "repack", "--format", "glb", "--threads", "2", "--region",
        ]))
        .unwrap();
        assert_eq!(cli.input, PathBuf::from("model.obj"));
        assert_eq!(cli.output, PathBuf::from("tiles"));
        assert_eq!(cli.lat, 39.9);
        assert_eq!(cli.strategy, Some(SplitStrategy::KdTree));
        assert_eq!(cli.texture, Some(TextureStrategy::Repack));
        assert_eq!(cli.task_id(), "model");

        let config = cli.to_config().unwrap();
        assert_eq!(config.lod_levels, 4);
        assert_eq!(config.output_format, OutputFormat::Glb);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.bounding_volume, BoundingVolumeKind::Region);
    }

    #[test]
    fn test_missing_arguments() {
        let err = SliceCliArgs::parse(&args(&["model.obj"])).unwrap_err();
        assert!(err.to_string().contains("--out"));
        let err = SliceCliArgs::parse(&args(&["--out", "x"])).unwrap_err();
        assert!(err.to_string().contains("input"));
        let err = SliceCliArgs::parse(&args(&["model.obj", "--out"])).unwrap_err();
        assert!(err.to_string().contains("missing value for --out"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = SliceCliArgs::parse(&args(&["m.obj", "-o", "x", "--strategy", "bsp"])).unwrap_err();
        assert!(err.to_string().contains("quadtree"));
        assert!(SliceCliArgs::parse(&args(&["m.obj", "-o", "x", "--lods", "three"])).is_err());
        assert!(SliceCliArgs::parse(&args(&["m.obj", "-o", "x", "--bogus"])).is_err());
        assert!(SliceCliArgs::parse(&args(&["a.obj", "b.obj", "-o", "x"])).is_err());
    }

    #[test]
    fn test_invalid_override_fails_validation() {
        let cli = SliceCliArgs::parse(&args(&["m.obj", "-o", "x", "--lods", "0"])).unwrap();
        assert!(cli.to_config().is_err());
    }

    #[test]
    fn test_origin_range_checked() {
        let cli = SliceCliArgs::parse(&args(&["m.obj", "-o", "x", "--lat", "91"])).unwrap();
        assert!(cli.origin().is_err());
    }

    #[test]
    fn test_help_short_circuits() {
        let cli = SliceCliArgs::parse(&args(&["--help"])).unwrap();
        assert!(cli.help);
    }
}
