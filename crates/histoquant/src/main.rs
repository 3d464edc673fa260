//! histoquant: batch tissue quantification.
//!
//! Reads a manifest of samples (a JSON list of records, or a directory
//! of `Original-Images/`, `ROI-Images/` and `Grid-Images/` layers), runs
//! the quantification pipeline on every sample in parallel, and writes
//! per-stain artifacts plus image- and tile-level tables.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin histoquant -- [OPTIONS] <INPUT>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod batch;
mod manifest;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use histoquant_pipeline::diagnostics::Clock;
use histoquant_pipeline::types::AdaptivePass;
use histoquant_pipeline::{PipelineConfig, StainPalette};

use crate::batch::BatchOptions;
use crate::manifest::Manifest;

/// Default output directory name, created next to the input.
const OUTPUT_DIR: &str = "Staining-Analysis";

/// Batch tissue quantification of ROI-outlined, grid-calibrated
/// micrographs.
///
/// Prints a per-stain summary of successes and failures; failed samples
/// are listed in `failed.json` in the output directory, which can be
/// passed back as INPUT to re-run only those.
#[derive(Parser)]
#[command(name = "histoquant", version)]
struct Cli {
    /// JSON manifest of sample records, or a directory of layer images.
    input: PathBuf,

    /// Output directory [default: <input dir>/Staining-Analysis].
    #[arg(long, short)]
    output_dir: Option<PathBuf>,

    /// ROI adaptive-threshold window (odd, >= 3).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_ROI_BLOCK_SIZE)]
    roi_block_size: u32,

    /// ROI adaptive-threshold offset.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_ROI_OFFSET)]
    roi_offset: f32,

    /// Adaptive-threshold passes for the grid evidence image, as
    /// `<block_size>:<offset>` pairs.
    #[arg(long, value_delimiter = ',', default_values_t = PipelineConfig::DEFAULT_GRID_ADAPTIVE_PASSES)]
    grid_adaptive_passes: Vec<AdaptivePass>,

    /// Grid edge detector low threshold.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_GRID_CANNY_LOW)]
    grid_canny_low: f32,

    /// Grid edge detector high threshold.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_GRID_CANNY_HIGH)]
    grid_canny_high: f32,

    /// Inverted global thresholds for the grid evidence image.
    #[arg(long, value_delimiter = ',', default_values_t = PipelineConfig::DEFAULT_GRID_FIXED_THRESHOLDS)]
    grid_fixed_thresholds: Vec<u8>,

    /// Segment vote thresholds of the detection sweep.
    #[arg(long, value_delimiter = ',', default_values_t = PipelineConfig::DEFAULT_HOUGH_VOTE_THRESHOLDS)]
    hough_vote_thresholds: Vec<u32>,

    /// Maximum segment gaps of the detection sweep.
    #[arg(long, value_delimiter = ',', default_values_t = PipelineConfig::DEFAULT_HOUGH_MAX_GAPS)]
    hough_max_gaps: Vec<u32>,

    /// Angle tolerance in degrees for axis classification.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_ANGLE_TOLERANCE_DEG)]
    angle_tolerance_deg: f64,

    /// Minimum segment length as a fraction of the shorter image side.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MIN_LINE_LENGTH_RATIO)]
    min_line_length_ratio: f64,

    /// Line clustering tolerance in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CLUSTER_TOLERANCE)]
    cluster_tolerance: f64,

    /// Physical grid spacing in microns.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_GRID_SPACING_MICRONS)]
    grid_spacing_microns: f64,

    /// Gaps deviating from the axis median by this fraction of it or
    /// more are rejected.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_SPACING_OUTLIER_RATIO)]
    spacing_outlier_ratio: f64,

    /// Minimum tile side in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MIN_TILE_SIZE)]
    min_tile_size: u32,

    /// Minimum fraction of non-white pixels in a tile.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MIN_TILE_CONTENT_RATIO)]
    min_tile_content_ratio: f64,

    /// Pixels with every channel above this value are background.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_BACKGROUND_THRESHOLD)]
    background_threshold: u8,

    /// Resolution written into every PNG artifact.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_EXPORT_DPI)]
    export_dpi: u32,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization.
    #[arg(long, conflicts_with = "config")]
    config_json: Option<String>,

    /// Full pipeline config as a JSON file. Same rules as `--config-json`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tissue palette as a JSON file, used for every stain instead of the
    /// built-in per-stain palettes.
    #[arg(long)]
    palette: Option<PathBuf>,

    /// Worker threads [default: number of CPUs].
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    threads: Option<usize>,

    /// Log at debug level, including per-sample stage diagnostics.
    #[arg(long, short)]
    verbose: bool,

    /// Suppress per-sample progress lines.
    #[arg(long, short)]
    quiet: bool,

    /// Print the batch summary as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// `--config-json` or `--config` replace the individual flags entirely.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }
    if let Some(ref path) = cli.config {
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
        return serde_json::from_str(&json)
            .map_err(|e| format!("Error parsing {}: {e}", path.display()));
    }

    Ok(PipelineConfig {
        roi_block_size: cli.roi_block_size,
        roi_offset: cli.roi_offset,
        grid_adaptive_passes: cli.grid_adaptive_passes.clone(),
        grid_canny_low: cli.grid_canny_low,
        grid_canny_high: cli.grid_canny_high,
        grid_fixed_thresholds: cli.grid_fixed_thresholds.clone(),
        hough_vote_thresholds: cli.hough_vote_thresholds.clone(),
        hough_max_gaps: cli.hough_max_gaps.clone(),
        angle_tolerance_deg: cli.angle_tolerance_deg,
        min_line_length_ratio: cli.min_line_length_ratio,
        cluster_tolerance: cli.cluster_tolerance,
        grid_spacing_microns: cli.grid_spacing_microns,
        spacing_outlier_ratio: cli.spacing_outlier_ratio,
        min_tile_size: cli.min_tile_size,
        min_tile_content_ratio: cli.min_tile_content_ratio,
        background_threshold: cli.background_threshold,
        export_dpi: cli.export_dpi,
    })
}

fn load_palette(path: &Path) -> Result<StainPalette, String> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    let palette: StainPalette = serde_json::from_str(&json)
        .map_err(|e| format!("Error parsing palette {}: {e}", path.display()))?;
    palette
        .validate()
        .map_err(|e| format!("Invalid palette {}: {e}", path.display()))?;
    Ok(palette)
}

fn default_output_dir(input: &Path) -> PathBuf {
    let base = if input.is_dir() {
        input
    } else {
        input.parent().unwrap_or_else(|| Path::new("."))
    };
    base.join(OUTPUT_DIR)
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: &Cli) -> Result<batch::BatchSummary, String> {
    let config = config_from_cli(cli)?;
    config.validate().map_err(|e| e.to_string())?;
    let palette = cli.palette.as_deref().map(load_palette).transpose()?;

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| format!("Failed to configure thread pool: {e}"))?;
    }

    let manifest = Manifest::load(&cli.input)?;
    log::info!(
        "{} samples from {} ({} threads)",
        manifest.records.len(),
        cli.input.display(),
        rayon::current_num_threads()
    );
    log::debug!("Config: {config:#?}");

    let options = BatchOptions {
        output_dir: cli
            .output_dir
            .clone()
            .unwrap_or_else(|| default_output_dir(&cli.input)),
        config,
        palette,
        quiet: cli.quiet,
    };
    batch::run(&manifest, &options, &StdClock)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let summary = match run(&cli) {
        Ok(summary) => summary,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing summary: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", summary.report());
    }

    if summary.succeeded() == 0 && summary.failed() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flag_defaults_match_config_defaults() {
        let cli = Cli::try_parse_from(["histoquant", "manifest.json"]).unwrap();
        assert_eq!(config_from_cli(&cli).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "histoquant",
            "manifest.json",
            "--hough-max-gaps",
            "3,6",
            "--grid-adaptive-passes",
            "15:3,31:5.5",
            "--grid-spacing-microns",
            "250",
        ])
        .unwrap();
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.hough_max_gaps, vec![3, 6]);
        assert_eq!(
            config.grid_adaptive_passes,
            vec![AdaptivePass::new(15, 3.0), AdaptivePass::new(31, 5.5)]
        );
        assert!((config.grid_spacing_microns - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn outlier_ratio_help_describes_two_sided_rule() {
        let command = Cli::command();
        let arg = command
            .get_arguments()
            .find(|a| a.get_id() == "spacing_outlier_ratio")
            .unwrap();
        let help = arg.get_help().unwrap().to_string();
        assert!(help.contains("deviating from the axis median"), "{help}");
        assert!(!help.contains("below"), "{help}");
    }

    #[test]
    fn config_json_replaces_flags() {
        let config = PipelineConfig {
            min_tile_size: 80,
            ..PipelineConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let cli = Cli::try_parse_from([
            "histoquant",
            "in",
            "--min-tile-size",
            "10",
            "--config-json",
            &json,
        ])
        .unwrap();
        assert_eq!(config_from_cli(&cli).unwrap(), config);

        let cli = Cli::try_parse_from(["histoquant", "in", "--config-json", "{"]).unwrap();
        assert!(config_from_cli(&cli).is_err());
    }

    #[test]
    fn output_dir_defaults_next_to_manifest() {
        assert_eq!(
            default_output_dir(Path::new("runs/manifest.json")),
            Path::new("runs").join(OUTPUT_DIR)
        );
    }
}
