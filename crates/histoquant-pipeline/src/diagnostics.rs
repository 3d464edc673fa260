//! Per-stage timing and counts for one sample run.
//!
//! [`process_with_diagnostics`] drives the staged pipeline and records a
//! [`StageDiagnostics`] for every stage alongside the result. The time
//! source is abstracted behind [`Clock`] so this crate stays free of
//! platform timing APIs; the CLI supplies an `Instant`-backed clock.
//!
//! Durations are serialized as fractional seconds (`f64`), since
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SampleLayers;
use crate::palette::StainPalette;
use crate::pipeline::{Pipeline, SampleResult};
use crate::types::{PipelineConfig, PipelineError};

/// Source of timestamps for stage timing.
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// Current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| serde::de::Error::custom("duration must be finite and non-negative"))
    }
}

/// Diagnostics collected from one sample run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// ROI masking.
    pub mask: StageDiagnostics,
    /// Grid detection and clustering.
    pub grid_detection: StageDiagnostics,
    /// Area calibration.
    pub calibration: StageDiagnostics,
    /// Tiling.
    pub tiling: StageDiagnostics,
    /// Colour segmentation of every tile.
    pub segmentation: StageDiagnostics,
    /// Wall-clock duration of the whole run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// ROI masking.
    Mask {
        /// Pixels inside the ROI.
        roi_pixels: u64,
        /// Border points of the filled contour.
        outline_points: usize,
        /// `roi_pixels` as a fraction of the image.
        coverage: f64,
    },
    /// Grid detection and clustering.
    GridDetection {
        /// Accepted segments over all sweep configurations.
        segments: usize,
        /// Raw horizontal samples.
        raw_horizontal: usize,
        /// Raw vertical samples.
        raw_vertical: usize,
        /// Clustered horizontal lines.
        horizontal_lines: usize,
        /// Clustered vertical lines.
        vertical_lines: usize,
    },
    /// Area calibration.
    Calibration {
        /// Mean accepted grid spacing in pixels.
        grid_spacing_px: f64,
        /// Microns per pixel side.
        microns_per_pixel: f64,
        /// ROI area in square microns.
        area_sq_microns: f64,
    },
    /// Tiling.
    Tiling {
        /// Cells before filtering.
        candidate_cells: usize,
        /// Tiles kept.
        tiles: usize,
    },
    /// Colour segmentation.
    Segmentation {
        /// Palette used.
        palette: String,
        /// Tiles with a segmentation result.
        segmented_tiles: usize,
        /// Tiles without any non-background pixel.
        empty_tiles: usize,
        /// Non-background pixels over all tiles.
        foreground_pixels: u64,
    },
}

/// High-level counts for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Layer width in pixels.
    pub image_width: u32,
    /// Layer height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Pixels inside the ROI.
    pub roi_pixels: u64,
    /// Tiles produced.
    pub tile_count: usize,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels, {} in ROI)",
            self.summary.image_width,
            self.summary.image_height,
            self.summary.pixel_count,
            self.summary.roi_pixels,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration)
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<18} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<18} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!("Tiles: {}", self.summary.tile_count));
        lines.join("\n")
    }

    /// Stages in execution order with display names.
    #[must_use]
    pub fn stages(&self) -> [(&'static str, &StageDiagnostics); 5] {
        [
            ("Mask", &self.mask),
            ("Grid Detection", &self.grid_detection),
            ("Calibration", &self.calibration),
            ("Tiling", &self.tiling),
            ("Segmentation", &self.segmentation),
        ]
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Mask {
            roi_pixels,
            outline_points,
            coverage,
        } => format!(
            "{roi_pixels} px ({:.1}%), outline {outline_points} pts",
            coverage * 100.0
        ),
        StageMetrics::GridDetection {
            segments,
            raw_horizontal,
            raw_vertical,
            horizontal_lines,
            vertical_lines,
        } => format!(
            "{segments} segs, h {raw_horizontal}->{horizontal_lines}, v {raw_vertical}->{vertical_lines}"
        ),
        StageMetrics::Calibration {
            grid_spacing_px,
            microns_per_pixel,
            area_sq_microns,
        } => format!(
            "spacing={grid_spacing_px:.2}px scale={microns_per_pixel:.4}um/px area={area_sq_microns:.0}um^2"
        ),
        StageMetrics::Tiling {
            candidate_cells,
            tiles,
        } => format!("{tiles} of {candidate_cells} cells"),
        StageMetrics::Segmentation {
            palette,
            segmented_tiles,
            empty_tiles,
            foreground_pixels,
        } => format!(
            "{palette}: {segmented_tiles} tiles ({empty_tiles} empty), {foreground_pixels} px"
        ),
    }
}

/// Run the full pipeline, timing each stage with `clock`.
///
/// Produces the same [`SampleResult`] as [`crate::process`].
///
/// # Errors
///
/// Propagates the first stage error; see [`crate::process`].
pub fn process_with_diagnostics<C: Clock>(
    layers: SampleLayers,
    config: &PipelineConfig,
    palette: &StainPalette,
    context: Option<&str>,
    clock: &C,
) -> Result<(SampleResult, PipelineDiagnostics), PipelineError> {
    let total_start = clock.now();
    let (width, height) = layers.original.dimensions();

    let mut pipeline = Pipeline::new(layers, config.clone());
    if let Some(context) = context {
        pipeline = pipeline.with_context(context);
    }

    let t = clock.now();
    let masked = pipeline.mask()?;
    let mask = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: masked.metrics(),
    };

    let t = clock.now();
    let detected = masked.detect_grid()?;
    let grid_detection = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: detected.metrics(),
    };

    let t = clock.now();
    let calibrated = detected.calibrate()?;
    let calibration = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: calibrated.metrics(),
    };

    let t = clock.now();
    let tiled = calibrated.tile()?;
    let tiling = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: tiled.metrics(),
    };

    let t = clock.now();
    let segmented = tiled.segment(palette)?;
    let segmentation = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: segmented.metrics(),
    };

    let result = segmented.into_result();
    let summary = PipelineSummary {
        image_width: width,
        image_height: height,
        pixel_count: u64::from(width) * u64::from(height),
        roi_pixels: result.area.pixel_count,
        tile_count: result.tiles.len(),
    };

    let diagnostics = PipelineDiagnostics {
        mask,
        grid_detection,
        calibration,
        tiling,
        segmentation,
        total_duration: clock.elapsed(&total_start),
        summary,
    };
    Ok((result, diagnostics))
}
