//! Shared types for the histoquant pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can reference decoded
/// layers and tiles without depending on `image` directly.
pub use image::RgbImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an image buffer.
    #[must_use]
    pub fn of<P: image::Pixel>(image: &image::ImageBuffer<P, Vec<P::Subpixel>>) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total pixel count (`width * height`).
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Length of the shorter side.
    #[must_use]
    pub fn min_side(self) -> u32 {
        self.width.min(self.height)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Image axis a set of grid lines is measured along.
///
/// Horizontal lines are positioned by their `y` coordinate, vertical
/// lines by their `x` coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Lines running left-to-right, positioned along `y`.
    Horizontal,
    /// Lines running top-to-bottom, positioned along `x`.
    Vertical,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Horizontal => f.write_str("horizontal"),
            Self::Vertical => f.write_str("vertical"),
        }
    }
}

/// One adaptive-threshold parameterisation: Gaussian window size and
/// the offset subtracted from the local mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptivePass {
    /// Odd window size in pixels (at least 3).
    pub block_size: u32,
    /// Offset subtracted from the local weighted mean.
    pub offset: f32,
}

impl AdaptivePass {
    /// Create a new adaptive pass.
    #[must_use]
    pub const fn new(block_size: u32, offset: f32) -> Self {
        Self { block_size, offset }
    }
}

/// `<block_size>:<offset>`, e.g. `11:2`.
impl fmt::Display for AdaptivePass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_size, self.offset)
    }
}

impl std::str::FromStr for AdaptivePass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (block, offset) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <block_size>:<offset>, got {s:?}"))?;
        let block_size = block
            .trim()
            .parse()
            .map_err(|e| format!("invalid block size {block:?}: {e}"))?;
        let offset = offset
            .trim()
            .parse()
            .map_err(|e| format!("invalid offset {offset:?}: {e}"))?;
        Ok(Self::new(block_size, offset))
    }
}

/// Configuration for the geometry and classification pipeline.
///
/// Every empirically tuned constant of the pipeline lives here so it
/// can be re-tuned per deployment. Defaults are exposed as associated
/// `DEFAULT_*` constants so front ends (the CLI) can reuse them without
/// duplicating literals.
///
/// Use [`validate`](Self::validate) before running a batch; the stage
/// functions themselves clamp rather than reject out-of-range values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Adaptive threshold window size for ROI outline binarisation.
    pub roi_block_size: u32,

    /// Adaptive threshold offset for ROI outline binarisation.
    pub roi_offset: f32,

    /// Adaptive-threshold parameterisations OR-merged into the grid
    /// line-evidence image.
    pub grid_adaptive_passes: Vec<AdaptivePass>,

    /// Canny low threshold for grid line evidence.
    pub grid_canny_low: f32,

    /// Canny high threshold for grid line evidence.
    pub grid_canny_high: f32,

    /// Fixed inverted global thresholds OR-merged into the grid
    /// line-evidence image. Pixels at or below a level are evidence.
    pub grid_fixed_thresholds: Vec<u8>,

    /// Accumulator vote thresholds swept by the segment detector.
    pub hough_vote_thresholds: Vec<u32>,

    /// Maximum gaps (pixels) bridged inside one segment, swept by the
    /// segment detector.
    pub hough_max_gaps: Vec<u32>,

    /// Angular tolerance in degrees for classifying a segment as
    /// horizontal or vertical.
    pub angle_tolerance_deg: f64,

    /// Minimum segment length as a fraction of the shorter image side.
    pub min_line_length_ratio: f64,

    /// Distance (pixels) within which consecutive line candidates are
    /// merged into one grid line.
    pub cluster_tolerance: f64,

    /// Physical distance between adjacent grid lines, in microns.
    pub grid_spacing_microns: f64,

    /// Gaps deviating from their axis median by this fraction of the
    /// median (or more) are rejected before calibration.
    pub spacing_outlier_ratio: f64,

    /// Minimum tile width and height in pixels.
    pub min_tile_size: u32,

    /// Minimum fraction of non-white pixels a tile must exceed.
    pub min_tile_content_ratio: f64,

    /// Pixels whose channels all exceed this value are unstained slide
    /// background and excluded from classification.
    pub background_threshold: u8,

    /// Physical resolution written into exported raster artifacts.
    pub export_dpi: u32,
}

impl PipelineConfig {
    /// Default ROI adaptive threshold window size.
    pub const DEFAULT_ROI_BLOCK_SIZE: u32 = 11;
    /// Default ROI adaptive threshold offset.
    pub const DEFAULT_ROI_OFFSET: f32 = 2.0;
    /// Default adaptive passes for grid line evidence.
    pub const DEFAULT_GRID_ADAPTIVE_PASSES: [AdaptivePass; 2] =
        [AdaptivePass::new(11, 2.0), AdaptivePass::new(21, 4.0)];
    /// Default Canny low threshold for grid line evidence.
    pub const DEFAULT_GRID_CANNY_LOW: f32 = 50.0;
    /// Default Canny high threshold for grid line evidence.
    pub const DEFAULT_GRID_CANNY_HIGH: f32 = 150.0;
    /// Default fixed thresholds for grid line evidence.
    pub const DEFAULT_GRID_FIXED_THRESHOLDS: [u8; 3] = [50, 100, 150];
    /// Default accumulator vote thresholds.
    pub const DEFAULT_HOUGH_VOTE_THRESHOLDS: [u32; 3] = [50, 100, 150];
    /// Default maximum segment gaps.
    pub const DEFAULT_HOUGH_MAX_GAPS: [u32; 3] = [5, 10, 20];
    /// Default angular tolerance in degrees.
    pub const DEFAULT_ANGLE_TOLERANCE_DEG: f64 = 20.0;
    /// Default minimum line length ratio.
    pub const DEFAULT_MIN_LINE_LENGTH_RATIO: f64 = 0.3;
    /// Default line clustering tolerance in pixels.
    pub const DEFAULT_CLUSTER_TOLERANCE: f64 = 20.0;
    /// Default physical grid spacing in microns.
    pub const DEFAULT_GRID_SPACING_MICRONS: f64 = 500.0;
    /// Default gap outlier rejection ratio.
    pub const DEFAULT_SPACING_OUTLIER_RATIO: f64 = 0.5;
    /// Default minimum tile side in pixels.
    pub const DEFAULT_MIN_TILE_SIZE: u32 = 50;
    /// Default minimum tile content ratio.
    pub const DEFAULT_MIN_TILE_CONTENT_RATIO: f64 = 0.1;
    /// Default background channel threshold.
    pub const DEFAULT_BACKGROUND_THRESHOLD: u8 = 240;
    /// Default export resolution in dots per inch.
    pub const DEFAULT_EXPORT_DPI: u32 = 250;

    /// Check every field against its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first field
    /// that is out of range.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if !is_valid_block_size(self.roi_block_size) {
            return invalid(format!(
                "roi_block_size must be odd and >= 3, got {}",
                self.roi_block_size
            ));
        }
        if let Some(pass) = self
            .grid_adaptive_passes
            .iter()
            .find(|p| !is_valid_block_size(p.block_size))
        {
            return invalid(format!(
                "grid adaptive block_size must be odd and >= 3, got {}",
                pass.block_size
            ));
        }
        if self.hough_vote_thresholds.is_empty() || self.hough_max_gaps.is_empty() {
            return invalid("segment detector sweep lists must not be empty".to_string());
        }
        if self.hough_vote_thresholds.contains(&0) {
            return invalid("hough vote thresholds must be positive".to_string());
        }
        if !(self.angle_tolerance_deg > 0.0 && self.angle_tolerance_deg < 45.0) {
            return invalid(format!(
                "angle_tolerance_deg must be in (0, 45), got {}",
                self.angle_tolerance_deg
            ));
        }
        if !(self.min_line_length_ratio > 0.0 && self.min_line_length_ratio <= 1.0) {
            return invalid(format!(
                "min_line_length_ratio must be in (0, 1], got {}",
                self.min_line_length_ratio
            ));
        }
        if !(self.cluster_tolerance >= 0.0 && self.cluster_tolerance.is_finite()) {
            return invalid(format!(
                "cluster_tolerance must be finite and non-negative, got {}",
                self.cluster_tolerance
            ));
        }
        if !(self.grid_spacing_microns > 0.0 && self.grid_spacing_microns.is_finite()) {
            return invalid(format!(
                "grid_spacing_microns must be positive, got {}",
                self.grid_spacing_microns
            ));
        }
        if !(self.spacing_outlier_ratio > 0.0 && self.spacing_outlier_ratio <= 1.0) {
            return invalid(format!(
                "spacing_outlier_ratio must be in (0, 1], got {}",
                self.spacing_outlier_ratio
            ));
        }
        if !(0.0..=1.0).contains(&self.min_tile_content_ratio) {
            return invalid(format!(
                "min_tile_content_ratio must be in [0, 1], got {}",
                self.min_tile_content_ratio
            ));
        }
        if self.export_dpi == 0 {
            return invalid("export_dpi must be positive".to_string());
        }
        Ok(())
    }
}

const fn is_valid_block_size(block_size: u32) -> bool {
    block_size >= 3 && block_size % 2 == 1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            roi_block_size: Self::DEFAULT_ROI_BLOCK_SIZE,
            roi_offset: Self::DEFAULT_ROI_OFFSET,
            grid_adaptive_passes: Self::DEFAULT_GRID_ADAPTIVE_PASSES.to_vec(),
            grid_canny_low: Self::DEFAULT_GRID_CANNY_LOW,
            grid_canny_high: Self::DEFAULT_GRID_CANNY_HIGH,
            grid_fixed_thresholds: Self::DEFAULT_GRID_FIXED_THRESHOLDS.to_vec(),
            hough_vote_thresholds: Self::DEFAULT_HOUGH_VOTE_THRESHOLDS.to_vec(),
            hough_max_gaps: Self::DEFAULT_HOUGH_MAX_GAPS.to_vec(),
            angle_tolerance_deg: Self::DEFAULT_ANGLE_TOLERANCE_DEG,
            min_line_length_ratio: Self::DEFAULT_MIN_LINE_LENGTH_RATIO,
            cluster_tolerance: Self::DEFAULT_CLUSTER_TOLERANCE,
            grid_spacing_microns: Self::DEFAULT_GRID_SPACING_MICRONS,
            spacing_outlier_ratio: Self::DEFAULT_SPACING_OUTLIER_RATIO,
            min_tile_size: Self::DEFAULT_MIN_TILE_SIZE,
            min_tile_content_ratio: Self::DEFAULT_MIN_TILE_CONTENT_RATIO,
            background_threshold: Self::DEFAULT_BACKGROUND_THRESHOLD,
            export_dpi: Self::DEFAULT_EXPORT_DPI,
        }
    }
}

/// Coarse error category used for batch summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    /// An expected layer or file is absent or unreadable.
    MissingInput,
    /// No contour, no grid lines, degenerate spacing, or no usable tiles.
    DegenerateGeometry,
    /// Companion layers have different dimensions.
    SizeMismatch,
    /// Unexpected failure inside a numeric stage.
    ComputationError,
    /// The configuration is out of range.
    InvalidConfig,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MissingInput => "missing input",
            Self::DegenerateGeometry => "degenerate geometry",
            Self::SizeMismatch => "size mismatch",
            Self::ComputationError => "computation error",
            Self::InvalidConfig => "invalid config",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while processing one sample.
///
/// Every variant is recoverable at the batch level: the sample is
/// skipped and the batch continues.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode an input layer.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// An expected layer or file is absent.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// The ROI layer contains no external contour.
    #[error("no contour found in ROI outline")]
    NoContourFound,

    /// No grid lines were detected along an axis.
    #[error("no {axis} grid lines detected")]
    NoGridLines {
        /// The axis without lines.
        axis: Axis,
    },

    /// No grid spacing survived outlier rejection along an axis.
    #[error("degenerate {axis} grid spacing: no usable gaps")]
    DegenerateSpacing {
        /// The axis without usable gaps.
        axis: Axis,
    },

    /// Tiling produced no tile passing the size and content filters.
    #[error("no tiles passed the size and content filters")]
    NoTiles,

    /// A tile contains only background pixels.
    #[error("tile contains no non-background pixels")]
    EmptyTile,

    /// Companion layers have different dimensions.
    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Dimensions of the reference layer.
        expected: Dimensions,
        /// Dimensions of the mismatching layer.
        actual: Dimensions,
    },

    /// Unexpected failure inside a numeric stage.
    #[error("computation failed: {0}")]
    Computation(String),

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// The batch-summary category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ImageDecode(_) | Self::EmptyInput | Self::MissingInput(_) => {
                ErrorKind::MissingInput
            }
            Self::NoContourFound
            | Self::NoGridLines { .. }
            | Self::DegenerateSpacing { .. }
            | Self::NoTiles
            | Self::EmptyTile => ErrorKind::DegenerateGeometry,
            Self::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Self::Computation(_) => ErrorKind::ComputationError,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }
}

/// Ensure two layers share the same dimensions.
///
/// # Errors
///
/// Returns [`PipelineError::SizeMismatch`] when they differ.
pub fn ensure_same_size(expected: Dimensions, actual: Dimensions) -> Result<(), PipelineError> {
    if expected == actual {
        Ok(())
    } else {
        Err(PipelineError::SizeMismatch { expected, actual })
    }
}
