//! histoquant-pipeline: tissue quantification core (sans-IO).
//!
//! Turns one sample's rendered layers (original micrograph, ROI outline,
//! calibration grid) into a masked region, a physical ROI area, grid
//! tiles, and per-tile tissue-class percentages:
//! ROI mask -> grid line detection -> line clustering -> area
//! calibration -> tiling -> colour segmentation.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! image buffers and byte slices. Reading layers, writing artifacts and
//! tables lives in `histoquant-export` and the `histoquant` CLI.

pub mod calibrate;
pub mod cluster;
pub mod diagnostics;
pub mod edge;
pub mod grayscale;
pub mod grid;
pub mod hough;
pub mod mask;
pub mod overlay;
pub mod palette;
pub mod pipeline;
pub mod segment;
pub mod threshold;
pub mod tile;
pub mod types;

use image::RgbImage;

pub use calibrate::AreaMeasurement;
pub use cluster::{LineSet, cluster_lines};
pub use mask::BinaryMask;
pub use palette::{StainPalette, TissueClass};
pub use pipeline::{Pipeline, SampleResult, TileResult};
pub use segment::{ClassPercentage, SegmentationResult};
pub use tile::{BoundingBox, Tile};
pub use types::{Axis, Dimensions, ErrorKind, PipelineConfig, PipelineError};

/// The three rendered layers of one sample. All three must share the
/// same dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLayers {
    /// The micrograph.
    pub original: RgbImage,
    /// The ROI outline drawn on a light background.
    pub roi: RgbImage,
    /// The calibration grid drawn on a light background.
    pub grid: RgbImage,
}

impl SampleLayers {
    /// Decode the three layers from encoded image bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyInput`] or
    /// [`PipelineError::ImageDecode`] for the first layer that cannot be
    /// decoded.
    pub fn decode(original: &[u8], roi: &[u8], grid: &[u8]) -> Result<Self, PipelineError> {
        Ok(Self {
            original: grayscale::decode_rgb(original)?,
            roi: grayscale::decode_rgb(roi)?,
            grid: grayscale::decode_rgb(grid)?,
        })
    }
}

/// Run the full pipeline on one sample.
///
/// `context` names the sample in log messages.
///
/// # Pipeline steps
///
/// 1. Adaptive threshold of the ROI layer, largest external contour
///    filled into the mask; original whitened outside it
/// 2. Line-evidence image from the grid layer, segment detection over
///    the vote-threshold x max-gap sweep, axis classification
/// 3. Greedy clustering of line samples per axis
/// 4. Pixel scale from outlier-filtered grid gaps; ROI area
/// 5. Tiling along the clustered lines
/// 6. Nearest-anchor colour classification per tile
///
/// # Errors
///
/// Returns the first stage error: [`PipelineError::SizeMismatch`],
/// [`PipelineError::NoContourFound`], [`PipelineError::NoGridLines`],
/// [`PipelineError::DegenerateSpacing`], [`PipelineError::NoTiles`] or
/// [`PipelineError::InvalidConfig`].
pub fn process(
    layers: SampleLayers,
    config: &PipelineConfig,
    palette: &StainPalette,
    context: Option<&str>,
) -> Result<SampleResult, PipelineError> {
    let mut pending = Pipeline::new(layers, config.clone());
    if let Some(context) = context {
        pending = pending.with_context(context);
    }
    Ok(pending
        .mask()?
        .detect_grid()?
        .calibrate()?
        .tile()?
        .segment(palette)?
        .into_result())
}

/// [`process`] over encoded layer bytes.
///
/// # Errors
///
/// Decoding errors as in [`SampleLayers::decode`], then as in
/// [`process`].
pub fn process_bytes(
    original: &[u8],
    roi: &[u8],
    grid: &[u8],
    config: &PipelineConfig,
    palette: &StainPalette,
    context: Option<&str>,
) -> Result<SampleResult, PipelineError> {
    let layers = SampleLayers::decode(original, roi, grid)?;
    process(layers, config, palette, context)
}
