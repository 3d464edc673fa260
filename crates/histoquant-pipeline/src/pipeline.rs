//! Staged pipeline: advance one stage at a time, inspecting each
//! intermediate result before continuing.
//!
//! ```rust
//! # use histoquant_pipeline::{Pipeline, PipelineConfig, PipelineError, SampleLayers, StainPalette};
//! # fn run(layers: SampleLayers) -> Result<(), PipelineError> {
//! let result = Pipeline::new(layers, PipelineConfig::default())
//!     .with_context("Control - Week 4 - HE - Apex - Animal 1")
//!     .mask()?
//!     .detect_grid()?
//!     .calibrate()?
//!     .tile()?
//!     .segment(&StainPalette::he())?
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state. Every
//! fallible transition returns a [`PipelineError`]; callers skip the
//! sample on error.
//!
//! # Memory
//!
//! A stage moves forward only what later stages need. The original and
//! ROI layers are dropped once the masked image and its downscaled
//! ROI-process figure exist; the grid layer is dropped once its lines are
//! clustered. After the artifacts are written, [`SampleResult::drop_images`]
//! and [`TileResult::drop_rasters`] release the rasters while keeping
//! every measurement.

use image::RgbImage;
use imageproc::point::Point;

use crate::calibrate::{AreaMeasurement, measure_area};
use crate::cluster::{LineSet, cluster_lines};
use crate::diagnostics::StageMetrics;
use crate::grayscale::to_gray;
use crate::grid::detect_grid_lines;
use crate::mask::{BinaryMask, RoiMask, apply_mask, build_mask};
use crate::overlay;
use crate::palette::StainPalette;
use crate::segment::{SegmentationResult, segment_tile};
use crate::tile::{Tile, candidate_cells, create_tiles};
use crate::types::{Axis, Dimensions, PipelineConfig, PipelineError, ensure_same_size};
use crate::SampleLayers;

/// Panel height of the tile-comparison artifact.
pub const COMPARISON_PANEL_HEIGHT: u32 = 400;

/// Panel height of the ROI-process artifact.
pub const ROI_PROCESS_PANEL_HEIGHT: u32 = 600;

/// Entry point of the staged API.
pub struct Pipeline;

impl Pipeline {
    /// Start a run over one sample's layers.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(layers: SampleLayers, config: PipelineConfig) -> Pending {
        Pending {
            config,
            layers,
            context: None,
        }
    }
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Layers loaded, nothing computed yet.
#[must_use = "pipeline stages are consumed by advancing; call .mask() to continue"]
pub struct Pending {
    config: PipelineConfig,
    layers: SampleLayers,
    context: Option<String>,
}

impl Pending {
    /// Name the sample in log messages.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// The layers this run will process.
    #[must_use]
    pub const fn layers(&self) -> &SampleLayers {
        &self.layers
    }

    /// Build the ROI mask and whiten everything outside it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for an out-of-range
    /// config, [`PipelineError::SizeMismatch`] if the ROI layer size
    /// differs from the original and [`PipelineError::NoContourFound`]
    /// if the outline cannot be found.
    pub fn mask(self) -> Result<Masked, PipelineError> {
        self.config.validate()?;
        let SampleLayers {
            original,
            roi,
            grid,
        } = self.layers;
        let dimensions = Dimensions::of(&original);
        ensure_same_size(dimensions, Dimensions::of(&roi))?;

        let roi_gray = to_gray(&roi);
        let mask = build_mask(&roi_gray, &self.config, self.context.as_deref())?;
        drop(roi_gray);

        let masked = apply_mask(&original, &mask.mask)?;
        let roi_figure = overlay::roi_process(
            &original,
            &roi,
            &masked,
            ROI_PROCESS_PANEL_HEIGHT.min(dimensions.height),
        );
        drop(original);
        drop(roi);
        Ok(Masked {
            config: self.config,
            context: self.context,
            dimensions,
            masked,
            roi_figure,
            roi: mask,
            grid,
        })
    }
}

// ───────────────────────── Stage 1: Masked ───────────────────────────

/// ROI isolated; the grid layer is still pending.
#[must_use = "pipeline stages are consumed by advancing; call .detect_grid() to continue"]
pub struct Masked {
    config: PipelineConfig,
    context: Option<String>,
    dimensions: Dimensions,
    masked: RgbImage,
    roi_figure: RgbImage,
    roi: RoiMask,
    grid: RgbImage,
}

impl Masked {
    /// The original with every pixel outside the ROI set to white.
    #[must_use]
    pub const fn masked(&self) -> &RgbImage {
        &self.masked
    }

    /// The filled ROI.
    #[must_use]
    pub const fn mask(&self) -> &BinaryMask {
        &self.roi.mask
    }

    /// Original, ROI layer and masked image side by side.
    #[must_use]
    pub const fn roi_figure(&self) -> &RgbImage {
        &self.roi_figure
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn metrics(&self) -> StageMetrics {
        let roi_pixels = self.roi.mask.count();
        let total = self.dimensions.pixel_count();
        StageMetrics::Mask {
            roi_pixels,
            outline_points: self.roi.outline.len(),
            coverage: if total > 0 {
                roi_pixels as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Detect and cluster the grid lines.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SizeMismatch`] if the grid layer size
    /// differs from the original, and [`PipelineError::NoGridLines`] if
    /// either axis ends up without lines.
    pub fn detect_grid(self) -> Result<GridDetected, PipelineError> {
        ensure_same_size(self.dimensions, Dimensions::of(&self.grid))?;

        let gray = to_gray(&self.grid);
        let detection = detect_grid_lines(&self.grid, &gray, &self.config);
        drop(gray);
        drop(self.grid);

        let context = self.context.as_deref();
        let tolerance = self.config.cluster_tolerance;
        let horizontal = cluster_lines(&detection.horizontal, tolerance, context);
        let vertical = cluster_lines(&detection.vertical, tolerance, context);

        for (axis, lines) in [(Axis::Horizontal, &horizontal), (Axis::Vertical, &vertical)] {
            if lines.is_empty() {
                return Err(PipelineError::NoGridLines { axis });
            }
        }

        let grid_overlay = overlay::grid_detection_overlay(&detection.overlay, &horizontal, &vertical);
        Ok(GridDetected {
            config: self.config,
            dimensions: self.dimensions,
            masked: self.masked,
            roi_figure: self.roi_figure,
            roi: self.roi,
            segment_count: detection.segments.len(),
            raw_horizontal: detection.horizontal,
            raw_vertical: detection.vertical,
            horizontal,
            vertical,
            grid_overlay,
        })
    }
}

// ───────────────────────── Stage 2: GridDetected ─────────────────────

/// Canonical line sets known for both axes.
#[must_use = "pipeline stages are consumed by advancing; call .calibrate() to continue"]
pub struct GridDetected {
    config: PipelineConfig,
    dimensions: Dimensions,
    masked: RgbImage,
    roi_figure: RgbImage,
    roi: RoiMask,
    segment_count: usize,
    raw_horizontal: Vec<f64>,
    raw_vertical: Vec<f64>,
    horizontal: LineSet,
    vertical: LineSet,
    grid_overlay: RgbImage,
}

impl GridDetected {
    /// Clustered horizontal line positions.
    #[must_use]
    pub const fn horizontal(&self) -> &LineSet {
        &self.horizontal
    }

    /// Clustered vertical line positions.
    #[must_use]
    pub const fn vertical(&self) -> &LineSet {
        &self.vertical
    }

    /// Detected segments plus the clustered lines over the grid layer.
    #[must_use]
    pub const fn grid_overlay(&self) -> &RgbImage {
        &self.grid_overlay
    }

    pub(crate) fn metrics(&self) -> StageMetrics {
        StageMetrics::GridDetection {
            segments: self.segment_count,
            raw_horizontal: self.raw_horizontal.len(),
            raw_vertical: self.raw_vertical.len(),
            horizontal_lines: self.horizontal.len(),
            vertical_lines: self.vertical.len(),
        }
    }

    /// Derive the pixel scale and the physical ROI area.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DegenerateSpacing`] if either axis has
    /// no usable gap.
    pub fn calibrate(self) -> Result<Calibrated, PipelineError> {
        let area = measure_area(&self.roi.mask, &self.horizontal, &self.vertical, &self.config)?;
        let area_overlay =
            overlay::area_overlay(&self.masked, &self.horizontal, &self.vertical, &self.roi.outline);
        Ok(Calibrated {
            config: self.config,
            dimensions: self.dimensions,
            masked: self.masked,
            roi_figure: self.roi_figure,
            mask: self.roi.mask,
            outline: self.roi.outline,
            raw_horizontal: self.raw_horizontal,
            raw_vertical: self.raw_vertical,
            horizontal: self.horizontal,
            vertical: self.vertical,
            grid_overlay: self.grid_overlay,
            area,
            area_overlay,
        })
    }
}

// ───────────────────────── Stage 3: Calibrated ───────────────────────

/// Physical area known.
#[must_use = "pipeline stages are consumed by advancing; call .tile() to continue"]
pub struct Calibrated {
    config: PipelineConfig,
    dimensions: Dimensions,
    masked: RgbImage,
    roi_figure: RgbImage,
    mask: BinaryMask,
    outline: Vec<Point<i32>>,
    raw_horizontal: Vec<f64>,
    raw_vertical: Vec<f64>,
    horizontal: LineSet,
    vertical: LineSet,
    grid_overlay: RgbImage,
    area: AreaMeasurement,
    area_overlay: RgbImage,
}

impl Calibrated {
    /// The area measurement.
    #[must_use]
    pub const fn area(&self) -> &AreaMeasurement {
        &self.area
    }

    /// Grid lines and ROI outline over the masked image.
    #[must_use]
    pub const fn area_overlay(&self) -> &RgbImage {
        &self.area_overlay
    }

    pub(crate) const fn metrics(&self) -> StageMetrics {
        StageMetrics::Calibration {
            grid_spacing_px: self.area.grid_spacing_px,
            microns_per_pixel: self.area.microns_per_pixel,
            area_sq_microns: self.area.area_sq_microns,
        }
    }

    /// Cut the masked image into tiles along the grid lines.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoTiles`] if no cell passes the size and
    /// content filters.
    pub fn tile(self) -> Result<Tiled, PipelineError> {
        let candidates = candidate_cells(
            self.dimensions.width,
            self.dimensions.height,
            &self.horizontal,
            &self.vertical,
        )
        .len();
        let tiles = create_tiles(&self.masked, &self.horizontal, &self.vertical, &self.config);
        if tiles.is_empty() {
            return Err(PipelineError::NoTiles);
        }
        Ok(Tiled {
            calibrated: self,
            candidates,
            tiles,
        })
    }
}

// ───────────────────────── Stage 4: Tiled ────────────────────────────

/// Tiles cut, not yet classified.
#[must_use = "pipeline stages are consumed by advancing; call .segment() to continue"]
pub struct Tiled {
    calibrated: Calibrated,
    candidates: usize,
    tiles: Vec<Tile>,
}

impl Tiled {
    /// Tiles in row-major order.
    #[must_use]
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub(crate) const fn metrics(&self) -> StageMetrics {
        StageMetrics::Tiling {
            candidate_cells: self.candidates,
            tiles: self.tiles.len(),
        }
    }

    /// Classify every tile against `palette`.
    ///
    /// A tile without non-background pixels gets no segmentation and is
    /// kept; it does not fail the sample.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for an unusable palette.
    pub fn segment(self, palette: &StainPalette) -> Result<Segmented, PipelineError> {
        palette.validate()?;
        let threshold = self.calibrated.config.background_threshold;

        let mut tiles = Vec::with_capacity(self.tiles.len());
        for (index, tile) in (1..).zip(self.tiles) {
            let segmentation = match segment_tile(&tile.image, palette, threshold) {
                Ok(result) => Some(result),
                Err(PipelineError::EmptyTile) => {
                    log::debug!("tile {index} has no stained pixels; skipped");
                    None
                }
                Err(e) => return Err(e),
            };
            tiles.push(TileResult {
                index,
                tile,
                segmentation,
            });
        }

        Ok(Segmented {
            calibrated: self.calibrated,
            palette: palette.clone(),
            tiles,
        })
    }
}

// ───────────────────────── Stage 5: Segmented ────────────────────────

/// Final stage.
#[must_use = "call .into_result() to extract the SampleResult"]
pub struct Segmented {
    calibrated: Calibrated,
    palette: StainPalette,
    tiles: Vec<TileResult>,
}

impl Segmented {
    /// Per-tile results in row-major order.
    #[must_use]
    pub fn tiles(&self) -> &[TileResult] {
        &self.tiles
    }

    pub(crate) fn metrics(&self) -> StageMetrics {
        let segmented: Vec<&SegmentationResult> =
            self.tiles.iter().filter_map(|t| t.segmentation.as_ref()).collect();
        StageMetrics::Segmentation {
            palette: self.palette.name.clone(),
            segmented_tiles: segmented.len(),
            empty_tiles: self.tiles.len() - segmented.len(),
            foreground_pixels: segmented.iter().map(|s| s.foreground).sum(),
        }
    }

    /// Consume the pipeline and return every output.
    pub fn into_result(self) -> SampleResult {
        let c = self.calibrated;
        SampleResult {
            dimensions: c.dimensions,
            masked: c.masked,
            roi_figure: c.roi_figure,
            mask: c.mask,
            outline: c.outline,
            raw_horizontal: c.raw_horizontal,
            raw_vertical: c.raw_vertical,
            horizontal: c.horizontal,
            vertical: c.vertical,
            grid_overlay: c.grid_overlay,
            area: c.area,
            area_overlay: c.area_overlay,
            palette: self.palette,
            tiles: self.tiles,
        }
    }
}

/// One tile and its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct TileResult {
    /// 1-based position in row-major order.
    pub index: usize,
    /// The cropped tile.
    pub tile: Tile,
    /// `None` when the tile has no non-background pixel.
    pub segmentation: Option<SegmentationResult>,
}

impl TileResult {
    /// The tile followed by one isolated panel per class.
    #[must_use]
    pub fn figure(&self) -> Option<RgbImage> {
        self.segmentation
            .as_ref()
            .map(|s| overlay::segmentation_figure(&self.tile.image, s))
    }

    /// Release the crop and the label raster. Index, bounds and
    /// percentages are kept; [`Self::figure`] is meaningless afterwards.
    pub fn drop_rasters(&mut self) {
        self.tile.image = RgbImage::new(0, 0);
        if let Some(segmentation) = &mut self.segmentation {
            segmentation.labels = Vec::new();
        }
    }
}

/// Everything one sample run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleResult {
    /// Layer dimensions.
    pub dimensions: Dimensions,
    /// Original with the outside of the ROI whitened.
    pub masked: RgbImage,
    /// ROI-process audit image: original, ROI layer, masked.
    pub roi_figure: RgbImage,
    /// The filled ROI.
    pub mask: BinaryMask,
    /// ROI border points.
    pub outline: Vec<Point<i32>>,
    /// Unclustered horizontal samples.
    pub raw_horizontal: Vec<f64>,
    /// Unclustered vertical samples.
    pub raw_vertical: Vec<f64>,
    /// Clustered horizontal lines.
    pub horizontal: LineSet,
    /// Clustered vertical lines.
    pub vertical: LineSet,
    /// Grid-detection audit image.
    pub grid_overlay: RgbImage,
    /// Physical ROI area.
    pub area: AreaMeasurement,
    /// Area-measurement audit image.
    pub area_overlay: RgbImage,
    /// Palette the tiles were classified with.
    pub palette: StainPalette,
    /// Tiles in row-major order.
    pub tiles: Vec<TileResult>,
}

impl SampleResult {
    /// Masked image, grid overlay and every tile side by side.
    #[must_use]
    pub fn comparison(&self) -> RgbImage {
        let tiles: Vec<&RgbImage> = self.tiles.iter().map(|t| &t.tile.image).collect();
        overlay::tile_comparison(&self.masked, &self.grid_overlay, &tiles, COMPARISON_PANEL_HEIGHT)
    }

    /// Release the sample-level images: masked image, ROI-process figure
    /// and both overlays. Measurements, lines and tiles are kept.
    pub fn drop_images(&mut self) {
        for image in [
            &mut self.masked,
            &mut self.roi_figure,
            &mut self.grid_overlay,
            &mut self.area_overlay,
        ] {
            *image = RgbImage::new(0, 0);
        }
    }

    /// Percentages of every segmented tile, one row per tile, columns in
    /// palette order.
    #[must_use]
    pub fn percentage_rows(&self) -> Vec<Vec<f64>> {
        self.tiles
            .iter()
            .filter_map(|t| t.segmentation.as_ref())
            .map(|s| s.percentages.iter().map(|p| p.percentage).collect())
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn white(size: u32) -> RgbImage {
        RgbImage::from_pixel(size, size, image::Rgb([255, 255, 255]))
    }

    fn layers(size: u32) -> SampleLayers {
        let roi = RgbImage::from_fn(size, size, |x, y| {
            let on_x = (x == 20 || x == 21 || x == size - 21 || x == size - 22) && (20..size - 20).contains(&y);
            let on_y = (y == 20 || y == 21 || y == size - 21 || y == size - 22) && (20..size - 20).contains(&x);
            if on_x || on_y {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        });
        SampleLayers {
            original: RgbImage::from_pixel(size, size, image::Rgb([81, 44, 109])),
            roi,
            grid: white(size),
        }
    }

    #[test]
    fn roi_size_mismatch_is_reported() {
        let mut l = layers(120);
        l.roi = white(100);
        let err = Pipeline::new(l, PipelineConfig::default()).mask().err().unwrap();
        assert!(matches!(err, PipelineError::SizeMismatch { .. }));
    }

    #[test]
    fn invalid_config_fails_before_work() {
        let config = PipelineConfig {
            roi_block_size: 4,
            ..PipelineConfig::default()
        };
        let err = Pipeline::new(layers(120), config).mask().err().unwrap();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn blank_roi_layer_has_no_contour() {
        let mut l = layers(120);
        l.roi = white(120);
        let err = Pipeline::new(l, PipelineConfig::default())
            .with_context("blank")
            .mask()
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::NoContourFound));
    }

    #[test]
    fn masked_stage_whitens_outside() {
        let masked = Pipeline::new(layers(120), PipelineConfig::default())
            .mask()
            .unwrap();
        assert_eq!(masked.masked().get_pixel(5, 5).0, [255, 255, 255]);
        assert_eq!(masked.masked().get_pixel(60, 60).0, [81, 44, 109]);
        assert!(masked.mask().contains(60, 60));
    }

    #[test]
    fn masked_stage_keeps_roi_figure() {
        let masked = Pipeline::new(layers(120), PipelineConfig::default())
            .mask()
            .unwrap();
        let figure = masked.roi_figure();
        // Three 120 px panels separated by 6 px.
        assert_eq!(figure.dimensions(), (372, 120));
        assert_eq!(figure.get_pixel(5, 5).0, [81, 44, 109]);
        assert_eq!(figure.get_pixel(123, 60).0, [255, 255, 255]);
        assert_eq!(figure.get_pixel(126 + 20, 60).0, [0, 0, 0]);
        assert_eq!(figure.get_pixel(252 + 5, 5).0, [255, 255, 255]);
        assert_eq!(figure.get_pixel(252 + 60, 60).0, [81, 44, 109]);
    }

    #[test]
    fn blank_grid_layer_has_no_lines() {
        let err = Pipeline::new(layers(120), PipelineConfig::default())
            .mask()
            .unwrap()
            .detect_grid()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            PipelineError::NoGridLines {
                axis: Axis::Horizontal
            }
        ));
    }

    #[test]
    fn grid_size_mismatch_is_reported() {
        let mut l = layers(120);
        l.grid = white(90);
        let err = Pipeline::new(l, PipelineConfig::default())
            .mask()
            .unwrap()
            .detect_grid()
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::SizeMismatch { .. }));
    }
}
