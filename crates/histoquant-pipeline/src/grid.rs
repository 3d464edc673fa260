//! Grid overlay line detection.
//!
//! Builds the line-evidence image, sweeps the segment detector over every
//! (vote threshold, max gap) pair, and keeps axis-aligned segments as
//! line-position samples: the midpoint `y` of each horizontal segment and
//! the midpoint `x` of each vertical one. Samples are not clustered here.

use image::{GrayImage, RgbImage};

use crate::edge;
use crate::hough::{self, Segment};
use crate::overlay;
use crate::types::{Axis, PipelineConfig};

/// Orientation class of a detected segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Within the angular tolerance of 0 or 180 degrees.
    Horizontal,
    /// Within the angular tolerance of 90 degrees.
    Vertical,
    /// Neither; discarded as noise.
    Oblique,
}

impl Orientation {
    /// Classify an absolute angle in degrees (`[0, 180]`).
    #[must_use]
    pub fn classify(angle_deg: f64, tolerance_deg: f64) -> Self {
        if angle_deg < tolerance_deg || angle_deg > 180.0 - tolerance_deg {
            Self::Horizontal
        } else if (angle_deg - 90.0).abs() < tolerance_deg {
            Self::Vertical
        } else {
            Self::Oblique
        }
    }

    /// The axis a line of this orientation is positioned along.
    #[must_use]
    pub const fn axis(self) -> Option<Axis> {
        match self {
            Self::Horizontal => Some(Axis::Horizontal),
            Self::Vertical => Some(Axis::Vertical),
            Self::Oblique => None,
        }
    }
}

/// Raw grid-line samples for one grid layer.
#[derive(Debug, Clone, PartialEq)]
pub struct GridDetection {
    /// Midpoint `y` of every horizontal segment, in detection order.
    pub horizontal: Vec<f64>,
    /// Midpoint `x` of every vertical segment, in detection order.
    pub vertical: Vec<f64>,
    /// Every axis-aligned segment that contributed a sample.
    pub segments: Vec<(Axis, Segment)>,
    /// The grid layer with the contributing segments drawn on top.
    pub overlay: RgbImage,
}

impl GridDetection {
    /// A detection without samples; the overlay is the untouched layer.
    #[must_use]
    pub fn empty(layer: &RgbImage) -> Self {
        Self {
            horizontal: Vec::new(),
            vertical: Vec::new(),
            segments: Vec::new(),
            overlay: layer.clone(),
        }
    }

    /// Whether neither axis produced a sample.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.horizontal.is_empty() && self.vertical.is_empty()
    }
}

/// Minimum segment length in pixels for an image of this size.
#[must_use]
pub fn min_line_length(width: u32, height: u32, ratio: f64) -> f64 {
    f64::from(width.min(height)) * ratio
}

/// Detect raw grid-line samples in a grid overlay layer.
///
/// `gray` is the grayscale rendering of `layer`. Detection never fails:
/// a layer without detectable lines yields empty sample lists, which
/// callers treat as a per-sample skip.
#[must_use]
pub fn detect_grid_lines(
    layer: &RgbImage,
    gray: &GrayImage,
    config: &PipelineConfig,
) -> GridDetection {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        log::warn!("grid layer has zero area; no lines detected");
        return GridDetection::empty(layer);
    }

    let evidence = edge::grid_line_evidence(gray, config);
    let min_length = min_line_length(w, h, config.min_line_length_ratio);
    let segments = hough::sweep_segments(
        &evidence,
        &config.hough_vote_thresholds,
        &config.hough_max_gaps,
        min_length,
    );
    drop(evidence);

    let mut detection = GridDetection::empty(layer);
    for segment in segments {
        let (mid_x, mid_y) = segment.midpoint();
        match Orientation::classify(segment.angle_deg(), config.angle_tolerance_deg).axis() {
            Some(Axis::Horizontal) => {
                detection.horizontal.push(mid_y);
                detection.segments.push((Axis::Horizontal, segment));
            }
            Some(Axis::Vertical) => {
                detection.vertical.push(mid_x);
                detection.segments.push((Axis::Vertical, segment));
            }
            None => {}
        }
    }

    overlay::draw_segments(&mut detection.overlay, &detection.segments);
    log::debug!(
        "grid: {} horizontal and {} vertical samples (min length {min_length:.1}px)",
        detection.horizontal.len(),
        detection.vertical.len()
    );
    detection
}
