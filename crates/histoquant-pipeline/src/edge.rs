//! Grid-line evidence: Canny edges OR-merged with adaptive and fixed
//! inverted thresholds.
//!
//! Printed grid overlays vary in contrast, line weight, and anti-aliasing
//! between slides. No single binarisation captures every line, so the
//! evidence image is the union of several: each pass contributes the
//! pixels it is confident about and the segment detector sees all of them.

use image::GrayImage;

use crate::threshold;
use crate::types::PipelineConfig;

/// Minimum allowed Canny threshold.
///
/// A low threshold of zero marks every pixel with any gradient as a
/// potential edge, flooding the evidence image with texture.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

/// Clamp Canny thresholds to `MIN_THRESHOLD <= low <= high`.
#[must_use]
pub fn clamp_thresholds(low: f32, high: f32) -> (f32, f32) {
    let high = high.max(MIN_THRESHOLD);
    let low = low.max(MIN_THRESHOLD).min(high);
    (low, high)
}

/// Detect edges using the Canny algorithm.
///
/// Returns a binary image: 255 for edge pixels, 0 for non-edge. Both
/// thresholds are clamped with [`clamp_thresholds`]. Images narrower or
/// shorter than 3 pixels have no interior and produce an empty map.
#[must_use = "returns the binary edge map"]
pub fn canny(image: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    if image.width() < 3 || image.height() < 3 {
        return GrayImage::new(image.width(), image.height());
    }
    let (low, high) = clamp_thresholds(low_threshold, high_threshold);
    imageproc::edges::canny(image, low, high)
}

/// Build the binary grid-line evidence image for a grayscale grid layer.
///
/// The result is the pixel-wise OR of:
/// - one adaptive inverted threshold per entry of
///   `config.grid_adaptive_passes`,
/// - Canny edges with `config.grid_canny_low` / `config.grid_canny_high`,
/// - one fixed inverted threshold per entry of
///   `config.grid_fixed_thresholds`.
#[must_use = "returns the line evidence image"]
pub fn grid_line_evidence(gray: &GrayImage, config: &PipelineConfig) -> GrayImage {
    let mut evidence = canny(gray, config.grid_canny_low, config.grid_canny_high);

    for pass in &config.grid_adaptive_passes {
        let binary = threshold::adaptive_threshold_inv(gray, pass.block_size, pass.offset);
        threshold::union_mut(&mut evidence, &binary);
    }
    for &level in &config.grid_fixed_thresholds {
        let binary = threshold::threshold_inv(gray, level);
        threshold::union_mut(&mut evidence, &binary);
    }

    log::debug!(
        "grid evidence: {} of {} pixels set",
        threshold::count_foreground(&evidence),
        u64::from(gray.width()) * u64::from(gray.height()),
    );
    evidence
}
