//! Pixel-to-micron calibration and physical ROI area.
//!
//! The grid overlay is printed at a known physical spacing. Consecutive
//! gaps between detected lines are compared against their axis median;
//! gaps that deviate too far (a missed or spurious line) are dropped. The
//! surviving gaps of both axes give one pixel scale.

use serde::{Deserialize, Serialize};

use crate::cluster::LineSet;
use crate::mask::BinaryMask;
use crate::types::{Axis, PipelineConfig, PipelineError};

/// Physical area of an ROI and the scale it was computed with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaMeasurement {
    /// ROI area in square microns.
    pub area_sq_microns: f64,
    /// Length of one pixel side in microns.
    pub microns_per_pixel: f64,
    /// Number of ROI pixels.
    pub pixel_count: u64,
    /// Mean accepted grid spacing in pixels, averaged over both axes.
    pub grid_spacing_px: f64,
}

/// Median of a non-empty slice; the mean of the two middle values for
/// even lengths. Returns `None` for an empty slice.
#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(f64::midpoint(sorted[mid - 1], sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}

/// Gaps whose distance from the median is strictly less than
/// `ratio * median`.
#[must_use]
pub fn accepted_gaps(gaps: &[f64], ratio: f64) -> Vec<f64> {
    let Some(median) = median(gaps) else {
        return Vec::new();
    };
    gaps.iter()
        .copied()
        .filter(|g| (g - median).abs() < median * ratio)
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean accepted gap along one axis.
///
/// # Errors
///
/// Returns [`PipelineError::DegenerateSpacing`] when no gap survives
/// (fewer than two lines, or every gap rejected).
pub fn axis_spacing(lines: &LineSet, axis: Axis, ratio: f64) -> Result<f64, PipelineError> {
    let accepted = accepted_gaps(&lines.gaps(), ratio);
    if accepted.is_empty() {
        log::warn!(
            "{axis} grid spacing degenerate: {} lines, no usable gaps",
            lines.len()
        );
        return Err(PipelineError::DegenerateSpacing { axis });
    }
    Ok(mean(&accepted))
}

/// Compute the physical area of `mask` from the grid line sets.
///
/// `microns_per_pixel = config.grid_spacing_microns / spacing`, where
/// `spacing` is the mean of the two per-axis mean accepted gaps, and
/// `area = pixel_count * microns_per_pixel^2`.
///
/// # Errors
///
/// Returns [`PipelineError::DegenerateSpacing`] if either axis has no
/// accepted gap.
pub fn measure_area(
    mask: &BinaryMask,
    horizontal: &LineSet,
    vertical: &LineSet,
    config: &PipelineConfig,
) -> Result<AreaMeasurement, PipelineError> {
    let h = axis_spacing(horizontal, Axis::Horizontal, config.spacing_outlier_ratio)?;
    let v = axis_spacing(vertical, Axis::Vertical, config.spacing_outlier_ratio)?;
    let grid_spacing_px = f64::midpoint(h, v);
    if grid_spacing_px <= 0.0 {
        return Err(PipelineError::DegenerateSpacing {
            axis: if h <= 0.0 { Axis::Horizontal } else { Axis::Vertical },
        });
    }

    let microns_per_pixel = config.grid_spacing_microns / grid_spacing_px;
    let pixel_count = mask.count();
    #[allow(clippy::cast_precision_loss)]
    let area_sq_microns = pixel_count as f64 * microns_per_pixel * microns_per_pixel;

    log::debug!(
        "calibration: spacing {grid_spacing_px:.2}px, {microns_per_pixel:.4} um/px, \
         {pixel_count} px -> {area_sq_microns:.0} um^2"
    );

    Ok(AreaMeasurement {
        area_sq_microns,
        microns_per_pixel,
        pixel_count,
        grid_spacing_px,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Dimensions;

    fn mask_with(count: u32) -> BinaryMask {
        let width = 200;
        BinaryMask::from_fn(
            Dimensions {
                width,
                height: 100,
            },
            |x, y| y * width + x < count,
        )
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn outliers_are_rejected_strictly() {
        // Median 100; 150 deviates by exactly 50 and is rejected.
        let gaps = [100.0, 100.0, 150.0, 40.0, 149.0];
        assert_eq!(accepted_gaps(&gaps, 0.5), vec![100.0, 100.0, 149.0]);
    }

    #[test]
    fn uniform_grid_gives_exact_area() {
        let lines = LineSet::new(vec![100, 200, 300, 400]);
        let m = measure_area(&mask_with(10_000), &lines, &lines, &PipelineConfig::default())
            .unwrap();
        assert_eq!(m.pixel_count, 10_000);
        assert!((m.microns_per_pixel - 5.0).abs() < 1e-12);
        assert!((m.area_sq_microns - 250_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn axes_are_averaged() {
        let h = LineSet::new(vec![0, 100, 200]);
        let v = LineSet::new(vec![0, 50, 100]);
        let m = measure_area(&mask_with(1), &h, &v, &PipelineConfig::default()).unwrap();
        assert!((m.grid_spacing_px - 75.0).abs() < 1e-12);
    }

    #[test]
    fn missed_line_gap_is_ignored() {
        // 300..500 spans a missed line at 400.
        let lines = LineSet::new(vec![100, 200, 300, 500, 600]);
        let m = measure_area(&mask_with(100), &lines, &lines, &PipelineConfig::default())
            .unwrap();
        assert!((m.grid_spacing_px - 100.0).abs() < 1e-12);
    }

    #[test]
    fn single_line_axis_is_degenerate() {
        let h = LineSet::new(vec![100]);
        let v = LineSet::new(vec![0, 100, 200]);
        let result = measure_area(&mask_with(10), &h, &v, &PipelineConfig::default());
        assert!(matches!(
            result,
            Err(PipelineError::DegenerateSpacing {
                axis: Axis::Horizontal
            })
        ));
    }

    #[test]
    fn empty_vertical_axis_is_degenerate() {
        let h = LineSet::new(vec![0, 100, 200]);
        let result = measure_area(&mask_with(10), &h, &LineSet::default(), &PipelineConfig::default());
        assert!(matches!(
            result,
            Err(PipelineError::DegenerateSpacing {
                axis: Axis::Vertical
            })
        ));
    }
}
