//! Nearest-anchor colour classification of tile pixels.
//!
//! Every non-background pixel is assigned to the class owning the anchor
//! closest to it in plain RGB Euclidean distance. Pixels whose channels
//! all exceed the background threshold are unstained slide and get label
//! [`BACKGROUND_LABEL`]; they count towards no class and are excluded
//! from the percentage denominator.

use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::palette::StainPalette;
use crate::types::{Dimensions, PipelineError};

/// Label of background pixels.
pub const BACKGROUND_LABEL: i16 = -1;

/// Pixel counts below this are classified sequentially.
const PARALLEL_THRESHOLD: usize = 16 * 1024;

/// Share of one class among the non-background pixels of a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassPercentage {
    /// Class name from the palette.
    pub name: String,
    /// Pixels assigned to the class.
    pub pixels: u64,
    /// `pixels / foreground * 100`.
    pub percentage: f64,
}

/// Per-pixel labels and per-class shares for one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationResult {
    /// Label raster dimensions.
    pub dimensions: Dimensions,
    /// Row-major class index per pixel, or [`BACKGROUND_LABEL`].
    pub labels: Vec<i16>,
    /// Number of non-background pixels.
    pub foreground: u64,
    /// One entry per palette class, in palette order.
    pub percentages: Vec<ClassPercentage>,
}

impl SegmentationResult {
    /// Label of the pixel at `(x, y)`.
    #[must_use]
    pub fn label(&self, x: u32, y: u32) -> Option<i16> {
        if x >= self.dimensions.width || y >= self.dimensions.height {
            return None;
        }
        self.labels
            .get(y as usize * self.dimensions.width as usize + x as usize)
            .copied()
    }

    /// Percentage for a class name.
    #[must_use]
    pub fn percentage_of(&self, name: &str) -> Option<f64> {
        self.percentages
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.percentage)
    }
}

/// Whether a pixel is unstained slide background.
#[must_use]
pub fn is_background(rgb: [u8; 3], threshold: u8) -> bool {
    rgb.iter().all(|&c| c > threshold)
}

fn squared_distance(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&p, &q)| {
            let d = i32::from(p) - i32::from(q);
            d.unsigned_abs().pow(2)
        })
        .sum()
}

/// Class index of the nearest anchor. Ties go to the earlier class.
///
/// Squared distances order the same as Euclidean distances, so no
/// square root is taken.
#[must_use]
pub fn nearest_class(rgb: [u8; 3], palette: &StainPalette) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (idx, class) in palette.classes.iter().enumerate() {
        let Some(d) = class.anchors.iter().map(|&a| squared_distance(rgb, a)).min() else {
            continue;
        };
        if best.is_none_or(|(_, bd)| d < bd) {
            best = Some((idx, d));
        }
    }
    best.map(|(idx, _)| idx)
}

fn label_pixel(px: &[u8], palette: &StainPalette, background_threshold: u8) -> i16 {
    let rgb = [px[0], px[1], px[2]];
    if is_background(rgb, background_threshold) {
        return BACKGROUND_LABEL;
    }
    nearest_class(rgb, palette)
        .and_then(|i| i16::try_from(i).ok())
        .unwrap_or(BACKGROUND_LABEL)
}

/// Classify every pixel of `tile` against `palette`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an unusable palette and
/// [`PipelineError::EmptyTile`] when every pixel is background.
pub fn segment_tile(
    tile: &RgbImage,
    palette: &StainPalette,
    background_threshold: u8,
) -> Result<SegmentationResult, PipelineError> {
    palette.validate()?;

    let raw = tile.as_raw();
    let labels: Vec<i16> = if raw.len() / 3 >= PARALLEL_THRESHOLD {
        raw.par_chunks_exact(3)
            .map(|px| label_pixel(px, palette, background_threshold))
            .collect()
    } else {
        raw.chunks_exact(3)
            .map(|px| label_pixel(px, palette, background_threshold))
            .collect()
    };

    let mut counts = vec![0u64; palette.classes.len()];
    for &label in &labels {
        if let Ok(idx) = usize::try_from(label)
            && let Some(count) = counts.get_mut(idx)
        {
            *count += 1;
        }
    }
    let foreground: u64 = counts.iter().sum();
    if foreground == 0 {
        return Err(PipelineError::EmptyTile);
    }

    #[allow(clippy::cast_precision_loss)]
    let percentages = palette
        .classes
        .iter()
        .zip(&counts)
        .map(|(class, &pixels)| ClassPercentage {
            name: class.name.clone(),
            pixels,
            percentage: pixels as f64 / foreground as f64 * 100.0,
        })
        .collect();

    Ok(SegmentationResult {
        dimensions: Dimensions::of(tile),
        labels,
        foreground,
        percentages,
    })
}
