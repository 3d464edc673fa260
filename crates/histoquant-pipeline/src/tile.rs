//! Partition a masked image into grid cells.
//!
//! Each axis' line set is augmented with the image borders, consecutive
//! positions bound a row or column, and every (row, column) pair is a
//! candidate cell. Cells that are too small or mostly background are
//! dropped; the rest are cropped out in row-major order.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::cluster::LineSet;
use crate::types::PipelineConfig;

/// Channel value of the untouched slide background outside the ROI.
const BACKGROUND: u8 = 255;

/// Cell bounds in parent-image pixels; `y2` and `x2` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Top row.
    pub y1: u32,
    /// One past the bottom row.
    pub y2: u32,
    /// Left column.
    pub x1: u32,
    /// One past the right column.
    pub x2: u32,
}

impl BoundingBox {
    /// Cell width.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    /// Cell height.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }
}

/// A rectangular crop of the masked image.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// Where the crop came from.
    pub bbox: BoundingBox,
    /// The cropped pixels.
    pub image: RgbImage,
}

/// Row or column boundaries: `0`, every line strictly inside
/// `(0, limit)`, then `limit`.
#[must_use]
pub fn boundaries(lines: &LineSet, limit: u32) -> Vec<u32> {
    let mut bounds = Vec::with_capacity(lines.len() + 2);
    bounds.push(0);
    bounds.extend(lines.positions().iter().copied().filter(|&p| p > 0 && p < limit));
    bounds.push(limit);
    bounds
}

/// Every candidate cell in row-major order, before filtering.
#[must_use]
pub fn candidate_cells(width: u32, height: u32, horizontal: &LineSet, vertical: &LineSet) -> Vec<BoundingBox> {
    let rows = boundaries(horizontal, height);
    let cols = boundaries(vertical, width);
    let mut cells = Vec::new();
    for r in rows.windows(2) {
        for c in cols.windows(2) {
            cells.push(BoundingBox {
                y1: r[0],
                y2: r[1],
                x1: c[0],
                x2: c[1],
            });
        }
    }
    cells
}

/// Fraction of pixels inside `bbox` with any channel other than 255.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn content_ratio(image: &RgbImage, bbox: &BoundingBox) -> f64 {
    let total = u64::from(bbox.width()) * u64::from(bbox.height());
    if total == 0 {
        return 0.0;
    }
    let mut content = 0u64;
    for y in bbox.y1..bbox.y2 {
        for x in bbox.x1..bbox.x2 {
            if image.get_pixel(x, y).0.iter().any(|&c| c != BACKGROUND) {
                content += 1;
            }
        }
    }
    content as f64 / total as f64
}

/// Cut `masked` into tiles along the grid lines.
///
/// A cell is kept when both sides are at least `config.min_tile_size`
/// pixels and its content ratio is strictly greater than
/// `config.min_tile_content_ratio`. Tiles are returned row-major.
#[must_use]
pub fn create_tiles(
    masked: &RgbImage,
    horizontal: &LineSet,
    vertical: &LineSet,
    config: &PipelineConfig,
) -> Vec<Tile> {
    let (w, h) = masked.dimensions();
    let cells = candidate_cells(w, h, horizontal, vertical);
    let candidates = cells.len();

    let tiles: Vec<Tile> = cells
        .into_iter()
        .filter(|b| b.width() >= config.min_tile_size && b.height() >= config.min_tile_size)
        .filter(|b| content_ratio(masked, b) > config.min_tile_content_ratio)
        .map(|bbox| Tile {
            image: image::imageops::crop_imm(masked, bbox.x1, bbox.y1, bbox.width(), bbox.height())
                .to_image(),
            bbox,
        })
        .collect();

    log::debug!("tiling: {} of {candidates} cells kept", tiles.len());
    tiles
}
