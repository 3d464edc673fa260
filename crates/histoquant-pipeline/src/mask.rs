//! ROI mask construction and application.
//!
//! The ROI layer is a rendering of a hand-drawn outline on a light
//! background. [`build_mask`] binarises it adaptively, keeps only the
//! outermost borders, and fills the largest one solid. Holes inside the
//! outline are part of the region; they are never punched out.
//!
//! [`apply_mask`] then whitens everything outside the region in the
//! original photograph, producing the masked image every later stage
//! works on.

use std::collections::BTreeMap;

use geo::{Area, Contains, LineString, Polygon};
use image::{GrayImage, RgbImage};
use imageproc::contours::{BorderType, Contour};
use imageproc::point::Point;

use crate::threshold;
use crate::types::{Dimensions, PipelineConfig, PipelineError, ensure_same_size};

/// Pixel value written outside the ROI by [`apply_mask`].
pub const OUTSIDE_VALUE: [u8; 3] = [255, 255, 255];

/// A same-size boolean raster; `true` marks "inside ROI".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    dimensions: Dimensions,
    pixels: Vec<bool>,
}

impl BinaryMask {
    /// An all-`false` mask.
    #[must_use]
    pub fn empty(dimensions: Dimensions) -> Self {
        let len = usize::try_from(dimensions.pixel_count()).unwrap_or(usize::MAX);
        Self {
            dimensions,
            pixels: vec![false; len],
        }
    }

    /// Build a mask from a grayscale image: non-zero pixels are inside.
    #[must_use]
    pub fn from_gray(image: &GrayImage) -> Self {
        Self {
            dimensions: Dimensions::of(image),
            pixels: image.pixels().map(|p| p.0[0] != 0).collect(),
        }
    }

    /// Build a mask from a predicate over pixel coordinates.
    #[must_use]
    pub fn from_fn(dimensions: Dimensions, mut inside: impl FnMut(u32, u32) -> bool) -> Self {
        let mut pixels = Vec::with_capacity(usize::try_from(dimensions.pixel_count()).unwrap_or(0));
        for y in 0..dimensions.height {
            for x in 0..dimensions.width {
                pixels.push(inside(x, y));
            }
        }
        Self { dimensions, pixels }
    }

    /// Render as a grayscale image: 255 inside, 0 outside.
    #[must_use]
    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.dimensions.width, self.dimensions.height, |x, y| {
            image::Luma([if self.contains(x, y) { 255 } else { 0 }])
        })
    }

    /// Mask dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Whether the pixel at `(x, y)` is inside the ROI. Out-of-bounds
    /// coordinates are outside.
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        if x >= self.dimensions.width || y >= self.dimensions.height {
            return false;
        }
        let idx = y as usize * self.dimensions.width as usize + x as usize;
        self.pixels.get(idx).copied().unwrap_or(false)
    }

    /// Number of inside pixels.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.pixels.iter().map(|&p| u64::from(p)).sum()
    }

    /// Whether no pixel is inside.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.pixels.iter().any(|&p| p)
    }
}

/// A filled ROI plus the outer border it was filled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiMask {
    /// The filled region.
    pub mask: BinaryMask,
    /// Border points of the largest external contour, in tracing order.
    pub outline: Vec<Point<i32>>,
}

/// Build the ROI mask from a grayscale rendering of the outline layer.
///
/// Steps:
/// 1. Adaptive inverted threshold (`config.roi_block_size`,
///    `config.roi_offset`) so the drawn stroke becomes foreground.
/// 2. Border following; only outer borders without a parent are kept.
/// 3. The contour enclosing the largest polygon area is filled solid.
///
/// `context` names the sample in log messages.
///
/// # Errors
///
/// Returns [`PipelineError::NoContourFound`] when the binarised layer
/// contains no external contour. The condition is also logged as a
/// warning; callers skip the sample.
pub fn build_mask(
    roi: &GrayImage,
    config: &PipelineConfig,
    context: Option<&str>,
) -> Result<RoiMask, PipelineError> {
    let binary = threshold::adaptive_threshold_inv(roi, config.roi_block_size, config.roi_offset);
    let contours: Vec<Contour<i32>> = imageproc::contours::find_contours(&binary);

    let external: Vec<&Contour<i32>> = contours
        .iter()
        .filter(|c| c.parent.is_none() && c.border_type == BorderType::Outer)
        .filter(|c| !c.points.is_empty())
        .collect();

    let Some(largest) = largest_contour(&external) else {
        log::warn!(
            "no contour found in ROI layer{}",
            context.map(|c| format!(" for {c}")).unwrap_or_default()
        );
        return Err(PipelineError::NoContourFound);
    };

    log::debug!(
        "ROI: {} external contours, largest has {} border points",
        external.len(),
        largest.points.len()
    );

    let mask = fill_contour(Dimensions::of(roi), &largest.points);
    Ok(RoiMask {
        mask,
        outline: largest.points.clone(),
    })
}

/// Whiten every pixel of `original` outside `mask`.
///
/// # Errors
///
/// Returns [`PipelineError::SizeMismatch`] if the mask and image
/// dimensions differ.
pub fn apply_mask(original: &RgbImage, mask: &BinaryMask) -> Result<RgbImage, PipelineError> {
    ensure_same_size(mask.dimensions(), Dimensions::of(original))?;
    Ok(RgbImage::from_fn(original.width(), original.height(), |x, y| {
        if mask.contains(x, y) {
            *original.get_pixel(x, y)
        } else {
            image::Rgb(OUTSIDE_VALUE)
        }
    }))
}

/// Recover the ROI from an already-masked image: any pixel that is not
/// pure white counts as inside.
#[must_use]
pub fn mask_from_masked_image(masked: &RgbImage) -> BinaryMask {
    BinaryMask::from_fn(Dimensions::of(masked), |x, y| {
        masked.get_pixel(x, y).0 != OUTSIDE_VALUE
    })
}

fn contour_polygon(points: &[Point<i32>]) -> Polygon<f64> {
    let ring: LineString<f64> = points
        .iter()
        .map(|p| (f64::from(p.x), f64::from(p.y)))
        .collect();
    Polygon::new(ring, vec![])
}

/// Polygon area enclosed by a traced border.
fn contour_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    contour_polygon(points).unsigned_area()
}

/// The contour with the largest enclosed area. Ties go to the contour
/// with more border points, then to the first one traced.
fn largest_contour<'a>(contours: &[&'a Contour<i32>]) -> Option<&'a Contour<i32>> {
    let mut best: Option<(&Contour<i32>, f64)> = None;
    for &contour in contours {
        let area = contour_area(&contour.points);
        let better = match best {
            None => true,
            Some((b, best_area)) => {
                area > best_area
                    || (area.total_cmp(&best_area).is_eq() && contour.points.len() > b.points.len())
            }
        };
        if better {
            best = Some((contour, area));
        }
    }
    best.map(|(c, _)| c)
}

/// Fill a closed border (boundary pixels included) into a mask.
///
/// The border is rasterised onto a blank canvas, consecutive points
/// joined so the ring has no gaps. Each 4-connected region between
/// border pixels is then either entirely inside or entirely outside
/// the traced polygon.
fn fill_contour(dimensions: Dimensions, points: &[Point<i32>]) -> BinaryMask {
    let mut ring = GrayImage::new(dimensions.width, dimensions.height);
    let white = image::Luma([255u8]);

    for (i, p) in points.iter().enumerate() {
        let next = points[(i + 1) % points.len()];
        #[allow(clippy::cast_precision_loss)]
        imageproc::drawing::draw_line_segment_mut(
            &mut ring,
            (p.x as f32, p.y as f32),
            (next.x as f32, next.y as f32),
            white,
        );
    }

    // Regions are labelled on the complement: border pixels become the
    // background that separates inside from outside.
    let open = GrayImage::from_fn(dimensions.width, dimensions.height, |x, y| {
        image::Luma([!ring.get_pixel(x, y).0[0]])
    });
    let labels = imageproc::region_labelling::connected_components(
        &open,
        imageproc::region_labelling::Connectivity::Four,
        image::Luma([0u8]),
    );

    // One representative pixel per region decides the whole region.
    let polygon = contour_polygon(points);
    let mut enclosed: BTreeMap<u32, bool> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0];
        if label != 0 {
            enclosed.entry(label).or_insert_with(|| {
                polygon.contains(&geo::Point::new(f64::from(x), f64::from(y)))
            });
        }
    }

    BinaryMask::from_fn(dimensions, |x, y| {
        let label = labels.get_pixel(x, y).0[0];
        if label == 0 {
            ring.get_pixel(x, y).0[0] != 0
        } else {
            enclosed.get(&label).copied().unwrap_or(false)
        }
    })
}
