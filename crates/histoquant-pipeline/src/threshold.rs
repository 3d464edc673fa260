//! Binarisation primitives: Gaussian adaptive thresholding, fixed
//! inverted thresholding, and logical-OR merging of binary maps.
//!
//! All functions produce "inverted" binary images: dark strokes on a
//! light background become foreground (255) and everything else 0.
//! This is the polarity both the ROI outline and the grid overlay need.

use image::GrayImage;

/// Gaussian sigma matching a square window of `block_size` pixels.
///
/// Uses the conventional mapping `0.3 * ((k - 1) / 2 - 1) + 0.8`, so a
/// window of 11 gives sigma 2.0 and a window of 21 gives sigma 3.5.
/// Block sizes below 3 are treated as 3.
#[must_use]
pub fn block_sigma(block_size: u32) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let k = block_size.max(3) as f32;
    0.3f32.mul_add((k - 1.0).mul_add(0.5, -1.0), 0.8)
}

/// Gaussian-weighted local mean of every pixel over a `block_size` window.
///
/// Wraps [`imageproc::filter::gaussian_blur_f32`]. Borders replicate the
/// edge pixel, so a uniform image keeps its value everywhere.
#[must_use = "returns the local mean image"]
pub fn local_mean(image: &GrayImage, block_size: u32) -> GrayImage {
    imageproc::filter::gaussian_blur_f32(image, block_sigma(block_size))
}

/// Adaptive Gaussian threshold, inverted.
///
/// A pixel becomes foreground (255) when its value is at or below its
/// local Gaussian mean minus `offset`; otherwise it is 0. A drawn
/// outline therefore becomes foreground regardless of local
/// illumination, while flat regions (light or dark) stay background.
#[must_use = "returns the binary image"]
pub fn adaptive_threshold_inv(image: &GrayImage, block_size: u32, offset: f32) -> GrayImage {
    let mean = local_mean(image, block_size);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let value = f32::from(image.get_pixel(x, y).0[0]);
        let cutoff = f32::from(mean.get_pixel(x, y).0[0]) - offset;
        if value <= cutoff {
            image::Luma([255])
        } else {
            image::Luma([0])
        }
    })
}

/// Fixed global threshold, inverted: pixels at or below `level` become
/// foreground (255), brighter pixels become 0.
#[must_use = "returns the binary image"]
pub fn threshold_inv(image: &GrayImage, level: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y).0[0] <= level {
            image::Luma([255])
        } else {
            image::Luma([0])
        }
    })
}

/// Merge `other` into `acc` with a pixel-wise logical OR.
///
/// Both images must have the same dimensions; extra pixels in either
/// are ignored.
pub fn union_mut(acc: &mut GrayImage, other: &GrayImage) {
    for (a, b) in acc.pixels_mut().zip(other.pixels()) {
        a.0[0] |= b.0[0];
    }
}

/// Count foreground (non-zero) pixels.
#[must_use]
pub fn count_foreground(image: &GrayImage) -> u64 {
    image.pixels().map(|p| u64::from(p.0[0] != 0)).sum()
}
