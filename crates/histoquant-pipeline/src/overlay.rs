//! Raster audit artifacts: grid overlays, area overlays, segmentation
//! panels, palette swatches and multi-panel compositions.
//!
//! Nothing computed here feeds back into measurements.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::cluster::LineSet;
use crate::hough::Segment;
use crate::palette::StainPalette;
use crate::segment::SegmentationResult;
use crate::types::Axis;

/// Horizontal detections.
pub const HORIZONTAL_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
/// Vertical detections.
pub const VERTICAL_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Calibrated grid lines on the area overlay.
pub const GRID_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// ROI outline on the area overlay.
pub const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Canvas fill between panels.
pub const CANVAS_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const fn axis_color(axis: Axis) -> Rgb<u8> {
    match axis {
        Axis::Horizontal => HORIZONTAL_COLOR,
        Axis::Vertical => VERTICAL_COLOR,
    }
}

#[allow(clippy::cast_precision_loss)]
fn draw_thick_line(
    image: &mut RgbImage,
    start: (f32, f32),
    end: (f32, f32),
    color: Rgb<u8>,
    thickness: u32,
) {
    for d in 0..thickness.max(1) {
        let off = d as f32;
        draw_line_segment_mut(image, (start.0 + off, start.1), (end.0 + off, end.1), color);
        draw_line_segment_mut(image, (start.0, start.1 + off), (end.0, end.1 + off), color);
    }
}

/// Draw detected segments, 1 px, coloured by axis.
#[allow(clippy::cast_precision_loss)]
pub fn draw_segments(image: &mut RgbImage, segments: &[(Axis, Segment)]) {
    for (axis, s) in segments {
        draw_line_segment_mut(
            image,
            (s.start.x as f32, s.start.y as f32),
            (s.end.x as f32, s.end.y as f32),
            axis_color(*axis),
        );
    }
}

/// Draw full-span lines at every position of both line sets.
#[allow(clippy::cast_precision_loss)]
pub fn draw_grid_lines(
    image: &mut RgbImage,
    horizontal: &LineSet,
    vertical: &LineSet,
    colors: (Rgb<u8>, Rgb<u8>),
    thickness: u32,
) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    for &y in horizontal.positions() {
        let y = y as f32;
        draw_thick_line(image, (0.0, y), (w, y), colors.0, thickness);
    }
    for &x in vertical.positions() {
        let x = x as f32;
        draw_thick_line(image, (x, 0.0), (x, h), colors.1, thickness);
    }
}

/// Grid-detection artifact: the detector's segment overlay with the
/// clustered lines drawn across the full image, 2 px wide.
#[must_use]
pub fn grid_detection_overlay(
    detector_overlay: &RgbImage,
    horizontal: &LineSet,
    vertical: &LineSet,
) -> RgbImage {
    let mut out = detector_overlay.clone();
    draw_grid_lines(
        &mut out,
        horizontal,
        vertical,
        (HORIZONTAL_COLOR, VERTICAL_COLOR),
        2,
    );
    out
}

/// Area-measurement artifact: calibrated grid lines (1 px) and the ROI
/// outline (2 px) on the masked image.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn area_overlay(
    masked: &RgbImage,
    horizontal: &LineSet,
    vertical: &LineSet,
    outline: &[Point<i32>],
) -> RgbImage {
    let mut out = masked.clone();
    draw_grid_lines(&mut out, horizontal, vertical, (GRID_COLOR, GRID_COLOR), 1);
    if let Some(&first) = outline.first() {
        let closed = outline.iter().chain(std::iter::once(&first));
        for (a, b) in outline.iter().zip(closed.skip(1)) {
            draw_thick_line(
                &mut out,
                (a.x as f32, a.y as f32),
                (b.x as f32, b.y as f32),
                OUTLINE_COLOR,
                2,
            );
        }
    }
    out
}

/// One panel per palette class: pixels of that class keep their colour,
/// every other pixel is white.
#[must_use]
pub fn segmentation_panels(tile: &RgbImage, result: &SegmentationResult) -> Vec<RgbImage> {
    (0..result.percentages.len())
        .map(|class| {
            RgbImage::from_fn(tile.width(), tile.height(), |x, y| {
                let keep = result
                    .label(x, y)
                    .and_then(|l| usize::try_from(l).ok())
                    .is_some_and(|l| l == class);
                if keep {
                    *tile.get_pixel(x, y)
                } else {
                    CANVAS_COLOR
                }
            })
        })
        .collect()
}

/// Lay panels out left to right, top-aligned, separated by `gap`
/// pixels of white.
#[must_use]
pub fn compose_horizontal(panels: &[RgbImage], gap: u32) -> RgbImage {
    let height = panels.iter().map(RgbImage::height).max().unwrap_or(0);
    let count = u32::try_from(panels.len()).unwrap_or(u32::MAX);
    let width = panels
        .iter()
        .map(RgbImage::width)
        .sum::<u32>()
        .saturating_add(gap.saturating_mul(count.saturating_sub(1)));

    let mut canvas = RgbImage::from_pixel(width, height, CANVAS_COLOR);
    let mut x = 0i64;
    for panel in panels {
        image::imageops::replace(&mut canvas, panel, x, 0);
        x += i64::from(panel.width()) + i64::from(gap);
    }
    canvas
}

/// Scale `image` to `height`, keeping its aspect ratio.
#[must_use]
pub fn fit_height(image: &RgbImage, height: u32) -> RgbImage {
    if image.height() == 0 || image.height() == height {
        return image.clone();
    }
    let scaled = u64::from(image.width()) * u64::from(height) / u64::from(image.height());
    let width = u32::try_from(scaled).unwrap_or(u32::MAX).max(1);
    image::imageops::resize(image, width, height, image::imageops::FilterType::Triangle)
}

/// Tile-comparison artifact: masked image, grid-detection overlay and
/// every tile, scaled to `panel_height` and laid out side by side.
#[must_use]
pub fn tile_comparison(
    masked: &RgbImage,
    grid_overlay: &RgbImage,
    tiles: &[&RgbImage],
    panel_height: u32,
) -> RgbImage {
    let panels: Vec<RgbImage> = [masked, grid_overlay]
        .into_iter()
        .chain(tiles.iter().copied())
        .map(|img| fit_height(img, panel_height))
        .collect();
    compose_horizontal(&panels, panel_height / 20)
}

/// ROI-process artifact: original, ROI outline layer and masked result,
/// scaled to `panel_height` and laid out side by side.
#[must_use]
pub fn roi_process(
    original: &RgbImage,
    roi: &RgbImage,
    masked: &RgbImage,
    panel_height: u32,
) -> RgbImage {
    let panels: Vec<RgbImage> = [original, roi, masked]
        .into_iter()
        .map(|img| fit_height(img, panel_height))
        .collect();
    compose_horizontal(&panels, panel_height / 20)
}

/// Per-tile analysis artifact: the tile followed by one panel per class.
#[must_use]
pub fn segmentation_figure(tile: &RgbImage, result: &SegmentationResult) -> RgbImage {
    let mut panels = vec![tile.clone()];
    panels.extend(segmentation_panels(tile, result));
    let gap = (tile.width() / 20).max(1);
    compose_horizontal(&panels, gap)
}

/// Swatch of a palette: one column block per class, split into equal
/// vertical stripes, one per anchor.
#[must_use]
pub fn palette_swatch(palette: &StainPalette, class_width: u32, height: u32) -> RgbImage {
    let classes = u32::try_from(palette.classes.len()).unwrap_or(0);
    let mut img = RgbImage::from_pixel(class_width * classes, height, CANVAS_COLOR);
    for (ci, class) in (0u32..).zip(&palette.classes) {
        let anchors = u32::try_from(class.anchors.len()).unwrap_or(1).max(1);
        let stripe = (class_width / anchors).max(1);
        for (ai, &anchor) in (0u32..).zip(&class.anchors) {
            let x0 = ci * class_width + ai * stripe;
            let w = if ai + 1 == anchors {
                class_width - ai * stripe
            } else {
                stripe
            };
            if let Ok(x0) = i32::try_from(x0)
                && w > 0
                && height > 0
            {
                draw_filled_rect_mut(&mut img, Rect::at(x0, 0).of_size(w, height), Rgb(anchor));
            }
        }
    }
    img
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::segment::segment_tile;

    #[test]
    fn grid_lines_span_image() {
        let mut img = RgbImage::from_pixel(50, 40, CANVAS_COLOR);
        let h = LineSet::new(vec![10]);
        let v = LineSet::new(vec![30]);
        draw_grid_lines(&mut img, &h, &v, (GRID_COLOR, GRID_COLOR), 1);
        assert_eq!(*img.get_pixel(0, 10), GRID_COLOR);
        assert_eq!(*img.get_pixel(49, 10), GRID_COLOR);
        assert_eq!(*img.get_pixel(30, 0), GRID_COLOR);
        assert_eq!(*img.get_pixel(30, 39), GRID_COLOR);
        assert_eq!(*img.get_pixel(5, 5), CANVAS_COLOR);
    }

    #[test]
    fn area_overlay_draws_outline() {
        let masked = RgbImage::from_pixel(40, 40, CANVAS_COLOR);
        let outline = vec![
            Point::new(5, 5),
            Point::new(30, 5),
            Point::new(30, 30),
            Point::new(5, 30),
        ];
        let out = area_overlay(&masked, &LineSet::default(), &LineSet::default(), &outline);
        assert_eq!(*out.get_pixel(15, 5), OUTLINE_COLOR);
        assert_eq!(*out.get_pixel(15, 6), OUTLINE_COLOR);
        assert_eq!(*out.get_pixel(5, 15), OUTLINE_COLOR);
        assert_eq!(*out.get_pixel(15, 15), CANVAS_COLOR);
    }

    #[test]
    fn panels_isolate_each_class() {
        let tile = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([81, 44, 109])
            } else {
                Rgb([136, 41, 73])
            }
        });
        let palette = StainPalette::he();
        let result = segment_tile(&tile, &palette, 240).unwrap();
        let panels = segmentation_panels(&tile, &result);
        assert_eq!(panels.len(), 3);
        assert_eq!(panels[0].get_pixel(0, 0).0, [81, 44, 109]);
        assert_eq!(*panels[0].get_pixel(1, 0), CANVAS_COLOR);
        assert_eq!(*panels[1].get_pixel(0, 0), CANVAS_COLOR);
        assert_eq!(panels[1].get_pixel(1, 0).0, [136, 41, 73]);
        assert!(panels[2].pixels().all(|p| *p == CANVAS_COLOR));
    }

    #[test]
    fn composition_places_panels_with_gaps() {
        let a = RgbImage::from_pixel(3, 2, Rgb([1, 1, 1]));
        let b = RgbImage::from_pixel(2, 4, Rgb([2, 2, 2]));
        let out = compose_horizontal(&[a, b], 1);
        assert_eq!(out.dimensions(), (6, 4));
        assert_eq!(out.get_pixel(0, 0).0, [1, 1, 1]);
        assert_eq!(*out.get_pixel(3, 0), CANVAS_COLOR);
        assert_eq!(*out.get_pixel(0, 3), CANVAS_COLOR);
        assert_eq!(out.get_pixel(4, 3).0, [2, 2, 2]);
    }

    #[test]
    fn fit_height_keeps_aspect() {
        let img = RgbImage::new(200, 100);
        assert_eq!(fit_height(&img, 50).dimensions(), (100, 50));
    }

    #[test]
    fn roi_process_orders_original_roi_masked() {
        let original = RgbImage::from_pixel(80, 40, Rgb([1, 1, 1]));
        let roi = RgbImage::from_pixel(80, 40, Rgb([2, 2, 2]));
        let masked = RgbImage::from_pixel(80, 40, Rgb([3, 3, 3]));
        let out = roi_process(&original, &roi, &masked, 20);
        // Three 40x20 panels with 1 px gaps.
        assert_eq!(out.dimensions(), (122, 20));
        assert_eq!(out.get_pixel(0, 0).0, [1, 1, 1]);
        assert_eq!(*out.get_pixel(40, 10), CANVAS_COLOR);
        assert_eq!(out.get_pixel(41, 10).0, [2, 2, 2]);
        assert_eq!(out.get_pixel(121, 19).0, [3, 3, 3]);
    }

    #[test]
    fn swatch_shows_every_anchor() {
        let palette = StainPalette::ihc();
        let swatch = palette_swatch(&palette, 90, 10);
        assert_eq!(swatch.dimensions(), (270, 10));
        assert_eq!(swatch.get_pixel(0, 0).0, [20, 15, 17]);
        assert_eq!(swatch.get_pixel(89, 9).0, [214, 205, 212]);
        assert_eq!(swatch.get_pixel(90, 0).0, [72, 36, 16]);
    }
}
