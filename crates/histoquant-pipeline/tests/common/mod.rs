//! Synthetic sample layers shared by the integration tests.

#![allow(dead_code)]

use histoquant_pipeline::SampleLayers;
use image::{Rgb, RgbImage};

/// Side of the synthetic layers.
pub const SIZE: u32 = 400;

/// Grid lines are two pixels wide starting at these offsets.
pub const GRID_LINES: [u32; 4] = [50, 150, 250, 350];

/// ROI outline box, inclusive bounds.
pub const ROI_MIN: u32 = 100;
pub const ROI_MAX: u32 = 301;

pub const NUCLEI: Rgb<u8> = Rgb([81, 44, 109]);
pub const CYTOPLASM: Rgb<u8> = Rgb([136, 41, 73]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Micrograph: nuclei colour left of `x = 200`, cytoplasm colour right.
pub fn original() -> RgbImage {
    RgbImage::from_fn(SIZE, SIZE, |x, _| if x < 200 { NUCLEI } else { CYTOPLASM })
}

/// Black two-pixel rectangle outline on white.
pub fn roi() -> RgbImage {
    RgbImage::from_fn(SIZE, SIZE, |x, y| {
        let in_box = (ROI_MIN..=ROI_MAX).contains(&x) && (ROI_MIN..=ROI_MAX).contains(&y);
        let near_edge = x < ROI_MIN + 2 || x + 2 > ROI_MAX || y < ROI_MIN + 2 || y + 2 > ROI_MAX;
        if in_box && near_edge {
            Rgb([0, 0, 0])
        } else {
            WHITE
        }
    })
}

/// Dark grid lines every 100 px on white.
pub fn grid() -> RgbImage {
    RgbImage::from_fn(SIZE, SIZE, |x, y| {
        if (x + 50) % 100 < 2 || (y + 50) % 100 < 2 {
            Rgb([30, 30, 30])
        } else {
            WHITE
        }
    })
}

pub fn layers() -> SampleLayers {
    SampleLayers {
        original: original(),
        roi: roi(),
        grid: grid(),
    }
}
