//! PNG encoding with a physical resolution (`pHYs`) chunk.

use std::io::Cursor;

use ::png::{BitDepth, ColorType, Decoder, Encoder, PixelDimensions, Unit};
use image::RgbImage;

use crate::ExportError;

const METERS_PER_INCH: f64 = 0.0254;

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn dots_per_meter(dpi: u32) -> u32 {
    (f64::from(dpi) / METERS_PER_INCH).round() as u32
}

/// Encode an RGB image as PNG tagged with `dpi` dots per inch.
///
/// # Errors
///
/// Returns [`ExportError::Png`] if encoding fails.
pub fn encode_png(image: &RgbImage, dpi: u32) -> Result<Vec<u8>, ExportError> {
    let mut buf = Vec::new();
    {
        let mut encoder = Encoder::new(&mut buf, image.width(), image.height());
        encoder.set_color(ColorType::Rgb);
        encoder.set_depth(BitDepth::Eight);
        let ppm = dots_per_meter(dpi);
        encoder.set_pixel_dims(Some(PixelDimensions {
            xppu: ppm,
            yppu: ppm,
            unit: Unit::Meter,
        }));
        let mut writer = encoder.write_header()?;
        writer.write_image_data(image.as_raw())?;
        writer.finish()?;
    }
    Ok(buf)
}

/// Horizontal resolution of a PNG in dots per inch, if it carries a
/// metric `pHYs` chunk.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn read_dpi(bytes: &[u8]) -> Option<u32> {
    let reader = Decoder::new(Cursor::new(bytes)).read_info().ok()?;
    let dims = reader.info().pixel_dims?;
    match dims.unit {
        Unit::Meter => Some((f64::from(dims.xppu) * METERS_PER_INCH).round() as u32),
        Unit::Unspecified => None,
    }
}
