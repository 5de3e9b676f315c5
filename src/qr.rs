//! QR code images for the resolved identifier

use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;
use thiserror::Error;

/// Pixels per QR module.
pub const MODULE_PIXELS: u32 = 10;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("Cannot encode QR payload: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("Cannot write QR image: {0}")]
    Image(#[from] image::ImageError),
}

/// Render `payload` as a black-on-white PNG with the standard quiet zone.
pub fn render_qr_png(payload: &str) -> Result<Vec<u8>, QrError> {
    let code = QrCode::new(payload.as_bytes())?;
    let img = code
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .module_dimensions(MODULE_PIXELS, MODULE_PIXELS)
        .build();
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qr_is_png_and_square() {
        let png = render_qr_png("a@x.com").unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!(img.width(), img.height());
        // quiet zone of 4 modules on each side
        assert_eq!(img.width() % MODULE_PIXELS, 0);
        assert_eq!(img.to_luma8().get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn test_different_payloads_differ() {
        assert_ne!(render_qr_png("a@x.com").unwrap(), render_qr_png("B123").unwrap());
    }
}
