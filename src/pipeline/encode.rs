//! Image encoding: `DynamicImage` → PNG bytes → base64 [`ImagePayload`].
//!
//! PNG is lossless, so small print in rendered pages and chart labels in
//! embedded figures survive the trip to the vision model.

use crate::model::ImagePayload;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, GenericImageView};
use std::io::Cursor;
use tracing::debug;

/// PNG-encode an image, downscaling so the longest edge is at most
/// `max_edge` pixels.
pub fn encode_png(img: &DynamicImage, max_edge: u32) -> Result<Vec<u8>, image::ImageError> {
    let (w, h) = img.dimensions();
    let mut buf = Vec::new();

    if w.max(h) > max_edge {
        let scaled = img.resize(max_edge, max_edge, image::imageops::FilterType::Triangle);
        debug!(
            "Downscaled image {}x{} → {}x{}",
            w,
            h,
            scaled.width(),
            scaled.height()
        );
        scaled.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    } else {
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    }

    Ok(buf)
}

/// Wrap PNG bytes for a vision request.
pub fn png_payload(png: &[u8]) -> ImagePayload {
    let data = STANDARD.encode(png);
    debug!("Encoded image → {} bytes base64", data.len());
    ImagePayload {
        data,
        mime_type: "image/png".to_string(),
    }
}
