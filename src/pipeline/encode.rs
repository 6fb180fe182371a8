//! Image encoding: page images → bytes for a [`Page`](crate::output::Page),
//! and page bytes → base64 `ImageData` for the vision request.
//!
//! Rendered PDF pages are stored as PNG: lossless compression keeps small
//! print (CPF digits, phone numbers) crisp. Standalone image inputs keep
//! their original encoding unless they exceed the pixel cap.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// PNG-encode a rasterised page.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} page → {} PNG bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Decode an image file and cap its longest edge at `max_px`.
///
/// Returns the bytes to send and their MIME type. Images already within the
/// cap are passed through untouched.
pub fn normalise_image(bytes: &[u8], max_px: u32) -> Result<(Vec<u8>, String), image::ImageError> {
    let format = image::guess_format(bytes)?;
    let img = image::load_from_memory_with_format(bytes, format)?;

    if img.width() <= max_px && img.height() <= max_px {
        return Ok((bytes.to_vec(), format.to_mime_type().to_string()));
    }

    let scaled = img.thumbnail(max_px, max_px);
    debug!(
        "Downscaled image {}x{} → {}x{}",
        img.width(),
        img.height(),
        scaled.width(),
        scaled.height()
    );
    Ok((encode_png(&scaled)?, "image/png".to_string()))
}

/// Wrap page image bytes for a multimodal chat message.
///
/// `detail: "high"` keeps fine print legible to GPT-4-class models.
pub fn to_image_data(bytes: &[u8], mime_type: &str) -> ImageData {
    ImageData::new(STANDARD.encode(bytes), mime_type).with_detail("high")
}
