// jpeg-encoder: RGB -> progressive JPEG bytes

use image::RgbImage;

use crate::error::PdfCompressError;

/// Encode an RGB image to a progressive JPEG with optimized Huffman tables.
///
/// # Arguments
/// * `rgb`     - Source image; both sides must fit in a `u16`
/// * `quality` - JPEG quality (1 = worst, 100 = best)
pub fn encode_rgb_to_jpeg(rgb: &RgbImage, quality: u8) -> crate::error::Result<Vec<u8>> {
    if !(1..=100).contains(&quality) {
        return Err(PdfCompressError::image_encode(format!(
            "JPEG quality must be 1-100, got {}",
            quality
        )));
    }

    let (width, height) = rgb.dimensions();
    let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(PdfCompressError::image_encode(format!(
            "Image too large for JPEG: {}x{}",
            width, height
        )));
    };

    let mut jpeg_bytes = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut jpeg_bytes, quality);
    encoder.set_progressive(true);
    encoder.set_optimized_huffman_tables(true);
    encoder
        .encode(rgb.as_raw(), w, h, jpeg_encoder::ColorType::Rgb)
        .map_err(|e| PdfCompressError::image_encode(format!("Failed to encode JPEG: {}", e)))?;

    Ok(jpeg_bytes)
}
