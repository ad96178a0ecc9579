// 埋め込み画像の再圧縮: デコード -> 白背景合成 -> 縮小 -> JPEG (品質を下げながら再試行)

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

use crate::error::PdfCompressError;
use crate::imaging::jpeg;

/// これ以下の品質では再試行しない
const MIN_RETRY_QUALITY: u8 = 30;
/// 再試行ごとに下げる品質
const QUALITY_STEP: u8 = 20;

/// 再圧縮の結果
#[derive(Debug, Clone)]
pub struct Recompressed {
    /// JPEGバイト列
    pub data: Vec<u8>,
    /// 最後に使った品質
    pub quality: u8,
    /// エンコードした回数
    pub attempts: u32,
}

/// 画像バイト列を再圧縮する能力。失敗は `Err` で返し、部分的なバイト列は返さない。
pub trait Recompress {
    fn recompress(&self, data: &[u8], quality: u8) -> crate::error::Result<Recompressed>;
}

/// image + jpeg-encoder による標準の再圧縮器。状態を持たない。
#[derive(Debug, Clone, Copy)]
pub struct ImageRecompressor {
    max_dimension: u32,
}

impl Default for ImageRecompressor {
    fn default() -> Self {
        Self::new(crate::config::CompressionConfig::default().max_dimension)
    }
}

impl ImageRecompressor {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// 開始品質に対するエンコード回数の上限: ⌈(q-30)/20⌉+1（q≤30なら1）
    pub fn max_attempts(quality: u8) -> u32 {
        if quality <= MIN_RETRY_QUALITY {
            1
        } else {
            ((quality - MIN_RETRY_QUALITY) as u32).div_ceil(QUALITY_STEP as u32) + 1
        }
    }
}

impl Recompress for ImageRecompressor {
    fn recompress(&self, data: &[u8], quality: u8) -> crate::error::Result<Recompressed> {
        if !(1..=100).contains(&quality) {
            return Err(PdfCompressError::image_encode(format!(
                "JPEG quality must be 1-100, got {}",
                quality
            )));
        }

        let decoded = image::load_from_memory(data)?;
        let rgb = downscale(flatten_to_rgb(decoded), self.max_dimension);

        let max_attempts = Self::max_attempts(quality);
        let mut q = quality;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let encoded = jpeg::encode_rgb_to_jpeg(&rgb, q)?;
            let shrunk = encoded.len() < data.len();
            if shrunk || q <= MIN_RETRY_QUALITY || attempts >= max_attempts {
                tracing::trace!(
                    original = data.len(),
                    recompressed = encoded.len(),
                    quality = q,
                    attempts,
                    "image recompressed"
                );
                return Ok(Recompressed {
                    data: encoded,
                    quality: q,
                    attempts,
                });
            }
            q -= QUALITY_STEP;
        }
    }
}

/// 色をRGBに正規化する。アルファを持つ画像は白背景に合成する。
fn flatten_to_rgb(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return match img {
            DynamicImage::ImageRgb8(rgb) => rgb,
            other => other.to_rgb8(),
        };
    }

    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let over_white = |c: u8| {
            let a = a as u32;
            ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8
        };
        image::Rgb([over_white(r), over_white(g), over_white(b)])
    })
}

/// 長辺が `max_dimension` を超える場合だけ、縦横比を保ってLanczos3で縮小する。
fn downscale(rgb: RgbImage, max_dimension: u32) -> RgbImage {
    let (w, h) = rgb.dimensions();
    let longest = w.max(h);
    if longest <= max_dimension {
        return rgb;
    }

    let scale = max_dimension as f64 / longest as f64;
    let new_w = ((w as f64 * scale).round() as u32).clamp(1, max_dimension);
    let new_h = ((h as f64 * scale).round() as u32).clamp(1, max_dimension);
    image::imageops::resize(&rgb, new_w, new_h, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    #[test]
    fn test_max_attempts() {
        assert_eq!(ImageRecompressor::max_attempts(50), 2);
        assert_eq!(ImageRecompressor::max_attempts(30), 1);
        assert_eq!(ImageRecompressor::max_attempts(1), 1);
        assert_eq!(ImageRecompressor::max_attempts(31), 2);
        assert_eq!(ImageRecompressor::max_attempts(100), 5);
    }

    #[test]
    fn test_flatten_composites_transparent_onto_white() {
        let rgba = RgbaImage::from_pixel(2, 2, image::Rgba([0, 0, 0, 0]));
        let rgb = flatten_to_rgb(DynamicImage::ImageRgba8(rgba));
        assert!(rgb.pixels().all(|p| p.0 == [255, 255, 255]));
    }

    #[test]
    fn test_flatten_half_alpha_blends() {
        let rgba = RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 0, 128]));
        let rgb = flatten_to_rgb(DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.get_pixel(0, 0).0, [127, 127, 127]);
    }

    #[test]
    fn test_downscale_keeps_aspect_ratio() {
        let rgb = RgbImage::new(2400, 600);
        let out = downscale(rgb, 1200);
        assert_eq!(out.dimensions(), (1200, 300));
    }

    #[test]
    fn test_downscale_never_upscales() {
        let rgb = RgbImage::new(300, 200);
        assert_eq!(downscale(rgb, 1200).dimensions(), (300, 200));
    }
}
