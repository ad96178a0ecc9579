// 画像XObjectの解決: ストリームを自己記述的なエンコード済みバイト列に変換する

use std::io::{Cursor, Read};

use flate2::read::ZlibDecoder;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::error::PdfCompressError;
use crate::pdf::ExtractedImage;

/// サンプル数の上限（約1億ピクセル x 4成分）
const MAX_SAMPLES: usize = 400_000_000;

/// 画像の色空間
#[derive(Debug, Clone, PartialEq)]
enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Indexed {
        base: Box<ColorSpace>,
        hival: usize,
        lookup: Vec<u8>,
    },
}

impl ColorSpace {
    fn components(&self) -> usize {
        match self {
            ColorSpace::Gray | ColorSpace::Indexed { .. } => 1,
            ColorSpace::Rgb => 3,
            ColorSpace::Cmyk => 4,
        }
    }
}

/// 画像XObjectのメタデータ
#[derive(Debug, Clone)]
struct ImageMeta {
    width: u32,
    height: u32,
    bits_per_component: u8,
    color_space: ColorSpace,
    /// フィルタ連鎖（適用順）
    filters: Vec<String>,
    /// Decode配列が [1 0] のとき（1成分画像のみ扱う）
    inverted: bool,
}

/// 画像XObjectを解決し、エンコード済みバイト列と拡張子を返す。
///
/// - DCTDecode: JPEGデータをそのまま返す (`jpeg`)
/// - JPXDecode: JPEG 2000データをそのまま返す (`jpx`)
/// - それ以外: サンプルをデコードしてPNGに再エンコードする (`png`)。
///   SMaskがあればアルファチャンネルとして合成する。
pub fn extract_image(doc: &Document, id: ObjectId) -> crate::error::Result<ExtractedImage> {
    let stream = doc
        .get_object(id)
        .and_then(Object::as_stream)
        .map_err(|e| {
            PdfCompressError::image_extract(format!("object {} {}: {}", id.0, id.1, e))
        })?;

    let is_image = stream
        .dict
        .get(b"Subtype")
        .and_then(Object::as_name)
        .is_ok_and(|n| n == b"Image");
    if !is_image {
        return Err(PdfCompressError::image_extract(format!(
            "object {} {} is not an image XObject",
            id.0, id.1
        )));
    }

    let filters = read_filters(&stream.dict);
    match filters.last().map(String::as_str) {
        Some("DCTDecode") => {
            return Ok(ExtractedImage {
                data: passthrough_bytes(stream, &filters)?,
                ext: "jpeg",
            });
        }
        Some("JPXDecode") => {
            return Ok(ExtractedImage {
                data: passthrough_bytes(stream, &filters)?,
                ext: "jpx",
            });
        }
        _ => {}
    }

    let meta = read_image_meta(doc, stream, filters)?;
    let mut img = decode_samples(stream, &meta)?;

    if let Ok(smask_ref) = stream.dict.get(b"SMask") {
        match read_soft_mask(doc, smask_ref) {
            Ok(mask) => img = apply_soft_mask(img, mask),
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unreadable SMask");
            }
        }
    }

    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| PdfCompressError::image_extract(format!("PNG encode error: {}", e)))?;

    Ok(ExtractedImage {
        data: png,
        ext: "png",
    })
}

/// /Filter を名前の列として読む。
fn read_filters(dict: &Dictionary) -> Vec<String> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![String::from_utf8_lossy(name).into_owned()],
        Ok(Object::Array(arr)) => arr
            .iter()
            .filter_map(|obj| obj.as_name().ok())
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .collect(),
        _ => Vec::new(),
    }
}

/// DCT/JPXの前段にFlateが掛かっている場合だけ展開し、画像形式のバイト列を取り出す。
fn passthrough_bytes(stream: &Stream, filters: &[String]) -> crate::error::Result<Vec<u8>> {
    let mut data = stream.content.clone();
    for filter in &filters[..filters.len().saturating_sub(1)] {
        match filter.as_str() {
            "FlateDecode" | "Fl" => data = inflate(&data)?,
            other => {
                return Err(PdfCompressError::image_extract(format!(
                    "Unsupported filter chain before image codec: {}",
                    other
                )));
            }
        }
    }
    Ok(data)
}

fn inflate(data: &[u8]) -> crate::error::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PdfCompressError::image_extract(format!("FlateDecode error: {}", e)))?;
    Ok(out)
}

/// 画像XObjectのストリームから画像メタデータを読み取る。
fn read_image_meta(
    doc: &Document,
    stream: &Stream,
    filters: Vec<String>,
) -> crate::error::Result<ImageMeta> {
    let dict = &stream.dict;

    let width = dict_get_u32(dict, b"Width")?;
    let height = dict_get_u32(dict, b"Height")?;
    if width == 0 || height == 0 {
        return Err(PdfCompressError::image_extract(format!(
            "Empty image: {}x{}",
            width, height
        )));
    }

    let image_mask = dict
        .get(b"ImageMask")
        .and_then(Object::as_bool)
        .unwrap_or(false);

    // ステンシルマスクは1bpcグレーとして扱う
    let bits_per_component = if image_mask {
        1
    } else {
        match dict.get(b"BitsPerComponent") {
            Ok(_) => {
                let bpc = dict_get_u32(dict, b"BitsPerComponent")?;
                u8::try_from(bpc).map_err(|_| {
                    PdfCompressError::image_extract(format!(
                        "Unsupported BitsPerComponent: {}",
                        bpc
                    ))
                })?
            }
            Err(_) => 8,
        }
    };
    if !matches!(bits_per_component, 1 | 2 | 4 | 8 | 16) {
        return Err(PdfCompressError::image_extract(format!(
            "Unsupported BitsPerComponent: {}",
            bits_per_component
        )));
    }

    let color_space = if image_mask {
        ColorSpace::Gray
    } else {
        match dict.get(b"ColorSpace") {
            Ok(obj) => parse_color_space(doc, obj)?,
            Err(_) => ColorSpace::Rgb,
        }
    };

    let inverted = color_space.components() == 1
        && dict
            .get(b"Decode")
            .and_then(Object::as_array)
            .ok()
            .and_then(|arr| Some((number(arr.first()?)?, number(arr.get(1)?)?)))
            .is_some_and(|(d0, d1)| d0 > d1);

    Ok(ImageMeta {
        width,
        height,
        bits_per_component,
        color_space,
        filters,
        inverted,
    })
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// 辞書からu32値を取得するヘルパー（負の値はエラー）
fn dict_get_u32(dict: &Dictionary, key: &[u8]) -> crate::error::Result<u32> {
    match dict.get(key) {
        Ok(Object::Integer(i)) => u32::try_from(*i).map_err(|_| {
            PdfCompressError::image_extract(format!(
                "Value out of u32 range for {:?}: {}",
                String::from_utf8_lossy(key),
                i
            ))
        }),
        Ok(Object::Real(f)) if *f >= 0.0 && *f <= u32::MAX as f32 => Ok(*f as u32),
        Ok(other) => Err(PdfCompressError::image_extract(format!(
            "Expected integer for {:?}, got {:?}",
            String::from_utf8_lossy(key),
            other
        ))),
        Err(_) => Err(PdfCompressError::image_extract(format!(
            "Missing required key: {:?}",
            String::from_utf8_lossy(key),
        ))),
    }
}

/// /ColorSpace の値を解析する。
fn parse_color_space(doc: &Document, obj: &Object) -> crate::error::Result<ColorSpace> {
    let (_, obj) = doc.dereference(obj)?;
    match obj {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"G" | b"CalGray" => Ok(ColorSpace::Gray),
            b"DeviceRGB" | b"RGB" | b"CalRGB" => Ok(ColorSpace::Rgb),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorSpace::Cmyk),
            other => Err(unsupported_color_space(other)),
        },
        Object::Array(arr) => {
            let family = arr
                .first()
                .and_then(|o| o.as_name().ok())
                .ok_or_else(|| PdfCompressError::image_extract("Malformed color space array"))?;
            match family {
                b"ICCBased" => {
                    let profile = arr
                        .get(1)
                        .ok_or_else(|| PdfCompressError::image_extract("ICCBased without profile"))?;
                    let (_, profile) = doc.dereference(profile)?;
                    let n = profile
                        .as_stream()
                        .ok()
                        .and_then(|s| s.dict.get(b"N").and_then(Object::as_i64).ok());
                    match n {
                        Some(1) => Ok(ColorSpace::Gray),
                        Some(3) => Ok(ColorSpace::Rgb),
                        Some(4) => Ok(ColorSpace::Cmyk),
                        other => Err(PdfCompressError::image_extract(format!(
                            "ICCBased with unsupported component count: {:?}",
                            other
                        ))),
                    }
                }
                b"CalGray" => Ok(ColorSpace::Gray),
                b"CalRGB" => Ok(ColorSpace::Rgb),
                b"Indexed" | b"I" => parse_indexed(doc, arr),
                other => Err(unsupported_color_space(other)),
            }
        }
        other => Err(PdfCompressError::image_extract(format!(
            "Unexpected color space object: {:?}",
            other
        ))),
    }
}

/// [/Indexed base hival lookup]
fn parse_indexed(doc: &Document, arr: &[Object]) -> crate::error::Result<ColorSpace> {
    let [_, base, hival, lookup] = arr else {
        return Err(PdfCompressError::image_extract(
            "Indexed color space must have 4 elements",
        ));
    };
    let base = parse_color_space(doc, base)?;
    if matches!(base, ColorSpace::Indexed { .. }) {
        return Err(PdfCompressError::image_extract("Nested Indexed color space"));
    }
    let hival = doc
        .dereference(hival)?
        .1
        .as_i64()
        .ok()
        .and_then(|h| usize::try_from(h).ok())
        .ok_or_else(|| PdfCompressError::image_extract("Indexed hival must be a non-negative integer"))?;
    let lookup = match doc.dereference(lookup)?.1 {
        Object::String(bytes, _) => bytes.clone(),
        Object::Stream(s) => s.decompressed_content().unwrap_or_else(|_| s.content.clone()),
        other => {
            return Err(PdfCompressError::image_extract(format!(
                "Unexpected Indexed lookup: {:?}",
                other
            )));
        }
    };
    Ok(ColorSpace::Indexed {
        base: Box::new(base),
        hival,
        lookup,
    })
}

fn unsupported_color_space(name: &[u8]) -> PdfCompressError {
    PdfCompressError::image_extract(format!(
        "Unsupported color space: {}",
        String::from_utf8_lossy(name)
    ))
}

/// ストリームのフィルタを展開し、サンプルからDynamicImageを構築する。
fn decode_samples(stream: &Stream, meta: &ImageMeta) -> crate::error::Result<DynamicImage> {
    let data = if meta.filters.is_empty() {
        stream.content.clone()
    } else {
        stream.decompressed_content().map_err(|e| {
            PdfCompressError::image_extract(format!(
                "Cannot decode filters {:?}: {}",
                meta.filters, e
            ))
        })?
    };

    let components = meta.color_space.components();
    let samples = unpack_samples(
        &data,
        meta.width,
        meta.height,
        components,
        meta.bits_per_component,
    )?;
    let bpc = meta.bits_per_component;
    let (w, h) = (meta.width, meta.height);

    let img = match &meta.color_space {
        ColorSpace::Gray => {
            let raw: Vec<u8> = samples
                .iter()
                .map(|&s| {
                    let v = scale_to_8bit(s, bpc);
                    if meta.inverted { 255 - v } else { v }
                })
                .collect();
            GrayImage::from_raw(w, h, raw).map(DynamicImage::ImageLuma8)
        }
        ColorSpace::Rgb => {
            let raw = samples.iter().map(|&s| scale_to_8bit(s, bpc)).collect();
            RgbImage::from_raw(w, h, raw).map(DynamicImage::ImageRgb8)
        }
        ColorSpace::Cmyk => {
            let raw = samples
                .chunks_exact(4)
                .flat_map(|px| {
                    cmyk_to_rgb([
                        scale_to_8bit(px[0], bpc),
                        scale_to_8bit(px[1], bpc),
                        scale_to_8bit(px[2], bpc),
                        scale_to_8bit(px[3], bpc),
                    ])
                })
                .collect();
            RgbImage::from_raw(w, h, raw).map(DynamicImage::ImageRgb8)
        }
        ColorSpace::Indexed {
            base,
            hival,
            lookup,
        } => {
            let n = base.components();
            let raw = samples
                .iter()
                .flat_map(|&idx| {
                    let idx = (idx as usize).min(*hival);
                    let entry = lookup.get(idx * n..idx * n + n).unwrap_or(&[]);
                    palette_entry_to_rgb(base, entry)
                })
                .collect();
            RgbImage::from_raw(w, h, raw).map(DynamicImage::ImageRgb8)
        }
    };

    img.ok_or_else(|| PdfCompressError::image_extract("Failed to create image from samples"))
}

/// サンプル列を取り出す（行末はバイト境界でパディングされている）。
fn unpack_samples(
    data: &[u8],
    width: u32,
    height: u32,
    components: usize,
    bpc: u8,
) -> crate::error::Result<Vec<u16>> {
    let per_row = (width as usize)
        .checked_mul(components)
        .filter(|n| n.saturating_mul(height as usize) <= MAX_SAMPLES)
        .ok_or_else(|| PdfCompressError::image_extract("Image too large"))?;
    let row_bytes = (per_row * bpc as usize).div_ceil(8);
    let expected = row_bytes * height as usize;
    if data.len() < expected {
        return Err(PdfCompressError::image_extract(format!(
            "Sample data too short: expected {}, got {}",
            expected,
            data.len()
        )));
    }

    let mut samples = Vec::with_capacity(per_row * height as usize);
    for row in data[..expected].chunks_exact(row_bytes) {
        samples.extend((0..per_row).map(|i| sample_at(row, i, bpc)));
    }
    Ok(samples)
}

fn sample_at(row: &[u8], i: usize, bpc: u8) -> u16 {
    match bpc {
        8 => row[i] as u16,
        16 => u16::from_be_bytes([row[2 * i], row[2 * i + 1]]),
        _ => {
            let bit = i * bpc as usize;
            let shift = 8 - bpc as usize - bit % 8;
            let mask = (1u16 << bpc) - 1;
            ((row[bit / 8] as u16) >> shift) & mask
        }
    }
}

fn scale_to_8bit(sample: u16, bpc: u8) -> u8 {
    match bpc {
        8 => sample as u8,
        16 => (sample >> 8) as u8,
        _ => {
            let max = (1u32 << bpc) - 1;
            (sample as u32 * 255 / max) as u8
        }
    }
}

fn cmyk_to_rgb([c, m, y, k]: [u8; 4]) -> [u8; 3] {
    let white = 255 - k as u32;
    [
        ((255 - c as u32) * white / 255) as u8,
        ((255 - m as u32) * white / 255) as u8,
        ((255 - y as u32) * white / 255) as u8,
    ]
}

/// パレットの1エントリをRGBにする（足りないエントリは黒）
fn palette_entry_to_rgb(base: &ColorSpace, entry: &[u8]) -> [u8; 3] {
    match (base, entry) {
        (ColorSpace::Gray, [g]) => [*g, *g, *g],
        (ColorSpace::Rgb, [r, g, b]) => [*r, *g, *b],
        (ColorSpace::Cmyk, [c, m, y, k]) => cmyk_to_rgb([*c, *m, *y, *k]),
        _ => [0, 0, 0],
    }
}

/// SMaskをグレースケール画像として読み込む。
fn read_soft_mask(doc: &Document, smask_ref: &Object) -> crate::error::Result<GrayImage> {
    let (_, obj) = doc.dereference(smask_ref)?;
    let stream = obj
        .as_stream()
        .map_err(|e| PdfCompressError::image_extract(format!("SMask is not a stream: {}", e)))?;
    let filters = read_filters(&stream.dict);
    if filters.last().map(String::as_str) == Some("DCTDecode") {
        let data = passthrough_bytes(stream, &filters)?;
        let img = image::load_from_memory(&data)
            .map_err(|e| PdfCompressError::image_extract(format!("SMask decode error: {}", e)))?;
        return Ok(img.to_luma8());
    }
    let mut meta = read_image_meta(doc, stream, filters)?;
    meta.color_space = ColorSpace::Gray;
    Ok(decode_samples(stream, &meta)?.to_luma8())
}

/// SMaskをアルファとして合成する。サイズが異なる場合はマスクを画像に合わせて拡縮する。
fn apply_soft_mask(img: DynamicImage, mask: GrayImage) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    let mask = if mask.dimensions() == (w, h) {
        mask
    } else {
        image::imageops::resize(&mask, w, h, image::imageops::FilterType::Triangle)
    };

    let mut rgba: RgbaImage = img.to_rgba8();
    for (pixel, alpha) in rgba.pixels_mut().zip(mask.pixels()) {
        pixel.0[3] = alpha.0[0];
    }
    DynamicImage::ImageRgba8(rgba)
}
