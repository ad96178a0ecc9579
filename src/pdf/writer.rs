// 出力PDFの構築: ページ、テキスト、画像XObject、保存

use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use image::{DynamicImage, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat, dictionary};

use crate::error::PdfCompressError;
use crate::pdf::font::unicode_to_win_ansi;
use crate::pdf::text_state::ASCENT_RATIO;
use crate::pdf::{BBox, DocumentWriter, PageHandle, PageRect, Point, WriteOptions, optimizer};

/// 再挿入テキストに使うフォントのリソース名
const FONT_RESOURCE: &str = "F1";

/// 保存前のページ
struct PendingPage {
    rect: PageRect,
    rotation: i64,
    operations: Vec<Operation>,
    xobjects: Dictionary,
    uses_font: bool,
}

/// 埋め込み用に解析した画像
struct EmbeddedImage {
    width: u32,
    height: u32,
    dict: Dictionary,
    data: Vec<u8>,
    smask: Option<Vec<u8>>,
}

/// lopdfで新しいPDFを組み立てる。ページは追加順に並び、`save` で1度だけ書き出す。
pub struct PdfWriter {
    doc: Document,
    pages: Vec<PendingPage>,
    font_id: Option<ObjectId>,
    image_count: usize,
    saved: bool,
}

impl Default for PdfWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfWriter {
    pub fn new() -> Self {
        Self {
            doc: Document::with_version("1.5"),
            pages: Vec::new(),
            font_id: None,
            image_count: 0,
            saved: false,
        }
    }

    fn page_mut(&mut self, page: PageHandle) -> Option<&mut PendingPage> {
        self.pages.get_mut(page.0)
    }

    /// Helvetica (WinAnsiEncoding) のフォントオブジェクト。最初の使用時に作る。
    fn font_id(&mut self) -> ObjectId {
        *self.font_id.get_or_insert_with(|| {
            self.doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Helvetica",
                "Encoding" => "WinAnsiEncoding",
            })
        })
    }

    /// ページツリーとカタログを組み立て、最適化してバイト列として出力する。
    pub fn save_to_bytes(&mut self, options: &WriteOptions) -> crate::error::Result<Vec<u8>> {
        if self.saved {
            return Err(PdfCompressError::document_save("document already saved"));
        }
        self.saved = true;

        let pages_id = self.doc.new_object_id();
        let font_id = self.font_id;
        let mut kids: Vec<Object> = Vec::with_capacity(self.pages.len());

        for page in std::mem::take(&mut self.pages) {
            let content_bytes = Content {
                operations: page.operations,
            }
            .encode()
            .map_err(|e| PdfCompressError::document_save(e.to_string()))?;
            let content_id = self
                .doc
                .add_object(Stream::new(dictionary! {}, content_bytes));

            let mut resources = Dictionary::new();
            if page.uses_font
                && let Some(font_id) = font_id
            {
                resources.set(
                    "Font",
                    dictionary! { FONT_RESOURCE => Object::Reference(font_id) },
                );
            }
            if !page.xobjects.is_empty() {
                resources.set("XObject", Object::Dictionary(page.xobjects));
            }

            let mut page_dict = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(page.rect.width as f32),
                    Object::Real(page.rect.height as f32),
                ],
                "Resources" => Object::Dictionary(resources),
                "Contents" => content_id,
            };
            if page.rotation != 0 {
                page_dict.set("Rotate", page.rotation);
            }
            let page_id = self.doc.add_object(page_dict);
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        self.doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        optimizer::optimize(&mut self.doc, options);

        let mut buf = Vec::new();
        self.doc
            .save_to(&mut buf)
            .map_err(|e| PdfCompressError::document_save(e.to_string()))?;
        Ok(buf)
    }
}

impl DocumentWriter for PdfWriter {
    fn new_page(&mut self, rect: PageRect) -> crate::error::Result<PageHandle> {
        if !rect.is_valid() {
            return Err(PdfCompressError::document_save(format!(
                "invalid page size {}x{}",
                rect.width, rect.height
            )));
        }
        self.pages.push(PendingPage {
            rect,
            rotation: 0,
            operations: Vec::new(),
            xobjects: Dictionary::new(),
            uses_font: false,
        });
        Ok(PageHandle(self.pages.len() - 1))
    }

    fn set_rotation(&mut self, page: PageHandle, degrees: i64) -> crate::error::Result<()> {
        if degrees % 90 != 0 {
            return Err(PdfCompressError::document_save(format!(
                "page rotation must be a multiple of 90, got {}",
                degrees
            )));
        }
        let page = self
            .page_mut(page)
            .ok_or_else(|| PdfCompressError::document_save(format!("no page {}", page.0)))?;
        page.rotation = degrees.rem_euclid(360);
        Ok(())
    }

    /// `pos` を上端としてテキストを描画する（ベースラインは上端からフォントサイズの0.8倍下）。
    fn insert_text(
        &mut self,
        page: PageHandle,
        pos: Point,
        text: &str,
        font_size: f64,
    ) -> crate::error::Result<()> {
        if !(font_size.is_finite() && font_size > 0.0) {
            return Err(PdfCompressError::text_insert(format!(
                "invalid font size {}",
                font_size
            )));
        }
        if !(pos.x.is_finite() && pos.y.is_finite()) {
            return Err(PdfCompressError::text_insert(format!(
                "invalid position ({}, {})",
                pos.x, pos.y
            )));
        }
        let encoded = encode_win_ansi(text)?;

        self.font_id();
        let page = self
            .page_mut(page)
            .ok_or_else(|| PdfCompressError::text_insert(format!("no page {}", page.0)))?;
        page.uses_font = true;

        let baseline = pos.y - ASCENT_RATIO * font_size;
        page.operations.extend([
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![
                    Object::Name(FONT_RESOURCE.as_bytes().to_vec()),
                    Object::Real(font_size as f32),
                ],
            ),
            Operation::new(
                "Td",
                vec![Object::Real(pos.x as f32), Object::Real(baseline as f32)],
            ),
            Operation::new("Tj", vec![Object::String(encoded, StringFormat::Literal)]),
            Operation::new("ET", vec![]),
        ]);
        Ok(())
    }

    /// 画像を `bbox` に描画する。JPEGはそのまま、それ以外はFlate圧縮した生サンプルで埋め込む。
    fn insert_image(
        &mut self,
        page: PageHandle,
        bbox: &BBox,
        data: &[u8],
    ) -> crate::error::Result<()> {
        if !bbox.is_finite() || bbox.width() <= 0.0 || bbox.height() <= 0.0 {
            return Err(PdfCompressError::image_insert(format!(
                "invalid placement {:?}",
                bbox
            )));
        }
        if self.page_mut(page).is_none() {
            return Err(PdfCompressError::image_insert(format!("no page {}", page.0)));
        }

        let embedded = prepare_image(data)?;
        let mut dict = embedded.dict;
        if let Some(alpha) = embedded.smask {
            let smask_id = self.doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => embedded.width as i64,
                    "Height" => embedded.height as i64,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                    "Filter" => "FlateDecode",
                },
                alpha,
            ));
            dict.set("SMask", Object::Reference(smask_id));
        }
        let image_id = self
            .doc
            .add_object(Object::Stream(Stream::new(dict, embedded.data)));

        let name = format!("Im{}", self.image_count);
        self.image_count += 1;

        let Some(page) = self.page_mut(page) else {
            return Err(PdfCompressError::image_insert(format!("no page {}", page.0)));
        };
        page.xobjects.set(name.as_bytes(), Object::Reference(image_id));
        page.operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(bbox.width() as f32),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(bbox.height() as f32),
                    Object::Real(bbox.x_min as f32),
                    Object::Real(bbox.y_min as f32),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.into_bytes())]),
            Operation::new("Q", vec![]),
        ]);
        Ok(())
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// 最適化して `path` に書き出す。書き込みに失敗した場合は途中のファイルを削除する。
    fn save(&mut self, path: &Path, options: &WriteOptions) -> crate::error::Result<()> {
        let bytes = self.save_to_bytes(options)?;

        if let Err(e) = std::fs::write(path, &bytes) {
            if path.exists() {
                let _ = std::fs::remove_file(path);
            }
            return Err(PdfCompressError::document_save(format!(
                "{}: {}",
                path.display(),
                e
            )));
        }

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "document saved");
        Ok(())
    }
}

/// テキストをWinAnsiのバイト列にする。表現できない文字は `?` になる。
///
/// 表現できる文字が1つも無い場合はエラー。
fn encode_win_ansi(text: &str) -> crate::error::Result<Vec<u8>> {
    let mut encodable = 0usize;
    let bytes: Vec<u8> = text
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match unicode_to_win_ansi(c) {
            Some(b) => {
                encodable += 1;
                b
            }
            None => b'?',
        })
        .collect();

    if encodable == 0 {
        return Err(PdfCompressError::text_insert(format!(
            "no WinAnsi-encodable characters in {:?}",
            text
        )));
    }
    Ok(bytes)
}

/// バイト列の形式を判定して画像XObject用の辞書とデータを作る。
fn prepare_image(data: &[u8]) -> crate::error::Result<EmbeddedImage> {
    match image::guess_format(data) {
        Ok(ImageFormat::Jpeg) => prepare_jpeg(data),
        _ if is_jpx(data) => prepare_jpx(data),
        Ok(_) => prepare_raster(data),
        Err(e) => Err(PdfCompressError::image_insert(format!(
            "unrecognized image data: {}",
            e
        ))),
    }
}

/// JPEGはSOFマーカーから寸法と成分数だけ読み、DCTDecodeでそのまま埋め込む。
fn prepare_jpeg(data: &[u8]) -> crate::error::Result<EmbeddedImage> {
    let info = read_jpeg_info(data)
        .ok_or_else(|| PdfCompressError::image_insert("JPEG without frame header"))?;
    let color_space = match info.components {
        1 => "DeviceGray",
        3 => "DeviceRGB",
        4 => "DeviceCMYK",
        n => {
            return Err(PdfCompressError::image_insert(format!(
                "JPEG with {} components",
                n
            )));
        }
    };

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => info.width as i64,
        "Height" => info.height as i64,
        "ColorSpace" => color_space,
        "BitsPerComponent" => 8,
        "Filter" => "DCTDecode",
    };
    if info.components == 4 && info.adobe {
        // Adobe形式のCMYK JPEGは反転して格納されている
        dict.set(
            "Decode",
            [1, 0, 1, 0, 1, 0, 1, 0]
                .into_iter()
                .map(Object::Integer)
                .collect::<Vec<_>>(),
        );
    }

    Ok(EmbeddedImage {
        width: info.width as u32,
        height: info.height as u32,
        dict,
        data: data.to_vec(),
        smask: None,
    })
}

struct JpegInfo {
    width: u16,
    height: u16,
    components: u8,
    adobe: bool,
}

/// JPEGのマーカーを走査してフレームヘッダを読む。
fn read_jpeg_info(data: &[u8]) -> Option<JpegInfo> {
    let mut adobe = false;
    let mut i = 2;
    while i + 4 <= data.len() {
        if data[i] != 0xFF {
            return None;
        }
        let marker = data[i + 1];
        if marker == 0xFF {
            i += 1;
            continue;
        }
        let len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        let segment = data.get(i + 4..i + 2 + len)?;
        match marker {
            0xEE if segment.starts_with(b"Adobe") => adobe = true,
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                let &[_, h0, h1, w0, w1, n, ..] = segment else {
                    return None;
                };
                return Some(JpegInfo {
                    width: u16::from_be_bytes([w0, w1]),
                    height: u16::from_be_bytes([h0, h1]),
                    components: n,
                    adobe,
                });
            }
            _ => {}
        }
        i += 2 + len;
    }
    None
}

fn is_jpx(data: &[u8]) -> bool {
    data.starts_with(b"\x00\x00\x00\x0cjP  \r\n\x87\n") || data.starts_with(b"\xFF\x4F\xFF\x51")
}

/// JPEG 2000はヘッダから寸法だけ読み、JPXDecodeでそのまま埋め込む。
fn prepare_jpx(data: &[u8]) -> crate::error::Result<EmbeddedImage> {
    let (width, height) = read_jpx_size(data)
        .ok_or_else(|| PdfCompressError::image_insert("JPEG 2000 without image header"))?;
    Ok(EmbeddedImage {
        width,
        height,
        dict: dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "Filter" => "JPXDecode",
        },
        data: data.to_vec(),
        smask: None,
    })
}

/// JP2の `ihdr` ボックス、またはコードストリームのSIZマーカーから寸法を読む。
fn read_jpx_size(data: &[u8]) -> Option<(u32, u32)> {
    let be32 = |b: &[u8]| Some(u32::from_be_bytes(b.get(..4)?.try_into().ok()?));
    if let Some(pos) = data.windows(4).position(|w| w == b"ihdr") {
        let height = be32(data.get(pos + 4..)?)?;
        let width = be32(data.get(pos + 8..)?)?;
        return Some((width, height));
    }
    if data.starts_with(b"\xFF\x4F\xFF\x51") {
        // SIZ: Lsiz(2) Rsiz(2) Xsiz(4) Ysiz(4) XOsiz(4) YOsiz(4)
        let xsiz = be32(data.get(8..)?)?;
        let ysiz = be32(data.get(12..)?)?;
        let xo = be32(data.get(16..)?)?;
        let yo = be32(data.get(20..)?)?;
        return Some((xsiz.checked_sub(xo)?, ysiz.checked_sub(yo)?));
    }
    None
}

/// JPEG以外のラスター画像: デコードしてFlate圧縮した生サンプルで埋め込む。
fn prepare_raster(data: &[u8]) -> crate::error::Result<EmbeddedImage> {
    let img = image::load_from_memory(data)
        .map_err(|e| PdfCompressError::image_insert(format!("cannot decode image: {}", e)))?;
    let (width, height) = (img.width(), img.height());

    let (color_space, samples, alpha) = match img {
        DynamicImage::ImageLuma8(gray) => ("DeviceGray", gray.into_raw(), None),
        img if !img.color().has_alpha() && !img.color().has_color() => {
            ("DeviceGray", img.to_luma8().into_raw(), None)
        }
        img if !img.color().has_alpha() => ("DeviceRGB", img.to_rgb8().into_raw(), None),
        img => {
            let rgba = img.to_rgba8();
            let alpha: Vec<u8> = rgba.pixels().map(|p| p.0[3]).collect();
            let rgb: Vec<u8> = rgba
                .pixels()
                .flat_map(|p| [p.0[0], p.0[1], p.0[2]])
                .collect();
            let alpha = alpha.iter().any(|&a| a != 255).then_some(alpha);
            ("DeviceRGB", rgb, alpha)
        }
    };

    let smask = alpha.as_deref().map(flate_encode).transpose()?;

    Ok(EmbeddedImage {
        width,
        height,
        dict: dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        data: flate_encode(&samples)?,
        smask,
    })
}

/// zlibで圧縮
fn flate_encode(data: &[u8]) -> crate::error::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| PdfCompressError::image_insert(format!("Flate encode error: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| PdfCompressError::image_insert(format!("Flate encode error: {}", e)))
}

/// テスト用のPNGエンコード
#[cfg(test)]
fn png_bytes(img: &DynamicImage) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode PNG");
    buf
}
