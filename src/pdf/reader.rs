use std::collections::HashMap;
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::PdfCompressError;
use crate::pdf::content_stream::{Matrix, ctm_to_bbox, extract_xobject_placements};
use crate::pdf::{
    DocumentReader, ExtractedImage, ImageRef, PageRect, SourcePage, font, image_xobject,
    text_state,
};

/// MediaBoxが無い・壊れているページに使うサイズ（US Letter）
const DEFAULT_PAGE_SIZE: (f64, f64) = (612.0, 792.0);

/// Form XObjectの入れ子をたどる深さの上限
const MAX_FORM_DEPTH: u8 = 8;

/// ページ属性の継承をたどる深さの上限
const MAX_TREE_DEPTH: usize = 64;

/// ページの見える範囲
struct PageGeometry {
    rect: PageRect,
    /// 見える範囲の左下（ユーザー空間）
    origin: (f64, f64),
    rotation: i64,
}

fn box_rect(b: &[f64; 4]) -> PageRect {
    PageRect {
        width: b[2] - b[0],
        height: b[3] - b[1],
    }
}

/// lopdfで読み込んだ入力PDF。読み取り専用。
pub struct PdfReader {
    doc: Document,
    page_ids: Vec<ObjectId>,
}

impl PdfReader {
    /// PDFファイルを開いてPdfReaderを作成する。
    pub fn open(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let path = path.as_ref();
        let doc = Document::load(path).map_err(|e| {
            PdfCompressError::document_open(format!("{}: {}", path.display(), e))
        })?;
        Ok(Self::from_document(doc))
    }

    /// メモリ上のPDFからPdfReaderを作成する。
    pub fn from_bytes(data: &[u8]) -> crate::error::Result<Self> {
        let doc =
            Document::load_mem(data).map_err(|e| PdfCompressError::document_open(e.to_string()))?;
        Ok(Self::from_document(doc))
    }

    fn from_document(doc: Document) -> Self {
        let page_ids = doc.get_pages().into_values().collect();
        Self { doc, page_ids }
    }

    /// 内部のlopdf Documentへの参照を返す。
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// ページ辞書の属性を取得する（Parent経由の継承も考慮）。
    fn inherited_attribute<'a>(&'a self, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
        let mut current = dict;
        // 壊れたページツリーの循環に備えて深さを制限する
        for _ in 0..MAX_TREE_DEPTH {
            if let Ok(obj) = current.get(key) {
                return self.doc.dereference(obj).ok().map(|(_, obj)| obj);
            }
            let parent_id = current.get(b"Parent").and_then(Object::as_reference).ok()?;
            current = self.doc.get_dictionary(parent_id).ok()?;
        }
        None
    }

    /// `[x0 y0 x1 y1]` 形式の矩形を正規化して読む。要素は間接参照でもよい。
    fn read_box(&self, obj: &Object) -> Option<[f64; 4]> {
        let values = obj
            .as_array()
            .ok()?
            .iter()
            .map(|item| match self.doc.dereference(item).ok()?.1 {
                Object::Integer(i) => Some(*i as f64),
                Object::Real(f) => Some(*f as f64),
                _ => None,
            })
            .collect::<Option<Vec<f64>>>()?;
        let &[x0, y0, x1, y1] = values.as_slice() else {
            return None;
        };
        let rect = [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)];
        rect.iter().all(|v| v.is_finite()).then_some(rect)
    }

    /// ページの見える矩形（CropBoxをMediaBoxで切り取ったもの）とその原点、回転角を返す。
    ///
    /// 寸法が読めない・面積が0の場合は警告を出してUS Letterを使う。
    fn page_geometry(&self, page_id: ObjectId) -> crate::error::Result<PageGeometry> {
        let page_dict = self.doc.get_dictionary(page_id)?;

        let media_box = self
            .inherited_attribute(page_dict, b"MediaBox")
            .and_then(|obj| self.read_box(obj))
            .filter(|b| box_rect(b).is_valid());
        let Some(media_box) = media_box else {
            tracing::warn!(
                page = ?page_id,
                "MediaBox missing or unusable, assuming {}x{}",
                DEFAULT_PAGE_SIZE.0,
                DEFAULT_PAGE_SIZE.1
            );
            return Ok(PageGeometry {
                rect: PageRect {
                    width: DEFAULT_PAGE_SIZE.0,
                    height: DEFAULT_PAGE_SIZE.1,
                },
                origin: (0.0, 0.0),
                rotation: self.page_rotation(page_dict),
            });
        };

        let visible = self
            .inherited_attribute(page_dict, b"CropBox")
            .and_then(|obj| self.read_box(obj))
            .map(|crop| {
                [
                    crop[0].max(media_box[0]),
                    crop[1].max(media_box[1]),
                    crop[2].min(media_box[2]),
                    crop[3].min(media_box[3]),
                ]
            })
            .filter(|b| box_rect(b).is_valid())
            .unwrap_or(media_box);

        Ok(PageGeometry {
            rect: box_rect(&visible),
            origin: (visible[0], visible[1]),
            rotation: self.page_rotation(page_dict),
        })
    }

    /// /Rotate を 0, 90, 180, 270 のいずれかにする。90の倍数でなければ0。
    fn page_rotation(&self, page_dict: &Dictionary) -> i64 {
        let Some(rotate) = self
            .inherited_attribute(page_dict, b"Rotate")
            .and_then(|obj| obj.as_i64().ok())
        else {
            return 0;
        };
        if rotate % 90 != 0 {
            tracing::warn!(rotate, "ignoring /Rotate that is not a multiple of 90");
            return 0;
        }
        rotate.rem_euclid(360)
    }

    /// リソース辞書（または参照）の /XObject を 名前→ObjectId の表にする。
    ///
    /// 間接参照でないXObjectはObjectIdを持たないため含めない。
    fn xobject_ids(&self, resources: &Object) -> crate::error::Result<HashMap<String, ObjectId>> {
        let (_, resources) = self.doc.dereference(resources)?;
        let Ok(resources) = resources.as_dict() else {
            return Ok(HashMap::new());
        };
        self.xobject_ids_from_dict(resources)
    }

    fn xobject_ids_from_dict(
        &self,
        resources: &Dictionary,
    ) -> crate::error::Result<HashMap<String, ObjectId>> {
        let xobject_entry = match resources.get(b"XObject") {
            Ok(entry) => entry,
            Err(_) => return Ok(HashMap::new()),
        };
        let (_, xobject_entry) = self.doc.dereference(xobject_entry)?;
        let Ok(xobject_dict) = xobject_entry.as_dict() else {
            return Ok(HashMap::new());
        };

        Ok(xobject_dict
            .iter()
            .filter_map(|(name, value)| match value {
                Object::Reference(id) => Some((String::from_utf8_lossy(name).into_owned(), *id)),
                _ => None,
            })
            .collect())
    }

    /// ページのXObject表（ページ直下と継承分を合わせたもの）
    fn page_xobject_ids(&self, page_id: ObjectId) -> crate::error::Result<HashMap<String, ObjectId>> {
        let (resource_dict, resource_ids) = self.doc.get_page_resources(page_id)?;

        let mut ids = HashMap::new();
        // 継承分を先に入れ、ページ直下の定義で上書きする
        for res_id in resource_ids.iter().rev() {
            let dict = self.doc.get_dictionary(*res_id)?;
            ids.extend(self.xobject_ids_from_dict(dict)?);
        }
        if let Some(dict) = resource_dict {
            ids.extend(self.xobject_ids_from_dict(dict)?);
        }
        Ok(ids)
    }

    /// コンテンツ中のDoを追跡して画像の配置を出現順に集める。
    /// Form XObjectの中の画像もFormのMatrixを合成して含める。
    fn collect_image_refs(
        &self,
        content: &[u8],
        xobjects: &HashMap<String, ObjectId>,
        base: &Matrix,
        depth: u8,
        out: &mut Vec<ImageRef>,
    ) -> crate::error::Result<()> {
        for placement in extract_xobject_placements(content)? {
            let Some(&id) = xobjects.get(&placement.name) else {
                tracing::debug!(name = %placement.name, "Do references unknown XObject");
                continue;
            };
            let Ok(stream) = self.doc.get_object(id).and_then(Object::as_stream) else {
                continue;
            };
            let ctm = placement.ctm.multiply(base);

            match stream.dict.get(b"Subtype").and_then(Object::as_name) {
                Ok(b"Image") => out.push(ImageRef {
                    id,
                    bbox: ctm_to_bbox(&ctm),
                }),
                Ok(b"Form") if depth < MAX_FORM_DEPTH => {
                    let matrix = stream
                        .dict
                        .get(b"Matrix")
                        .and_then(Object::as_array)
                        .ok()
                        .and_then(|m| Matrix::from_operands(m).ok().flatten())
                        .unwrap_or_else(Matrix::identity);
                    let form_ctm = matrix.multiply(&ctm);
                    let form_xobjects = match stream.dict.get(b"Resources") {
                        Ok(res) => self.xobject_ids(res)?,
                        Err(_) => xobjects.clone(),
                    };
                    let form_content = stream
                        .decompressed_content()
                        .unwrap_or_else(|_| stream.content.clone());
                    if let Err(e) = self.collect_image_refs(
                        &form_content,
                        &form_xobjects,
                        &form_ctm,
                        depth + 1,
                        out,
                    ) {
                        tracing::warn!(form = ?id, error = %e, "skipping unreadable form XObject");
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// ページ番号(0-indexed)からObjectIdを取得する。
    fn get_page_id(&self, index: u32) -> crate::error::Result<ObjectId> {
        self.page_ids
            .get(index as usize)
            .copied()
            .ok_or_else(|| PdfCompressError::pdf_read(format!("page {} not found", index + 1)))
    }
}

impl DocumentReader for PdfReader {
    fn page_count(&self) -> u32 {
        self.page_ids.len() as u32
    }

    /// ページを読み取る。寸法・コンテンツ・フォントが壊れている場合は警告を出して
    /// 既定のサイズ、空のテキスト・画像として扱う。
    fn get_page(&self, index: u32) -> crate::error::Result<SourcePage> {
        let page_id = self.get_page_id(index)?;
        let PageGeometry {
            rect,
            origin: (ox, oy),
            rotation,
        } = self.page_geometry(page_id)?;

        let content = self.doc.get_page_content(page_id).unwrap_or_else(|e| {
            tracing::warn!(page = index + 1, error = %e, "cannot read page content");
            Vec::new()
        });

        let fonts = font::parse_page_fonts(&self.doc, page_id).unwrap_or_else(|e| {
            tracing::warn!(page = index + 1, error = %e, "cannot read page fonts");
            HashMap::new()
        });

        let mut text_spans = text_state::extract_text_spans(&content, &fonts).unwrap_or_else(|e| {
            tracing::warn!(page = index + 1, error = %e, "cannot extract text");
            Vec::new()
        });
        for span in &mut text_spans {
            span.bbox = span.bbox.offset(ox, oy);
        }

        let mut image_refs = Vec::new();
        let images = self.page_xobject_ids(page_id).and_then(|xobjects| {
            self.collect_image_refs(&content, &xobjects, &Matrix::identity(), 0, &mut image_refs)
        });
        if let Err(e) = images {
            tracing::warn!(page = index + 1, error = %e, "cannot locate images");
            image_refs.clear();
        }
        for image in &mut image_refs {
            image.bbox = image.bbox.offset(ox, oy);
        }

        tracing::debug!(
            page = index + 1,
            spans = text_spans.len(),
            images = image_refs.len(),
            "page read"
        );

        Ok(SourcePage {
            index,
            rect,
            rotation,
            text_spans,
            image_refs,
        })
    }

    fn extract_image(&self, image: &ImageRef) -> crate::error::Result<ExtractedImage> {
        image_xobject::extract_image(&self.doc, image.id)
    }
}
