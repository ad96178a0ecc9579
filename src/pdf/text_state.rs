use std::collections::HashMap;

use lopdf::Object;
use lopdf::content::Content;

use crate::pdf::TextSpan;
use crate::pdf::content_stream::{BBox, Matrix, operand_to_f64};
use crate::pdf::font::PageFont;

/// ベースラインから上端までの高さ（フォントサイズ比）
pub const ASCENT_RATIO: f64 = 0.8;
/// ベースラインから下端までの深さ（フォントサイズ比）
pub const DESCENT_RATIO: f64 = 0.2;

/// TJ配列の位置調整がこの値（1/1000 em）を超えて右に空く場合は単語区切りとみなす。
const TJ_WORD_GAP: f64 = 250.0;

/// q/Q で保存・復元される状態（CTMとテキスト状態パラメータ）
#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    font_name: String,
    font_size: f64,
    char_spacing: f64,
    word_spacing: f64,
    horizontal_scaling: f64,
    text_rise: f64,
    text_leading: f64,
}

impl GraphicsState {
    fn new() -> Self {
        GraphicsState {
            ctm: Matrix::identity(),
            font_name: String::new(),
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scaling: 100.0,
            text_rise: 0.0,
            text_leading: 0.0,
        }
    }
}

/// BT...ET内のテキスト行列
struct TextObject {
    text_matrix: Matrix,
    text_line_matrix: Matrix,
}

impl TextObject {
    fn new() -> Self {
        TextObject {
            text_matrix: Matrix::identity(),
            text_line_matrix: Matrix::identity(),
        }
    }

    /// tx ty Td
    fn move_line(&mut self, tx: f64, ty: f64) {
        self.text_line_matrix = Matrix::translate(tx, ty).multiply(&self.text_line_matrix);
        self.text_matrix = self.text_line_matrix.clone();
    }

    fn set_matrix(&mut self, m: Matrix) {
        self.text_matrix = m.clone();
        self.text_line_matrix = m;
    }
}

/// Tj/TJ の1要素
enum ShowItem<'a> {
    Text(&'a [u8]),
    Adjustment(f64),
}

/// コンテンツストリームからテキスト描画を抽出し、位置付きテキスト断片として返す。
///
/// 1回のTj/TJ/'/"呼び出しが1つの[`TextSpan`]になる。BBoxはグリフ幅から求めた
/// 送り幅と、フォントサイズに対する固定の上端/下端比から計算する。
/// `fonts` に無いフォント名はWinAnsi・幅500として扱う。
pub fn extract_text_spans(
    content_bytes: &[u8],
    fonts: &HashMap<String, PageFont>,
) -> crate::error::Result<Vec<TextSpan>> {
    if content_bytes.is_empty() {
        return Ok(Vec::new());
    }

    let content = Content::decode(content_bytes)
        .map_err(|e| crate::error::PdfCompressError::content_stream(e.to_string()))?;

    let default_font = PageFont::default();
    let mut spans: Vec<TextSpan> = Vec::new();
    let mut gs_stack: Vec<GraphicsState> = Vec::new();
    let mut gs = GraphicsState::new();
    let mut text: Option<TextObject> = None;

    for op in &content.operations {
        let operands = &op.operands;
        match op.operator.as_str() {
            "q" => gs_stack.push(gs.clone()),
            "Q" => {
                if let Some(saved) = gs_stack.pop() {
                    gs = saved;
                }
            }
            "cm" => {
                if let Some(cm) = Matrix::from_operands(operands)? {
                    gs.ctm = cm.multiply(&gs.ctm);
                }
            }
            "BT" => text = Some(TextObject::new()),
            "ET" => text = None,

            // テキスト状態パラメータ（BT外でも有効）
            "Tf" => {
                if let [name, size] = operands.as_slice() {
                    if let Ok(name_bytes) = name.as_name() {
                        gs.font_name = String::from_utf8_lossy(name_bytes).into_owned();
                    }
                    if let Ok(size) = operand_to_f64(size) {
                        gs.font_size = size;
                    }
                }
            }
            "Tc" => set_param(operands, &mut gs.char_spacing)?,
            "Tw" => set_param(operands, &mut gs.word_spacing)?,
            "Tz" => set_param(operands, &mut gs.horizontal_scaling)?,
            "Ts" => set_param(operands, &mut gs.text_rise)?,
            "TL" => set_param(operands, &mut gs.text_leading)?,

            // テキスト位置オペレータ（BT内のみ）
            "Tm" => {
                if let Some(tobj) = text.as_mut()
                    && let Some(m) = Matrix::from_operands(operands)?
                {
                    tobj.set_matrix(m);
                }
            }
            "Td" | "TD" => {
                if let Some(tobj) = text.as_mut()
                    && let [tx, ty] = operands.as_slice()
                {
                    let tx = operand_to_f64(tx)?;
                    let ty = operand_to_f64(ty)?;
                    if op.operator == "TD" {
                        // tx ty TD = -ty TL tx ty Td
                        gs.text_leading = -ty;
                    }
                    tobj.move_line(tx, ty);
                }
            }
            "T*" => {
                if let Some(tobj) = text.as_mut() {
                    tobj.move_line(0.0, -gs.text_leading);
                }
            }

            // テキスト描画オペレータ
            "Tj" | "'" | "\"" | "TJ" => {
                let Some(tobj) = text.as_mut() else {
                    continue;
                };
                let shown = match op.operator.as_str() {
                    "Tj" => operands.first(),
                    "'" => {
                        // ' = T* string Tj
                        tobj.move_line(0.0, -gs.text_leading);
                        operands.first()
                    }
                    "\"" => {
                        // aw ac string " = aw Tw ac Tc T* string Tj
                        if let [aw, ac, _] = operands.as_slice() {
                            gs.word_spacing = operand_to_f64(aw)?;
                            gs.char_spacing = operand_to_f64(ac)?;
                        }
                        tobj.move_line(0.0, -gs.text_leading);
                        operands.get(2)
                    }
                    _ => operands.first(),
                };
                let Some(shown) = shown else {
                    continue;
                };
                let items = show_items(shown);
                let font = fonts.get(&gs.font_name).unwrap_or(&default_font);
                if let Some(span) = show_text(&gs, tobj, font, &items) {
                    spans.push(span);
                }
            }
            _ => {}
        }
    }

    Ok(spans)
}

fn set_param(operands: &[Object], target: &mut f64) -> crate::error::Result<()> {
    if let [value] = operands {
        *target = operand_to_f64(value)?;
    }
    Ok(())
}

/// Tjの文字列またはTJの配列を要素列に展開する。
fn show_items(operand: &Object) -> Vec<ShowItem<'_>> {
    match operand {
        Object::String(bytes, _) => vec![ShowItem::Text(bytes)],
        Object::Array(arr) => arr
            .iter()
            .filter_map(|item| match item {
                Object::String(bytes, _) => Some(ShowItem::Text(bytes)),
                Object::Integer(i) => Some(ShowItem::Adjustment(*i as f64)),
                Object::Real(r) => Some(ShowItem::Adjustment(*r as f64)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// 文字列を描画し、テキスト行列を送り幅だけ進める。
///
/// 描画したグリフが1つも無ければ `None`。
fn show_text(
    gs: &GraphicsState,
    tobj: &mut TextObject,
    font: &PageFont,
    items: &[ShowItem<'_>],
) -> Option<TextSpan> {
    let h_scale = gs.horizontal_scaling / 100.0;
    let start_matrix = tobj.text_matrix.clone();
    let mut advance = 0.0;
    let mut text = String::new();
    let mut glyph_count = 0usize;

    for item in items {
        match item {
            ShowItem::Text(bytes) => {
                let codes = font.char_codes(bytes);
                for &code in &codes {
                    let w0 = font.glyph_width(code) / 1000.0;
                    let word_spacing = if font.is_single_byte() && code == 32 {
                        gs.word_spacing
                    } else {
                        0.0
                    };
                    advance += (w0 * gs.font_size + gs.char_spacing + word_spacing) * h_scale;
                }
                glyph_count += codes.len();
                text.push_str(&font.decode(&codes));
            }
            ShowItem::Adjustment(adj) => {
                advance -= adj / 1000.0 * gs.font_size * h_scale;
                if *adj < -TJ_WORD_GAP && !text.is_empty() && !text.ends_with(' ') {
                    text.push(' ');
                }
            }
        }
    }

    tobj.text_matrix = Matrix::translate(advance, 0.0).multiply(&tobj.text_matrix);

    if glyph_count == 0 {
        return None;
    }

    let trm = start_matrix.multiply(&gs.ctm);
    let (x0, y0) = trm.transform_point(0.0, gs.text_rise);
    let (x1, y1) = trm.transform_point(advance, gs.text_rise);
    let size = gs.font_size.abs() * trm.vertical_scale();

    let baseline_low = y0.min(y1);
    let baseline_high = y0.max(y1);
    Some(TextSpan {
        text,
        font_size: size,
        bbox: BBox {
            x_min: x0.min(x1),
            y_min: baseline_low - DESCENT_RATIO * size,
            x_max: x0.max(x1),
            y_max: baseline_high + ASCENT_RATIO * size,
        },
    })
}
