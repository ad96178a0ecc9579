// ページフォントの解析: エンコーディング、ToUnicode CMap、グリフ幅

use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::PdfCompressError;

/// フォントエンコーディング
#[derive(Debug, Clone)]
pub enum FontEncoding {
    /// 1バイト符号。WinAnsiを基準に Differences で上書きする。
    Simple { differences: HashMap<u8, char> },
    /// 2バイトCID符号 (Type0 / Identity-H)
    IdentityH,
}

/// テキスト抽出に必要な範囲で解析したフォント
#[derive(Debug, Clone)]
pub struct PageFont {
    encoding: FontEncoding,
    to_unicode: Option<HashMap<u16, String>>,
    widths: HashMap<u16, f64>,
    default_width: f64,
}

impl Default for PageFont {
    fn default() -> Self {
        PageFont {
            encoding: FontEncoding::Simple {
                differences: HashMap::new(),
            },
            to_unicode: None,
            widths: HashMap::new(),
            default_width: 500.0,
        }
    }
}

impl PageFont {
    pub fn encoding(&self) -> &FontEncoding {
        &self.encoding
    }

    /// 1バイト符号のフォントか（Twのワードスペーシングは1バイト符号32にのみ効く）。
    pub fn is_single_byte(&self) -> bool {
        matches!(self.encoding, FontEncoding::Simple { .. })
    }

    /// 文字列オペランドのバイト列を文字コード列に分解する。
    pub fn char_codes(&self, bytes: &[u8]) -> Vec<u16> {
        match self.encoding {
            FontEncoding::IdentityH => bytes
                .chunks_exact(2)
                .map(|pair| ((pair[0] as u16) << 8) | pair[1] as u16)
                .collect(),
            FontEncoding::Simple { .. } => bytes.iter().map(|&b| b as u16).collect(),
        }
    }

    /// 文字コード列をUnicode文字列に変換する。対応付けできない符号は捨てる。
    pub fn decode(&self, codes: &[u16]) -> String {
        let mut text = String::new();
        for &code in codes {
            if let Some(mapped) = self.to_unicode.as_ref().and_then(|m| m.get(&code)) {
                text.push_str(mapped);
                continue;
            }
            match &self.encoding {
                FontEncoding::Simple { differences } => {
                    let byte = code as u8;
                    if let Some(c) = differences.get(&byte).copied().or_else(|| win_ansi_to_unicode(byte)) {
                        text.push(c);
                    }
                }
                // ToUnicodeなしのCIDはUnicodeに戻せない
                FontEncoding::IdentityH => {}
            }
        }
        text
    }

    /// 文字コードの幅を返す（1/1000テキスト空間単位）
    pub fn glyph_width(&self, code: u16) -> f64 {
        self.widths
            .get(&code)
            .copied()
            .unwrap_or(self.default_width)
    }
}

/// 指定ページのリソースから全フォントを解析する。
///
/// 個々のフォントの解析に失敗した場合はデフォルト（WinAnsi、幅500）で代用する。
pub fn parse_page_fonts(
    doc: &Document,
    page_id: ObjectId,
) -> crate::error::Result<HashMap<String, PageFont>> {
    let (resource_dict, resource_ids) = doc.get_page_resources(page_id)?;

    let mut font_entries: Vec<(Vec<u8>, Object)> = Vec::new();
    if let Some(dict) = resource_dict {
        collect_font_entries(doc, dict, &mut font_entries)?;
    }
    for res_id in resource_ids {
        let dict = doc.get_dictionary(res_id)?;
        collect_font_entries(doc, dict, &mut font_entries)?;
    }

    let mut fonts = HashMap::new();
    for (name_bytes, font_ref) in font_entries {
        let name = String::from_utf8_lossy(&name_bytes).into_owned();
        if fonts.contains_key(&name) {
            // ページ直下のResourcesが継承より優先
            continue;
        }
        let parsed = doc
            .dereference(&font_ref)
            .map_err(PdfCompressError::from)
            .and_then(|(_, obj)| obj.as_dict().map_err(PdfCompressError::from))
            .and_then(|dict| parse_single_font(doc, dict));
        match parsed {
            Ok(font) => {
                fonts.insert(name, font);
            }
            Err(e) => {
                tracing::debug!(font = %name, error = %e, "falling back to default font metrics");
                fonts.insert(name, PageFont::default());
            }
        }
    }

    Ok(fonts)
}

/// Resources辞書の /Font エントリを (名前, フォント参照) の列として集める。
fn collect_font_entries(
    doc: &Document,
    resources: &Dictionary,
    out: &mut Vec<(Vec<u8>, Object)>,
) -> crate::error::Result<()> {
    let Ok(font_obj) = resources.get(b"Font") else {
        return Ok(());
    };
    let (_, font_obj) = doc.dereference(font_obj)?;
    let Ok(font_dict) = font_obj.as_dict() else {
        return Ok(());
    };
    out.extend(font_dict.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(())
}

/// 単一フォント辞書からPageFontを構築
fn parse_single_font(doc: &Document, font_dict: &Dictionary) -> crate::error::Result<PageFont> {
    let subtype = font_dict
        .get(b"Subtype")
        .and_then(Object::as_name)
        .map(|n| String::from_utf8_lossy(n).into_owned())
        .unwrap_or_default();

    let to_unicode = match font_dict.get(b"ToUnicode") {
        Ok(obj) => {
            let (_, obj) = doc.dereference(obj)?;
            match obj.as_stream() {
                Ok(stream) => {
                    let data = stream
                        .decompressed_content()
                        .unwrap_or_else(|_| stream.content.clone());
                    Some(parse_to_unicode_cmap(&data))
                }
                Err(_) => None,
            }
        }
        Err(_) => None,
    };

    let mut font = if subtype == "Type0" {
        parse_type0_font(doc, font_dict)?
    } else {
        parse_simple_font(doc, font_dict)?
    };
    font.to_unicode = to_unicode.filter(|m| !m.is_empty());
    Ok(font)
}

/// Type1 / TrueType / Type3 などの1バイト符号フォント
fn parse_simple_font(doc: &Document, font_dict: &Dictionary) -> crate::error::Result<PageFont> {
    let encoding = parse_encoding(doc, font_dict)?;

    let mut widths = HashMap::new();
    let first_char = font_dict
        .get(b"FirstChar")
        .and_then(Object::as_i64)
        .unwrap_or(0);
    if let Ok(widths_obj) = font_dict.get(b"Widths") {
        let (_, widths_obj) = doc.dereference(widths_obj)?;
        if let Ok(arr) = widths_obj.as_array() {
            for (i, w) in arr.iter().enumerate() {
                if let Some(w) = number(w) {
                    let code = first_char + i as i64;
                    if (0..=255).contains(&code) {
                        widths.insert(code as u16, w);
                    }
                }
            }
        }
    }

    let missing_width = font_dict
        .get(b"FontDescriptor")
        .ok()
        .and_then(|d| doc.dereference(d).ok())
        .and_then(|(_, d)| d.as_dict().ok())
        .and_then(|d| d.get(b"MissingWidth").ok())
        .and_then(number)
        .filter(|w| *w > 0.0);

    Ok(PageFont {
        encoding,
        to_unicode: None,
        widths,
        default_width: missing_width.unwrap_or(500.0),
    })
}

/// Type0 (CID) フォント。幅は DescendantFonts[0] の DW / W から取る。
fn parse_type0_font(doc: &Document, font_dict: &Dictionary) -> crate::error::Result<PageFont> {
    let mut widths = HashMap::new();
    let mut default_width = 1000.0;

    let descendant = font_dict
        .get(b"DescendantFonts")
        .ok()
        .and_then(|o| doc.dereference(o).ok())
        .and_then(|(_, o)| o.as_array().ok())
        .and_then(|arr| arr.first())
        .and_then(|o| doc.dereference(o).ok())
        .and_then(|(_, o)| o.as_dict().ok());

    if let Some(cid_font) = descendant {
        if let Some(dw) = cid_font.get(b"DW").ok().and_then(number) {
            default_width = dw;
        }
        if let Ok(w_obj) = cid_font.get(b"W") {
            let (_, w_obj) = doc.dereference(w_obj)?;
            if let Ok(arr) = w_obj.as_array() {
                parse_cid_widths(doc, arr, &mut widths);
            }
        }
    }

    Ok(PageFont {
        encoding: FontEncoding::IdentityH,
        to_unicode: None,
        widths,
        default_width,
    })
}

/// W配列: `c [w1 w2 ...]` または `c_first c_last w` の繰り返し
fn parse_cid_widths(doc: &Document, arr: &[Object], widths: &mut HashMap<u16, f64>) {
    let mut i = 0;
    while i < arr.len() {
        let Some(first) = arr[i].as_i64().ok() else {
            i += 1;
            continue;
        };
        let next = arr
            .get(i + 1)
            .and_then(|o| doc.dereference(o).ok())
            .map(|(_, o)| o);
        match next {
            Some(Object::Array(ws)) => {
                for (offset, w) in ws.iter().enumerate() {
                    if let Some(w) = number(w) {
                        let cid = first + offset as i64;
                        if (0..=u16::MAX as i64).contains(&cid) {
                            widths.insert(cid as u16, w);
                        }
                    }
                }
                i += 2;
            }
            Some(last) => {
                let (Ok(last), Some(w)) = (last.as_i64(), arr.get(i + 2).and_then(number)) else {
                    i += 3;
                    continue;
                };
                let first = first.clamp(0, u16::MAX as i64);
                let last = last.clamp(0, u16::MAX as i64);
                for cid in first..=last {
                    widths.insert(cid as u16, w);
                }
                i += 3;
            }
            None => break,
        }
    }
}

/// エンコーディングの解析
fn parse_encoding(doc: &Document, font_dict: &Dictionary) -> crate::error::Result<FontEncoding> {
    let mut differences = HashMap::new();

    if let Ok(enc_obj) = font_dict.get(b"Encoding") {
        let (_, enc_obj) = doc.dereference(enc_obj)?;
        // 名前付きエンコーディング（MacRoman等）はWinAnsiで近似する
        if let Ok(enc_dict) = enc_obj.as_dict()
            && let Ok(diff_obj) = enc_dict.get(b"Differences")
        {
            let (_, diff_obj) = doc.dereference(diff_obj)?;
            if let Ok(arr) = diff_obj.as_array() {
                parse_differences(arr, &mut differences);
            }
        }
    }

    Ok(FontEncoding::Simple { differences })
}

/// Differences配列: `code /name1 /name2 ... code /name ...`
fn parse_differences(arr: &[Object], differences: &mut HashMap<u8, char>) {
    let mut code: Option<i64> = None;
    for item in arr {
        match item {
            Object::Integer(c) => code = Some(*c),
            Object::Name(name) => {
                if let Some(c) = code {
                    if let (Ok(byte), Some(ch)) = (
                        u8::try_from(c),
                        glyph_name_to_unicode(&String::from_utf8_lossy(name)),
                    ) {
                        differences.insert(byte, ch);
                    }
                    code = Some(c + 1);
                }
            }
            _ => {}
        }
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// CMapのトークン
#[derive(Debug, PartialEq)]
enum CMapToken {
    Hex(Vec<u8>),
    ArrayStart,
    ArrayEnd,
    Keyword(String),
}

fn tokenize_cmap(data: &[u8]) -> Vec<CMapToken> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'<' => {
                let start = i + 1;
                let mut end = start;
                while end < data.len() && data[end] != b'>' {
                    end += 1;
                }
                let digits: Vec<u8> = data[start..end]
                    .iter()
                    .copied()
                    .filter(u8::is_ascii_hexdigit)
                    .collect();
                let bytes = digits
                    .chunks(2)
                    .filter_map(|pair| {
                        let s = std::str::from_utf8(pair).ok()?;
                        let v = u8::from_str_radix(s, 16).ok()?;
                        // 奇数桁は末尾0補完
                        Some(if pair.len() == 1 { v << 4 } else { v })
                    })
                    .collect();
                tokens.push(CMapToken::Hex(bytes));
                i = end + 1;
            }
            b'[' => {
                tokens.push(CMapToken::ArrayStart);
                i += 1;
            }
            b']' => {
                tokens.push(CMapToken::ArrayEnd);
                i += 1;
            }
            b'%' => {
                while i < data.len() && data[i] != b'\n' && data[i] != b'\r' {
                    i += 1;
                }
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < data.len() && data[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                tokens.push(CMapToken::Keyword(
                    String::from_utf8_lossy(&data[start..i]).into_owned(),
                ));
            }
            _ => i += 1,
        }
    }
    tokens
}

fn hex_to_code(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .rev()
        .take(2)
        .rev()
        .fold(0u16, |acc, &b| (acc << 8) | b as u16)
}

fn utf16be_to_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => ((*hi as u16) << 8) | *lo as u16,
            [lo] => *lo as u16,
            _ => 0,
        })
        .collect();
    String::from_utf16_lossy(&units)
}

/// ToUnicode CMap の bfchar / bfrange を解析して 文字コード→文字列 の表を作る。
pub fn parse_to_unicode_cmap(data: &[u8]) -> HashMap<u16, String> {
    let tokens = tokenize_cmap(data);
    let mut map = HashMap::new();
    let mut i = 0;

    while i < tokens.len() {
        match &tokens[i] {
            CMapToken::Keyword(k) if k == "beginbfchar" => {
                i += 1;
                while i + 1 < tokens.len() {
                    match (&tokens[i], &tokens[i + 1]) {
                        (CMapToken::Hex(src), CMapToken::Hex(dst)) => {
                            map.insert(hex_to_code(src), utf16be_to_string(dst));
                            i += 2;
                        }
                        _ => break,
                    }
                }
            }
            CMapToken::Keyword(k) if k == "beginbfrange" => {
                i += 1;
                while i + 2 < tokens.len() {
                    let (CMapToken::Hex(lo), CMapToken::Hex(hi)) = (&tokens[i], &tokens[i + 1])
                    else {
                        break;
                    };
                    let lo = hex_to_code(lo);
                    let hi = hex_to_code(hi);
                    match &tokens[i + 2] {
                        CMapToken::Hex(dst) => {
                            let base = utf16be_to_string(dst);
                            for (offset, code) in (lo..=hi).enumerate() {
                                if let Some(s) = offset_last_char(&base, offset as u32) {
                                    map.insert(code, s);
                                }
                            }
                            i += 3;
                        }
                        CMapToken::ArrayStart => {
                            i += 3;
                            let mut code = lo;
                            while let Some(CMapToken::Hex(dst)) = tokens.get(i) {
                                if code <= hi {
                                    map.insert(code, utf16be_to_string(dst));
                                }
                                code = code.saturating_add(1);
                                i += 1;
                            }
                            if tokens.get(i) == Some(&CMapToken::ArrayEnd) {
                                i += 1;
                            }
                        }
                        _ => break,
                    }
                }
            }
            _ => i += 1,
        }
    }

    map
}

/// bfrangeの宛先文字列の最後の文字を offset だけ進める。
fn offset_last_char(base: &str, offset: u32) -> Option<String> {
    let mut chars: Vec<char> = base.chars().collect();
    let last = chars.pop()?;
    let shifted = char::from_u32(last as u32 + offset)?;
    chars.push(shifted);
    Some(chars.into_iter().collect())
}

/// WinAnsiEncodingの 0x80-0x9F（Windows-1252 固有部分）
const WIN_ANSI_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), // 0x80 €
    None,
    Some('\u{201A}'), // ‚
    Some('\u{0192}'), // ƒ
    Some('\u{201E}'), // „
    Some('\u{2026}'), // …
    Some('\u{2020}'), // †
    Some('\u{2021}'), // ‡
    Some('\u{02C6}'), // ˆ
    Some('\u{2030}'), // ‰
    Some('\u{0160}'), // Š
    Some('\u{2039}'), // ‹
    Some('\u{0152}'), // Œ
    None,
    Some('\u{017D}'), // Ž
    None,
    None, // 0x90
    Some('\u{2018}'), // '
    Some('\u{2019}'), // '
    Some('\u{201C}'), // "
    Some('\u{201D}'), // "
    Some('\u{2022}'), // •
    Some('\u{2013}'), // –
    Some('\u{2014}'), // —
    Some('\u{02DC}'), // ˜
    Some('\u{2122}'), // ™
    Some('\u{0161}'), // š
    Some('\u{203A}'), // ›
    Some('\u{0153}'), // œ
    None,
    Some('\u{017E}'), // ž
    Some('\u{0178}'), // Ÿ
];

/// WinAnsi文字コード→Unicode変換
pub fn win_ansi_to_unicode(code: u8) -> Option<char> {
    match code {
        0x20..=0x7E | 0xA0..=0xFF => Some(code as char),
        0x80..=0x9F => WIN_ANSI_HIGH[(code - 0x80) as usize],
        _ => None,
    }
}

/// Unicode→WinAnsi文字コード変換（逆引き）
pub fn unicode_to_win_ansi(c: char) -> Option<u8> {
    match c as u32 {
        0x20..=0x7E | 0xA0..=0xFF => Some(c as u8),
        _ => WIN_ANSI_HIGH
            .iter()
            .position(|&m| m == Some(c))
            .map(|i| 0x80 + i as u8),
    }
}

/// グリフ名→Unicode変換（Adobe Glyph Listの主要エントリ）
fn glyph_name_to_unicode(name: &str) -> Option<char> {
    let c = match name {
        "space" => ' ',
        "exclam" => '!',
        "quotedbl" => '"',
        "numbersign" => '#',
        "dollar" => '$',
        "percent" => '%',
        "ampersand" => '&',
        "quotesingle" => '\'',
        "parenleft" => '(',
        "parenright" => ')',
        "asterisk" => '*',
        "plus" => '+',
        "comma" => ',',
        "hyphen" | "minus" => '-',
        "period" => '.',
        "slash" => '/',
        "zero" => '0',
        "one" => '1',
        "two" => '2',
        "three" => '3',
        "four" => '4',
        "five" => '5',
        "six" => '6',
        "seven" => '7',
        "eight" => '8',
        "nine" => '9',
        "colon" => ':',
        "semicolon" => ';',
        "less" => '<',
        "equal" => '=',
        "greater" => '>',
        "question" => '?',
        "at" => '@',
        "bracketleft" => '[',
        "backslash" => '\\',
        "bracketright" => ']',
        "underscore" => '_',
        "braceleft" => '{',
        "bar" => '|',
        "braceright" => '}',
        "quoteleft" => '\u{2018}',
        "quoteright" => '\u{2019}',
        "quotedblleft" => '\u{201C}',
        "quotedblright" => '\u{201D}',
        "bullet" => '\u{2022}',
        "endash" => '\u{2013}',
        "emdash" => '\u{2014}',
        "ellipsis" => '\u{2026}',
        "exclamdown" => '¡',
        "questiondown" => '¿',
        "ordfeminine" => 'ª',
        "ordmasculine" => 'º',
        "degree" => '°',
        "aacute" => 'á',
        "eacute" => 'é',
        "iacute" => 'í',
        "oacute" => 'ó',
        "uacute" => 'ú',
        "ntilde" => 'ñ',
        "udieresis" => 'ü',
        "Aacute" => 'Á',
        "Eacute" => 'É',
        "Iacute" => 'Í',
        "Oacute" => 'Ó',
        "Uacute" => 'Ú',
        "Ntilde" => 'Ñ',
        "Udieresis" => 'Ü',
        "ccedilla" => 'ç',
        "Ccedilla" => 'Ç',
        _ if name.len() == 1 => return name.chars().next(),
        _ if name.starts_with("uni") && name.len() == 7 => {
            return u32::from_str_radix(&name[3..], 16)
                .ok()
                .and_then(char::from_u32);
        }
        _ => return None,
    };
    Some(c)
}
